use std::env;
use tracing::warn;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_ATTEMPT_SPACING_SECONDS: u64 = 3;
const DEFAULT_COOLDOWN_SECONDS: u32 = 10;
const DEFAULT_NOTIFICATION_CATEGORY: &str = "attendance-confirmed";
const DEFAULT_CONFIRMATION_TITLE: &str = "QR scanned";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub attendance_max_attempts: u32,
    pub attendance_attempt_spacing_seconds: u64,
    pub attendance_cooldown_seconds: u32,
    pub attendance_notification_category: String,
    pub attendance_confirmation_title: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            attendance_max_attempts: parse_var("ATTENDANCE_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS),
            attendance_attempt_spacing_seconds: parse_var(
                "ATTENDANCE_ATTEMPT_SPACING_SECONDS",
                DEFAULT_ATTEMPT_SPACING_SECONDS,
            ),
            attendance_cooldown_seconds: parse_var(
                "ATTENDANCE_COOLDOWN_SECONDS",
                DEFAULT_COOLDOWN_SECONDS,
            ),
            attendance_notification_category: env::var("ATTENDANCE_NOTIFICATION_CATEGORY")
                .unwrap_or_else(|_| DEFAULT_NOTIFICATION_CATEGORY.to_string()),
            attendance_confirmation_title: env::var("ATTENDANCE_CONFIRMATION_TITLE")
                .unwrap_or_else(|_| DEFAULT_CONFIRMATION_TITLE.to_string()),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            attendance_max_attempts: DEFAULT_MAX_ATTEMPTS,
            attendance_attempt_spacing_seconds: DEFAULT_ATTEMPT_SPACING_SECONDS,
            attendance_cooldown_seconds: DEFAULT_COOLDOWN_SECONDS,
            attendance_notification_category: DEFAULT_NOTIFICATION_CATEGORY.to_string(),
            attendance_confirmation_title: DEFAULT_CONFIRMATION_TITLE.to_string(),
        }
    }
}

fn parse_var<T>(name: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display + Copy,
{
    match env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{} has an invalid value, using default {}", name, default);
            default
        }),
        Err(_) => default,
    }
}
