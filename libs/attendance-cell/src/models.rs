// libs/attendance-cell/src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use shared_config::AppConfig;

// ==============================================================================
// NOTIFICATION FEED MODELS
// ==============================================================================

/// A notification as delivered by the platform's feed. Only category and
/// title participate in attendance confirmation; the rest is carried for the
/// UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub subject_id: Uuid,
    pub category: String,
    pub title: String,
    pub body: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Outcome of one attendance lookup, classified once at the port boundary.
/// Transition logic depends only on the tag, never on raw field shapes.
#[derive(Debug, Clone)]
pub enum LookupOutcome {
    Found(Notification),
    NotFound,
    TransportError,
}

/// One performed lookup. Drives the round's attempt count and nothing else;
/// attempts are not retained beyond the current round.
#[derive(Debug, Clone)]
pub struct PollAttempt {
    pub timestamp: DateTime<Utc>,
    pub outcome: LookupOutcome,
}

// ==============================================================================
// SESSION STATE
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceState {
    Idle,
    Polling,
    Confirmed,
    Exhausted,
    CoolingDown,
}

impl fmt::Display for AttendanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttendanceState::Idle => write!(f, "idle"),
            AttendanceState::Polling => write!(f, "polling"),
            AttendanceState::Confirmed => write!(f, "confirmed"),
            AttendanceState::Exhausted => write!(f, "exhausted"),
            AttendanceState::CoolingDown => write!(f, "cooling_down"),
        }
    }
}

/// Immutable view of an attendance session, published to observers on every
/// transition and cooldown tick.
#[derive(Debug, Clone, Serialize)]
pub struct AttendanceSnapshot {
    pub subject_id: Option<Uuid>,
    pub state: AttendanceState,
    pub attempt_count: u32,
    pub cooldown_remaining_seconds: u32,
}

impl AttendanceSnapshot {
    pub fn idle() -> Self {
        Self {
            subject_id: None,
            state: AttendanceState::Idle,
            attempt_count: 0,
            cooldown_remaining_seconds: 0,
        }
    }
}

// ==============================================================================
// POLICY
// ==============================================================================

/// Bounds and markers for attendance polling. Values are configuration, not
/// literals, so the policy stays testable.
#[derive(Debug, Clone)]
pub struct AttendancePolicy {
    pub max_attempts: u32,
    pub attempt_spacing_seconds: u64,
    pub cooldown_seconds: u32,
    pub notification_category: String,
    pub confirmation_title: String,
}

impl AttendancePolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            // a round always performs at least the immediate lookup
            max_attempts: config.attendance_max_attempts.max(1),
            attempt_spacing_seconds: config.attendance_attempt_spacing_seconds,
            cooldown_seconds: config.attendance_cooldown_seconds,
            notification_category: config.attendance_notification_category.clone(),
            confirmation_title: config.attendance_confirmation_title.clone(),
        }
    }
}

impl Default for AttendancePolicy {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}
