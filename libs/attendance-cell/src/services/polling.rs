// libs/attendance-cell/src/services/polling.rs
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_runtime::TaskHandle;

use crate::error::AttendanceError;
use crate::models::{
    AttendancePolicy, AttendanceSnapshot, AttendanceState, LookupOutcome, Notification,
    PollAttempt,
};
use crate::ports::NotificationLookupPort;

/// Drives bounded attendance-confirmation polling for one donor session.
///
/// Each round runs inside a single owned background task: the immediate
/// lookup, the spaced follow-up lookups, and the exhaustion cooldown all
/// live in that task, so cancelling the session aborts the task and no
/// scheduled lookup or countdown tick can fire afterward.
pub struct PollingController {
    policy: AttendancePolicy,
    lookup: Arc<dyn NotificationLookupPort>,
    inner: Arc<Mutex<SessionInner>>,
    state_rx: watch::Receiver<AttendanceSnapshot>,
}

struct SessionInner {
    snapshot: AttendanceSnapshot,
    confirmation: Option<Notification>,
    round: Option<TaskHandle>,
    epoch: u64,
    state_tx: watch::Sender<AttendanceSnapshot>,
}

impl SessionInner {
    fn publish(&self) {
        let _ = self.state_tx.send(self.snapshot.clone());
    }
}

impl PollingController {
    pub fn new(config: &AppConfig, lookup: Arc<dyn NotificationLookupPort>) -> Self {
        Self::with_policy(AttendancePolicy::from_config(config), lookup)
    }

    pub fn with_policy(policy: AttendancePolicy, lookup: Arc<dyn NotificationLookupPort>) -> Self {
        let (state_tx, state_rx) = watch::channel(AttendanceSnapshot::idle());
        let inner = SessionInner {
            snapshot: AttendanceSnapshot::idle(),
            confirmation: None,
            round: None,
            epoch: 0,
            state_tx,
        };

        Self {
            policy,
            lookup,
            inner: Arc::new(Mutex::new(inner)),
            state_rx,
        }
    }

    /// Current session state.
    pub fn snapshot(&self) -> AttendanceSnapshot {
        self.state_rx.borrow().clone()
    }

    /// Watch receiver the screen reacts to. Updated on every transition and
    /// on every cooldown tick.
    pub fn subscribe(&self) -> watch::Receiver<AttendanceSnapshot> {
        self.state_rx.clone()
    }

    /// Begin a polling round for `subject_id` after the QR code was shown.
    ///
    /// Returns immediately; confirmation or exhaustion is reported through
    /// the watch channel. Calling while a round is already polling is an
    /// idempotent no-op.
    pub async fn start(&self, subject_id: Uuid) -> Result<(), AttendanceError> {
        let mut inner = self.inner.lock().await;

        match inner.snapshot.state {
            AttendanceState::Polling => {
                debug!("Polling already in progress, ignoring start for subject {}", subject_id);
                return Ok(());
            }
            AttendanceState::Idle => {}
            ref state => {
                warn!("Start requested from state {}, ignoring", state);
                return Err(AttendanceError::InvalidStartState {
                    state: state.clone(),
                });
            }
        }

        info!("Starting attendance polling round for subject {}", subject_id);
        self.begin_round(&mut inner, subject_id);
        Ok(())
    }

    /// Start a fresh round once an exhausted cooldown has elapsed.
    ///
    /// Calling before the countdown reaches zero is reported as an error and
    /// leaves the countdown untouched.
    pub async fn retry(&self) -> Result<(), AttendanceError> {
        let mut inner = self.inner.lock().await;

        if inner.snapshot.state != AttendanceState::CoolingDown {
            warn!("Retry requested from state {}, ignoring", inner.snapshot.state);
            return Err(AttendanceError::InvalidRetryState {
                state: inner.snapshot.state.clone(),
            });
        }

        let remaining = inner.snapshot.cooldown_remaining_seconds;
        if remaining > 0 {
            warn!("Retry requested with {}s of cooldown remaining, ignoring", remaining);
            return Err(AttendanceError::CooldownActive {
                remaining_seconds: remaining,
            });
        }

        let Some(subject_id) = inner.snapshot.subject_id else {
            return Err(AttendanceError::InvalidRetryState {
                state: inner.snapshot.state.clone(),
            });
        };

        info!("Cooldown elapsed, retrying attendance polling for subject {}", subject_id);
        self.begin_round(&mut inner, subject_id);
        Ok(())
    }

    /// Cancel the session from any state. Aborts the owned round task, so no
    /// further scheduled lookup or countdown tick fires, and any in-flight
    /// lookup result is discarded on receipt.
    pub async fn cancel(&self) {
        let mut inner = self.inner.lock().await;

        if let Some(round) = inner.round.take() {
            round.cancel();
        }
        inner.epoch += 1;
        inner.confirmation = None;
        inner.snapshot = AttendanceSnapshot::idle();
        inner.publish();

        debug!("Attendance session reset to idle");
    }

    /// Take the confirming notification after a successful round, resetting
    /// the session to idle. Returns `None` unless the session is confirmed.
    pub async fn take_confirmation(&self) -> Option<Notification> {
        let mut inner = self.inner.lock().await;

        if inner.snapshot.state != AttendanceState::Confirmed {
            return None;
        }

        let confirmation = inner.confirmation.take();
        inner.epoch += 1;
        inner.round = None;
        inner.snapshot = AttendanceSnapshot::idle();
        inner.publish();
        confirmation
    }

    fn begin_round(&self, inner: &mut SessionInner, subject_id: Uuid) {
        inner.epoch += 1;
        inner.confirmation = None;
        inner.snapshot = AttendanceSnapshot {
            subject_id: Some(subject_id),
            state: AttendanceState::Polling,
            attempt_count: 0,
            cooldown_remaining_seconds: 0,
        };
        inner.publish();

        let round = RoundTask {
            policy: self.policy.clone(),
            lookup: Arc::clone(&self.lookup),
            inner: Arc::clone(&self.inner),
            subject_id,
            epoch: inner.epoch,
        };
        // replacing the handle aborts any previous round
        inner.round = Some(TaskHandle::spawn(round.run()));
    }
}

/// One polling round: lookups, spacing, and the exhaustion cooldown.
struct RoundTask {
    policy: AttendancePolicy,
    lookup: Arc<dyn NotificationLookupPort>,
    inner: Arc<Mutex<SessionInner>>,
    subject_id: Uuid,
    epoch: u64,
}

impl RoundTask {
    async fn run(self) {
        for attempt_index in 0..self.policy.max_attempts {
            if attempt_index > 0 {
                tokio::time::sleep(Duration::from_secs(self.policy.attempt_spacing_seconds)).await;
            }

            let outcome = self.perform_lookup().await;
            let attempt = PollAttempt {
                timestamp: Utc::now(),
                outcome,
            };

            match self.apply_attempt(attempt).await {
                Some(AttendanceState::Confirmed) => return,
                Some(AttendanceState::Exhausted) => break,
                Some(_) => {}
                // a newer round owns the session now
                None => return,
            }
        }

        self.run_cooldown().await;
    }

    async fn perform_lookup(&self) -> LookupOutcome {
        match self
            .lookup
            .latest_by_category(self.subject_id, &self.policy.notification_category)
            .await
        {
            Ok(result) => classify_notification(result, &self.policy),
            Err(e) => {
                // A transport hiccup must not block the donor; the attempt
                // is consumed as "not found".
                warn!("Attendance lookup failed for subject {}: {}", self.subject_id, e);
                LookupOutcome::TransportError
            }
        }
    }

    /// Apply one attempt under the session lock. Returns the state the
    /// session moved to, or `None` when the result was stale and dropped.
    async fn apply_attempt(&self, attempt: PollAttempt) -> Option<AttendanceState> {
        let mut inner = self.inner.lock().await;

        if inner.epoch != self.epoch || inner.snapshot.state != AttendanceState::Polling {
            debug!("Discarding stale lookup result for subject {}", self.subject_id);
            return None;
        }

        let confirmation = match &attempt.outcome {
            LookupOutcome::Found(notification) => Some(notification.clone()),
            _ => None,
        };

        inner.snapshot = advance(&inner.snapshot, &attempt, &self.policy);

        match inner.snapshot.state {
            AttendanceState::Confirmed => {
                inner.confirmation = confirmation;
                info!(
                    "Attendance confirmed for subject {} after {} unconfirmed attempts",
                    self.subject_id, inner.snapshot.attempt_count
                );
            }
            AttendanceState::Exhausted => {
                info!(
                    "Attendance polling exhausted for subject {} after {} attempts",
                    self.subject_id, inner.snapshot.attempt_count
                );
            }
            _ => {}
        }

        inner.publish();
        Some(inner.snapshot.state.clone())
    }

    async fn run_cooldown(&self) {
        {
            let mut inner = self.inner.lock().await;
            if inner.epoch != self.epoch {
                return;
            }
            inner.snapshot.state = AttendanceState::CoolingDown;
            inner.snapshot.cooldown_remaining_seconds = self.policy.cooldown_seconds;
            inner.publish();
        }

        loop {
            tokio::time::sleep(Duration::from_secs(1)).await;

            let mut inner = self.inner.lock().await;
            if inner.epoch != self.epoch || inner.snapshot.state != AttendanceState::CoolingDown {
                return;
            }

            inner.snapshot.cooldown_remaining_seconds =
                inner.snapshot.cooldown_remaining_seconds.saturating_sub(1);
            inner.publish();

            if inner.snapshot.cooldown_remaining_seconds == 0 {
                debug!(
                    "Cooldown elapsed for subject {}, retry available",
                    self.subject_id
                );
                return;
            }
        }
    }
}

/// Classify a raw port result against the configured confirmation markers.
/// Anything but an exact category and title match counts as "not found".
fn classify_notification(
    result: Option<Notification>,
    policy: &AttendancePolicy,
) -> LookupOutcome {
    match result {
        Some(notification)
            if notification.category == policy.notification_category
                && notification.title == policy.confirmation_title =>
        {
            LookupOutcome::Found(notification)
        }
        Some(notification) => {
            debug!(
                "Notification {} does not match confirmation markers",
                notification.id
            );
            LookupOutcome::NotFound
        }
        None => LookupOutcome::NotFound,
    }
}

/// Pure transition for one applied attempt. Exhaustion is reached on the
/// `max_attempts`-th non-confirming lookup; transport errors consume an
/// attempt exactly like "not found".
fn advance(
    snapshot: &AttendanceSnapshot,
    attempt: &PollAttempt,
    policy: &AttendancePolicy,
) -> AttendanceSnapshot {
    let mut next = snapshot.clone();

    match attempt.outcome {
        LookupOutcome::Found(_) => {
            next.state = AttendanceState::Confirmed;
        }
        LookupOutcome::NotFound | LookupOutcome::TransportError => {
            next.attempt_count += 1;
            if next.attempt_count >= policy.max_attempts {
                next.state = AttendanceState::Exhausted;
            }
        }
    }

    next
}
