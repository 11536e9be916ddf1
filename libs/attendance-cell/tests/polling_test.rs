use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;
use uuid::Uuid;

use attendance_cell::{
    AttendanceError, AttendancePolicy, AttendanceSnapshot, AttendanceState, Notification,
    NotificationLookupPort, PollingController,
};
use shared_config::AppConfig;

enum ScriptedLookup {
    Missing,
    Matching,
    OffMarker {
        category: &'static str,
        title: &'static str,
    },
    TransportFailure,
}

/// Notification port fake that replays a scripted sequence of lookup
/// results. An exhausted script behaves as "nothing found".
#[derive(Default)]
struct ScriptedLookupPort {
    script: Mutex<VecDeque<ScriptedLookup>>,
    calls: AtomicUsize,
}

impl ScriptedLookupPort {
    fn with_script(script: Vec<ScriptedLookup>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationLookupPort for ScriptedLookupPort {
    async fn latest_by_category(
        &self,
        subject_id: Uuid,
        _category: &str,
    ) -> anyhow::Result<Option<Notification>> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let next = self.script.lock().unwrap().pop_front();
        match next {
            None | Some(ScriptedLookup::Missing) => Ok(None),
            Some(ScriptedLookup::Matching) => Ok(Some(notification(
                subject_id,
                "attendance-confirmed",
                "QR scanned",
            ))),
            Some(ScriptedLookup::OffMarker { category, title }) => {
                Ok(Some(notification(subject_id, category, title)))
            }
            Some(ScriptedLookup::TransportFailure) => Err(anyhow!("connection reset by peer")),
        }
    }
}

fn notification(subject_id: Uuid, category: &str, title: &str) -> Notification {
    Notification {
        id: Uuid::new_v4(),
        subject_id,
        category: category.to_string(),
        title: title.to_string(),
        body: None,
        created_at: Utc::now(),
    }
}

fn controller(port: &Arc<ScriptedLookupPort>) -> PollingController {
    let lookup: Arc<dyn NotificationLookupPort> = port.clone();
    PollingController::new(&AppConfig::default(), lookup)
}

/// Wait until the published snapshot satisfies `pred`, with a generous
/// virtual-time guard so a broken transition fails instead of hanging.
async fn wait_for<F>(
    rx: &mut watch::Receiver<AttendanceSnapshot>,
    mut pred: F,
) -> AttendanceSnapshot
where
    F: FnMut(&AttendanceSnapshot) -> bool,
{
    tokio::time::timeout(Duration::from_secs(600), async {
        loop {
            let current = rx.borrow_and_update().clone();
            if pred(&current) {
                return current;
            }
            rx.changed().await.expect("controller dropped");
        }
    })
    .await
    .expect("timed out waiting for snapshot")
}

#[tokio::test(start_paused = true)]
async fn three_unconfirmed_lookups_exhaust_the_round() {
    let port = ScriptedLookupPort::with_script(vec![
        ScriptedLookup::Missing,
        ScriptedLookup::Missing,
        ScriptedLookup::Missing,
    ]);
    let controller = controller(&port);
    let mut rx = controller.subscribe();

    assert_eq!(controller.snapshot().state, AttendanceState::Idle);

    controller.start(Uuid::new_v4()).await.unwrap();
    assert_eq!(controller.snapshot().state, AttendanceState::Polling);

    let cooling = wait_for(&mut rx, |s| s.state == AttendanceState::CoolingDown).await;
    assert_eq!(cooling.attempt_count, 3);
    assert_eq!(port.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn attempt_count_never_exceeds_the_configured_max() {
    let port = ScriptedLookupPort::with_script(vec![]);
    let controller = controller(&port);
    let mut rx = controller.subscribe();

    controller.start(Uuid::new_v4()).await.unwrap();

    let mut max_observed = 0;
    wait_for(&mut rx, |s| {
        max_observed = max_observed.max(s.attempt_count);
        s.state == AttendanceState::CoolingDown && s.cooldown_remaining_seconds == 0
    })
    .await;

    controller.retry().await.unwrap();
    wait_for(&mut rx, |s| {
        max_observed = max_observed.max(s.attempt_count);
        s.state == AttendanceState::CoolingDown && s.cooldown_remaining_seconds == 0
    })
    .await;

    assert_eq!(max_observed, 3);
    assert_eq!(port.calls(), 6);
}

#[tokio::test(start_paused = true)]
async fn confirmation_on_second_lookup_skips_the_third() {
    let port = ScriptedLookupPort::with_script(vec![
        ScriptedLookup::Missing,
        ScriptedLookup::Matching,
    ]);
    let controller = controller(&port);
    let mut rx = controller.subscribe();
    let subject_id = Uuid::new_v4();

    controller.start(subject_id).await.unwrap();
    let confirmed = wait_for(&mut rx, |s| s.state == AttendanceState::Confirmed).await;
    assert_eq!(confirmed.attempt_count, 1);
    assert_eq!(confirmed.subject_id, Some(subject_id));

    // well past where the third lookup would have been scheduled
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(port.calls(), 2);
    assert_eq!(controller.snapshot().state, AttendanceState::Confirmed);
}

#[tokio::test(start_paused = true)]
async fn off_marker_notifications_are_not_confirmations() {
    let port = ScriptedLookupPort::with_script(vec![
        ScriptedLookup::OffMarker {
            category: "attendance-confirmed",
            title: "Thanks for donating!",
        },
        ScriptedLookup::OffMarker {
            category: "campaigns",
            title: "QR scanned",
        },
        ScriptedLookup::Missing,
    ]);
    let controller = controller(&port);
    let mut rx = controller.subscribe();

    controller.start(Uuid::new_v4()).await.unwrap();

    let cooling = wait_for(&mut rx, |s| s.state == AttendanceState::CoolingDown).await;
    assert_eq!(cooling.attempt_count, 3);
}

#[tokio::test(start_paused = true)]
async fn transport_failures_consume_attempts_without_aborting() {
    let port = ScriptedLookupPort::with_script(vec![
        ScriptedLookup::TransportFailure,
        ScriptedLookup::Matching,
    ]);
    let controller = controller(&port);
    let mut rx = controller.subscribe();

    controller.start(Uuid::new_v4()).await.unwrap();

    let confirmed = wait_for(&mut rx, |s| s.state == AttendanceState::Confirmed).await;
    assert_eq!(confirmed.attempt_count, 1);
    assert_eq!(port.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn cooldown_counts_down_to_zero_over_ten_ticks() {
    let port = ScriptedLookupPort::with_script(vec![]);
    let controller = controller(&port);
    let mut rx = controller.subscribe();

    controller.start(Uuid::new_v4()).await.unwrap();

    let first = wait_for(&mut rx, |s| s.state == AttendanceState::CoolingDown).await;
    assert_eq!(first.cooldown_remaining_seconds, 10);
    let cooldown_started = tokio::time::Instant::now();

    let mut observed = vec![first.cooldown_remaining_seconds];
    wait_for(&mut rx, |s| {
        if s.state == AttendanceState::CoolingDown
            && s.cooldown_remaining_seconds != *observed.last().unwrap()
        {
            observed.push(s.cooldown_remaining_seconds);
        }
        s.cooldown_remaining_seconds == 0
    })
    .await;

    assert_eq!(observed, (0..=10).rev().collect::<Vec<u32>>());
    assert_eq!(cooldown_started.elapsed(), Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn early_retry_is_rejected_and_does_not_reset_the_countdown() {
    let port = ScriptedLookupPort::with_script(vec![]);
    let controller = controller(&port);
    let mut rx = controller.subscribe();

    controller.start(Uuid::new_v4()).await.unwrap();
    wait_for(&mut rx, |s| s.state == AttendanceState::CoolingDown).await;

    let before = controller.snapshot();
    assert!(before.cooldown_remaining_seconds > 0);

    let err = controller.retry().await.unwrap_err();
    assert_matches!(err, AttendanceError::CooldownActive { remaining_seconds }
        if remaining_seconds == before.cooldown_remaining_seconds);

    let after = controller.snapshot();
    assert_eq!(after.state, AttendanceState::CoolingDown);
    assert_eq!(
        after.cooldown_remaining_seconds,
        before.cooldown_remaining_seconds
    );

    wait_for(&mut rx, |s| s.cooldown_remaining_seconds == 0).await;
    controller.retry().await.unwrap();
    assert_eq!(controller.snapshot().state, AttendanceState::Polling);
    assert_eq!(controller.snapshot().attempt_count, 0);
}

#[tokio::test(start_paused = true)]
async fn retry_outside_cooldown_is_an_illegal_state() {
    let port = ScriptedLookupPort::with_script(vec![ScriptedLookup::Matching]);
    let controller = controller(&port);
    let mut rx = controller.subscribe();

    let err = controller.retry().await.unwrap_err();
    assert_matches!(err, AttendanceError::InvalidRetryState { .. });

    controller.start(Uuid::new_v4()).await.unwrap();
    wait_for(&mut rx, |s| s.state == AttendanceState::Confirmed).await;

    let err = controller.retry().await.unwrap_err();
    assert_matches!(err, AttendanceError::InvalidRetryState { .. });
}

#[tokio::test(start_paused = true)]
async fn start_while_polling_is_an_idempotent_no_op() {
    let port = ScriptedLookupPort::with_script(vec![]);
    let controller = controller(&port);
    let mut rx = controller.subscribe();
    let subject_id = Uuid::new_v4();

    controller.start(subject_id).await.unwrap();
    controller.start(subject_id).await.unwrap();

    wait_for(&mut rx, |s| s.state == AttendanceState::CoolingDown).await;
    assert_eq!(port.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn start_from_a_settled_state_is_rejected() {
    let port = ScriptedLookupPort::with_script(vec![ScriptedLookup::Matching]);
    let controller = controller(&port);
    let mut rx = controller.subscribe();
    let subject_id = Uuid::new_v4();

    controller.start(subject_id).await.unwrap();
    wait_for(&mut rx, |s| s.state == AttendanceState::Confirmed).await;

    let err = controller.start(subject_id).await.unwrap_err();
    assert_matches!(err, AttendanceError::InvalidStartState { state }
        if state == AttendanceState::Confirmed);
}

#[tokio::test(start_paused = true)]
async fn cancel_prevents_all_further_lookups() {
    let port = ScriptedLookupPort::with_script(vec![]);
    let controller = controller(&port);
    let mut rx = controller.subscribe();

    controller.start(Uuid::new_v4()).await.unwrap();
    wait_for(&mut rx, |s| s.attempt_count == 1).await;

    controller.cancel().await;
    assert_eq!(controller.snapshot().state, AttendanceState::Idle);

    let calls_at_cancel = port.calls();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(port.calls(), calls_at_cancel);
    assert_eq!(controller.snapshot().state, AttendanceState::Idle);
}

#[tokio::test(start_paused = true)]
async fn cancel_during_cooldown_stops_the_countdown() {
    let port = ScriptedLookupPort::with_script(vec![]);
    let controller = controller(&port);
    let mut rx = controller.subscribe();

    controller.start(Uuid::new_v4()).await.unwrap();
    wait_for(&mut rx, |s| {
        s.state == AttendanceState::CoolingDown && s.cooldown_remaining_seconds == 7
    })
    .await;

    controller.cancel().await;
    tokio::time::sleep(Duration::from_secs(60)).await;

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.state, AttendanceState::Idle);
    assert_eq!(snapshot.cooldown_remaining_seconds, 0);
}

#[tokio::test(start_paused = true)]
async fn confirmation_is_consumed_exactly_once() {
    let port = ScriptedLookupPort::with_script(vec![ScriptedLookup::Matching]);
    let controller = controller(&port);
    let mut rx = controller.subscribe();
    let subject_id = Uuid::new_v4();

    assert!(controller.take_confirmation().await.is_none());

    controller.start(subject_id).await.unwrap();
    wait_for(&mut rx, |s| s.state == AttendanceState::Confirmed).await;

    let confirmation = controller.take_confirmation().await.expect("confirmation");
    assert_eq!(confirmation.title, "QR scanned");
    assert_eq!(confirmation.subject_id, subject_id);
    assert_eq!(controller.snapshot().state, AttendanceState::Idle);

    assert!(controller.take_confirmation().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn single_attempt_policy_exhausts_after_one_lookup() {
    let port = ScriptedLookupPort::with_script(vec![ScriptedLookup::Missing]);
    let policy = AttendancePolicy {
        max_attempts: 1,
        cooldown_seconds: 2,
        ..AttendancePolicy::default()
    };
    let lookup: Arc<dyn NotificationLookupPort> = port.clone();
    let controller = PollingController::with_policy(policy, lookup);
    let mut rx = controller.subscribe();

    controller.start(Uuid::new_v4()).await.unwrap();

    let cooling = wait_for(&mut rx, |s| s.state == AttendanceState::CoolingDown).await;
    assert_eq!(cooling.attempt_count, 1);
    assert_eq!(cooling.cooldown_remaining_seconds, 2);
    assert_eq!(port.calls(), 1);
}
