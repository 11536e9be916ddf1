// libs/booking-cell/src/services/wizard.rs
use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_runtime::TaskHandle;

use crate::error::BookingError;
use crate::models::{
    Appointment, BookingRequest, Establishment, FetchState, Slot, WizardAction, WizardSnapshot,
    WizardStep,
};
use crate::ports::{BookingPort, DirectoryPort};
use crate::services::transitions::WizardTransitionService;

/// Guides one donor through the ordered booking selections and submits the
/// finished draft exactly once.
///
/// Directory fetches run in owned background tasks: selecting a different
/// upstream value aborts the superseded fetch, and every fetch result is
/// re-checked against an epoch counter before it is applied, so a slow
/// establishment list can never populate another district's options.
pub struct BookingWizard {
    donor_id: Uuid,
    directory: Arc<dyn DirectoryPort>,
    booking: Arc<dyn BookingPort>,
    transitions: WizardTransitionService,
    inner: Arc<Mutex<WizardInner>>,
    state_rx: watch::Receiver<WizardSnapshot>,
}

struct WizardInner {
    snapshot: WizardSnapshot,
    session_epoch: u64,
    establishment_epoch: u64,
    slot_epoch: u64,
    establishment_fetch: Option<TaskHandle>,
    slot_fetch: Option<TaskHandle>,
    state_tx: watch::Sender<WizardSnapshot>,
}

impl WizardInner {
    fn publish(&self) {
        let _ = self.state_tx.send(self.snapshot.clone());
    }

    fn ensure_not_submitting(&self) -> Result<(), BookingError> {
        if self.snapshot.submitting {
            return Err(BookingError::SubmissionInFlight);
        }
        Ok(())
    }
}

impl BookingWizard {
    pub fn new(
        donor_id: Uuid,
        directory: Arc<dyn DirectoryPort>,
        booking: Arc<dyn BookingPort>,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(WizardSnapshot::empty());
        let inner = WizardInner {
            snapshot: WizardSnapshot::empty(),
            session_epoch: 0,
            establishment_epoch: 0,
            slot_epoch: 0,
            establishment_fetch: None,
            slot_fetch: None,
            state_tx,
        };

        Self {
            donor_id,
            directory,
            booking,
            transitions: WizardTransitionService::new(),
            inner: Arc::new(Mutex::new(inner)),
            state_rx,
        }
    }

    /// Current wizard state.
    pub fn snapshot(&self) -> WizardSnapshot {
        self.state_rx.borrow().clone()
    }

    /// Watch receiver the booking screen reacts to.
    pub fn subscribe(&self) -> watch::Receiver<WizardSnapshot> {
        self.state_rx.clone()
    }

    /// Select a district, invalidating all downstream selections and loading
    /// its establishments. Re-selecting the current district keeps whatever
    /// establishment fetch is already live or loaded.
    pub async fn select_district(&self, district: &str) -> Result<(), BookingError> {
        let mut inner = self.inner.lock().await;
        inner.ensure_not_submitting()?;

        let same_district = inner.snapshot.draft.district.as_deref() == Some(district);
        let next = self.transitions.apply(
            &inner.snapshot.draft,
            &WizardAction::SelectDistrict(district.to_string()),
        )?;
        inner.snapshot.draft = next;
        self.drop_slot_options(&mut inner);

        let keep_options = same_district
            && matches!(
                inner.snapshot.establishments,
                FetchState::Loading | FetchState::Loaded(_)
            );
        if !keep_options {
            self.spawn_establishment_fetch(&mut inner, district.to_string());
        }

        inner.publish();
        Ok(())
    }

    /// Select an establishment within the chosen district.
    pub async fn select_establishment(
        &self,
        establishment: &Establishment,
    ) -> Result<(), BookingError> {
        let mut inner = self.inner.lock().await;
        inner.ensure_not_submitting()?;

        let next = self.transitions.apply(
            &inner.snapshot.draft,
            &WizardAction::SelectEstablishment(establishment.clone()),
        )?;
        inner.snapshot.draft = next;
        self.drop_slot_options(&mut inner);

        inner.publish();
        Ok(())
    }

    /// Select a donation date and load the establishment's slots for it.
    pub async fn select_date(&self, date: NaiveDate) -> Result<(), BookingError> {
        let mut inner = self.inner.lock().await;
        inner.ensure_not_submitting()?;

        let next = self
            .transitions
            .apply(&inner.snapshot.draft, &WizardAction::SelectDate(date))?;
        inner.snapshot.draft = next;

        let establishment_id = inner
            .snapshot
            .draft
            .establishment
            .as_ref()
            .map(|e| e.id)
            .ok_or(BookingError::PrerequisiteMissing {
                step: WizardStep::Date,
            })?;
        self.spawn_slot_fetch(&mut inner, establishment_id, date);

        inner.publish();
        Ok(())
    }

    /// Select a slot belonging to the chosen establishment and date.
    pub async fn select_slot(&self, slot: &Slot) -> Result<(), BookingError> {
        let mut inner = self.inner.lock().await;
        inner.ensure_not_submitting()?;

        let next = self
            .transitions
            .apply(&inner.snapshot.draft, &WizardAction::SelectSlot(slot.clone()))?;
        inner.snapshot.draft = next;

        inner.publish();
        Ok(())
    }

    /// Move to `step`. Backward moves always succeed and invalidate the
    /// selections after the target; forward moves gate on the prerequisites.
    pub async fn go_to_step(&self, step: WizardStep) -> Result<(), BookingError> {
        let mut inner = self.inner.lock().await;
        inner.ensure_not_submitting()?;

        let next = self
            .transitions
            .apply(&inner.snapshot.draft, &WizardAction::GoToStep(step))?;
        inner.snapshot.draft = next;

        if inner.snapshot.draft.establishment.is_none() || inner.snapshot.draft.date.is_none() {
            self.drop_slot_options(&mut inner);
        }

        inner.publish();
        Ok(())
    }

    /// Re-run the fetch for whichever step's options last failed, keeping
    /// the draft as it is.
    pub async fn retry_fetch(&self) -> Result<(), BookingError> {
        let mut inner = self.inner.lock().await;
        inner.ensure_not_submitting()?;

        if inner.snapshot.establishments.is_failed() {
            let Some(district) = inner.snapshot.draft.district.clone() else {
                return Err(BookingError::NothingToRetry);
            };
            info!("Retrying establishment fetch for district {}", district);
            self.spawn_establishment_fetch(&mut inner, district);
            inner.publish();
            return Ok(());
        }

        if inner.snapshot.slots.is_failed() {
            let (Some(establishment), Some(date)) = (
                inner.snapshot.draft.establishment.clone(),
                inner.snapshot.draft.date,
            ) else {
                return Err(BookingError::NothingToRetry);
            };
            info!("Retrying slot fetch for establishment {}", establishment.id);
            self.spawn_slot_fetch(&mut inner, establishment.id, date);
            inner.publish();
            return Ok(());
        }

        Err(BookingError::NothingToRetry)
    }

    /// Submit the completed draft to the booking collaborator.
    ///
    /// Called exactly once per confirmed completion: success discards the
    /// draft and returns the created appointment; failure preserves every
    /// selection so the donor can resubmit from the summary step.
    pub async fn submit(&self) -> Result<Appointment, BookingError> {
        let (request, epoch) = {
            let mut inner = self.inner.lock().await;
            inner.ensure_not_submitting()?;

            let draft = &inner.snapshot.draft;
            let (Some(_), Some(establishment), Some(date), Some(slot)) = (
                draft.district.as_ref(),
                draft.establishment.as_ref(),
                draft.date,
                draft.slot.as_ref(),
            ) else {
                return Err(BookingError::IncompleteDraft);
            };

            let request = BookingRequest {
                donor_id: self.donor_id,
                establishment_id: establishment.id,
                date,
                slot_id: slot.id,
            };

            inner.snapshot.submitting = true;
            inner.publish();
            (request, inner.session_epoch)
        };

        info!(
            "Submitting booking for donor {} at establishment {} on {}",
            request.donor_id, request.establishment_id, request.date
        );
        let result = self.booking.create(&request).await;

        let mut inner = self.inner.lock().await;
        if inner.session_epoch != epoch {
            debug!("Wizard was torn down during submission, leaving state alone");
            return result.map_err(BookingError::Submission);
        }

        inner.snapshot.submitting = false;
        match result {
            Ok(appointment) => {
                info!(
                    "Appointment {} created for donor {}",
                    appointment.id, request.donor_id
                );
                self.reset(&mut inner);
                inner.publish();
                Ok(appointment)
            }
            Err(e) => {
                warn!("Booking submission failed, draft preserved: {}", e);
                inner.publish();
                Err(BookingError::Submission(e))
            }
        }
    }

    /// Tear the wizard down: abort in-flight fetches and discard the draft.
    pub async fn cancel(&self) {
        let mut inner = self.inner.lock().await;
        self.reset(&mut inner);
        inner.publish();
        debug!("Booking wizard reset for donor {}", self.donor_id);
    }

    fn reset(&self, inner: &mut WizardInner) {
        if let Some(task) = inner.establishment_fetch.take() {
            task.cancel();
        }
        if let Some(task) = inner.slot_fetch.take() {
            task.cancel();
        }
        inner.session_epoch += 1;
        inner.establishment_epoch += 1;
        inner.slot_epoch += 1;
        inner.snapshot = WizardSnapshot::empty();
    }

    fn drop_slot_options(&self, inner: &mut WizardInner) {
        inner.snapshot.slots = FetchState::NotRequested;
        inner.slot_epoch += 1;
        if let Some(task) = inner.slot_fetch.take() {
            task.cancel();
        }
    }

    fn spawn_establishment_fetch(&self, inner: &mut WizardInner, district: String) {
        inner.establishment_epoch += 1;
        let epoch = inner.establishment_epoch;
        inner.snapshot.establishments = FetchState::Loading;

        let directory = Arc::clone(&self.directory);
        let shared = Arc::clone(&self.inner);
        // replacing the handle aborts any superseded fetch
        inner.establishment_fetch = Some(TaskHandle::spawn(async move {
            let result = directory.establishments_by_district(&district).await;

            let mut inner = shared.lock().await;
            if inner.establishment_epoch != epoch {
                debug!("Discarding stale establishment list for district {}", district);
                return;
            }

            inner.snapshot.establishments = match result {
                Ok(establishments) => {
                    debug!(
                        "Loaded {} establishments for district {}",
                        establishments.len(),
                        district
                    );
                    FetchState::Loaded(establishments)
                }
                Err(e) => {
                    warn!("Establishment fetch failed for district {}: {}", district, e);
                    FetchState::Failed(e.to_string())
                }
            };
            inner.publish();
        }));
    }

    fn spawn_slot_fetch(&self, inner: &mut WizardInner, establishment_id: Uuid, date: NaiveDate) {
        inner.slot_epoch += 1;
        let epoch = inner.slot_epoch;
        inner.snapshot.slots = FetchState::Loading;

        let directory = Arc::clone(&self.directory);
        let shared = Arc::clone(&self.inner);
        inner.slot_fetch = Some(TaskHandle::spawn(async move {
            let result = directory.slots_for(establishment_id, date).await;

            let mut inner = shared.lock().await;
            if inner.slot_epoch != epoch {
                debug!(
                    "Discarding stale slot list for establishment {}",
                    establishment_id
                );
                return;
            }

            inner.snapshot.slots = match result {
                Ok(slots) => {
                    debug!(
                        "Loaded {} slots for establishment {} on {}",
                        slots.len(),
                        establishment_id,
                        date
                    );
                    FetchState::Loaded(slots)
                }
                Err(e) => {
                    warn!(
                        "Slot fetch failed for establishment {} on {}: {}",
                        establishment_id, date, e
                    );
                    FetchState::Failed(e.to_string())
                }
            };
            inner.publish();
        }));
    }
}
