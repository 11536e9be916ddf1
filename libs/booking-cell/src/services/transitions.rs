// libs/booking-cell/src/services/transitions.rs
use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::error::BookingError;
use crate::models::{BookingDraft, Establishment, Slot, WizardAction, WizardStep};

/// The single home of the wizard's step and invalidation rules.
///
/// Every draft mutation flows through `apply`, which checks the step
/// preconditions and re-establishes the prefix invariant (a selection
/// implies every selection before it), instead of each call site clearing
/// fields by hand.
pub struct WizardTransitionService;

impl WizardTransitionService {
    pub fn new() -> Self {
        Self
    }

    pub fn apply(
        &self,
        draft: &BookingDraft,
        action: &WizardAction,
    ) -> Result<BookingDraft, BookingError> {
        let next = match action {
            WizardAction::SelectDistrict(district) => self.select_district(draft, district),
            WizardAction::SelectEstablishment(establishment) => {
                self.select_establishment(draft, establishment)?
            }
            WizardAction::SelectDate(date) => self.select_date(draft, *date)?,
            WizardAction::SelectSlot(slot) => self.select_slot(draft, slot)?,
            WizardAction::GoToStep(step) => self.go_to_step(draft, *step)?,
        };

        debug!("Draft moved to step {}", next.step);
        Ok(next)
    }

    fn select_district(&self, draft: &BookingDraft, district: &str) -> BookingDraft {
        let mut next = draft.clone();
        next.district = Some(district.to_string());
        Self::clear_after(&mut next, WizardStep::District);
        next.step = WizardStep::Establishment;
        next
    }

    fn select_establishment(
        &self,
        draft: &BookingDraft,
        establishment: &Establishment,
    ) -> Result<BookingDraft, BookingError> {
        let Some(district) = draft.district.as_deref() else {
            return Err(BookingError::PrerequisiteMissing {
                step: WizardStep::Establishment,
            });
        };

        if establishment.district != district {
            warn!(
                "Establishment {} rejected: belongs to {}, not {}",
                establishment.name, establishment.district, district
            );
            return Err(BookingError::EstablishmentOutsideDistrict {
                name: establishment.name.clone(),
                district: district.to_string(),
            });
        }

        let mut next = draft.clone();
        next.establishment = Some(establishment.clone());
        Self::clear_after(&mut next, WizardStep::Establishment);
        next.step = WizardStep::Date;
        Ok(next)
    }

    fn select_date(
        &self,
        draft: &BookingDraft,
        date: NaiveDate,
    ) -> Result<BookingDraft, BookingError> {
        if draft.establishment.is_none() {
            return Err(BookingError::PrerequisiteMissing {
                step: WizardStep::Date,
            });
        }

        let mut next = draft.clone();
        next.date = Some(date);
        Self::clear_after(&mut next, WizardStep::Date);
        next.step = WizardStep::Slot;
        Ok(next)
    }

    fn select_slot(
        &self,
        draft: &BookingDraft,
        slot: &Slot,
    ) -> Result<BookingDraft, BookingError> {
        let (Some(establishment), Some(date)) = (draft.establishment.as_ref(), draft.date) else {
            return Err(BookingError::PrerequisiteMissing {
                step: WizardStep::Slot,
            });
        };

        if slot.establishment_id != establishment.id || slot.date != date {
            return Err(BookingError::SlotOutsideSelection);
        }

        let mut next = draft.clone();
        next.slot = Some(slot.clone());
        next.step = WizardStep::Summary;
        Ok(next)
    }

    fn go_to_step(
        &self,
        draft: &BookingDraft,
        step: WizardStep,
    ) -> Result<BookingDraft, BookingError> {
        if step.index() > draft.step.index() && !draft.satisfies_prerequisites_for(step) {
            return Err(BookingError::PrerequisiteMissing { step });
        }

        let mut next = draft.clone();
        next.step = step;
        Self::clear_after(&mut next, step);
        Ok(next)
    }

    /// Clear the selections of every step after `step`. The step's own
    /// selection is kept; only downstream state is invalidated.
    fn clear_after(draft: &mut BookingDraft, step: WizardStep) {
        if step < WizardStep::Establishment {
            draft.establishment = None;
        }
        if step < WizardStep::Date {
            draft.date = None;
        }
        if step < WizardStep::Slot {
            draft.slot = None;
        }
    }
}

impl Default for WizardTransitionService {
    fn default() -> Self {
        Self::new()
    }
}
