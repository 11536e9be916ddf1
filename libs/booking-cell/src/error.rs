use thiserror::Error;

use crate::models::WizardStep;

/// Failure taxonomy of the booking collaborator's submit call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BookingPortError {
    #[error("the selected slot is no longer available")]
    SlotNoLongerAvailable,

    #[error("booking request failed: {0}")]
    Failed(String),
}

#[derive(Error, Debug)]
pub enum BookingError {
    #[error("step {step} requires the earlier selections to be made first")]
    PrerequisiteMissing { step: WizardStep },

    #[error("establishment {name} does not belong to district {district}")]
    EstablishmentOutsideDistrict { name: String, district: String },

    #[error("slot does not belong to the selected establishment and date")]
    SlotOutsideSelection,

    #[error("the booking draft is incomplete")]
    IncompleteDraft,

    #[error("a submission is already in flight")]
    SubmissionInFlight,

    #[error("no failed fetch to retry")]
    NothingToRetry,

    #[error("submission failed: {0}")]
    Submission(#[source] BookingPortError),
}

impl BookingError {
    /// Whether a failed submission can be retried with the same draft.
    pub fn is_retryable_submission(&self) -> bool {
        matches!(
            self,
            BookingError::Submission(BookingPortError::SlotNoLongerAvailable)
        )
    }
}
