// libs/booking-cell/src/models.rs
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ==============================================================================
// DIRECTORY MODELS
// ==============================================================================

/// A medical establishment that accepts donation appointments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Establishment {
    pub id: Uuid,
    pub name: String,
    pub district: String,
    pub address: Option<String>,
}

/// A bookable time slot at an establishment on a specific date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    pub id: Uuid,
    pub establishment_id: Uuid,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

// ==============================================================================
// WIZARD STATE
// ==============================================================================

/// The five ordered stages of appointment booking. Declaration order is the
/// wizard order; `Ord` follows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WizardStep {
    District,
    Establishment,
    Date,
    Slot,
    Summary,
}

impl WizardStep {
    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for WizardStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WizardStep::District => write!(f, "district"),
            WizardStep::Establishment => write!(f, "establishment"),
            WizardStep::Date => write!(f, "date"),
            WizardStep::Slot => write!(f, "slot"),
            WizardStep::Summary => write!(f, "summary"),
        }
    }
}

/// The donor's selections so far. Fields form a prefix of
/// (district, establishment, date, slot): a selection is present only if
/// every selection before it is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingDraft {
    pub district: Option<String>,
    pub establishment: Option<Establishment>,
    pub date: Option<NaiveDate>,
    pub slot: Option<Slot>,
    pub step: WizardStep,
}

impl BookingDraft {
    pub fn empty() -> Self {
        Self {
            district: None,
            establishment: None,
            date: None,
            slot: None,
            step: WizardStep::District,
        }
    }

    /// Whether every selection required before sitting on `step` is present.
    pub fn satisfies_prerequisites_for(&self, step: WizardStep) -> bool {
        match step {
            WizardStep::District => true,
            WizardStep::Establishment => self.district.is_some(),
            WizardStep::Date => self.district.is_some() && self.establishment.is_some(),
            WizardStep::Slot => {
                self.district.is_some() && self.establishment.is_some() && self.date.is_some()
            }
            WizardStep::Summary => self.is_complete(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.district.is_some()
            && self.establishment.is_some()
            && self.date.is_some()
            && self.slot.is_some()
    }

    /// The prefix invariant from the data model.
    pub fn is_well_formed(&self) -> bool {
        let fields = [
            self.district.is_some(),
            self.establishment.is_some(),
            self.date.is_some(),
            self.slot.is_some(),
        ];
        fields.windows(2).all(|pair| pair[0] || !pair[1])
    }
}

/// Fetched option lists are ordinary state, per step: an empty list is a
/// valid result and a failure is a value the user can retry from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FetchState<T> {
    NotRequested,
    Loading,
    Loaded(T),
    Failed(String),
}

impl<T> FetchState<T> {
    pub fn loaded(&self) -> Option<&T> {
        match self {
            FetchState::Loaded(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, FetchState::Loading)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, FetchState::Failed(_))
    }
}

/// Everything a booking screen renders: the draft plus per-step options and
/// the submission flag.
#[derive(Debug, Clone, Serialize)]
pub struct WizardSnapshot {
    pub draft: BookingDraft,
    pub establishments: FetchState<Vec<Establishment>>,
    pub slots: FetchState<Vec<Slot>>,
    pub submitting: bool,
}

impl WizardSnapshot {
    pub fn empty() -> Self {
        Self {
            draft: BookingDraft::empty(),
            establishments: FetchState::NotRequested,
            slots: FetchState::NotRequested,
            submitting: false,
        }
    }
}

/// Action vocabulary of the draft reducer.
#[derive(Debug, Clone)]
pub enum WizardAction {
    SelectDistrict(String),
    SelectEstablishment(Establishment),
    SelectDate(NaiveDate),
    SelectSlot(Slot),
    GoToStep(WizardStep),
}

// ==============================================================================
// BOOKING REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingRequest {
    pub donor_id: Uuid,
    pub establishment_id: Uuid,
    pub date: NaiveDate,
    pub slot_id: Uuid,
}

/// A created donation appointment as returned by the booking collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub donor_id: Uuid,
    pub establishment_id: Uuid,
    pub date: NaiveDate,
    pub slot_id: Uuid,
    pub created_at: DateTime<Utc>,
}
