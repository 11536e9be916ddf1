use thiserror::Error;

use crate::models::AttendanceState;

#[derive(Error, Debug)]
pub enum AttendanceError {
    #[error("polling cannot start from state {state}")]
    InvalidStartState { state: AttendanceState },

    #[error("retry is only available while cooling down, not in state {state}")]
    InvalidRetryState { state: AttendanceState },

    #[error("cooldown has {remaining_seconds}s remaining before retry is allowed")]
    CooldownActive { remaining_seconds: u32 },
}
