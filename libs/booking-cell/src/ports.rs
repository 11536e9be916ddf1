use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::error::BookingPortError;
use crate::models::{Appointment, BookingRequest, Establishment, Slot};

/// Read-side contract for resolving districts to establishments and
/// establishments to bookable slots. Empty lists are valid results.
#[async_trait]
pub trait DirectoryPort: Send + Sync {
    async fn establishments_by_district(&self, district: &str) -> Result<Vec<Establishment>>;

    async fn slots_for(&self, establishment_id: Uuid, date: NaiveDate) -> Result<Vec<Slot>>;
}

/// Write-side contract that persists a booking request.
#[async_trait]
pub trait BookingPort: Send + Sync {
    async fn create(&self, request: &BookingRequest) -> Result<Appointment, BookingPortError>;
}
