use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::models::Notification;

/// Read-side contract against the platform's notification feed. Transport,
/// authentication, and serialization all live behind this seam.
#[async_trait]
pub trait NotificationLookupPort: Send + Sync {
    /// The most recent notification for `subject_id` matching `category`,
    /// or `None`. "Not found" is `Ok(None)`; an `Err` means a genuine
    /// transport failure.
    async fn latest_by_category(
        &self,
        subject_id: Uuid,
        category: &str,
    ) -> Result<Option<Notification>>;
}
