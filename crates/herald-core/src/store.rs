use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::NotificationError;
use crate::transition::Transition;
use crate::types::{Notification, NotificationStats};

/// Durable record of every notification and its current status.
///
/// The store is the source of truth. Status changes go exclusively through
/// [`NotificationStore::apply`], which must be a single atomic update guarded
/// by the transition's expected prior status.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Insert a newly created notification.
    async fn insert(&self, notification: &Notification) -> Result<(), NotificationError>;

    /// Get a notification by ID
    async fn get(&self, id: Uuid) -> Result<Option<Notification>, NotificationError>;

    /// Scheduled notifications with `send_for <= until`, oldest first.
    async fn fetch_due(
        &self,
        until: OffsetDateTime,
        limit: i64,
    ) -> Result<Vec<Notification>, NotificationError>;

    /// Apply a status transition.
    ///
    /// Returns `false` when the row is missing or no longer in
    /// `transition.from()`, i.e. another writer got there first.
    async fn apply(&self, id: Uuid, transition: &Transition) -> Result<bool, NotificationError>;

    /// Delete a notification that is still scheduled.
    async fn delete_scheduled(&self, id: Uuid) -> Result<bool, NotificationError>;

    /// Notifications created at or after `since`, newest first (cache warm-up).
    async fn created_since(
        &self,
        since: OffsetDateTime,
        limit: i64,
    ) -> Result<Vec<Notification>, NotificationError>;

    /// Counts by status
    async fn stats(&self) -> Result<NotificationStats, NotificationError>;
}
