use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::NotificationError;
use crate::types::Notification;

/// Read accelerator in front of the store. Never a source of truth.
///
/// Writers never update an entry in place; they delete it and let the next
/// reader repopulate it from the store.
#[async_trait]
pub trait NotificationCache: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<Notification>, NotificationError>;

    async fn set(&self, notification: &Notification, ttl: Duration)
        -> Result<(), NotificationError>;

    async fn delete(&self, id: Uuid) -> Result<(), NotificationError>;

    /// Backend name for logs
    fn name(&self) -> &'static str;
}

/// Cache that stores nothing; every read goes to the store.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCache;

#[async_trait]
impl NotificationCache for NoopCache {
    async fn get(&self, _id: Uuid) -> Result<Option<Notification>, NotificationError> {
        Ok(None)
    }

    async fn set(
        &self,
        _notification: &Notification,
        _ttl: Duration,
    ) -> Result<(), NotificationError> {
        Ok(())
    }

    async fn delete(&self, _id: Uuid) -> Result<(), NotificationError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "disabled"
    }
}

/// Cache key for a notification id.
pub fn cache_key(id: Uuid) -> String {
    format!("herald:notification:{id}")
}
