//! Cache-aside access to notifications.
//!
//! Every status-changing write goes through this type so the cache entry is
//! always deleted after the store commits.

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::NotificationCache;
use crate::error::NotificationError;
use crate::store::NotificationStore;
use crate::transition::Transition;
use crate::types::{Notification, NotificationStats};

pub struct NotificationRepository {
    store: Arc<dyn NotificationStore>,
    cache: Arc<dyn NotificationCache>,
    ttl: Duration,
}

impl NotificationRepository {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        cache: Arc<dyn NotificationCache>,
        ttl: Duration,
    ) -> Self {
        Self { store, cache, ttl }
    }

    pub fn store(&self) -> &Arc<dyn NotificationStore> {
        &self.store
    }

    /// Cache first, then store; a store hit repopulates the cache.
    ///
    /// A writer may commit and invalidate between the store read and the
    /// fill, so the row is read again after the fill and the entry dropped
    /// if it moved.
    pub async fn get(&self, id: Uuid) -> Result<Option<Notification>, NotificationError> {
        match self.cache.get(id).await {
            Ok(Some(cached)) => {
                debug!(notification_id = %id, "cache hit");
                return Ok(Some(cached));
            }
            Ok(None) => {}
            Err(e) => warn!(notification_id = %id, error = %e, "cache read failed, using store"),
        }

        let found = self.store.get(id).await?;
        let Some(notification) = found else {
            return Ok(None);
        };
        if let Err(e) = self.cache.set(&notification, self.ttl).await {
            warn!(notification_id = %id, error = %e, "cache fill failed");
            return Ok(Some(notification));
        }

        let current = match self.store.get(id).await {
            Ok(current) => current,
            Err(e) => {
                self.invalidate(id).await;
                return Err(e);
            }
        };
        if current.as_ref() != Some(&notification) {
            debug!(notification_id = %id, "row changed during cache fill");
            self.invalidate(id).await;
        }
        Ok(current)
    }

    /// Read straight from the store, skipping the cache.
    pub async fn get_fresh(&self, id: Uuid) -> Result<Option<Notification>, NotificationError> {
        self.store.get(id).await
    }

    pub async fn insert(&self, notification: &Notification) -> Result<(), NotificationError> {
        self.store.insert(notification).await?;
        self.invalidate(notification.id).await;
        Ok(())
    }

    /// Apply a transition and invalidate the cache entry once the store
    /// write has returned, whether or not the guard matched.
    pub async fn transition(
        &self,
        id: Uuid,
        transition: &Transition,
    ) -> Result<bool, NotificationError> {
        let applied = self.store.apply(id, transition).await?;
        self.invalidate(id).await;
        if applied {
            debug!(
                notification_id = %id,
                from = %transition.from(),
                to = %transition.to(),
                "status transition applied"
            );
        }
        Ok(applied)
    }

    pub async fn delete_scheduled(&self, id: Uuid) -> Result<bool, NotificationError> {
        let deleted = self.store.delete_scheduled(id).await?;
        self.invalidate(id).await;
        Ok(deleted)
    }

    pub async fn stats(&self) -> Result<NotificationStats, NotificationError> {
        self.store.stats().await
    }

    /// Pre-populate the cache with notifications created within `window`.
    pub async fn warm(&self, window: Duration, limit: i64) -> Result<usize, NotificationError> {
        let since = OffsetDateTime::now_utc() - window;
        let recent = self.store.created_since(since, limit).await?;
        let mut warmed = 0;
        for notification in &recent {
            match self.cache.set(notification, self.ttl).await {
                Ok(()) => warmed += 1,
                Err(e) => {
                    warn!(notification_id = %notification.id, error = %e, "cache warm-up entry failed")
                }
            }
        }
        info!(count = warmed, cache = self.cache.name(), "Cache warmed");
        Ok(warmed)
    }

    async fn invalidate(&self, id: Uuid) {
        if let Err(e) = self.cache.delete(id).await {
            warn!(notification_id = %id, error = %e, "cache invalidation failed");
        }
    }
}
