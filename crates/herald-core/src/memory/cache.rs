use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::cache::NotificationCache;
use crate::error::NotificationError;
use crate::types::Notification;

/// A cached entry with TTL support.
#[derive(Clone, Debug)]
pub struct CachedEntry {
    pub value: Notification,
    pub cached_at: Instant,
    pub ttl: Duration,
}

impl CachedEntry {
    pub fn new(value: Notification, ttl: Duration) -> Self {
        Self {
            value,
            cached_at: Instant::now(),
            ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.cached_at.elapsed() > self.ttl
    }
}

/// Single-instance cache held in a [`DashMap`].
#[derive(Debug, Default)]
pub struct LocalCache {
    entries: DashMap<Uuid, CachedEntry>,
}

impl LocalCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry. Returns the number removed.
    pub fn cleanup_expired(&self) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            if entry.is_expired() {
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }

    /// Sweep expired entries every `period` until shutdown.
    pub async fn run_cleanup(
        self: Arc<Self>,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let removed = self.cleanup_expired();
                    if removed > 0 {
                        tracing::debug!(
                            removed,
                            remaining = self.len(),
                            "Expired cache entries swept"
                        );
                    }
                }
            }
        }
        tracing::debug!("Local cache sweeper stopped");
    }
}

#[async_trait]
impl NotificationCache for LocalCache {
    async fn get(&self, id: Uuid) -> Result<Option<Notification>, NotificationError> {
        if let Some(entry) = self.entries.get(&id) {
            if !entry.is_expired() {
                return Ok(Some(entry.value.clone()));
            }
            drop(entry);
            self.entries.remove(&id);
        }
        Ok(None)
    }

    async fn set(
        &self,
        notification: &Notification,
        ttl: Duration,
    ) -> Result<(), NotificationError> {
        self.entries
            .insert(notification.id, CachedEntry::new(notification.clone(), ttl));
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), NotificationError> {
        self.entries.remove(&id);
        tracing::debug!(notification_id = %id, "cache invalidated (local)");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "local"
    }
}
