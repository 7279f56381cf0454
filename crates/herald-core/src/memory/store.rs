use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::NotificationError;
use crate::store::NotificationStore;
use crate::transition::Transition;
use crate::types::{Notification, NotificationStats, NotificationStatus};

/// In-memory store backed by a [`DashMap`].
///
/// Transitions take the shard lock of a single entry, which gives the same
/// per-row atomicity as a guarded `UPDATE`.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    rows: DashMap<Uuid, Notification>,
    unavailable: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail as if the database were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn check(&self) -> Result<(), NotificationError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(NotificationError::Storage(
                "in-memory store marked unavailable".into(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationStore for InMemoryStore {
    async fn insert(&self, notification: &Notification) -> Result<(), NotificationError> {
        self.check()?;
        match self.rows.entry(notification.id) {
            Entry::Occupied(_) => Err(NotificationError::Storage(format!(
                "duplicate notification id {}",
                notification.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(notification.clone());
                Ok(())
            }
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<Notification>, NotificationError> {
        self.check()?;
        Ok(self.rows.get(&id).map(|row| row.clone()))
    }

    async fn fetch_due(
        &self,
        until: OffsetDateTime,
        limit: i64,
    ) -> Result<Vec<Notification>, NotificationError> {
        self.check()?;
        let mut due: Vec<Notification> = self
            .rows
            .iter()
            .filter(|row| row.status == NotificationStatus::Scheduled && row.send_for <= until)
            .map(|row| row.clone())
            .collect();
        due.sort_by_key(|n| n.send_for);
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn apply(&self, id: Uuid, transition: &Transition) -> Result<bool, NotificationError> {
        self.check()?;
        let Some(mut row) = self.rows.get_mut(&id) else {
            return Ok(false);
        };
        if !transition.applies_to(row.status) {
            return Ok(false);
        }
        row.status = transition.to();
        if let Some(error) = transition.last_error() {
            row.last_error = error.to_string();
        }
        if let Some(sent_at) = transition.sent_at() {
            row.sent_at = Some(sent_at);
        }
        if let Some(attempts) = transition.attempts() {
            row.retry_count = attempts;
        }
        Ok(true)
    }

    async fn delete_scheduled(&self, id: Uuid) -> Result<bool, NotificationError> {
        self.check()?;
        Ok(self
            .rows
            .remove_if(&id, |_, row| row.status == NotificationStatus::Scheduled)
            .is_some())
    }

    async fn created_since(
        &self,
        since: OffsetDateTime,
        limit: i64,
    ) -> Result<Vec<Notification>, NotificationError> {
        self.check()?;
        let mut recent: Vec<Notification> = self
            .rows
            .iter()
            .filter(|row| row.created_at >= since)
            .map(|row| row.clone())
            .collect();
        recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        recent.truncate(limit.max(0) as usize);
        Ok(recent)
    }

    async fn stats(&self) -> Result<NotificationStats, NotificationError> {
        self.check()?;
        let mut stats = NotificationStats::default();
        for row in self.rows.iter() {
            stats.record(row.status, 1);
        }
        Ok(stats)
    }
}
