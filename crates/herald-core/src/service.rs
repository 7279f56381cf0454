use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use crate::error::NotificationError;
use crate::repository::NotificationRepository;
use crate::transition::Transition;
use crate::types::{NewNotification, Notification, NotificationStats, now_utc};

/// Operations offered to the outside world (HTTP handlers, embedding code).
#[async_trait]
pub trait NotificationService: Send + Sync {
    /// Validate and schedule a notification
    async fn create(&self, request: NewNotification) -> Result<Notification, NotificationError>;

    /// Get notification by ID
    async fn get(&self, id: Uuid) -> Result<Notification, NotificationError>;

    /// Cancel a notification that is still scheduled
    async fn cancel(&self, id: Uuid) -> Result<Notification, NotificationError>;

    /// Remove a notification that is still scheduled
    async fn delete(&self, id: Uuid) -> Result<(), NotificationError>;

    async fn stats(&self) -> Result<NotificationStats, NotificationError>;
}

pub struct DefaultNotificationService {
    repo: Arc<NotificationRepository>,
    known_channels: Option<HashSet<String>>,
}

impl DefaultNotificationService {
    pub fn new(repo: Arc<NotificationRepository>) -> Self {
        Self {
            repo,
            known_channels: None,
        }
    }

    /// Only accept these channel names on create.
    pub fn with_known_channels<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known_channels = Some(channels.into_iter().map(Into::into).collect());
        self
    }

    fn validate(&self, request: &NewNotification) -> Result<(), NotificationError> {
        if request.send_for <= now_utc() {
            return Err(NotificationError::Validation(
                "send_for must be in the future".into(),
            ));
        }
        if request.content.trim().is_empty() {
            return Err(NotificationError::Validation("content must not be empty".into()));
        }
        if request.channels.is_empty() {
            return Err(NotificationError::Validation(
                "at least one channel is required".into(),
            ));
        }

        let mut seen = HashSet::with_capacity(request.channels.len());
        for channel in &request.channels {
            if channel.trim().is_empty() {
                return Err(NotificationError::Validation(
                    "channel names must not be blank".into(),
                ));
            }
            if !seen.insert(channel.as_str()) {
                return Err(NotificationError::Validation(format!(
                    "duplicate channel '{channel}'"
                )));
            }
            if let Some(known) = &self.known_channels
                && !known.contains(channel)
            {
                return Err(NotificationError::Validation(format!(
                    "unknown channel '{channel}'"
                )));
            }
        }
        Ok(())
    }

    /// Explain why a guarded write on `id` did not apply.
    async fn refusal(&self, id: Uuid) -> NotificationError {
        match self.repo.get_fresh(id).await {
            Ok(Some(current)) => NotificationError::Conflict {
                id,
                status: current.status,
            },
            Ok(None) => NotificationError::NotFound(id),
            Err(e) => e,
        }
    }
}

#[async_trait]
impl NotificationService for DefaultNotificationService {
    async fn create(&self, request: NewNotification) -> Result<Notification, NotificationError> {
        self.validate(&request)?;
        let notification = Notification::scheduled(request, now_utc());
        self.repo.insert(&notification).await?;
        info!(
            notification_id = %notification.id,
            recipient = notification.recipient,
            send_for = %notification.send_for,
            "Notification scheduled"
        );
        Ok(notification)
    }

    async fn get(&self, id: Uuid) -> Result<Notification, NotificationError> {
        self.repo
            .get(id)
            .await?
            .ok_or(NotificationError::NotFound(id))
    }

    async fn cancel(&self, id: Uuid) -> Result<Notification, NotificationError> {
        if !self.repo.transition(id, &Transition::Cancel).await? {
            return Err(self.refusal(id).await);
        }
        info!(notification_id = %id, "Notification cancelled");
        self.get(id).await
    }

    async fn delete(&self, id: Uuid) -> Result<(), NotificationError> {
        if !self.repo.delete_scheduled(id).await? {
            return Err(self.refusal(id).await);
        }
        info!(notification_id = %id, "Notification deleted");
        Ok(())
    }

    async fn stats(&self) -> Result<NotificationStats, NotificationError> {
        self.repo.stats().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryStore, LocalCache};
    use crate::types::NotificationStatus;
    use std::time::Duration;

    fn service() -> (Arc<NotificationRepository>, DefaultNotificationService) {
        let repo = Arc::new(NotificationRepository::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(LocalCache::new()),
            Duration::from_secs(60),
        ));
        let service = DefaultNotificationService::new(repo.clone())
            .with_known_channels(["email", "telegram", "webhook"]);
        (repo, service)
    }

    fn request(channels: &[&str]) -> NewNotification {
        NewNotification {
            recipient: 10,
            channels: channels.iter().map(|c| c.to_string()).collect(),
            content: "Reminder".into(),
            send_for: now_utc() + time::Duration::minutes(10),
        }
    }

    #[tokio::test]
    async fn test_create_schedules() {
        let (_repo, service) = service();
        let created = service.create(request(&["email"])).await.unwrap();
        assert_eq!(created.status, NotificationStatus::Scheduled);
        assert_eq!(created.retry_count, 0);
        assert!(created.sent_at.is_none());
        assert_eq!(service.get(created.id).await.unwrap(), created);
    }

    #[tokio::test]
    async fn test_create_validation() {
        let (_repo, service) = service();

        let mut past = request(&["email"]);
        past.send_for = now_utc() - time::Duration::seconds(1);
        let mut empty_content = request(&["email"]);
        empty_content.content = "   ".into();

        for bad in [
            past,
            empty_content,
            request(&[]),
            request(&["email", "email"]),
            request(&["email", " "]),
            request(&["pigeon"]),
        ] {
            let err = service.create(bad).await.unwrap_err();
            assert!(matches!(err, NotificationError::Validation(_)), "{err}");
        }
        assert_eq!(service.stats().await.unwrap(), NotificationStats::default());
    }

    #[tokio::test]
    async fn test_cancel_scheduled() {
        let (_repo, service) = service();
        let created = service.create(request(&["email"])).await.unwrap();

        let cancelled = service.cancel(created.id).await.unwrap();
        assert_eq!(cancelled.status, NotificationStatus::Cancelled);
        assert_eq!(cancelled.send_for, created.send_for);

        let err = tokio_test::assert_err!(service.cancel(created.id).await);
        assert!(matches!(
            err,
            NotificationError::Conflict {
                status: NotificationStatus::Cancelled,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_cancel_after_claim_conflicts() {
        let (repo, service) = service();
        let created = service.create(request(&["email"])).await.unwrap();
        repo.transition(created.id, &Transition::Claim).await.unwrap();

        let err = service.cancel(created.id).await.unwrap_err();
        assert!(matches!(
            err,
            NotificationError::Conflict {
                status: NotificationStatus::Publishing,
                ..
            }
        ));
        let read = service.get(created.id).await.unwrap();
        assert_eq!(read.status, NotificationStatus::Publishing);
    }

    #[tokio::test]
    async fn test_missing_notification() {
        let (_repo, service) = service();
        let id = Uuid::new_v4();
        assert!(matches!(service.get(id).await, Err(NotificationError::NotFound(_))));
        assert!(matches!(service.cancel(id).await, Err(NotificationError::NotFound(_))));
        assert!(matches!(service.delete(id).await, Err(NotificationError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_only_scheduled() {
        let (repo, service) = service();
        let keep = service.create(request(&["email"])).await.unwrap();
        let gone = service.create(request(&["telegram"])).await.unwrap();

        service.delete(gone.id).await.unwrap();
        assert!(matches!(service.get(gone.id).await, Err(NotificationError::NotFound(_))));

        repo.transition(keep.id, &Transition::Claim).await.unwrap();
        assert!(matches!(
            service.delete(keep.id).await,
            Err(NotificationError::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_stats_counts_by_status() {
        let (_repo, service) = service();
        let a = service.create(request(&["email"])).await.unwrap();
        service.create(request(&["email"])).await.unwrap();
        service.cancel(a.id).await.unwrap();

        let stats = service.stats().await.unwrap();
        assert_eq!(stats.scheduled, 1);
        assert_eq!(stats.cancelled, 1);
    }
}
