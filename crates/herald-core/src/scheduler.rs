//! Periodic release of due notifications onto the queue.

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

use crate::error::NotificationError;
use crate::queue::NotificationQueue;
use crate::repository::NotificationRepository;
use crate::transition::Transition;
use crate::types::{Notification, now_utc};

/// What a single tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Published and moved to `publishing`
    pub claimed: usize,
    /// Publish failed and moved to `failed`
    pub failed: usize,
    /// Row changed underneath us or the status write errored
    pub skipped: usize,
}

impl TickReport {
    pub fn total(&self) -> usize {
        self.claimed + self.failed + self.skipped
    }
}

pub struct Scheduler {
    repo: Arc<NotificationRepository>,
    queue: Arc<dyn NotificationQueue>,
    interval: Duration,
    batch_size: i64,
}

impl Scheduler {
    pub fn new(repo: Arc<NotificationRepository>, queue: Arc<dyn NotificationQueue>) -> Self {
        Self {
            repo,
            queue,
            interval: Duration::from_secs(1),
            batch_size: 100,
        }
    }

    /// Set the tick interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the maximum number of notifications released per tick.
    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Tick until the shutdown signal flips. A tick in progress always
    /// completes before the loop exits.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval = ?self.interval,
            batch_size = self.batch_size,
            "Starting notification scheduler"
        );

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                result = shutdown.changed() => {
                    match result {
                        Ok(()) if *shutdown.borrow() => {
                            info!("Notification scheduler shutting down");
                            break;
                        }
                        Ok(()) => {}
                        Err(_) => {
                            info!("Notification scheduler shutdown channel closed");
                            break;
                        }
                    }
                }
                _ = ticker.tick() => {
                    match self.tick().await {
                        Ok(report) if report.total() > 0 => {
                            info!(
                                claimed = report.claimed,
                                failed = report.failed,
                                skipped = report.skipped,
                                "Scheduler tick"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "Scheduler tick aborted"),
                    }
                }
            }
        }
    }

    pub async fn tick(&self) -> Result<TickReport, NotificationError> {
        self.tick_at(now_utc()).await
    }

    /// Release everything due by `now + interval / 2`.
    ///
    /// Only the scan can fail the tick; per-notification errors are logged
    /// and counted.
    pub async fn tick_at(&self, now: OffsetDateTime) -> Result<TickReport, NotificationError> {
        let until = now + self.interval / 2;
        let due = self.repo.store().fetch_due(until, self.batch_size).await?;

        let mut report = TickReport::default();
        if due.is_empty() {
            return Ok(report);
        }
        debug!(count = due.len(), "Releasing due notifications");

        for notification in &due {
            match self.release(notification).await {
                Release::Claimed => report.claimed += 1,
                Release::Failed => report.failed += 1,
                Release::Skipped => report.skipped += 1,
            }
        }
        Ok(report)
    }

    async fn release(&self, notification: &Notification) -> Release {
        let id = notification.id;

        let published = match serde_json::to_vec(notification) {
            Ok(payload) => self.queue.publish(&payload).await,
            Err(e) => Err(NotificationError::Internal(format!("encode payload: {e}"))),
        };

        let transition = match published {
            Ok(()) => Transition::Claim,
            Err(e) => {
                warn!(notification_id = %id, error = %e, "Publish failed");
                Transition::PublishFailed {
                    error: format!("publish failed: {e}"),
                }
            }
        };

        match self.repo.transition(id, &transition).await {
            Ok(true) if matches!(transition, Transition::Claim) => Release::Claimed,
            Ok(true) => Release::Failed,
            Ok(false) => {
                debug!(notification_id = %id, "Notification no longer scheduled");
                Release::Skipped
            }
            Err(e) => {
                error!(
                    notification_id = %id,
                    transition = transition.name(),
                    error = %e,
                    "Failed to record scheduler transition"
                );
                Release::Skipped
            }
        }
    }
}

enum Release {
    Claimed,
    Failed,
    Skipped,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryQueue, InMemoryStore, LocalCache};
    use crate::types::{NewNotification, NotificationStatus};

    struct Fixture {
        store: Arc<InMemoryStore>,
        queue: Arc<InMemoryQueue>,
        repo: Arc<NotificationRepository>,
        scheduler: Scheduler,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let queue = Arc::new(InMemoryQueue::new());
        let repo = Arc::new(NotificationRepository::new(
            store.clone(),
            Arc::new(LocalCache::new()),
            Duration::from_secs(60),
        ));
        let scheduler = Scheduler::new(repo.clone(), queue.clone())
            .with_interval(Duration::from_secs(10))
            .with_batch_size(10);
        Fixture {
            store,
            queue,
            repo,
            scheduler,
        }
    }

    async fn schedule(repo: &NotificationRepository, send_for: OffsetDateTime) -> Notification {
        let n = Notification::scheduled(
            NewNotification {
                recipient: 1,
                channels: vec!["email".into()],
                content: "hello".into(),
                send_for,
            },
            now_utc(),
        );
        repo.insert(&n).await.unwrap();
        n
    }

    #[tokio::test]
    async fn test_tick_claims_due_and_leaves_future() {
        let f = fixture();
        let now = now_utc();
        let due = schedule(&f.repo, now - time::Duration::seconds(1)).await;
        let within_half_interval = schedule(&f.repo, now + time::Duration::seconds(4)).await;
        let later = schedule(&f.repo, now + time::Duration::minutes(5)).await;

        let report = f.scheduler.tick_at(now).await.unwrap();
        assert_eq!(report.claimed, 2);
        assert_eq!(f.queue.snapshot().ready, 2);

        for id in [due.id, within_half_interval.id] {
            let n = f.repo.get(id).await.unwrap().unwrap();
            assert_eq!(n.status, NotificationStatus::Publishing);
        }
        let n = f.repo.get(later.id).await.unwrap().unwrap();
        assert_eq!(n.status, NotificationStatus::Scheduled);
    }

    #[tokio::test]
    async fn test_second_tick_does_not_republish() {
        let f = fixture();
        let now = now_utc();
        schedule(&f.repo, now).await;

        assert_eq!(f.scheduler.tick_at(now).await.unwrap().claimed, 1);
        assert_eq!(f.scheduler.tick_at(now).await.unwrap(), TickReport::default());
        assert_eq!(f.queue.snapshot().ready, 1);
    }

    #[tokio::test]
    async fn test_publish_failure_marks_failed() {
        let f = fixture();
        let now = now_utc();
        let n = schedule(&f.repo, now).await;
        f.queue.set_publish_failure(true);

        let report = f.scheduler.tick_at(now).await.unwrap();
        assert_eq!(report.failed, 1);

        let stored = f.repo.get(n.id).await.unwrap().unwrap();
        assert_eq!(stored.status, NotificationStatus::Failed);
        assert!(stored.last_error.contains("publish refused"));
    }

    #[tokio::test]
    async fn test_scan_failure_aborts_tick() {
        let f = fixture();
        let now = now_utc();
        schedule(&f.repo, now).await;
        f.store.set_unavailable(true);

        assert!(f.scheduler.tick_at(now).await.is_err());
        assert_eq!(f.queue.snapshot().ready, 0);

        f.store.set_unavailable(false);
        assert_eq!(f.scheduler.tick_at(now).await.unwrap().claimed, 1);
    }

    #[tokio::test]
    async fn test_batch_size_bounds_tick() {
        let f = fixture();
        let now = now_utc();
        for _ in 0..15 {
            schedule(&f.repo, now).await;
        }
        assert_eq!(f.scheduler.tick_at(now).await.unwrap().claimed, 10);
        assert_eq!(f.scheduler.tick_at(now).await.unwrap().claimed, 5);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let f = fixture();
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(f.scheduler.run(rx));
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
