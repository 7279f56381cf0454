//! Queue consumer that delivers notifications to their channels.
//!
//! Messages are at-least-once. The store row, not the payload, decides
//! whether a message is still worth delivering: only rows in `publishing`
//! are dispatched, everything else is acknowledged and dropped.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::adapters::{ChannelRegistry, SendReceipt};
use crate::error::NotificationError;
use crate::queue::{Delivery, NotificationQueue};
use crate::repository::NotificationRepository;
use crate::retry::RetryPolicy;
use crate::transition::Transition;
use crate::types::{Notification, NotificationStatus, now_utc};

/// How a single message was settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// At least one channel succeeded; row is `sent`.
    Delivered { attempts: u32 },
    /// Every channel failed; row is `failed`.
    Failed { attempts: u32 },
    /// Row missing or not in `publishing`; message acknowledged unprocessed.
    Discarded(Option<NotificationStatus>),
    /// Payload could not be decoded; dropped for good.
    Rejected,
    /// Left for redelivery.
    Requeued,
}

struct ChannelResult {
    channel: String,
    attempts: u32,
    result: Result<SendReceipt, NotificationError>,
}

pub struct Dispatcher {
    repo: Arc<NotificationRepository>,
    queue: Arc<dyn NotificationQueue>,
    senders: ChannelRegistry,
    retry: RetryPolicy,
    reconnect: RetryPolicy,
    concurrency: usize,
    receive_timeout: Duration,
    requeue_delay: Duration,
    send_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        repo: Arc<NotificationRepository>,
        queue: Arc<dyn NotificationQueue>,
        senders: ChannelRegistry,
    ) -> Self {
        Self {
            repo,
            queue,
            senders,
            retry: RetryPolicy::default(),
            reconnect: RetryPolicy::default(),
            concurrency: 8,
            receive_timeout: Duration::from_secs(1),
            requeue_delay: Duration::from_millis(200),
            send_timeout: Duration::from_secs(30),
        }
    }

    /// Retry policy applied to every channel send.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Backoff used when the queue itself is unreachable.
    pub fn with_reconnect(mut self, reconnect: RetryPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Maximum number of messages handled at once.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    /// Pause before handing back a message whose claim has not landed yet.
    pub fn with_requeue_delay(mut self, delay: Duration) -> Self {
        self.requeue_delay = delay;
        self
    }

    /// Upper bound on a single send attempt; an attempt that runs past it
    /// counts as failed.
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Consume until shutdown, then wait for in-flight handlers.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            concurrency = self.concurrency,
            channels = ?self.senders.channels(),
            "Starting notification dispatcher"
        );

        let this = Arc::new(self);
        let semaphore = Arc::new(Semaphore::new(this.concurrency));
        let mut tasks = JoinSet::new();
        let mut receive_failures = 0u32;

        loop {
            while let Some(joined) = tasks.try_join_next() {
                if let Err(e) = joined {
                    error!(error = %e, "Dispatcher handler panicked");
                }
            }

            if stopping(&shutdown) {
                break;
            }

            let permit = tokio::select! {
                biased;

                _ = shutdown.changed() => continue,
                permit = semaphore.clone().acquire_owned() => permit,
            };
            let Ok(permit) = permit else { break };

            match this.queue.receive(this.receive_timeout).await {
                Ok(Some(delivery)) => {
                    receive_failures = 0;
                    let handler = this.clone();
                    tasks.spawn(async move {
                        let _permit = permit;
                        handler.handle(delivery).await
                    });
                }
                Ok(None) => receive_failures = 0,
                Err(e) => {
                    drop(permit);
                    receive_failures += 1;
                    let delay = this
                        .reconnect
                        .delay_after(receive_failures.min(this.reconnect.attempts));
                    warn!(
                        error = %e,
                        failures = receive_failures,
                        retry_in = ?delay,
                        "Queue receive failed"
                    );
                    tokio::select! {
                        biased;

                        _ = shutdown.changed() => {}
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        info!(in_flight = tasks.len(), "Notification dispatcher draining");
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Dispatcher handler panicked");
            }
        }
        info!("Notification dispatcher stopped");
    }

    /// Process one message end to end and settle it on the queue.
    pub async fn handle(&self, delivery: Delivery) -> Outcome {
        let payload: Notification = match serde_json::from_slice(&delivery.payload) {
            Ok(n) => n,
            Err(e) => {
                warn!(tag = delivery.tag, error = %e, "Rejecting malformed message");
                if let Err(e) = self.queue.reject(&delivery).await {
                    error!(tag = delivery.tag, error = %e, "Failed to reject message");
                }
                return Outcome::Rejected;
            }
        };
        let id = payload.id;

        let current = match self.repo.get_fresh(id).await {
            Ok(Some(current)) => current,
            Ok(None) => {
                debug!(notification_id = %id, "Notification no longer exists");
                self.ack(&delivery, id).await;
                return Outcome::Discarded(None);
            }
            Err(e) => {
                warn!(notification_id = %id, error = %e, "Status check failed, requeueing");
                self.requeue(&delivery, id).await;
                return Outcome::Requeued;
            }
        };

        match current.status {
            NotificationStatus::Publishing => {}
            NotificationStatus::Scheduled => {
                debug!(notification_id = %id, "Claim not committed yet, requeueing");
                tokio::time::sleep(self.requeue_delay).await;
                self.requeue(&delivery, id).await;
                return Outcome::Requeued;
            }
            status => {
                debug!(notification_id = %id, %status, "Discarding message");
                self.ack(&delivery, id).await;
                return Outcome::Discarded(Some(status));
            }
        }

        let results = join_all(
            current
                .channels
                .iter()
                .map(|channel| self.send_channel(&current, channel)),
        )
        .await;

        let attempts: u32 = results.iter().map(|r| r.attempts).sum();
        let delivered = results.iter().any(|r| r.result.is_ok());
        let transition = if delivered {
            Transition::Delivered {
                sent_at: now_utc(),
                attempts,
            }
        } else {
            let error = results
                .iter()
                .rev()
                .find_map(|r| {
                    r.result
                        .as_ref()
                        .err()
                        .map(|e| format!("{}: {e}", r.channel))
                })
                .unwrap_or_else(|| "no channels".to_string());
            Transition::DeliveryFailed { error, attempts }
        };

        match self.repo.transition(id, &transition).await {
            Ok(true) => {
                if delivered {
                    info!(notification_id = %id, attempts, "Notification sent");
                } else {
                    warn!(
                        notification_id = %id,
                        attempts,
                        error = transition.last_error().unwrap_or_default(),
                        "Notification failed on every channel"
                    );
                }
                self.ack(&delivery, id).await;
                if delivered {
                    Outcome::Delivered { attempts }
                } else {
                    Outcome::Failed { attempts }
                }
            }
            Ok(false) => {
                debug!(notification_id = %id, "Notification settled by another consumer");
                self.ack(&delivery, id).await;
                Outcome::Discarded(None)
            }
            Err(e) => {
                error!(
                    notification_id = %id,
                    error = %e,
                    "Failed to record delivery result, requeueing"
                );
                self.requeue(&delivery, id).await;
                Outcome::Requeued
            }
        }
    }

    async fn send_channel(&self, notification: &Notification, channel: &str) -> ChannelResult {
        let Some(sender) = self.senders.get(channel) else {
            warn!(notification_id = %notification.id, channel, "No sender for channel");
            return ChannelResult {
                channel: channel.to_string(),
                attempts: 0,
                result: Err(NotificationError::SendFailed(format!(
                    "no sender registered for channel '{channel}'"
                ))),
            };
        };

        let limit = self.send_timeout;
        let outcome = self
            .retry
            .run(
                |_attempt| async move {
                    tokio::time::timeout(limit, sender.send(notification))
                        .await
                        .unwrap_or_else(|_| {
                            Err(NotificationError::SendFailed(format!(
                                "no response within {limit:?}"
                            )))
                        })
                },
                |attempt, e: &NotificationError| {
                    warn!(
                        notification_id = %notification.id,
                        channel,
                        attempt,
                        error = %e,
                        "Channel send failed"
                    );
                },
            )
            .await;

        if let Ok(receipt) = &outcome.result {
            debug!(
                notification_id = %notification.id,
                channel,
                attempts = outcome.attempts,
                external_id = ?receipt.external_id,
                "Channel send succeeded"
            );
        }

        ChannelResult {
            channel: channel.to_string(),
            attempts: outcome.attempts,
            result: outcome.result,
        }
    }

    async fn ack(&self, delivery: &Delivery, id: uuid::Uuid) {
        if let Err(e) = self.queue.ack(delivery).await {
            error!(notification_id = %id, error = %e, "Failed to acknowledge message");
        }
    }

    async fn requeue(&self, delivery: &Delivery, id: uuid::Uuid) {
        if let Err(e) = self.queue.requeue(delivery).await {
            error!(notification_id = %id, error = %e, "Failed to requeue message");
        }
    }
}

fn stopping(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow() || shutdown.has_changed().is_err()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ChannelSender;
    use crate::memory::{InMemoryQueue, InMemoryStore, LocalCache};
    use crate::types::NewNotification;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakySender {
        channel: &'static str,
        failures: u32,
        calls: AtomicU32,
    }

    impl FlakySender {
        fn new(channel: &'static str, failures: u32) -> Arc<Self> {
            Arc::new(Self {
                channel,
                failures,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl ChannelSender for FlakySender {
        fn channel(&self) -> &str {
            self.channel
        }

        async fn send(&self, _n: &Notification) -> Result<SendReceipt, NotificationError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                Err(NotificationError::SendFailed(format!(
                    "{} attempt {call} refused",
                    self.channel
                )))
            } else {
                Ok(SendReceipt::default())
            }
        }
    }

    struct Fixture {
        store: Arc<InMemoryStore>,
        queue: Arc<InMemoryQueue>,
        repo: Arc<NotificationRepository>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let repo = Arc::new(NotificationRepository::new(
            store.clone(),
            Arc::new(LocalCache::new()),
            Duration::from_secs(60),
        ));
        Fixture {
            store,
            queue: Arc::new(InMemoryQueue::new()),
            repo,
        }
    }

    fn dispatcher(f: &Fixture, senders: ChannelRegistry) -> Dispatcher {
        Dispatcher::new(f.repo.clone(), f.queue.clone(), senders)
            .with_retry(RetryPolicy::new(3, Duration::from_millis(1), 2.0))
            .with_requeue_delay(Duration::from_millis(1))
    }

    async fn claimed(f: &Fixture, channels: &[&str]) -> (Notification, Delivery) {
        let n = Notification::scheduled(
            NewNotification {
                recipient: 5,
                channels: channels.iter().map(|c| c.to_string()).collect(),
                content: "hello".into(),
                send_for: now_utc(),
            },
            now_utc(),
        );
        f.repo.insert(&n).await.unwrap();
        f.queue.publish(&serde_json::to_vec(&n).unwrap()).await.unwrap();
        assert!(f.repo.transition(n.id, &Transition::Claim).await.unwrap());
        let delivery = f.queue.receive(Duration::from_millis(10)).await.unwrap().unwrap();
        (n, delivery)
    }

    #[tokio::test]
    async fn test_delivers_after_retries() {
        let f = fixture();
        let email = FlakySender::new("email", 2);
        let d = dispatcher(&f, ChannelRegistry::new().with(email.clone()));
        let (n, delivery) = claimed(&f, &["email"]).await;

        assert_eq!(d.handle(delivery).await, Outcome::Delivered { attempts: 3 });

        let stored = f.repo.get(n.id).await.unwrap().unwrap();
        assert_eq!(stored.status, NotificationStatus::Sent);
        assert!(stored.sent_at.is_some());
        assert_eq!(stored.retry_count, 3);
        assert_eq!(stored.last_error, "");
        assert_eq!(f.queue.snapshot().acked, 1);
    }

    #[tokio::test]
    async fn test_one_channel_success_is_enough() {
        let f = fixture();
        let senders = ChannelRegistry::new()
            .with(FlakySender::new("email", u32::MAX))
            .with(FlakySender::new("telegram", 0));
        let d = dispatcher(&f, senders);
        let (n, delivery) = claimed(&f, &["email", "telegram"]).await;

        assert_eq!(d.handle(delivery).await, Outcome::Delivered { attempts: 4 });
        let stored = f.repo.get(n.id).await.unwrap().unwrap();
        assert_eq!(stored.status, NotificationStatus::Sent);
    }

    #[tokio::test]
    async fn test_all_channels_fail() {
        let f = fixture();
        let senders = ChannelRegistry::new()
            .with(FlakySender::new("email", u32::MAX))
            .with(FlakySender::new("telegram", u32::MAX));
        let d = dispatcher(&f, senders);
        let (n, delivery) = claimed(&f, &["email", "telegram"]).await;

        assert_eq!(d.handle(delivery).await, Outcome::Failed { attempts: 6 });
        let stored = f.repo.get(n.id).await.unwrap().unwrap();
        assert_eq!(stored.status, NotificationStatus::Failed);
        assert!(stored.last_error.starts_with("telegram:"));
        assert!(stored.last_error.contains("attempt 3 refused"));
        assert!(stored.sent_at.is_none());
        assert_eq!(f.queue.snapshot().acked, 1);
    }

    #[tokio::test]
    async fn test_unknown_channel_fails_without_attempts() {
        let f = fixture();
        let d = dispatcher(&f, ChannelRegistry::new());
        let (n, delivery) = claimed(&f, &["sms"]).await;

        assert_eq!(d.handle(delivery).await, Outcome::Failed { attempts: 0 });
        let stored = f.repo.get(n.id).await.unwrap().unwrap();
        assert!(stored.last_error.contains("no sender registered"));
    }

    #[tokio::test]
    async fn test_malformed_payload_rejected() {
        let f = fixture();
        let d = dispatcher(&f, ChannelRegistry::new());
        f.queue.publish(b"{not json").await.unwrap();
        let delivery = f.queue.receive(Duration::from_millis(10)).await.unwrap().unwrap();

        assert_eq!(d.handle(delivery).await, Outcome::Rejected);
        let snapshot = f.queue.snapshot();
        assert_eq!(snapshot.rejected, 1);
        assert_eq!(snapshot.requeued, 0);
    }

    #[tokio::test]
    async fn test_cancelled_row_is_discarded() {
        let f = fixture();
        let email = FlakySender::new("email", 0);
        let d = dispatcher(&f, ChannelRegistry::new().with(email.clone()));
        let n = Notification::scheduled(
            NewNotification {
                recipient: 5,
                channels: vec!["email".into()],
                content: "hello".into(),
                send_for: now_utc(),
            },
            now_utc(),
        );
        f.repo.insert(&n).await.unwrap();
        f.queue.publish(&serde_json::to_vec(&n).unwrap()).await.unwrap();
        f.repo.transition(n.id, &Transition::Cancel).await.unwrap();
        let delivery = f.queue.receive(Duration::from_millis(10)).await.unwrap().unwrap();

        assert_eq!(
            d.handle(delivery).await,
            Outcome::Discarded(Some(NotificationStatus::Cancelled))
        );
        assert_eq!(email.calls.load(Ordering::SeqCst), 0);
        assert_eq!(f.queue.snapshot().acked, 1);
    }

    #[tokio::test]
    async fn test_unclaimed_row_is_requeued() {
        let f = fixture();
        let d = dispatcher(&f, ChannelRegistry::new().with(FlakySender::new("email", 0)));
        let n = Notification::scheduled(
            NewNotification {
                recipient: 5,
                channels: vec!["email".into()],
                content: "hello".into(),
                send_for: now_utc(),
            },
            now_utc(),
        );
        f.repo.insert(&n).await.unwrap();
        f.queue.publish(&serde_json::to_vec(&n).unwrap()).await.unwrap();
        let delivery = f.queue.receive(Duration::from_millis(10)).await.unwrap().unwrap();

        assert_eq!(d.handle(delivery).await, Outcome::Requeued);
        assert_eq!(f.queue.snapshot().ready, 1);
    }

    #[tokio::test]
    async fn test_store_outage_requeues() {
        let f = fixture();
        let d = dispatcher(&f, ChannelRegistry::new().with(FlakySender::new("email", 0)));
        let (n, delivery) = claimed(&f, &["email"]).await;
        f.store.set_unavailable(true);

        assert_eq!(d.handle(delivery).await, Outcome::Requeued);
        f.store.set_unavailable(false);

        let redelivered = f.queue.receive(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(d.handle(redelivered).await, Outcome::Delivered { attempts: 1 });
        let stored = f.repo.get(n.id).await.unwrap().unwrap();
        assert_eq!(stored.status, NotificationStatus::Sent);
    }

    #[tokio::test]
    async fn test_duplicate_message_after_settlement_is_discarded() {
        let f = fixture();
        let email = FlakySender::new("email", 0);
        let d = dispatcher(&f, ChannelRegistry::new().with(email.clone()));
        let (n, delivery) = claimed(&f, &["email"]).await;
        let duplicate = serde_json::to_vec(&n).unwrap();

        d.handle(delivery).await;
        f.queue.publish(&duplicate).await.unwrap();
        let again = f.queue.receive(Duration::from_millis(10)).await.unwrap().unwrap();

        assert_eq!(
            d.handle(again).await,
            Outcome::Discarded(Some(NotificationStatus::Sent))
        );
        assert_eq!(email.calls.load(Ordering::SeqCst), 1);
    }

    struct SilentSender;

    #[async_trait]
    impl ChannelSender for SilentSender {
        fn channel(&self) -> &str {
            "webhook"
        }

        async fn send(&self, _n: &Notification) -> Result<SendReceipt, NotificationError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_unanswered_send_counts_as_failed_attempt() {
        let f = fixture();
        let d = dispatcher(&f, ChannelRegistry::new().with(Arc::new(SilentSender)))
            .with_send_timeout(Duration::from_millis(20));
        let (n, delivery) = claimed(&f, &["webhook"]).await;

        let outcome = tokio::time::timeout(Duration::from_secs(3), d.handle(delivery))
            .await
            .expect("handler must settle once every attempt has timed out");
        assert_eq!(outcome, Outcome::Failed { attempts: 3 });

        let stored = f.repo.get(n.id).await.unwrap().unwrap();
        assert_eq!(stored.status, NotificationStatus::Failed);
        assert!(stored.last_error.starts_with("webhook: "));
        assert!(stored.last_error.contains("no response within"));
        assert_eq!(f.queue.snapshot().acked, 1);
    }

    #[tokio::test]
    async fn test_unanswered_channel_does_not_block_others() {
        let f = fixture();
        let senders = ChannelRegistry::new()
            .with(Arc::new(SilentSender))
            .with(FlakySender::new("email", 0));
        let d = dispatcher(&f, senders).with_send_timeout(Duration::from_millis(20));
        let (_n, delivery) = claimed(&f, &["webhook", "email"]).await;

        let outcome = tokio::time::timeout(Duration::from_secs(3), d.handle(delivery))
            .await
            .expect("handler must settle");
        assert_eq!(outcome, Outcome::Delivered { attempts: 4 });
    }
}

