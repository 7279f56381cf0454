use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::NotificationError;
use crate::queue::{Delivery, NotificationQueue};

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<Delivery>,
    in_flight: HashMap<u64, Delivery>,
    next_tag: u64,
    acked: usize,
    rejected: usize,
    requeued: usize,
}

/// Process-local queue with explicit acknowledgement.
///
/// Unsettled messages stay in flight until acked, rejected or requeued,
/// mirroring a broker with manual acks.
#[derive(Debug, Default)]
pub struct InMemoryQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    fail_publish: AtomicBool,
}

/// Point-in-time counters, mostly for tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueSnapshot {
    pub ready: usize,
    pub in_flight: usize,
    pub acked: usize,
    pub rejected: usize,
    pub requeued: usize,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make publishes fail as if the broker were unreachable.
    pub fn set_publish_failure(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let state = self.state.lock();
        QueueSnapshot {
            ready: state.ready.len(),
            in_flight: state.in_flight.len(),
            acked: state.acked,
            rejected: state.rejected,
            requeued: state.requeued,
        }
    }

    fn settle(&self, delivery: &Delivery) -> Result<Delivery, NotificationError> {
        self.state
            .lock()
            .in_flight
            .remove(&delivery.tag)
            .ok_or_else(|| {
                NotificationError::Queue(format!("unknown delivery tag {}", delivery.tag))
            })
    }
}

#[async_trait]
impl NotificationQueue for InMemoryQueue {
    async fn publish(&self, payload: &[u8]) -> Result<(), NotificationError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(NotificationError::Queue("publish refused".into()));
        }
        {
            let mut state = self.state.lock();
            state.next_tag += 1;
            let tag = state.next_tag;
            state.ready.push_back(Delivery {
                tag,
                payload: payload.to_vec(),
            });
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn receive(&self, wait: Duration) -> Result<Option<Delivery>, NotificationError> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock();
                if let Some(delivery) = state.ready.pop_front() {
                    state.in_flight.insert(delivery.tag, delivery.clone());
                    return Ok(Some(delivery));
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), NotificationError> {
        self.settle(delivery)?;
        self.state.lock().acked += 1;
        Ok(())
    }

    async fn reject(&self, delivery: &Delivery) -> Result<(), NotificationError> {
        self.settle(delivery)?;
        self.state.lock().rejected += 1;
        Ok(())
    }

    async fn requeue(&self, delivery: &Delivery) -> Result<(), NotificationError> {
        let delivery = self.settle(delivery)?;
        {
            let mut state = self.state.lock();
            state.requeued += 1;
            state.ready.push_back(delivery);
        }
        self.notify.notify_one();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_receive_ack() {
        let queue = InMemoryQueue::new();
        queue.publish(b"one").await.unwrap();

        let delivery = queue.receive(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(delivery.payload, b"one");
        assert_eq!(queue.snapshot().in_flight, 1);

        queue.ack(&delivery).await.unwrap();
        let snapshot = queue.snapshot();
        assert_eq!(snapshot.in_flight, 0);
        assert_eq!(snapshot.acked, 1);
        assert!(queue.ack(&delivery).await.is_err());
    }

    #[tokio::test]
    async fn test_receive_times_out_when_empty() {
        let queue = InMemoryQueue::new();
        assert!(queue.receive(Duration::from_millis(10)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_receive_wakes_on_publish() {
        let queue = std::sync::Arc::new(InMemoryQueue::new());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.receive(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.publish(b"late").await.unwrap();

        let delivery = consumer.await.unwrap().unwrap().unwrap();
        assert_eq!(delivery.payload, b"late");
    }

    #[tokio::test]
    async fn test_requeue_makes_message_visible_again() {
        let queue = InMemoryQueue::new();
        queue.publish(b"retry me").await.unwrap();

        let first = queue.receive(Duration::from_millis(10)).await.unwrap().unwrap();
        queue.requeue(&first).await.unwrap();
        let second = queue.receive(Duration::from_millis(10)).await.unwrap().unwrap();

        assert_eq!(first.payload, second.payload);
        assert_eq!(queue.snapshot().requeued, 1);
    }

    #[tokio::test]
    async fn test_publish_failure() {
        let queue = InMemoryQueue::new();
        queue.set_publish_failure(true);
        assert!(queue.publish(b"x").await.is_err());
        assert_eq!(queue.snapshot().ready, 0);
    }
}
