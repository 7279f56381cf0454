use std::time::Duration;

use async_trait::async_trait;

use crate::error::NotificationError;

/// A message handed out by [`NotificationQueue::receive`].
///
/// The message stays owned by the consumer until it is acknowledged,
/// rejected or requeued.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Backend-specific handle used to settle the message.
    pub tag: u64,
    pub payload: Vec<u8>,
}

/// At-least-once hand-off from the scheduler to the dispatcher.
#[async_trait]
pub trait NotificationQueue: Send + Sync {
    /// Publish a payload onto the queue.
    async fn publish(&self, payload: &[u8]) -> Result<(), NotificationError>;

    /// Wait up to `wait` for the next message.
    async fn receive(&self, wait: Duration) -> Result<Option<Delivery>, NotificationError>;

    /// Processing finished; remove the message for good.
    async fn ack(&self, delivery: &Delivery) -> Result<(), NotificationError>;

    /// The message can never be processed; drop it without redelivery.
    async fn reject(&self, delivery: &Delivery) -> Result<(), NotificationError>;

    /// Processing could not finish; make the message available again.
    async fn requeue(&self, delivery: &Delivery) -> Result<(), NotificationError>;
}
