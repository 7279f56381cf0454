//! Reliable queue on two Redis lists.
//!
//! Publishers `LPUSH` onto the ready list. A consumer atomically moves the
//! oldest message into the processing list with `BLMOVE`, and removes it from
//! there once settled. Messages stranded in the processing list by a crashed
//! consumer are moved back by [`RedisQueue::recover`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::Pool;
use herald_core::{Delivery, NotificationError, NotificationQueue};
use redis::AsyncCommands;
use tracing::{debug, info, warn};

/// Smallest blocking wait; `BLMOVE` treats 0 as "forever".
const MIN_BLOCK: Duration = Duration::from_millis(10);

pub struct RedisQueue {
    pool: Pool,
    ready_key: String,
    processing_key: String,
    next_tag: AtomicU64,
}

impl RedisQueue {
    /// `queue_key` names the ready list; the processing list is
    /// `{queue_key}:processing`.
    pub fn new(pool: Pool, queue_key: impl Into<String>) -> Self {
        let ready_key = queue_key.into();
        let processing_key = format!("{ready_key}:processing");
        Self {
            pool,
            ready_key,
            processing_key,
            next_tag: AtomicU64::new(0),
        }
    }

    pub fn ready_key(&self) -> &str {
        &self.ready_key
    }

    pub fn processing_key(&self) -> &str {
        &self.processing_key
    }

    /// Move every message left in the processing list back to the front of
    /// the ready list. Call once at startup, before consuming.
    pub async fn recover(&self) -> Result<usize, NotificationError> {
        let mut conn = self.connection().await?;
        let mut moved = 0;
        loop {
            let item: Option<Vec<u8>> = redis::cmd("LMOVE")
                .arg(&self.processing_key)
                .arg(&self.ready_key)
                .arg("RIGHT")
                .arg("RIGHT")
                .query_async(&mut conn)
                .await
                .map_err(queue_error)?;
            if item.is_none() {
                break;
            }
            moved += 1;
        }
        if moved > 0 {
            info!(count = moved, queue = %self.ready_key, "Recovered unacknowledged messages");
        }
        Ok(moved)
    }

    pub async fn ready_len(&self) -> Result<usize, NotificationError> {
        let mut conn = self.connection().await?;
        conn.llen(&self.ready_key).await.map_err(queue_error)
    }

    pub async fn processing_len(&self) -> Result<usize, NotificationError> {
        let mut conn = self.connection().await?;
        conn.llen(&self.processing_key).await.map_err(queue_error)
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection, NotificationError> {
        self.pool
            .get()
            .await
            .map_err(|e| NotificationError::Queue(e.to_string()))
    }

    async fn remove_processing(&self, delivery: &Delivery) -> Result<(), NotificationError> {
        let mut conn = self.connection().await?;
        let removed: i64 = conn
            .lrem(&self.processing_key, 1, delivery.payload.as_slice())
            .await
            .map_err(queue_error)?;
        if removed == 0 {
            warn!(tag = delivery.tag, "Settled message was not in the processing list");
        }
        Ok(())
    }
}

fn queue_error(e: redis::RedisError) -> NotificationError {
    NotificationError::Queue(e.to_string())
}

#[async_trait]
impl NotificationQueue for RedisQueue {
    async fn publish(&self, payload: &[u8]) -> Result<(), NotificationError> {
        let mut conn = self.connection().await?;
        let _: i64 = conn
            .lpush(&self.ready_key, payload)
            .await
            .map_err(queue_error)?;
        Ok(())
    }

    async fn receive(&self, wait: Duration) -> Result<Option<Delivery>, NotificationError> {
        let mut conn = self.connection().await?;
        let payload: Option<Vec<u8>> = redis::cmd("BLMOVE")
            .arg(&self.ready_key)
            .arg(&self.processing_key)
            .arg("RIGHT")
            .arg("LEFT")
            .arg(wait.max(MIN_BLOCK).as_secs_f64())
            .query_async(&mut conn)
            .await
            .map_err(queue_error)?;

        Ok(payload.map(|payload| {
            let tag = self.next_tag.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(tag, bytes = payload.len(), "Received message");
            Delivery { tag, payload }
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), NotificationError> {
        self.remove_processing(delivery).await
    }

    async fn reject(&self, delivery: &Delivery) -> Result<(), NotificationError> {
        debug!(tag = delivery.tag, "Dropping rejected message");
        self.remove_processing(delivery).await
    }

    async fn requeue(&self, delivery: &Delivery) -> Result<(), NotificationError> {
        let mut conn = self.connection().await?;
        let _: () = redis::pipe()
            .atomic()
            .lrem(&self.processing_key, 1, delivery.payload.as_slice())
            .ignore()
            .lpush(&self.ready_key, delivery.payload.as_slice())
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(queue_error)?;
        Ok(())
    }
}
