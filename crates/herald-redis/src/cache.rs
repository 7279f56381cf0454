//! Shared notification cache in Redis.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::Pool;
use herald_core::{Notification, NotificationCache, NotificationError, cache_key};
use redis::AsyncCommands;
use tracing::{debug, warn};
use uuid::Uuid;

/// JSON snapshots under `herald:notification:{id}` with `SET EX`.
#[derive(Clone)]
pub struct RedisCache {
    pool: Pool,
}

impl RedisCache {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection, NotificationError> {
        self.pool
            .get()
            .await
            .map_err(|e| NotificationError::Cache(e.to_string()))
    }
}

fn cache_error(e: redis::RedisError) -> NotificationError {
    NotificationError::Cache(e.to_string())
}

/// Redis TTLs are whole seconds and must be positive.
fn ttl_seconds(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl NotificationCache for RedisCache {
    async fn get(&self, id: Uuid) -> Result<Option<Notification>, NotificationError> {
        let key = cache_key(id);
        let mut conn = self.connection().await?;
        let raw: Option<String> = conn.get(&key).await.map_err(cache_error)?;

        let Some(raw) = raw else {
            debug!(key = %key, "cache miss");
            return Ok(None);
        };

        match serde_json::from_str(&raw) {
            Ok(notification) => Ok(Some(notification)),
            Err(e) => {
                warn!(key = %key, error = %e, "Dropping undecodable cache entry");
                let _: () = conn.del(&key).await.map_err(cache_error)?;
                Ok(None)
            }
        }
    }

    async fn set(&self, notification: &Notification, ttl: Duration) -> Result<(), NotificationError> {
        let payload = serde_json::to_string(notification)
            .map_err(|e| NotificationError::Cache(e.to_string()))?;
        let mut conn = self.connection().await?;
        let _: () = conn
            .set_ex(cache_key(notification.id), payload, ttl_seconds(ttl))
            .await
            .map_err(cache_error)?;
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), NotificationError> {
        let mut conn = self.connection().await?;
        let _: () = conn.del(cache_key(id)).await.map_err(cache_error)?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_rounds_to_whole_seconds() {
        assert_eq!(ttl_seconds(Duration::from_millis(10)), 1);
        assert_eq!(ttl_seconds(Duration::from_secs(300)), 300);
    }
}
