use std::time::Duration;

use deadpool_redis::{Pool, Runtime};
use herald_core::RetryPolicy;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{RedisError, Result};

/// Redis connection settings shared by the cache and the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Pool wait/create/recycle timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,

    /// Ready list for queued notifications
    #[serde(default = "default_queue_key")]
    pub queue_key: String,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_timeout_ms() -> u64 {
    5000
}

fn default_queue_key() -> String {
    "herald:notifications".to_string()
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
            queue_key: default_queue_key(),
        }
    }
}

impl RedisConfig {
    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(RedisError::Config("redis url must not be empty".into()));
        }
        if self.pool_size == 0 {
            return Err(RedisError::Config("redis pool_size must be > 0".into()));
        }
        if self.queue_key.trim().is_empty() {
            return Err(RedisError::Config("redis queue_key must not be empty".into()));
        }
        Ok(())
    }
}

/// Build the pool and make sure Redis answers, retrying under `reconnect`.
pub async fn create_pool(config: &RedisConfig, reconnect: &RetryPolicy) -> Result<Pool> {
    config.validate()?;

    let timeout = Duration::from_millis(config.timeout_ms);
    let mut redis_config = deadpool_redis::Config::from_url(&config.url);
    let mut pool_config = redis_config.pool.take().unwrap_or_default();
    pool_config.max_size = config.pool_size;
    pool_config.timeouts.wait = Some(timeout);
    pool_config.timeouts.create = Some(timeout);
    pool_config.timeouts.recycle = Some(timeout);
    redis_config.pool = Some(pool_config);

    let pool = redis_config
        .create_pool(Some(Runtime::Tokio1))
        .map_err(|e| RedisError::Config(e.to_string()))?;

    let outcome = reconnect
        .run(
            |_attempt| ping(&pool),
            |attempt, e: &RedisError| {
                warn!(attempt, error = %e, "Redis connection attempt failed");
            },
        )
        .await;
    outcome.result?;

    info!(pool_size = config.pool_size, "Connected to Redis");
    Ok(pool)
}

async fn ping(pool: &Pool) -> Result<()> {
    let mut conn = pool.get().await?;
    let _: String = redis::cmd("PING").query_async(&mut conn).await?;
    Ok(())
}
