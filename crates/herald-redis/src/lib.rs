//! Redis backends for Herald: a shared [`RedisCache`] and a reliable
//! list-based [`RedisQueue`], both over one deadpool connection pool.

mod cache;
mod config;
mod error;
mod queue;

pub use cache::RedisCache;
pub use config::{RedisConfig, create_pool};
pub use error::{RedisError, Result};
pub use queue::RedisQueue;

impl From<RedisError> for herald_core::NotificationError {
    fn from(e: RedisError) -> Self {
        match e {
            RedisError::Config(message) => Self::InvalidConfig(message),
            other => Self::Queue(other.to_string()),
        }
    }
}
