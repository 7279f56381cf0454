use thiserror::Error;

#[derive(Debug, Error)]
pub enum RedisError {
    #[error("Redis pool error: {0}")]
    Pool(String),

    #[error("Redis command error: {0}")]
    Command(#[from] redis::RedisError),

    #[error("Redis configuration error: {0}")]
    Config(String),
}

impl From<deadpool_redis::PoolError> for RedisError {
    fn from(e: deadpool_redis::PoolError) -> Self {
        Self::Pool(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RedisError>;
