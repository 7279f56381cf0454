use herald_core::NotificationError;
use herald_postgres::PostgresError;
use herald_redis::RedisError;
use thiserror::Error;

/// Startup and runtime failures of the server process.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Notification(#[from] NotificationError),

    #[error(transparent)]
    Postgres(#[from] PostgresError),

    #[error(transparent)]
    Redis(#[from] RedisError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
