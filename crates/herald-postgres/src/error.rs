//! Error types for the PostgreSQL store.

use herald_core::NotificationError;
use sqlx_core::error::Error as SqlxError;

/// PostgreSQL error code for unique violation (23505).
pub const PG_UNIQUE_VIOLATION: &str = "23505";

/// Checks if a sqlx error has a specific PostgreSQL error code.
pub fn has_pg_error_code(err: &SqlxError, code: &str) -> bool {
    if let SqlxError::Database(db_err) = err {
        db_err.code().as_deref() == Some(code)
    } else {
        false
    }
}

/// Errors raised while setting up the PostgreSQL backend.
#[derive(Debug, thiserror::Error)]
pub enum PostgresError {
    /// Database connection error.
    #[error("Database connection error: {0}")]
    Connection(#[from] SqlxError),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl PostgresError {
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

impl From<PostgresError> for NotificationError {
    fn from(err: PostgresError) -> Self {
        match err {
            PostgresError::Connection(e) => NotificationError::Storage(e.to_string()),
            PostgresError::Migration(e) => {
                NotificationError::Internal(format!("Migration error: {e}"))
            }
            PostgresError::Config { message } => NotificationError::InvalidConfig(message),
        }
    }
}

/// Map a query failure onto the core error taxonomy.
pub(crate) fn storage_error(err: SqlxError) -> NotificationError {
    if has_pg_error_code(&err, PG_UNIQUE_VIOLATION) {
        NotificationError::Internal(format!("duplicate notification id: {err}"))
    } else {
        NotificationError::Storage(err.to_string())
    }
}

/// Result type alias for PostgreSQL operations.
pub type Result<T> = std::result::Result<T, PostgresError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PostgresError::config("invalid URL");
        assert!(err.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_conversion_to_notification_error() {
        let err: NotificationError = PostgresError::config("postgres.max_connections must be > 0").into();
        assert!(matches!(err, NotificationError::InvalidConfig(_)));

        let err: NotificationError = PostgresError::Connection(SqlxError::PoolTimedOut).into();
        assert!(err.is_transient());
    }

    #[test]
    fn test_pool_timeout_is_transient_storage_error() {
        assert!(storage_error(SqlxError::PoolTimedOut).is_transient());
    }
}
