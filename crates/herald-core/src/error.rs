use thiserror::Error;
use uuid::Uuid;

use crate::types::NotificationStatus;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Notification not found: {0}")]
    NotFound(Uuid),

    #[error("Notification {id} is {status}, expected scheduled")]
    Conflict {
        id: Uuid,
        status: NotificationStatus,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Malformed message: {0}")]
    Decode(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl NotificationError {
    /// Infrastructure failures that a later retry (or queue redelivery) may fix.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Storage(_) | Self::Queue(_) | Self::Cache(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, NotificationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(NotificationError::Storage("down".into()).is_transient());
        assert!(NotificationError::Queue("down".into()).is_transient());
        assert!(!NotificationError::Decode("bad json".into()).is_transient());
        assert!(!NotificationError::NotFound(Uuid::new_v4()).is_transient());
    }

    #[test]
    fn test_conflict_message_names_status() {
        let id = Uuid::nil();
        let err = NotificationError::Conflict {
            id,
            status: NotificationStatus::Publishing,
        };
        assert_eq!(
            err.to_string(),
            "Notification 00000000-0000-0000-0000-000000000000 is publishing, expected scheduled"
        );
    }
}
