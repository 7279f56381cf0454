//! Status state machine.
//!
//! ```text
//! scheduled ──claim──────────▶ publishing ──delivered──────▶ sent
//!     │                            └──────delivery failed──▶ failed
//!     ├──publish failed──────────────────────────────────▶ failed
//!     └──cancel──────────────────────────────────────────▶ cancelled
//! ```
//!
//! Every legal edge is a [`Transition`] variant. Stores apply a transition as
//! a single conditional update guarded by [`Transition::from`], so two writers
//! racing on the same row cannot both win.

use time::OffsetDateTime;

use crate::types::NotificationStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Scheduler published the notification to the queue.
    Claim,
    /// Scheduler could not publish the notification.
    PublishFailed { error: String },
    /// External cancel request.
    Cancel,
    /// Dispatcher reached the recipient on at least one channel.
    Delivered { sent_at: OffsetDateTime, attempts: u32 },
    /// Dispatcher exhausted retries on every channel.
    DeliveryFailed { error: String, attempts: u32 },
}

impl Transition {
    /// Status the row must currently have for the transition to apply.
    pub fn from(&self) -> NotificationStatus {
        match self {
            Self::Claim | Self::PublishFailed { .. } | Self::Cancel => {
                NotificationStatus::Scheduled
            }
            Self::Delivered { .. } | Self::DeliveryFailed { .. } => {
                NotificationStatus::Publishing
            }
        }
    }

    pub fn to(&self) -> NotificationStatus {
        match self {
            Self::Claim => NotificationStatus::Publishing,
            Self::PublishFailed { .. } | Self::DeliveryFailed { .. } => NotificationStatus::Failed,
            Self::Cancel => NotificationStatus::Cancelled,
            Self::Delivered { .. } => NotificationStatus::Sent,
        }
    }

    /// `last_error` written with the transition, if it touches that column.
    pub fn last_error(&self) -> Option<&str> {
        match self {
            Self::PublishFailed { error } | Self::DeliveryFailed { error, .. } => Some(error),
            Self::Delivered { .. } => Some(""),
            Self::Claim | Self::Cancel => None,
        }
    }

    pub fn sent_at(&self) -> Option<OffsetDateTime> {
        match self {
            Self::Delivered { sent_at, .. } => Some(*sent_at),
            _ => None,
        }
    }

    /// `retry_count` written with the transition, if it touches that column.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::Delivered { attempts, .. } | Self::DeliveryFailed { attempts, .. } => {
                Some(*attempts)
            }
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Claim => "claim",
            Self::PublishFailed { .. } => "publish_failed",
            Self::Cancel => "cancel",
            Self::Delivered { .. } => "delivered",
            Self::DeliveryFailed { .. } => "delivery_failed",
        }
    }

    /// Whether a notification currently in `status` may take this transition.
    pub fn applies_to(&self, status: NotificationStatus) -> bool {
        self.from() == status
    }
}

/// Returns true when `from -> to` is an edge of the state machine.
pub fn is_allowed(from: NotificationStatus, to: NotificationStatus) -> bool {
    use NotificationStatus::*;
    matches!(
        (from, to),
        (Scheduled, Publishing)
            | (Scheduled, Failed)
            | (Scheduled, Cancelled)
            | (Publishing, Sent)
            | (Publishing, Failed)
    )
}
