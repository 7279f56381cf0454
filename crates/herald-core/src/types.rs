use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, UtcOffset};
use uuid::Uuid;

use crate::error::NotificationError;

/// Opaque recipient identifier.
pub type RecipientId = i64;

/// Notification lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Scheduled,
    Publishing,
    Sent,
    Failed,
    Cancelled,
}

impl NotificationStatus {
    pub const ALL: [NotificationStatus; 5] = [
        Self::Scheduled,
        Self::Publishing,
        Self::Sent,
        Self::Failed,
        Self::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Publishing => "publishing",
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Terminal states never transition further.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationStatus {
    type Err = NotificationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(Self::Scheduled),
            "publishing" => Ok(Self::Publishing),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(NotificationError::Internal(format!(
                "unknown notification status '{other}'"
            ))),
        }
    }
}

/// A notification held until its send time and then dispatched.
///
/// The same JSON shape is used for the queue payload, the cache value and
/// the HTTP representation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,

    pub recipient: RecipientId,

    /// Delivery channels in the order they were requested
    pub channels: Vec<String>,

    pub content: String,

    pub status: NotificationStatus,

    /// Earliest moment delivery may begin
    #[serde(with = "time::serde::rfc3339")]
    pub send_for: OffsetDateTime,

    #[serde(with = "time::serde::rfc3339::option", default)]
    pub sent_at: Option<OffsetDateTime>,

    /// Delivery attempts recorded when dispatch finished
    #[serde(default)]
    pub retry_count: u32,

    #[serde(default)]
    pub last_error: String,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Notification {
    /// Build a freshly scheduled notification from a validated request.
    pub fn scheduled(request: NewNotification, now: OffsetDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            recipient: request.recipient,
            channels: request.channels,
            content: request.content,
            status: NotificationStatus::Scheduled,
            send_for: normalize_timestamp(request.send_for),
            sent_at: None,
            retry_count: 0,
            last_error: String::new(),
            created_at: normalize_timestamp(now),
        }
    }
}

/// Request to schedule a notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewNotification {
    pub recipient: RecipientId,
    pub channels: Vec<String>,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub send_for: OffsetDateTime,
}

/// Notification statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationStats {
    pub scheduled: u64,
    pub publishing: u64,
    pub sent: u64,
    pub failed: u64,
    pub cancelled: u64,
}

impl NotificationStats {
    pub fn record(&mut self, status: NotificationStatus, count: u64) {
        match status {
            NotificationStatus::Scheduled => self.scheduled += count,
            NotificationStatus::Publishing => self.publishing += count,
            NotificationStatus::Sent => self.sent += count,
            NotificationStatus::Failed => self.failed += count,
            NotificationStatus::Cancelled => self.cancelled += count,
        }
    }
}

/// UTC with microsecond precision, which is what the store keeps.
pub fn normalize_timestamp(t: OffsetDateTime) -> OffsetDateTime {
    let t = t.to_offset(UtcOffset::UTC);
    t.replace_microsecond(t.microsecond()).unwrap_or(t)
}

pub fn now_utc() -> OffsetDateTime {
    normalize_timestamp(OffsetDateTime::now_utc())
}
