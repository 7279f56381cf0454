pub mod email;
pub mod telegram;
pub mod webhook;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::NotificationError;
use crate::types::Notification;

/// Result of a successful send
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendReceipt {
    /// Identifier assigned by the remote service, if any
    pub external_id: Option<String>,
}

/// Delivery transport for one channel name.
///
/// A failed send is reported as `Err`; the dispatcher decides whether to
/// retry.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    /// Channel name as it appears in `Notification::channels`
    fn channel(&self) -> &str;

    async fn send(&self, notification: &Notification) -> Result<SendReceipt, NotificationError>;
}

/// Senders keyed by channel name.
#[derive(Clone, Default)]
pub struct ChannelRegistry {
    senders: HashMap<String, Arc<dyn ChannelSender>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sender under its channel name, replacing any previous one.
    pub fn register(&mut self, sender: Arc<dyn ChannelSender>) {
        self.senders.insert(sender.channel().to_string(), sender);
    }

    #[must_use]
    pub fn with(mut self, sender: Arc<dyn ChannelSender>) -> Self {
        self.register(sender);
        self
    }

    pub fn get(&self, channel: &str) -> Option<&Arc<dyn ChannelSender>> {
        self.senders.get(channel)
    }

    pub fn channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.senders.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

/// HTTP client for the webhook and Telegram senders.
fn http_client(timeout: Duration) -> Result<reqwest::Client, NotificationError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| NotificationError::InvalidConfig(format!("Failed to create HTTP client: {e}")))
}

pub use email::{EmailAdapter, EmailConfig};
pub use telegram::{TelegramAdapter, TelegramConfig};
pub use webhook::{WebhookAdapter, WebhookConfig};
