use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::Sha256;
use time::OffsetDateTime;

use super::{ChannelSender, SendReceipt};
use crate::error::NotificationError;
use crate::types::Notification;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Herald-Signature";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,

    /// HMAC-SHA256 key; when set every request carries a signature header
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,

    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Whole-request limit, connect through body
    #[serde(default = "super::default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            secret: None,
            headers: HashMap::new(),
            request_timeout: super::default_request_timeout(),
        }
    }
}

pub struct WebhookAdapter {
    http_client: Client,
    config: WebhookConfig,
}

impl WebhookAdapter {
    pub fn new(config: WebhookConfig) -> Result<Self, NotificationError> {
        let http_client = super::http_client(config.request_timeout)?;
        Ok(Self {
            http_client,
            config,
        })
    }

    fn sign_payload(&self, payload: &str, secret: &str) -> Result<String, NotificationError> {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| NotificationError::InvalidConfig(e.to_string()))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

#[async_trait]
impl ChannelSender for WebhookAdapter {
    fn channel(&self) -> &str {
        "webhook"
    }

    async fn send(&self, notification: &Notification) -> Result<SendReceipt, NotificationError> {
        let timestamp = OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_default();

        let payload = json!({
            "notification_id": notification.id,
            "recipient": notification.recipient,
            "content": notification.content,
            "send_for": notification.send_for
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_default(),
            "timestamp": timestamp
        });

        let payload_str = serde_json::to_string(&payload)
            .map_err(|e| NotificationError::SendFailed(e.to_string()))?;

        let mut request = self
            .http_client
            .post(&self.config.url)
            .header("Content-Type", "application/json");

        for (key, value) in &self.config.headers {
            request = request.header(key, value);
        }

        if let Some(secret) = &self.config.secret {
            let signature = self.sign_payload(&payload_str, secret)?;
            request = request.header(SIGNATURE_HEADER, format!("sha256={signature}"));
        }

        let response = request
            .body(payload_str)
            .send()
            .await
            .map_err(|e| NotificationError::SendFailed(e.without_url().to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(SendReceipt::default())
        } else {
            let error = response.text().await.unwrap_or_default();
            Err(NotificationError::SendFailed(format!(
                "webhook {status}: {error}"
            )))
        }
    }
}
