use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{ChannelSender, SendReceipt};
use crate::error::NotificationError;
use crate::types::Notification;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,

    /// Bot API base URL
    #[serde(default = "default_api_base")]
    pub api_base: String,

    #[serde(default = "super::default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
}

fn default_api_base() -> String {
    "https://api.telegram.org".to_string()
}

/// Sends the content to the chat whose id is the recipient id.
pub struct TelegramAdapter {
    http_client: Client,
    config: TelegramConfig,
}

impl TelegramAdapter {
    pub fn new(config: TelegramConfig) -> Result<Self, NotificationError> {
        let http_client = super::http_client(config.request_timeout)?;
        Ok(Self {
            http_client,
            config,
        })
    }
}

#[async_trait]
impl ChannelSender for TelegramAdapter {
    fn channel(&self) -> &str {
        "telegram"
    }

    async fn send(&self, notification: &Notification) -> Result<SendReceipt, NotificationError> {
        let url = format!(
            "{}/bot{}/sendMessage",
            self.config.api_base.trim_end_matches('/'),
            self.config.bot_token
        );

        let body = json!({
            "chat_id": notification.recipient,
            "text": &notification.content,
            "disable_web_page_preview": true
        });

        let response = self
            .http_client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| NotificationError::SendFailed(e.without_url().to_string()))?;

        let status = response.status();
        let response_body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| NotificationError::SendFailed(e.without_url().to_string()))?;

        if status.is_success() && response_body["ok"].as_bool() == Some(true) {
            let message_id = response_body["result"]["message_id"]
                .as_i64()
                .map(|id| id.to_string());
            Ok(SendReceipt {
                external_id: message_id,
            })
        } else {
            let description = response_body["description"]
                .as_str()
                .unwrap_or("Unknown error");
            Err(NotificationError::SendFailed(format!(
                "telegram {status}: {description}"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NewNotification, now_utc};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn notification() -> Notification {
        Notification::scheduled(
            NewNotification {
                recipient: 123456,
                channels: vec!["telegram".into()],
                content: "Your order shipped".into(),
                send_for: now_utc() + time::Duration::minutes(1),
            },
            now_utc(),
        )
    }

    fn adapter(server: &MockServer) -> TelegramAdapter {
        TelegramAdapter::new(TelegramConfig {
            bot_token: "TOKEN".into(),
            api_base: server.uri(),
            request_timeout: Duration::from_millis(200),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_send_posts_to_recipient_chat() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/sendMessage"))
            .and(body_partial_json(json!({"chat_id": 123456, "text": "Your order shipped"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"ok": true, "result": {"message_id": 77}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let receipt = adapter(&server).send(&notification()).await.unwrap();
        assert_eq!(receipt.external_id.as_deref(), Some("77"));
    }

    #[tokio::test]
    async fn test_api_error_is_send_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(
                json!({"ok": false, "description": "Bad Request: chat not found"}),
            ))
            .mount(&server)
            .await;

        let err = adapter(&server).send(&notification()).await.unwrap_err();
        assert!(err.to_string().contains("chat not found"));
    }

    #[tokio::test]
    async fn test_unanswered_request_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
            .mount(&server)
            .await;

        let started = std::time::Instant::now();
        let err = adapter(&server).send(&notification()).await.unwrap_err();
        assert!(matches!(err, NotificationError::SendFailed(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
