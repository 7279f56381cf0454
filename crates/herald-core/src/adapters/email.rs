use std::collections::HashMap;

use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use serde::{Deserialize, Serialize};

use super::{ChannelSender, SendReceipt};
use crate::error::NotificationError;
use crate::types::{Notification, RecipientId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub smtp_host: String,

    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,

    #[serde(default)]
    pub smtp_username: Option<String>,

    #[serde(default)]
    pub smtp_password: Option<String>,

    /// Use STARTTLS/TLS relay; disable only for local test servers
    #[serde(default = "default_tls")]
    pub tls: bool,

    pub from: String,

    #[serde(default = "default_subject")]
    pub subject: String,

    /// Recipient id (as a string key) to e-mail address
    #[serde(default)]
    pub address_book: HashMap<String, String>,
}

fn default_smtp_port() -> u16 {
    587
}

fn default_tls() -> bool {
    true
}

fn default_subject() -> String {
    "Notification".to_string()
}

pub struct EmailAdapter {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    subject: String,
    address_book: HashMap<RecipientId, Mailbox>,
}

impl EmailAdapter {
    /// Build the SMTP transport and parse every address up front.
    pub fn new(config: EmailConfig) -> Result<Self, NotificationError> {
        let from: Mailbox = config
            .from
            .parse()
            .map_err(|e| NotificationError::InvalidConfig(format!("Invalid from: {e}")))?;

        let mut address_book = HashMap::with_capacity(config.address_book.len());
        for (recipient, address) in &config.address_book {
            let id: RecipientId = recipient.parse().map_err(|_| {
                NotificationError::InvalidConfig(format!(
                    "address book key '{recipient}' is not a recipient id"
                ))
            })?;
            let mailbox: Mailbox = address.parse().map_err(|e| {
                NotificationError::InvalidConfig(format!("Invalid address for {id}: {e}"))
            })?;
            address_book.insert(id, mailbox);
        }

        let mut builder = if config.tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
                .map_err(|e| NotificationError::InvalidConfig(e.to_string()))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host)
        };
        builder = builder.port(config.smtp_port);

        if let (Some(username), Some(password)) = (&config.smtp_username, &config.smtp_password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            mailer: builder.build(),
            from,
            subject: config.subject,
            address_book,
        })
    }

    fn message_for(&self, notification: &Notification) -> Result<Message, NotificationError> {
        let to = self
            .address_book
            .get(&notification.recipient)
            .cloned()
            .ok_or_else(|| {
                NotificationError::SendFailed(format!(
                    "no e-mail address for recipient {}",
                    notification.recipient
                ))
            })?;

        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(self.subject.as_str())
            .header(ContentType::TEXT_PLAIN)
            .body(notification.content.clone())
            .map_err(|e| NotificationError::SendFailed(e.to_string()))
    }
}

#[async_trait]
impl ChannelSender for EmailAdapter {
    fn channel(&self) -> &str {
        "email"
    }

    async fn send(&self, notification: &Notification) -> Result<SendReceipt, NotificationError> {
        let email = self.message_for(notification)?;

        let response = self
            .mailer
            .send(email)
            .await
            .map_err(|e| NotificationError::SendFailed(e.to_string()))?;

        Ok(SendReceipt {
            external_id: Some(response.message().collect::<Vec<_>>().join(" ")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NewNotification, now_utc};

    fn config() -> EmailConfig {
        EmailConfig {
            smtp_host: "127.0.0.1".into(),
            smtp_port: 1,
            smtp_username: None,
            smtp_password: None,
            tls: false,
            from: "Herald <noreply@example.com>".into(),
            subject: default_subject(),
            address_book: HashMap::from([("42".to_string(), "alice@example.com".to_string())]),
        }
    }

    fn notification(recipient: RecipientId) -> Notification {
        Notification::scheduled(
            NewNotification {
                recipient,
                channels: vec!["email".into()],
                content: "Meeting moved to 3pm".into(),
                send_for: now_utc() + time::Duration::minutes(5),
            },
            now_utc(),
        )
    }

    #[tokio::test]
    async fn test_message_addressed_from_address_book() {
        let adapter = EmailAdapter::new(config()).unwrap();
        let message = adapter.message_for(&notification(42)).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("To: alice@example.com"));
        assert!(raw.contains("Subject: Notification"));
        assert!(raw.contains("Meeting moved to 3pm"));
    }

    #[tokio::test]
    async fn test_unknown_recipient_fails_channel() {
        let adapter = EmailAdapter::new(config()).unwrap();
        let err = adapter.send(&notification(7)).await.unwrap_err();
        assert!(matches!(err, NotificationError::SendFailed(_)));
        assert!(err.to_string().contains("recipient 7"));
    }

    #[test]
    fn test_invalid_address_book_rejected() {
        let mut bad_key = config();
        bad_key.address_book = HashMap::from([("alice".to_string(), "a@example.com".to_string())]);
        assert!(matches!(
            EmailAdapter::new(bad_key),
            Err(NotificationError::InvalidConfig(_))
        ));

        let mut bad_from = config();
        bad_from.from = "not an address".into();
        assert!(EmailAdapter::new(bad_from).is_err());
    }
}
