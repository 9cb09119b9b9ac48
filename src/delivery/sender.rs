use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

use super::model::{DeliveryError, NotificationMessage, PushError, PushSubscription};
use crate::digest::model::DigestEmail;

/// Sends one push message to one browser subscription.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PushSender: Send + Sync {
    async fn send(
        &self,
        subscription: &PushSubscription,
        message: &NotificationMessage,
    ) -> Result<(), PushError>;
}

/// Hands a rendered digest to the mail system. Receivers dedupe on `dedupe_key`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, email: &DigestEmail) -> Result<(), DeliveryError>;
}

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap_or_default()
}

/// Posts push messages to a WebPush gateway which does the VAPID signing.
pub struct HttpPushSender {
    url: String,
    client: reqwest::Client,
}

impl HttpPushSender {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: http_client(),
        }
    }
}

#[async_trait]
impl PushSender for HttpPushSender {
    async fn send(
        &self,
        subscription: &PushSubscription,
        message: &NotificationMessage,
    ) -> Result<(), PushError> {
        let body = json!({
            "endpoint": subscription.endpoint,
            "keys": {
                "p256dh": subscription.p256dh_key,
                "auth": subscription.auth_key,
            },
            "payload": message,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| PushError::Unreachable(e.to_string()))?;

        match response.status() {
            status if status.is_success() => {
                debug!(
                    "Push delivered for notification {} to subscription {}",
                    message.notification_id, subscription.id
                );
                Ok(())
            }
            StatusCode::NOT_FOUND | StatusCode::GONE => Err(PushError::Gone),
            status => Err(PushError::Unreachable(format!("HTTP {}", status))),
        }
    }
}

/// Posts digests to a transactional mail API.
pub struct HttpEmailSender {
    url: String,
    client: reqwest::Client,
}

impl HttpEmailSender {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: http_client(),
        }
    }
}

#[async_trait]
impl EmailSender for HttpEmailSender {
    async fn send(&self, email: &DigestEmail) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(&self.url)
            .header("Idempotency-Key", &email.dedupe_key)
            .json(&json!({
                "recipient_id": email.recipient_id,
                "subject": email.subject,
                "html": email.html_body,
                "text": email.text_body,
            }))
            .send()
            .await
            .map_err(|e| DeliveryError::ChannelUnreachable(e.to_string()))?;

        // 409: the gateway already accepted this dedupe key.
        if response.status().is_success() || response.status() == StatusCode::CONFLICT {
            Ok(())
        } else {
            Err(DeliveryError::ChannelUnreachable(format!(
                "HTTP {}",
                response.status()
            )))
        }
    }
}

/// Used when no push gateway is configured.
#[derive(Debug, Default)]
pub struct LogPushSender;

#[async_trait]
impl PushSender for LogPushSender {
    async fn send(
        &self,
        subscription: &PushSubscription,
        message: &NotificationMessage,
    ) -> Result<(), PushError> {
        info!(
            "[push] {} -> {}: {}",
            message.title, subscription.endpoint, message.body
        );
        Ok(())
    }
}

/// Used when no mail gateway is configured.
#[derive(Debug, Default)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, email: &DigestEmail) -> Result<(), DeliveryError> {
        info!(
            "[email] {} ({} items) to {} [{}]",
            email.subject, email.entry_count, email.recipient_id, email.dedupe_key
        );
        Ok(())
    }
}
