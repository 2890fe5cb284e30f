//! Notification of key creators when their key is redeemed.
//!
//! Delivery is best-effort: failures are logged and never change the outcome
//! of the verify call that triggered them.

use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

use crate::models::{key::Key, webhook::WebhookPayload};

type HmacSha256 = Hmac<Sha256>;

/// Receives a callback after a key has been consumed.
#[async_trait]
pub trait ConsumptionNotifier: Send + Sync {
    async fn key_consumed(&self, key: &Key);
}

/// Notifier used when no delivery channel is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait]
impl ConsumptionNotifier for NoopNotifier {
    async fn key_consumed(&self, _key: &Key) {}
}

/// Errors raised while setting up or sending a webhook.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Invalid webhook URL: {0}")]
    InvalidUrl(String),

    #[error("Webhook secret must not be empty")]
    EmptySecret,

    #[error("Failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Webhook request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Posts a signed `key.consumed` event to a fixed URL.
///
/// # Headers Sent
///
/// - `Content-Type: application/json`
/// - `X-Webhook-Signature: sha256=<hex>`
/// - `X-Webhook-Event-Id: <uuid>`
///
/// # Timeout
///
/// 5 seconds per delivery.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    secret: String,
}

impl WebhookNotifier {
    /// Builds a notifier after validating the URL and secret.
    pub fn new(url: &str, secret: &str) -> Result<Self, WebhookError> {
        validate_webhook_url(url)?;
        if secret.is_empty() {
            return Err(WebhookError::EmptySecret);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            client,
            url: url.to_string(),
            secret: secret.to_string(),
        })
    }

    async fn send(&self, key: &Key) -> Result<reqwest::StatusCode, WebhookError> {
        let event_id = Uuid::new_v4();
        let payload_json = serde_json::to_string(&WebhookPayload::key_consumed(event_id, key))?;
        let signature = generate_signature(&self.secret, &payload_json);

        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("X-Webhook-Signature", &signature)
            .header("X-Webhook-Event-Id", event_id.to_string())
            .body(payload_json)
            .send()
            .await?;

        Ok(response.status())
    }
}

#[async_trait]
impl ConsumptionNotifier for WebhookNotifier {
    async fn key_consumed(&self, key: &Key) {
        match self.send(key).await {
            Ok(status) if status.is_success() => {
                tracing::debug!(identifier = %key.identifier, %status, "consumption webhook delivered");
            }
            Ok(status) => {
                tracing::warn!(identifier = %key.identifier, %status, "consumption webhook rejected");
            }
            Err(e) => {
                tracing::error!(identifier = %key.identifier, error = %e, "failed to send consumption webhook");
            }
        }
    }
}

/// Generate HMAC-SHA256 signature for a webhook payload.
///
/// # Format
///
/// `sha256=<hex_encoded_hmac>`
///
/// # Verification
///
/// Receivers compute HMAC-SHA256(secret, request_body) and compare in
/// constant time.
pub fn generate_signature(secret: &str, payload: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC key length is valid");
    mac.update(payload.as_bytes());
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Validate webhook URL format.
///
/// # Rules
///
/// - Must be valid URL
/// - Must be HTTPS (HTTP allowed for localhost during development)
/// - Maximum 2048 characters
pub fn validate_webhook_url(url: &str) -> Result<(), WebhookError> {
    if url.len() > 2048 {
        return Err(WebhookError::InvalidUrl(
            "URL exceeds 2048 characters".to_string(),
        ));
    }

    let parsed = url::Url::parse(url)
        .map_err(|e| WebhookError::InvalidUrl(format!("Invalid URL format: {e}")))?;

    match parsed.scheme() {
        "https" => Ok(()),
        "http" => {
            if matches!(
                parsed.host_str(),
                Some("localhost") | Some("127.0.0.1") | Some("0.0.0.0")
            ) {
                Ok(())
            } else {
                Err(WebhookError::InvalidUrl(
                    "HTTP is only allowed for localhost. Use HTTPS for production.".to_string(),
                ))
            }
        }
        _ => Err(WebhookError::InvalidUrl(
            "URL must use HTTP or HTTPS".to_string(),
        )),
    }
}
