//! Webhook payloads sent to key creators.
//!
//! # Webhook Flow
//!
//! 1. Operator configures `NOTIFY_WEBHOOK_URL` and `NOTIFY_WEBHOOK_SECRET`
//! 2. A key is redeemed through the verify endpoint
//! 3. The service POSTs a signed `key.consumed` event to the URL
//! 4. The receiver (usually the chat bot) verifies the signature and tells
//!    the key's creator who used it
//!
//! # Security
//!
//! - Payloads are signed using HMAC-SHA256
//! - HTTPS is required except for localhost

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::key::Key;

/// Event type for a redeemed key.
pub const KEY_CONSUMED_EVENT: &str = "key.consumed";

/// Webhook payload sent to the configured endpoint.
///
/// # Example
///
/// ```json
/// {
///   "event_type": "key.consumed",
///   "event_id": "550e8400-e29b-41d4-a716-446655440000",
///   "created_at": "2025-01-15T10:30:00Z",
///   "data": {
///     "key": {
///       "identifier": "Q7ZK2M9D4XWB8RTN3HPC",
///       "creator_id": "318204961234567890",
///       "creator_name": "Ada",
///       "duration_label": "7 days",
///       "redeemer_name": "build-runner-3",
///       "redeemer_external_id": "host-7781",
///       "consumed_at": "2025-01-15T10:30:00Z"
///     }
///   }
/// }
/// ```
///
/// # Signature Verification
///
/// The webhook includes an `X-Webhook-Signature` header with format
/// `sha256=<hex_encoded_hmac>`, computed as HMAC-SHA256(secret, json_body).
#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub event_type: String,
    pub event_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub data: WebhookData,
}

/// Data portion of the webhook payload.
#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookData {
    pub key: ConsumedKeyWebhookData,
}

/// Subset of the consumed key relevant to the creator.
#[derive(Debug, Serialize, Deserialize)]
pub struct ConsumedKeyWebhookData {
    pub identifier: String,
    pub creator_id: String,
    pub creator_name: String,
    pub creator_handle: String,
    pub duration_label: String,
    pub notes: Option<String>,
    pub redeemer_name: Option<String>,
    pub redeemer_external_id: Option<String>,
    pub consumed_at: Option<DateTime<Utc>>,
}

impl From<&Key> for ConsumedKeyWebhookData {
    fn from(key: &Key) -> Self {
        Self {
            identifier: key.identifier.clone(),
            creator_id: key.creator_id.clone(),
            creator_name: key.creator_name.clone(),
            creator_handle: key.creator_handle.clone(),
            duration_label: key.duration_label.clone(),
            notes: key.notes.clone(),
            redeemer_name: key.redeemer_name.clone(),
            redeemer_external_id: key.redeemer_external_id.clone(),
            consumed_at: key.consumed_at,
        }
    }
}

impl WebhookPayload {
    /// Create a new `key.consumed` payload.
    pub fn key_consumed(event_id: Uuid, key: &Key) -> Self {
        Self {
            event_type: KEY_CONSUMED_EVENT.to_string(),
            event_id,
            created_at: Utc::now(),
            data: WebhookData { key: key.into() },
        }
    }
}
