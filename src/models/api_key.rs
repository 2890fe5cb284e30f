//! API client model for authenticating callers of the HTTP front door.
//!
//! Callers are the chat bot that requests issuance and the verifying parties
//! that redeem keys. Their bearer tokens are stored as SHA-256 hashes.
//!
//! These credentials are unrelated to the single-use access keys this
//! service issues (see [`crate::models::key::Key`]).

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Represents an API client record from the database.
///
/// # Database Table
///
/// Maps to the `api_keys` table with columns:
/// - `id`: Unique identifier (UUID)
/// - `key_hash`: SHA-256 hash of the bearer token
/// - `client_name`: Name of the integration using this token
/// - `created_at`: When the token was created
/// - `is_active`: Whether the token is currently valid
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ApiClient {
    /// Unique identifier for this client
    pub id: Uuid,

    /// SHA-256 hash of the bearer token (64 hex characters)
    pub key_hash: String,

    /// Human-readable name of the integration, e.g. "discord-bot"
    pub client_name: String,

    /// Timestamp when this client was registered
    pub created_at: DateTime<Utc>,

    /// Whether this client is currently allowed to call the API
    ///
    /// Inactive clients are rejected during authentication.
    pub is_active: bool,
}

/// Hash a bearer token the way it is stored in `api_keys.key_hash`.
pub fn hash_bearer_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}
