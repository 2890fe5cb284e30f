//! Persistence for keys, the audit log and API clients.
//!
//! The traits here are the only way the service layer touches storage.
//! Production uses [`PgStore`]; tests and local development use
//! [`MemoryStore`]. Both give the same guarantees:
//!
//! - [`KeyStore::consume_if_eligible`] checks and mutates in one indivisible
//!   step, so at most one caller ever observes [`ConsumeOutcome::Consumed`]
//!   for an identifier.
//! - [`KeyStore::insert`] reserves identifiers forever; a revoked or swept
//!   identifier is never accepted again.
//! - [`AuditLog`] is append-only.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    error::StoreError,
    models::{
        api_key::ApiClient,
        audit::{AuditLogEntry, NewAuditEntry},
        key::{Key, KeyFilter},
    },
};

pub type StoreResult<T> = Result<T, StoreError>;

/// Result of [`KeyStore::insert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(Key),
    /// The identifier was issued before (possibly to a since-deleted key).
    DuplicateIdentifier,
}

/// Result of [`KeyStore::consume_if_eligible`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// This call consumed the key. Carries the key as it is now stored.
    Consumed(Key),
    AlreadyConsumed,
    Expired,
    NotFound,
}

/// Result of [`KeyStore::delete_if_owned_and_unconsumed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The key was deleted. Carries the row as it was before deletion.
    Deleted(Key),
    /// The requester is not the creator. Checked before consumption.
    NotOwned,
    NotFound,
    AlreadyConsumed,
}

/// Parameters for [`KeyStore::list_by_filter`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyQuery {
    pub filter: KeyFilter,
    /// Restrict to keys issued by this principal.
    pub creator_id: Option<String>,
    /// Maximum rows to return; `None` returns every match.
    pub limit: Option<i64>,
}

/// Durable record of every key and its state.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Reserves `key.identifier` and stores the key.
    async fn insert(&self, key: &Key) -> StoreResult<InsertOutcome>;

    async fn find_by_identifier(&self, identifier: &str) -> StoreResult<Option<Key>>;

    /// Consumes the key if it exists, is unconsumed and `expires_at > now`.
    ///
    /// The check and the mutation are a single atomic step with respect to
    /// concurrent callers. When the key is not eligible nothing is written
    /// and the precise reason is returned.
    async fn consume_if_eligible(
        &self,
        identifier: &str,
        redeemer_name: &str,
        redeemer_external_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<ConsumeOutcome>;

    /// Deletes the key if `requester_id` created it and it is unconsumed.
    async fn delete_if_owned_and_unconsumed(
        &self,
        identifier: &str,
        requester_id: &str,
    ) -> StoreResult<DeleteOutcome>;

    /// Keys matching the query, newest first.
    async fn list_by_filter(&self, query: &KeyQuery, now: DateTime<Utc>)
    -> StoreResult<Vec<Key>>;

    /// Deletes every unconsumed key with `expires_at <= now`.
    ///
    /// Returns the identifiers that were deleted by this call.
    async fn purge_expired_unconsumed(&self, now: DateTime<Utc>) -> StoreResult<Vec<String>>;

    async fn count_by_filter(&self, filter: KeyFilter, now: DateTime<Utc>) -> StoreResult<i64>;

    /// Cheap connectivity check.
    async fn ping(&self) -> StoreResult<()>;
}

/// Append-only record of lifecycle events.
#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Appends an entry, stamping its id and write time.
    async fn append(&self, entry: NewAuditEntry) -> StoreResult<AuditLogEntry>;

    /// Entries for one key identifier, oldest first.
    async fn history(&self, key_identifier: &str) -> StoreResult<Vec<AuditLogEntry>>;
}

/// Lookup of HTTP API clients by token hash.
#[async_trait]
pub trait ApiClientStore: Send + Sync {
    async fn find_active_client(&self, key_hash: &str) -> StoreResult<Option<ApiClient>>;
}
