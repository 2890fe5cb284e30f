//! PostgreSQL implementation of the store traits.
//!
//! # Atomicity Guarantees
//!
//! Every state transition is one SQL statement. Consumption and revocation
//! use a row-locking CTE followed by a conditional write in the same
//! statement, so the eligibility check and the mutation cannot interleave
//! with another caller. Coordination lives entirely in the database, which
//! keeps the guarantee across multiple service instances.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    db::DbPool,
    error::StoreError,
    models::{
        api_key::ApiClient,
        audit::{AuditLogEntry, NewAuditEntry},
        key::{Key, KeyFilter},
    },
    store::{
        ApiClientStore, AuditLog, ConsumeOutcome, DeleteOutcome, InsertOutcome, KeyQuery,
        KeyStore, StoreResult,
    },
};

/// Store backed by a PostgreSQL connection pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

/// Outcome label plus the key row as seen under the row lock.
#[derive(Debug, sqlx::FromRow)]
struct OutcomeRow {
    outcome: String,
    #[sqlx(flatten)]
    key: Key,
}

fn unexpected_outcome(outcome: &str) -> StoreError {
    StoreError::Database(sqlx::Error::Protocol(format!(
        "unexpected outcome '{outcome}' from conditional statement"
    )))
}

#[async_trait]
impl KeyStore for PgStore {
    async fn insert(&self, key: &Key) -> StoreResult<InsertOutcome> {
        // The registry row and the key row are written together; if the
        // identifier was ever reserved before, `reserved` is empty and so
        // is the key insert.
        let inserted = sqlx::query_as::<_, Key>(
            r#"
            WITH reserved AS (
                INSERT INTO issued_identifiers (identifier)
                VALUES ($1)
                ON CONFLICT (identifier) DO NOTHING
                RETURNING identifier
            )
            INSERT INTO keys (
                identifier,
                creator_id,
                creator_name,
                creator_handle,
                created_at,
                expires_at,
                duration_label,
                notes
            )
            SELECT identifier, $2, $3, $4, $5, $6, $7, $8
            FROM reserved
            RETURNING identifier, creator_id, creator_name, creator_handle, created_at,
                      expires_at, duration_label, consumed, redeemer_name,
                      redeemer_external_id, consumed_at, notes
            "#,
        )
        .bind(&key.identifier)
        .bind(&key.creator_id)
        .bind(&key.creator_name)
        .bind(&key.creator_handle)
        .bind(key.created_at)
        .bind(key.expires_at)
        .bind(&key.duration_label)
        .bind(&key.notes)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match inserted {
            Some(key) => InsertOutcome::Inserted(key),
            None => InsertOutcome::DuplicateIdentifier,
        })
    }

    async fn find_by_identifier(&self, identifier: &str) -> StoreResult<Option<Key>> {
        let key = sqlx::query_as::<_, Key>(
            r#"
            SELECT identifier, creator_id, creator_name, creator_handle, created_at,
                   expires_at, duration_label, consumed, redeemer_name,
                   redeemer_external_id, consumed_at, notes
            FROM keys
            WHERE identifier = $1
            "#,
        )
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await?;

        Ok(key)
    }

    async fn consume_if_eligible(
        &self,
        identifier: &str,
        redeemer_name: &str,
        redeemer_external_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<ConsumeOutcome> {
        // `target` takes the row lock and, after waiting on a competing
        // redeemer, sees that redeemer's committed write. The UPDATE only
        // fires when the locked row is still eligible.
        let row = sqlx::query_as::<_, OutcomeRow>(
            r#"
            WITH target AS (
                SELECT identifier, creator_id, creator_name, creator_handle, created_at,
                       expires_at, duration_label, consumed, redeemer_name,
                       redeemer_external_id, consumed_at, notes
                FROM keys
                WHERE identifier = $1
                FOR UPDATE
            ),
            redeemed AS (
                UPDATE keys
                SET consumed = TRUE,
                    redeemer_name = $2,
                    redeemer_external_id = $3,
                    consumed_at = $4
                FROM target
                WHERE keys.identifier = target.identifier
                  AND NOT target.consumed
                  AND target.expires_at > $4
                RETURNING keys.identifier
            )
            SELECT
                CASE
                    WHEN EXISTS (SELECT 1 FROM redeemed) THEN 'consumed'
                    WHEN target.consumed THEN 'already_consumed'
                    ELSE 'expired'
                END AS outcome,
                target.*
            FROM target
            "#,
        )
        .bind(identifier)
        .bind(redeemer_name)
        .bind(redeemer_external_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        let Some(OutcomeRow { outcome, mut key }) = row else {
            return Ok(ConsumeOutcome::NotFound);
        };

        match outcome.as_str() {
            "consumed" => {
                // `target` holds the pre-update row; apply the values just written.
                key.consumed = true;
                key.redeemer_name = Some(redeemer_name.to_string());
                key.redeemer_external_id = Some(redeemer_external_id.to_string());
                key.consumed_at = Some(now);
                Ok(ConsumeOutcome::Consumed(key))
            }
            "already_consumed" => Ok(ConsumeOutcome::AlreadyConsumed),
            "expired" => Ok(ConsumeOutcome::Expired),
            other => Err(unexpected_outcome(other)),
        }
    }

    async fn delete_if_owned_and_unconsumed(
        &self,
        identifier: &str,
        requester_id: &str,
    ) -> StoreResult<DeleteOutcome> {
        let row = sqlx::query_as::<_, OutcomeRow>(
            r#"
            WITH target AS (
                SELECT identifier, creator_id, creator_name, creator_handle, created_at,
                       expires_at, duration_label, consumed, redeemer_name,
                       redeemer_external_id, consumed_at, notes
                FROM keys
                WHERE identifier = $1
                FOR UPDATE
            ),
            removed AS (
                DELETE FROM keys
                USING target
                WHERE keys.identifier = target.identifier
                  AND target.creator_id = $2
                  AND NOT target.consumed
                RETURNING keys.identifier
            )
            SELECT
                CASE
                    WHEN EXISTS (SELECT 1 FROM removed) THEN 'deleted'
                    WHEN target.creator_id <> $2 THEN 'not_owned'
                    ELSE 'already_consumed'
                END AS outcome,
                target.*
            FROM target
            "#,
        )
        .bind(identifier)
        .bind(requester_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(OutcomeRow { outcome, key }) = row else {
            return Ok(DeleteOutcome::NotFound);
        };

        match outcome.as_str() {
            "deleted" => Ok(DeleteOutcome::Deleted(key)),
            "not_owned" => Ok(DeleteOutcome::NotOwned),
            "already_consumed" => Ok(DeleteOutcome::AlreadyConsumed),
            other => Err(unexpected_outcome(other)),
        }
    }

    async fn list_by_filter(
        &self,
        query: &KeyQuery,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Key>> {
        // LIMIT NULL means no limit in PostgreSQL.
        let keys = sqlx::query_as::<_, Key>(
            r#"
            SELECT identifier, creator_id, creator_name, creator_handle, created_at,
                   expires_at, duration_label, consumed, redeemer_name,
                   redeemer_external_id, consumed_at, notes
            FROM keys
            WHERE CASE $1::text
                    WHEN 'active' THEN NOT consumed AND expires_at > $2
                    WHEN 'consumed' THEN consumed
                    WHEN 'expired' THEN NOT consumed AND expires_at <= $2
                    ELSE TRUE
                  END
              AND ($3::text IS NULL OR creator_id = $3)
            ORDER BY created_at DESC, identifier
            LIMIT $4
            "#,
        )
        .bind(filter_name(query.filter))
        .bind(now)
        .bind(&query.creator_id)
        .bind(query.limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(keys)
    }

    async fn purge_expired_unconsumed(&self, now: DateTime<Utc>) -> StoreResult<Vec<String>> {
        // A row consumed while this DELETE waits on its lock is re-checked
        // against `NOT consumed` and skipped.
        let purged = sqlx::query_scalar::<_, String>(
            "DELETE FROM keys WHERE NOT consumed AND expires_at <= $1 RETURNING identifier",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(purged)
    }

    async fn count_by_filter(&self, filter: KeyFilter, now: DateTime<Utc>) -> StoreResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM keys
            WHERE CASE $1::text
                    WHEN 'active' THEN NOT consumed AND expires_at > $2
                    WHEN 'consumed' THEN consumed
                    WHEN 'expired' THEN NOT consumed AND expires_at <= $2
                    ELSE TRUE
                  END
            "#,
        )
        .bind(filter_name(filter))
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

fn filter_name(filter: KeyFilter) -> &'static str {
    match filter {
        KeyFilter::All => "all",
        KeyFilter::Active => "active",
        KeyFilter::Consumed => "consumed",
        KeyFilter::Expired => "expired",
    }
}

#[async_trait]
impl AuditLog for PgStore {
    async fn append(&self, entry: NewAuditEntry) -> StoreResult<AuditLogEntry> {
        let stored = sqlx::query_as::<_, AuditLogEntry>(
            r#"
            INSERT INTO audit_log (
                action,
                key_identifier,
                actor_id,
                actor_name,
                redeemer_name,
                details
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, action, key_identifier, actor_id, actor_name, redeemer_name,
                      created_at, details
            "#,
        )
        .bind(entry.action.as_str())
        .bind(entry.key_identifier)
        .bind(entry.actor_id)
        .bind(entry.actor_name)
        .bind(entry.redeemer_name)
        .bind(entry.details)
        .fetch_one(&self.pool)
        .await?;

        Ok(stored)
    }

    async fn history(&self, key_identifier: &str) -> StoreResult<Vec<AuditLogEntry>> {
        let entries = sqlx::query_as::<_, AuditLogEntry>(
            r#"
            SELECT id, action, key_identifier, actor_id, actor_name, redeemer_name,
                   created_at, details
            FROM audit_log
            WHERE key_identifier = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(key_identifier)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }
}

#[async_trait]
impl ApiClientStore for PgStore {
    async fn find_active_client(&self, key_hash: &str) -> StoreResult<Option<ApiClient>> {
        let client = sqlx::query_as::<_, ApiClient>(
            "SELECT id, key_hash, client_name, created_at, is_active
             FROM api_keys
             WHERE key_hash = $1 AND is_active = true",
        )
        .bind(key_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(client)
    }
}
