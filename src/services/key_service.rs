//! Key service - the key state machine and its orchestration.
//!
//! This service handles:
//! - Issuance (identifier generation, collision retry, expiry resolution)
//! - Race-safe verification and consumption
//! - Creator-only revocation
//! - Status, listing and statistics queries
//! - Audit trail writes for every successful transition
//!
//! # State Machine
//!
//! ```text
//!            verify (eligible)
//!   Active ─────────────────────► Consumed   (terminal)
//!     │  │
//!     │  └── expires_at passes ──► Expired    (derived at read time; swept later)
//!     │
//!     └───── revoke by creator ──► Revoked    (row deleted, identifier stays reserved)
//! ```
//!
//! # Atomicity Guarantees
//!
//! The service never reads a key and then writes it in a separate step.
//! Every transition is delegated to a single conditional store operation,
//! and no in-process lock is held while a store call is in flight.

use std::{future::Future, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};

use crate::{
    clock::{Clock, SystemClock},
    error::{AppError, StoreError},
    models::{
        audit::{AuditAction, AuditLogEntry, NewAuditEntry},
        key::{
            DurationTable, IssueKeyRequest, Key, KeyFilter, KeyStats, KeyStatusView,
            VerifyReason, VerifyResponse,
        },
    },
    services::{
        generator::{self, IdentifierSource, RandomIdentifiers},
        notifier::{ConsumptionNotifier, NoopNotifier},
    },
    store::{AuditLog, ConsumeOutcome, DeleteOutcome, InsertOutcome, KeyQuery, KeyStore, StoreResult},
};

/// Attempts at generating a fresh identifier before giving up.
pub const ISSUE_ATTEMPTS: usize = 3;

/// Page size for `list_all` when the caller gives none.
pub const DEFAULT_LIST_LIMIT: i64 = 25;

/// Largest page `list_all` will return.
pub const MAX_LIST_LIMIT: i64 = 100;

pub const MAX_NOTES_LEN: usize = 500;

/// Maximum length of ids, names and handles supplied by callers.
pub const MAX_FIELD_LEN: usize = 100;

/// Actor recorded for VERIFY entries. The redeemer is not a principal of
/// this system, so the service itself is the actor.
pub const SERVICE_ACTOR_ID: &str = "access-key-service";
pub const SERVICE_ACTOR_NAME: &str = "Access Key Service";

/// Default deadline for a single store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of [`KeyService::revoke`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevokeOutcome {
    Revoked,
    NotOwned,
    NotFound,
    AlreadyConsumed,
}

/// Orchestrates the key lifecycle on top of the store traits.
#[derive(Clone)]
pub struct KeyService {
    keys: Arc<dyn KeyStore>,
    audit: Arc<dyn AuditLog>,
    identifiers: Arc<dyn IdentifierSource>,
    notifier: Arc<dyn ConsumptionNotifier>,
    clock: Arc<dyn Clock>,
    durations: DurationTable,
    store_timeout: Duration,
}

impl KeyService {
    /// Creates a service with random identifiers, the wall clock, the default
    /// duration table and no consumption notifier.
    pub fn new(keys: Arc<dyn KeyStore>, audit: Arc<dyn AuditLog>) -> Self {
        Self {
            keys,
            audit,
            identifiers: Arc::new(RandomIdentifiers),
            notifier: Arc::new(NoopNotifier),
            clock: Arc::new(SystemClock),
            durations: DurationTable::default(),
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    pub fn with_identifiers(mut self, identifiers: Arc<dyn IdentifierSource>) -> Self {
        self.identifiers = identifiers;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn ConsumptionNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_durations(mut self, durations: DurationTable) -> Self {
        self.durations = durations;
        self
    }

    /// Sets the deadline applied to every store call.
    pub fn with_store_timeout(mut self, store_timeout: Duration) -> Self {
        self.store_timeout = store_timeout;
        self
    }

    /// Issue a new key.
    ///
    /// # Process
    ///
    /// 1. Validate creator fields and notes
    /// 2. Resolve the duration class to an absolute expiry
    /// 3. Generate an identifier and insert; on a duplicate, regenerate
    ///    (at most [`ISSUE_ATTEMPTS`] attempts)
    /// 4. Record CREATE in the audit log
    ///
    /// # Errors
    ///
    /// - `InvalidRequest`: missing or oversized fields, unknown duration class
    /// - `IdentifierCollision`: every attempt hit an already issued identifier
    /// - `Storage`: the store failed or timed out
    pub async fn issue(&self, request: IssueKeyRequest) -> Result<Key, AppError> {
        let creator_id = required("creator_id", &request.creator_id)?;
        let creator_name = required("creator_name", &request.creator_name)?;
        let creator_handle = required("creator_handle", &request.creator_handle)?;
        let notes = optional_notes(request.notes.as_deref())?;

        let created_at = self.clock.now();
        let (expires_at, duration_label) = self
            .durations
            .resolve(request.duration, created_at)
            .ok_or_else(|| {
                AppError::InvalidRequest(format!(
                    "Duration class '{}' is not available",
                    request.duration
                ))
            })?;

        for attempt in 1..=ISSUE_ATTEMPTS {
            let candidate = Key {
                identifier: self.identifiers.generate(),
                creator_id: creator_id.to_string(),
                creator_name: creator_name.to_string(),
                creator_handle: creator_handle.to_string(),
                created_at,
                expires_at,
                duration_label: duration_label.clone(),
                consumed: false,
                redeemer_name: None,
                redeemer_external_id: None,
                consumed_at: None,
                notes: notes.clone(),
            };

            match self.bounded("insert", self.keys.insert(&candidate)).await? {
                InsertOutcome::Inserted(key) => {
                    self.record(NewAuditEntry {
                        action: AuditAction::Create,
                        key_identifier: key.identifier.clone(),
                        actor_id: key.creator_id.clone(),
                        actor_name: key.creator_name.clone(),
                        redeemer_name: None,
                        details: format!("issued for {}", key.duration_label),
                    })
                    .await;

                    tracing::info!(
                        identifier = %key.identifier,
                        creator_id = %key.creator_id,
                        duration = %request.duration,
                        expires_at = %key.expires_at,
                        "key issued"
                    );
                    return Ok(key);
                }
                InsertOutcome::DuplicateIdentifier => {
                    tracing::warn!(attempt, "generated identifier was already issued, regenerating");
                }
            }
        }

        Err(AppError::IdentifierCollision(ISSUE_ATTEMPTS))
    }

    /// Verify a key and consume it if it is eligible.
    ///
    /// The eligibility check and the consumption are one atomic store
    /// operation: among any number of concurrent calls for the same
    /// identifier, at most one is granted.
    ///
    /// # Returns
    ///
    /// A response with exactly one reason: `granted`, `not_found`,
    /// `already_used` or `expired`. Only `granted` writes an audit entry and
    /// notifies the creator.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest`: empty or malformed identifier, missing redeemer fields
    /// - `Storage`: outcome unknown; retrying is safe, and a retry of a call
    ///   that actually succeeded reports `already_used`
    pub async fn verify_and_consume(
        &self,
        identifier: &str,
        redeemer_name: &str,
        redeemer_external_id: &str,
    ) -> Result<VerifyResponse, AppError> {
        let identifier = normalize_identifier(identifier)?;
        let redeemer_name = required("redeemer_name", redeemer_name)?.to_string();
        let redeemer_external_id =
            required("redeemer_external_id", redeemer_external_id)?.to_string();
        let now = self.clock.now();

        // Detached from the caller: a grant that lands after the deadline is
        // still audited and notified.
        let service = self.clone();
        let redemption = tokio::spawn(async move {
            service
                .redeem(&identifier, &redeemer_name, &redeemer_external_id, now)
                .await
        });

        match tokio::time::timeout(self.store_timeout, redemption).await {
            Ok(joined) => Ok(joined.map_err(StoreError::from)??),
            Err(_) => {
                tracing::warn!(
                    operation = "consume_if_eligible",
                    timeout = ?self.store_timeout,
                    "store operation timed out, redemption continues in the background"
                );
                Err(StoreError::Timeout(self.store_timeout).into())
            }
        }
    }

    async fn redeem(
        &self,
        identifier: &str,
        redeemer_name: &str,
        redeemer_external_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<VerifyResponse> {
        let outcome = self
            .keys
            .consume_if_eligible(identifier, redeemer_name, redeemer_external_id, now)
            .await?;

        let response = match outcome {
            ConsumeOutcome::Consumed(key) => {
                self.record(NewAuditEntry {
                    action: AuditAction::Verify,
                    key_identifier: key.identifier.clone(),
                    actor_id: SERVICE_ACTOR_ID.to_string(),
                    actor_name: SERVICE_ACTOR_NAME.to_string(),
                    redeemer_name: Some(redeemer_name.to_string()),
                    details: format!("redeemed by external id {redeemer_external_id}"),
                })
                .await;

                let response = VerifyResponse::granted(&key);
                self.notify_consumed(key);
                response
            }
            ConsumeOutcome::AlreadyConsumed => VerifyResponse::denied(VerifyReason::AlreadyUsed),
            ConsumeOutcome::Expired => VerifyResponse::denied(VerifyReason::Expired),
            ConsumeOutcome::NotFound => VerifyResponse::denied(VerifyReason::NotFound),
        };

        tracing::info!(
            identifier = %identifier,
            granted = response.granted,
            reason = ?response.reason,
            "key verification"
        );
        Ok(response)
    }

    /// Revoke (delete) an unconsumed key on behalf of its creator.
    ///
    /// Ownership is identity equality between `requester_id` and the key's
    /// `creator_id`, and is checked before consumption. The identifier
    /// remains reserved after revocation.
    pub async fn revoke(
        &self,
        identifier: &str,
        requester_id: &str,
    ) -> Result<RevokeOutcome, AppError> {
        let identifier = normalize_identifier(identifier)?;
        let requester_id = required("requester_id", requester_id)?;

        let outcome = self
            .bounded(
                "delete_if_owned_and_unconsumed",
                self.keys.delete_if_owned_and_unconsumed(&identifier, requester_id),
            )
            .await?;

        let outcome = match outcome {
            DeleteOutcome::Deleted(key) => {
                self.record(NewAuditEntry {
                    action: AuditAction::Revoke,
                    key_identifier: key.identifier.clone(),
                    actor_id: key.creator_id.clone(),
                    actor_name: key.creator_name.clone(),
                    redeemer_name: None,
                    details: "revoked by creator before use".to_string(),
                })
                .await;
                RevokeOutcome::Revoked
            }
            DeleteOutcome::NotOwned => RevokeOutcome::NotOwned,
            DeleteOutcome::NotFound => RevokeOutcome::NotFound,
            DeleteOutcome::AlreadyConsumed => RevokeOutcome::AlreadyConsumed,
        };

        tracing::info!(identifier = %identifier, requester_id, outcome = ?outcome, "key revocation");
        Ok(outcome)
    }

    /// Current state and metadata of a key. Read-only.
    ///
    /// Returns `Ok(None)` if the key does not exist (never issued, revoked
    /// or swept).
    pub async fn check_status(&self, identifier: &str) -> Result<Option<KeyStatusView>, AppError> {
        let identifier = normalize_identifier(identifier)?;
        let now = self.clock.now();

        let key = self
            .bounded("find_by_identifier", self.keys.find_by_identifier(&identifier))
            .await?;

        Ok(key.map(|key| KeyStatusView {
            state: key.state_at(now),
            key,
        }))
    }

    /// The requester's own active keys, newest first.
    pub async fn list_mine(&self, requester_id: &str) -> Result<Vec<Key>, AppError> {
        let requester_id = required("requester_id", requester_id)?;
        let query = KeyQuery {
            filter: KeyFilter::Active,
            creator_id: Some(requester_id.to_string()),
            limit: None,
        };

        Ok(self
            .bounded("list_by_filter", self.keys.list_by_filter(&query, self.clock.now()))
            .await?)
    }

    /// Keys matching `filter`, newest first.
    ///
    /// `limit` defaults to [`DEFAULT_LIST_LIMIT`] and is clamped to
    /// `1..=MAX_LIST_LIMIT`.
    pub async fn list_all(&self, filter: KeyFilter, limit: Option<i64>) -> Result<Vec<Key>, AppError> {
        let query = KeyQuery {
            filter,
            creator_id: None,
            limit: Some(limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)),
        };

        Ok(self
            .bounded("list_by_filter", self.keys.list_by_filter(&query, self.clock.now()))
            .await?)
    }

    /// Deadline applied to each store round trip.
    pub fn store_timeout(&self) -> Duration {
        self.store_timeout
    }

    /// Key counts: total, used (consumed), valid (active) and expired.
    ///
    /// Each count is an independent query against the same `now`.
    pub async fn stats(&self) -> Result<KeyStats, AppError> {
        let now = self.clock.now();
        let (total, used, valid, expired) = tokio::try_join!(
            self.bounded("count_by_filter", self.keys.count_by_filter(KeyFilter::All, now)),
            self.bounded("count_by_filter", self.keys.count_by_filter(KeyFilter::Consumed, now)),
            self.bounded("count_by_filter", self.keys.count_by_filter(KeyFilter::Active, now)),
            self.bounded("count_by_filter", self.keys.count_by_filter(KeyFilter::Expired, now)),
        )?;

        Ok(KeyStats {
            total,
            used,
            valid,
            expired,
        })
    }

    /// Audit entries recorded for an identifier, oldest first.
    ///
    /// History outlives the key row, so revoked and swept identifiers still
    /// have a trail.
    pub async fn audit_trail(&self, identifier: &str) -> Result<Vec<AuditLogEntry>, AppError> {
        let identifier = normalize_identifier(identifier)?;
        Ok(self
            .bounded("audit_history", self.audit.history(&identifier))
            .await?)
    }

    /// Probes the key store.
    pub async fn health(&self) -> Result<(), AppError> {
        Ok(self.bounded("ping", self.keys.ping()).await?)
    }

    /// Runs a store call under the configured deadline.
    ///
    /// A timed-out call may still have taken effect in the store; it is
    /// reported as a transient failure, never as a key state.
    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = StoreResult<T>>,
    ) -> StoreResult<T> {
        match tokio::time::timeout(self.store_timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    operation,
                    timeout = ?self.store_timeout,
                    "store operation timed out"
                );
                Err(StoreError::Timeout(self.store_timeout))
            }
        }
    }

    /// Appends an audit entry. Failures are logged and never propagated, so
    /// a transition that already happened is still reported as such.
    async fn record(&self, entry: NewAuditEntry) {
        let action = entry.action;
        let identifier = entry.key_identifier.clone();

        match self.bounded("audit_append", self.audit.append(entry)).await {
            Ok(stored) => {
                tracing::info!(
                    audit.id = %stored.id,
                    audit.action = %stored.action,
                    audit.key = %stored.key_identifier,
                    audit.actor = %stored.actor_id,
                    "audit_event"
                );
            }
            Err(e) => {
                tracing::error!(%action, identifier = %identifier, error = %e, "failed to write audit entry");
            }
        }
    }

    fn notify_consumed(&self, key: Key) {
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            notifier.key_consumed(&key).await;
        });
    }
}

/// Trims `value` and checks it is present and not oversized.
fn required<'a>(field: &str, value: &'a str) -> Result<&'a str, AppError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::InvalidRequest(format!("{field} is required")));
    }
    if value.chars().count() > MAX_FIELD_LEN {
        return Err(AppError::InvalidRequest(format!(
            "{field} must be at most {MAX_FIELD_LEN} characters"
        )));
    }
    Ok(value)
}

fn optional_notes(notes: Option<&str>) -> Result<Option<String>, AppError> {
    let Some(notes) = notes.map(str::trim).filter(|n| !n.is_empty()) else {
        return Ok(None);
    };
    if notes.chars().count() > MAX_NOTES_LEN {
        return Err(AppError::InvalidRequest(format!(
            "notes must be at most {MAX_NOTES_LEN} characters"
        )));
    }
    Ok(Some(notes.to_string()))
}

/// Trims and uppercases a caller-supplied identifier and checks its shape.
fn normalize_identifier(identifier: &str) -> Result<String, AppError> {
    let identifier = identifier.trim().to_ascii_uppercase();
    if identifier.is_empty() {
        return Err(AppError::InvalidRequest("identifier is required".to_string()));
    }
    if !generator::is_well_formed(&identifier) {
        return Err(AppError::InvalidRequest(format!(
            "identifier must be {} letters or digits",
            generator::IDENTIFIER_LEN
        )));
    }
    Ok(identifier)
}
