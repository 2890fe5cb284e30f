//! In-memory implementation of the store traits.
//!
//! [`MemoryStore`] is intended for tests and local development. It honours
//! the same contracts as the PostgreSQL store: every conditional operation
//! runs its check and mutation under one write lock, and the lock is never
//! held across an `.await`.
//!
//! # Fault Injection
//!
//! Tests can make the store slow before it does anything
//! ([`MemoryStore::set_latency`]), slow to answer after a key mutation has
//! taken effect ([`MemoryStore::set_commit_latency`]), or make audit writes
//! fail ([`MemoryStore::set_audit_failure`]) to exercise the service's
//! timeout and audit-failure paths.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::{
    clock::{Clock, SystemClock},
    error::StoreError,
    models::{
        api_key::{ApiClient, hash_bearer_token},
        audit::{AuditLogEntry, NewAuditEntry},
        key::{Key, KeyFilter},
    },
    store::{
        ApiClientStore, AuditLog, ConsumeOutcome, DeleteOutcome, InsertOutcome, KeyQuery,
        KeyStore, StoreResult,
    },
};

#[derive(Debug, Default)]
struct MemoryState {
    keys: HashMap<String, Key>,
    /// Never pruned, so identifiers cannot be reissued.
    issued: HashSet<String>,
    audit: Vec<AuditLogEntry>,
    clients: HashMap<String, ApiClient>,
}

/// In-memory store. Clones share the same data.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
    clock: Arc<dyn Clock>,
    latency_ms: Arc<AtomicU64>,
    commit_latency_ms: Arc<AtomicU64>,
    fail_audit: Arc<AtomicBool>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Uses `clock` to timestamp audit entries.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(RwLock::new(MemoryState::default())),
            clock,
            latency_ms: Arc::new(AtomicU64::new(0)),
            commit_latency_ms: Arc::new(AtomicU64::new(0)),
            fail_audit: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Delays every subsequent operation by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(millis, Ordering::SeqCst);
    }

    /// Delays the reply of every key mutation by `latency`, after the
    /// mutation is already visible to other callers.
    pub fn set_commit_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.commit_latency_ms.store(millis, Ordering::SeqCst);
    }

    /// Makes [`AuditLog::append`] fail while `fail` is true.
    pub fn set_audit_failure(&self, fail: bool) {
        self.fail_audit.store(fail, Ordering::SeqCst);
    }

    /// Registers an active API client for `token` and returns it.
    pub fn register_client(&self, token: &str, client_name: &str) -> ApiClient {
        let client = ApiClient {
            id: Uuid::new_v4(),
            key_hash: hash_bearer_token(token),
            client_name: client_name.to_string(),
            created_at: self.clock.now(),
            is_active: true,
        };
        self.state
            .write()
            .clients
            .insert(client.key_hash.clone(), client.clone());
        client
    }

    /// Every audit entry written so far, in append order.
    pub fn audit_entries(&self) -> Vec<AuditLogEntry> {
        self.state.read().audit.clone()
    }

    async fn simulate_latency(&self) {
        sleep_millis(self.latency_ms.load(Ordering::SeqCst)).await;
    }

    async fn simulate_commit_latency(&self) {
        sleep_millis(self.commit_latency_ms.load(Ordering::SeqCst)).await;
    }
}

async fn sleep_millis(millis: u64) {
    if millis > 0 {
        tokio::time::sleep(Duration::from_millis(millis)).await;
    }
}

impl MemoryState {
    fn insert(&mut self, key: &Key) -> InsertOutcome {
        if !self.issued.insert(key.identifier.clone()) {
            return InsertOutcome::DuplicateIdentifier;
        }
        self.keys.insert(key.identifier.clone(), key.clone());
        InsertOutcome::Inserted(key.clone())
    }

    fn consume(
        &mut self,
        identifier: &str,
        redeemer_name: &str,
        redeemer_external_id: &str,
        now: DateTime<Utc>,
    ) -> ConsumeOutcome {
        let Some(key) = self.keys.get_mut(identifier) else {
            return ConsumeOutcome::NotFound;
        };
        if key.consumed {
            return ConsumeOutcome::AlreadyConsumed;
        }
        if key.expires_at <= now {
            return ConsumeOutcome::Expired;
        }

        key.consumed = true;
        key.redeemer_name = Some(redeemer_name.to_string());
        key.redeemer_external_id = Some(redeemer_external_id.to_string());
        key.consumed_at = Some(now);
        ConsumeOutcome::Consumed(key.clone())
    }

    fn delete(&mut self, identifier: &str, requester_id: &str) -> DeleteOutcome {
        match self.keys.get(identifier) {
            None => return DeleteOutcome::NotFound,
            Some(key) if key.creator_id != requester_id => return DeleteOutcome::NotOwned,
            Some(key) if key.consumed => return DeleteOutcome::AlreadyConsumed,
            Some(_) => {}
        }

        match self.keys.remove(identifier) {
            Some(key) => DeleteOutcome::Deleted(key),
            None => DeleteOutcome::NotFound,
        }
    }

    fn purge(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let expired: Vec<String> = self
            .keys
            .values()
            .filter(|key| key.matches(KeyFilter::Expired, now))
            .map(|key| key.identifier.clone())
            .collect();
        for identifier in &expired {
            self.keys.remove(identifier);
        }
        expired
    }
}

#[async_trait]
impl KeyStore for MemoryStore {
    async fn insert(&self, key: &Key) -> StoreResult<InsertOutcome> {
        self.simulate_latency().await;
        let outcome = self.state.write().insert(key);
        self.simulate_commit_latency().await;
        Ok(outcome)
    }

    async fn find_by_identifier(&self, identifier: &str) -> StoreResult<Option<Key>> {
        self.simulate_latency().await;
        Ok(self.state.read().keys.get(identifier).cloned())
    }

    async fn consume_if_eligible(
        &self,
        identifier: &str,
        redeemer_name: &str,
        redeemer_external_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<ConsumeOutcome> {
        self.simulate_latency().await;
        let outcome = self.state.write().consume(
            identifier,
            redeemer_name,
            redeemer_external_id,
            now,
        );
        self.simulate_commit_latency().await;
        Ok(outcome)
    }

    async fn delete_if_owned_and_unconsumed(
        &self,
        identifier: &str,
        requester_id: &str,
    ) -> StoreResult<DeleteOutcome> {
        self.simulate_latency().await;
        let outcome = self.state.write().delete(identifier, requester_id);
        self.simulate_commit_latency().await;
        Ok(outcome)
    }

    async fn list_by_filter(
        &self,
        query: &KeyQuery,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Key>> {
        self.simulate_latency().await;

        let mut keys: Vec<Key> = self
            .state
            .read()
            .keys
            .values()
            .filter(|key| key.matches(query.filter, now))
            .filter(|key| {
                query
                    .creator_id
                    .as_deref()
                    .is_none_or(|creator| key.creator_id == creator)
            })
            .cloned()
            .collect();

        keys.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.identifier.cmp(&b.identifier))
        });
        if let Some(limit) = query.limit {
            keys.truncate(usize::try_from(limit.max(0)).unwrap_or(usize::MAX));
        }

        Ok(keys)
    }

    async fn purge_expired_unconsumed(&self, now: DateTime<Utc>) -> StoreResult<Vec<String>> {
        self.simulate_latency().await;
        let purged = self.state.write().purge(now);
        self.simulate_commit_latency().await;
        Ok(purged)
    }

    async fn count_by_filter(&self, filter: KeyFilter, now: DateTime<Utc>) -> StoreResult<i64> {
        self.simulate_latency().await;
        let count = self
            .state
            .read()
            .keys
            .values()
            .filter(|key| key.matches(filter, now))
            .count();

        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }

    async fn ping(&self) -> StoreResult<()> {
        self.simulate_latency().await;
        Ok(())
    }
}

#[async_trait]
impl AuditLog for MemoryStore {
    async fn append(&self, entry: NewAuditEntry) -> StoreResult<AuditLogEntry> {
        self.simulate_latency().await;
        if self.fail_audit.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }

        let stored = entry.into_entry(Uuid::new_v4(), self.clock.now());
        self.state.write().audit.push(stored.clone());
        Ok(stored)
    }

    async fn history(&self, key_identifier: &str) -> StoreResult<Vec<AuditLogEntry>> {
        self.simulate_latency().await;
        Ok(self
            .state
            .read()
            .audit
            .iter()
            .filter(|entry| entry.key_identifier == key_identifier)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ApiClientStore for MemoryStore {
    async fn find_active_client(&self, key_hash: &str) -> StoreResult<Option<ApiClient>> {
        self.simulate_latency().await;
        Ok(self
            .state
            .read()
            .clients
            .get(key_hash)
            .filter(|client| client.is_active)
            .cloned())
    }
}
