//! Shared fixtures for integration tests.

#![allow(dead_code, reason = "each test binary uses a different subset")]

pub mod pg;

use std::{collections::VecDeque, sync::Arc};

use access_key_service::{
    clock::ManualClock,
    models::key::{DurationClass, IssueKeyRequest},
    services::{generator::IdentifierSource, key_service::KeyService},
    store::MemoryStore,
};
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;

pub struct Harness {
    pub store: MemoryStore,
    pub clock: ManualClock,
    pub service: Arc<KeyService>,
}

/// Service over a fresh in-memory store with a frozen clock.
pub fn harness() -> Harness {
    harness_with(|service| service)
}

/// Like [`harness`], with a hook to customise the service before it is shared.
pub fn harness_with(configure: impl FnOnce(KeyService) -> KeyService) -> Harness {
    let clock = ManualClock::new(
        Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, 0)
            .single()
            .expect("valid start time"),
    );
    let store = MemoryStore::with_clock(Arc::new(clock.clone()));
    let service = KeyService::new(Arc::new(store.clone()), Arc::new(store.clone()))
        .with_clock(Arc::new(clock.clone()));

    Harness {
        store,
        clock,
        service: Arc::new(configure(service)),
    }
}

pub fn issue_request(creator_id: &str, duration: DurationClass) -> IssueKeyRequest {
    IssueKeyRequest {
        creator_id: creator_id.to_string(),
        creator_name: format!("user-{creator_id}"),
        creator_handle: format!("handle-{creator_id}"),
        duration,
        notes: None,
    }
}

/// Identifier source that replays a fixed script.
#[derive(Debug)]
pub struct ScriptedIdentifiers {
    script: Mutex<VecDeque<String>>,
}

impl ScriptedIdentifiers {
    pub fn new(ids: &[&str]) -> Self {
        Self {
            script: Mutex::new(ids.iter().map(|id| (*id).to_string()).collect()),
        }
    }
}

impl IdentifierSource for ScriptedIdentifiers {
    fn generate(&self) -> String {
        self.script
            .lock()
            .pop_front()
            .expect("identifier script exhausted")
    }
}
