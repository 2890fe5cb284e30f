//! End-to-end lifecycle tests for `KeyService` over the in-memory store.

mod common;

use std::{sync::Arc, time::Duration};

use access_key_service::{
    clock::Clock,
    error::{AppError, StoreError},
    models::{
        audit::AuditAction,
        key::{DurationClass, DurationTable, Key, KeyFilter, KeyState, KeyStats, VerifyReason},
    },
    services::{
        generator::is_well_formed,
        key_service::{RevokeOutcome, SERVICE_ACTOR_ID},
        notifier::ConsumptionNotifier,
    },
};
use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use common::{ScriptedIdentifiers, harness, harness_with, issue_request};
use tokio::sync::mpsc;

#[tokio::test]
async fn issued_key_reads_back_active_with_metadata() {
    let h = harness();
    let mut request = issue_request("100", DurationClass::OneWeek);
    request.notes = Some("vendor laptop".to_string());

    let key = h.service.issue(request).await.expect("issue");
    assert!(is_well_formed(&key.identifier));
    assert_eq!(key.expires_at - key.created_at, ChronoDuration::days(7));

    let status = h
        .service
        .check_status(&key.identifier)
        .await
        .expect("status")
        .expect("key exists");
    assert_eq!(status.state, KeyState::Active);
    assert_eq!(status.key.creator_id, "100");
    assert_eq!(status.key.creator_name, "user-100");
    assert_eq!(status.key.creator_handle, "handle-100");
    assert_eq!(status.key.duration_label, "7 days");
    assert_eq!(status.key.notes.as_deref(), Some("vendor laptop"));
    assert!(!status.key.consumed);
    assert_eq!(status.key.consumed_at, None);

    let audit = h.store.audit_entries();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].action, AuditAction::Create);
    assert_eq!(audit[0].actor_id, "100");
}

#[tokio::test]
async fn status_lookup_is_case_insensitive() {
    let h = harness();
    let key = h
        .service
        .issue(issue_request("100", DurationClass::OneDay))
        .await
        .expect("issue");

    let lowered = format!("  {} ", key.identifier.to_ascii_lowercase());
    assert!(
        h.service
            .check_status(&lowered)
            .await
            .expect("status")
            .is_some()
    );
}

#[tokio::test]
async fn verify_grants_once_and_records_redeemer() {
    let h = harness();
    let key = h
        .service
        .issue(issue_request("100", DurationClass::OneDay))
        .await
        .expect("issue");

    let first = h
        .service
        .verify_and_consume(&key.identifier, "build-runner-3", "host-7781")
        .await
        .expect("verify");
    assert!(first.granted);
    assert_eq!(first.reason, VerifyReason::Granted);
    let metadata = first.key.expect("granted carries metadata");
    assert_eq!(metadata.creator_id, "100");
    assert_eq!(metadata.duration_label, "24 hours");
    assert_eq!(metadata.created_at, key.created_at);

    let second = h
        .service
        .verify_and_consume(&key.identifier, "someone-else", "host-1")
        .await
        .expect("verify");
    assert!(!second.granted);
    assert_eq!(second.reason, VerifyReason::AlreadyUsed);
    assert!(second.key.is_none());

    let stored = h
        .service
        .check_status(&key.identifier)
        .await
        .expect("status")
        .expect("consumed keys are kept");
    assert_eq!(stored.state, KeyState::Consumed);
    assert_eq!(stored.key.redeemer_name.as_deref(), Some("build-runner-3"));
    assert_eq!(stored.key.redeemer_external_id.as_deref(), Some("host-7781"));
    assert_eq!(stored.key.consumed_at, Some(h.clock.now()));

    let verifies: Vec<_> = h
        .store
        .audit_entries()
        .into_iter()
        .filter(|e| e.action == AuditAction::Verify)
        .collect();
    assert_eq!(verifies.len(), 1, "only the granted call is audited");
    assert_eq!(verifies[0].actor_id, SERVICE_ACTOR_ID);
    assert_eq!(verifies[0].redeemer_name.as_deref(), Some("build-runner-3"));
}

#[tokio::test]
async fn short_key_past_its_offset_is_expired() {
    let h = harness();
    let key = h
        .service
        .issue(issue_request("100", DurationClass::OneHour))
        .await
        .expect("issue");

    h.clock.advance(ChronoDuration::hours(1));

    let response = h
        .service
        .verify_and_consume(&key.identifier, "late", "late-1")
        .await
        .expect("verify");
    assert!(!response.granted);
    assert_eq!(response.reason, VerifyReason::Expired);

    let status = h
        .service
        .check_status(&key.identifier)
        .await
        .expect("status")
        .expect("not swept yet");
    assert_eq!(status.state, KeyState::Expired);
    assert!(!status.key.consumed);
}

#[tokio::test]
async fn unknown_identifier_is_not_found_not_expired() {
    let h = harness();
    let response = h
        .service
        .verify_and_consume("ZZZZZZZZZZZZZZZZZZZZ", "r", "r-1")
        .await
        .expect("verify");
    assert_eq!(response.reason, VerifyReason::NotFound);
    assert!(h.store.audit_entries().is_empty());
}

#[tokio::test]
async fn revoke_by_non_creator_leaves_key_active() {
    let h = harness();
    let key = h
        .service
        .issue(issue_request("100", DurationClass::OneDay))
        .await
        .expect("issue");

    let outcome = h.service.revoke(&key.identifier, "200").await.expect("revoke");
    assert_eq!(outcome, RevokeOutcome::NotOwned);

    let status = h
        .service
        .check_status(&key.identifier)
        .await
        .expect("status")
        .expect("still there");
    assert_eq!(status.state, KeyState::Active);
    assert!(
        !h.store
            .audit_entries()
            .iter()
            .any(|e| e.action == AuditAction::Revoke)
    );
}

#[tokio::test]
async fn revoke_of_consumed_key_keeps_row() {
    let h = harness();
    let key = h
        .service
        .issue(issue_request("100", DurationClass::OneDay))
        .await
        .expect("issue");
    h.service
        .verify_and_consume(&key.identifier, "r", "r-1")
        .await
        .expect("verify");

    let outcome = h.service.revoke(&key.identifier, "100").await.expect("revoke");
    assert_eq!(outcome, RevokeOutcome::AlreadyConsumed);

    let status = h
        .service
        .check_status(&key.identifier)
        .await
        .expect("status")
        .expect("row kept");
    assert_eq!(status.state, KeyState::Consumed);
}

#[tokio::test]
async fn revoked_key_is_gone_but_its_history_is_not() {
    let h = harness();
    let key = h
        .service
        .issue(issue_request("100", DurationClass::OneDay))
        .await
        .expect("issue");

    assert_eq!(
        h.service.revoke(&key.identifier, "100").await.expect("revoke"),
        RevokeOutcome::Revoked
    );
    assert!(
        h.service
            .check_status(&key.identifier)
            .await
            .expect("status")
            .is_none()
    );
    assert_eq!(
        h.service
            .verify_and_consume(&key.identifier, "r", "r-1")
            .await
            .expect("verify")
            .reason,
        VerifyReason::NotFound
    );
    assert_eq!(
        h.service.revoke(&key.identifier, "100").await.expect("revoke"),
        RevokeOutcome::NotFound
    );

    let trail: Vec<AuditAction> = h
        .service
        .audit_trail(&key.identifier)
        .await
        .expect("trail")
        .into_iter()
        .map(|e| e.action)
        .collect();
    assert_eq!(trail, [AuditAction::Create, AuditAction::Revoke]);
}

#[tokio::test]
async fn list_mine_drops_key_after_redemption() {
    let h = harness();
    let mine = h
        .service
        .issue(issue_request("100", DurationClass::OneDay))
        .await
        .expect("issue");
    h.clock.advance(ChronoDuration::seconds(1));
    let newer = h
        .service
        .issue(issue_request("100", DurationClass::OneWeek))
        .await
        .expect("issue");
    h.service
        .issue(issue_request("200", DurationClass::OneDay))
        .await
        .expect("issue");

    let listed: Vec<String> = h
        .service
        .list_mine("100")
        .await
        .expect("list")
        .into_iter()
        .map(|k| k.identifier)
        .collect();
    assert_eq!(listed, [newer.identifier.clone(), mine.identifier.clone()]);

    h.service
        .verify_and_consume(&mine.identifier, "r", "r-1")
        .await
        .expect("verify");

    let listed: Vec<String> = h
        .service
        .list_mine("100")
        .await
        .expect("list")
        .into_iter()
        .map(|k| k.identifier)
        .collect();
    assert_eq!(listed, [newer.identifier]);
}

#[tokio::test]
async fn list_all_filters_and_clamps_limit() {
    let h = harness();
    for creator in ["1", "2", "3"] {
        h.service
            .issue(issue_request(creator, DurationClass::OneHour))
            .await
            .expect("issue");
        h.clock.advance(ChronoDuration::seconds(1));
    }
    let consumed = h
        .service
        .issue(issue_request("4", DurationClass::OneDay))
        .await
        .expect("issue");
    h.service
        .verify_and_consume(&consumed.identifier, "r", "r-1")
        .await
        .expect("verify");

    assert_eq!(h.service.list_all(KeyFilter::All, None).await.expect("list").len(), 4);
    assert_eq!(h.service.list_all(KeyFilter::All, Some(0)).await.expect("list").len(), 1);
    assert_eq!(
        h.service
            .list_all(KeyFilter::Consumed, Some(50))
            .await
            .expect("list")
            .len(),
        1
    );

    h.clock.advance(ChronoDuration::hours(2));
    assert_eq!(
        h.service
            .list_all(KeyFilter::Expired, None)
            .await
            .expect("list")
            .len(),
        3
    );
    assert!(
        h.service
            .list_all(KeyFilter::Active, None)
            .await
            .expect("list")
            .is_empty()
    );
}

#[tokio::test]
async fn stats_count_each_state() {
    let h = harness();
    let short = h
        .service
        .issue(issue_request("1", DurationClass::OneHour))
        .await
        .expect("issue");
    let used = h
        .service
        .issue(issue_request("1", DurationClass::OneHour))
        .await
        .expect("issue");
    h.service
        .issue(issue_request("1", DurationClass::Permanent))
        .await
        .expect("issue");
    h.service
        .verify_and_consume(&used.identifier, "r", "r-1")
        .await
        .expect("verify");

    h.clock.advance(ChronoDuration::hours(3));
    assert_eq!(
        h.service.stats().await.expect("stats"),
        KeyStats {
            total: 3,
            used: 1,
            valid: 1,
            expired: 1,
        }
    );
    assert_eq!(
        h.service
            .check_status(&short.identifier)
            .await
            .expect("status")
            .expect("exists")
            .state,
        KeyState::Expired
    );
}

#[tokio::test]
async fn collision_is_retried_with_a_fresh_identifier() {
    let taken = "TAKENTAKENTAKENTAKEN";
    let fresh = "FRESHFRESHFRESHFRESH";
    let h = harness_with(|service| {
        service.with_identifiers(Arc::new(ScriptedIdentifiers::new(&[taken, taken, fresh])))
    });

    let first = h
        .service
        .issue(issue_request("1", DurationClass::OneDay))
        .await
        .expect("issue");
    assert_eq!(first.identifier, taken);

    let second = h
        .service
        .issue(issue_request("2", DurationClass::OneDay))
        .await
        .expect("second issue retries past the duplicate");
    assert_eq!(second.identifier, fresh);
}

#[tokio::test]
async fn revoked_identifier_is_never_reissued() {
    let taken = "TAKENTAKENTAKENTAKEN";
    let h = harness_with(|service| {
        service.with_identifiers(Arc::new(ScriptedIdentifiers::new(&[
            taken, taken, taken, taken,
        ])))
    });

    let key = h
        .service
        .issue(issue_request("1", DurationClass::OneDay))
        .await
        .expect("issue");
    h.service.revoke(&key.identifier, "1").await.expect("revoke");

    let err = h
        .service
        .issue(issue_request("1", DurationClass::OneDay))
        .await
        .expect_err("every attempt collides");
    assert!(matches!(err, AppError::IdentifierCollision(3)));
}

#[tokio::test]
async fn invalid_input_changes_nothing() {
    let h = harness();

    let mut request = issue_request("1", DurationClass::OneDay);
    request.creator_id = "   ".to_string();
    assert!(matches!(
        h.service.issue(request).await,
        Err(AppError::InvalidRequest(_))
    ));

    let mut request = issue_request("1", DurationClass::OneDay);
    request.notes = Some("n".repeat(501));
    assert!(matches!(
        h.service.issue(request).await,
        Err(AppError::InvalidRequest(_))
    ));

    assert!(matches!(
        h.service.verify_and_consume("", "r", "r-1").await,
        Err(AppError::InvalidRequest(_))
    ));
    assert!(matches!(
        h.service.verify_and_consume("not-a-key", "r", "r-1").await,
        Err(AppError::InvalidRequest(_))
    ));
    assert!(matches!(
        h.service.revoke("ZZZZZZZZZZZZZZZZZZZZ", "").await,
        Err(AppError::InvalidRequest(_))
    ));

    assert!(h.store.audit_entries().is_empty());
    assert_eq!(h.service.stats().await.expect("stats").total, 0);
}

#[tokio::test]
async fn withdrawn_duration_class_is_rejected() {
    let h = harness_with(|service| {
        service.with_durations(DurationTable::default().without(DurationClass::Permanent))
    });

    assert!(matches!(
        h.service
            .issue(issue_request("1", DurationClass::Permanent))
            .await,
        Err(AppError::InvalidRequest(_))
    ));
    assert!(
        h.service
            .issue(issue_request("1", DurationClass::OneYear))
            .await
            .is_ok()
    );
}

#[tokio::test]
async fn slow_read_is_a_transient_failure() {
    let h = harness_with(|service| service.with_store_timeout(Duration::from_millis(20)));
    let key = h
        .service
        .issue(issue_request("1", DurationClass::OneDay))
        .await
        .expect("issue");

    h.store.set_latency(Duration::from_millis(200));
    let err = h
        .service
        .check_status(&key.identifier)
        .await
        .expect_err("store is too slow");
    assert!(matches!(err, AppError::Storage(StoreError::Timeout(_))));
    assert!(err.is_retryable());

    h.store.set_latency(Duration::ZERO);
    assert!(
        h.service
            .check_status(&key.identifier)
            .await
            .expect("status")
            .is_some()
    );
}

#[tokio::test]
async fn redemption_committed_after_the_deadline_reads_as_already_used() {
    let h = harness_with(|service| service.with_store_timeout(Duration::from_millis(20)));
    let key = h
        .service
        .issue(issue_request("1", DurationClass::OneDay))
        .await
        .expect("issue");

    h.store.set_commit_latency(Duration::from_millis(200));
    let err = h
        .service
        .verify_and_consume(&key.identifier, "build-runner-3", "host-7781")
        .await
        .expect_err("reply arrives after the deadline");
    assert!(matches!(err, AppError::Storage(StoreError::Timeout(_))));
    assert!(err.is_retryable());

    // The consume already happened; its audit entry follows once the store replies.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !h
        .store
        .audit_entries()
        .iter()
        .any(|e| e.action == AuditAction::Verify)
    {
        assert!(
            tokio::time::Instant::now() < deadline,
            "late redemption was never audited"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    h.store.set_commit_latency(Duration::ZERO);

    let retry = h
        .service
        .verify_and_consume(&key.identifier, "build-runner-3", "host-7781")
        .await
        .expect("verify");
    assert!(!retry.granted);
    assert_eq!(retry.reason, VerifyReason::AlreadyUsed);

    let status = h
        .service
        .check_status(&key.identifier)
        .await
        .expect("status")
        .expect("consumed keys are kept");
    assert_eq!(status.state, KeyState::Consumed);
    assert_eq!(status.key.redeemer_name.as_deref(), Some("build-runner-3"));

    let verifies = h
        .store
        .audit_entries()
        .into_iter()
        .filter(|e| e.action == AuditAction::Verify)
        .count();
    assert_eq!(verifies, 1);
}

#[tokio::test]
async fn audit_failure_does_not_undo_redemption() {
    let h = harness();
    let key = h
        .service
        .issue(issue_request("1", DurationClass::OneDay))
        .await
        .expect("issue");

    h.store.set_audit_failure(true);
    let response = h
        .service
        .verify_and_consume(&key.identifier, "r", "r-1")
        .await
        .expect("verify succeeds without its audit entry");
    assert!(response.granted);

    h.store.set_audit_failure(false);
    let status = h
        .service
        .check_status(&key.identifier)
        .await
        .expect("status")
        .expect("exists");
    assert_eq!(status.state, KeyState::Consumed);
    assert!(
        !h.store
            .audit_entries()
            .iter()
            .any(|e| e.action == AuditAction::Verify)
    );
}

#[derive(Debug)]
struct ChannelNotifier(mpsc::UnboundedSender<String>);

#[async_trait]
impl ConsumptionNotifier for ChannelNotifier {
    async fn key_consumed(&self, key: &Key) {
        let _ = self.0.send(key.identifier.clone());
    }
}

#[tokio::test]
async fn creator_is_notified_only_on_grant() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let h = harness_with(|service| service.with_notifier(Arc::new(ChannelNotifier(tx))));
    let key = h
        .service
        .issue(issue_request("1", DurationClass::OneDay))
        .await
        .expect("issue");

    h.service
        .verify_and_consume(&key.identifier, "r", "r-1")
        .await
        .expect("verify");
    h.service
        .verify_and_consume(&key.identifier, "r", "r-1")
        .await
        .expect("verify");

    let notified = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("notification arrives")
        .expect("channel open");
    assert_eq!(notified, key.identifier);

    tokio::task::yield_now().await;
    assert!(rx.try_recv().is_err(), "refused verifies do not notify");
}
