//! Cancellation, deadlines, concurrency and verification while in flight

mod common;

use common::*;
use editguard_core::errors::{DataPreservation, ErrorKind, Severity};
use editguard_core::{Batch, Clock, TransactionStatus, VerifyOptions};
use editguard_engine::EngineConfig;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_cancel_before_start_fails_without_touching_state() {
    // GIVEN a submission cancelled before it is submitted
    let h = harness(EngineConfig::default());
    let pipeline = h.builder.build().unwrap();
    let before = pipeline.state();
    let sub = submission("s1", 1);
    pipeline.request_cancel(&sub.id);

    // WHEN it is submitted
    let result = pipeline.submit(sub.clone()).await;

    // THEN it fails as a session-management error with no transaction begun
    assert!(!result.success);
    assert_eq!(result.attempts, 1);
    assert_eq!(
        result.error.as_ref().unwrap().kind,
        ErrorKind::SessionManagement
    );
    assert!(result.rollbacks.is_empty());
    assert_eq!(pipeline.state(), before);

    // AND the cancellation does not outlive the submission
    let again = pipeline.submit(sub).await;
    assert!(again.success);
}

#[tokio::test]
async fn test_cancel_mid_flight_rolls_back_before_first_operation() {
    // GIVEN a submission stuck in the processor
    let h = harness(EngineConfig::default());
    let processor = Arc::new(GatedProcessor::armed());
    let pipeline = h.builder.processor(processor.clone()).build().unwrap();
    let before = pipeline.state();
    let sub = submission("s1", 2);
    let id = sub.id.clone();

    // WHEN it is cancelled while processing
    let (result, ()) = tokio::join!(pipeline.submit(sub), async {
        processor.entered.notified().await;
        pipeline.request_cancel(&id);
        processor.release.notify_one();
    });

    // THEN its transaction is rolled back and state is unchanged
    assert!(!result.success);
    assert_eq!(
        result.error.as_ref().unwrap().kind,
        ErrorKind::SessionManagement
    );
    assert_eq!(result.rollbacks.len(), 1);
    assert!(result.rollbacks_clean());
    assert_eq!(result.data_preservation, DataPreservation::Snapshot);
    let txn = pipeline
        .transaction(result.transaction_id.as_ref().unwrap())
        .unwrap();
    assert_eq!(txn.status, TransactionStatus::RolledBack);
    assert_eq!(pipeline.state(), before);
    assert_eq!(pipeline.active_transactions(), 0);
}

#[tokio::test]
async fn test_cancel_with_nothing_pending_rolls_back_nothing() {
    let h = harness(EngineConfig::default());
    let pipeline = h.builder.build().unwrap();
    let sub = submission("s1", 1);

    let outcome = pipeline.cancel(&sub.id).await;

    assert_eq!(outcome.submission_id, sub.id);
    assert!(outcome.rolled_back.is_empty());
}

#[tokio::test]
async fn test_deadline_expiry_rolls_back_partial_work() {
    // GIVEN storage that hangs on the first write
    let h = harness(EngineConfig::default());
    let persistence = Arc::new(GatedPersistence::armed());
    let pipeline = h.builder.persistence(persistence.clone()).build().unwrap();
    let before = pipeline.state();

    // WHEN the caller's deadline passes mid-transaction
    let result = pipeline
        .submit_with_deadline(submission("s1", 2), Duration::from_millis(50))
        .await;

    // THEN the half-applied transaction is rolled back
    assert!(!result.success);
    let error = result.error.as_ref().unwrap();
    assert_eq!(error.kind, ErrorKind::Processing);
    assert_eq!(error.severity, Severity::High);
    assert!(error.rollback_required);
    assert_eq!(result.rollbacks.len(), 1);
    assert!(result.rollbacks_clean());
    assert_eq!(result.data_preservation, DataPreservation::Snapshot);
    assert_eq!(pipeline.active_transactions(), 0);
    assert_eq!(pipeline.state(), before);
}

#[tokio::test]
async fn test_deadline_not_reached_returns_normal_result() {
    let h = harness(EngineConfig::default());
    let pipeline = h.builder.build().unwrap();

    let result = pipeline
        .submit_with_deadline(submission("s1", 1), Duration::from_secs(5))
        .await;

    assert!(result.success);
    assert_eq!(result.data_preservation, DataPreservation::Persisted);
}

#[tokio::test]
async fn test_concurrent_sessions_commit_independently() {
    // GIVEN submissions for two different sessions
    let h = harness(EngineConfig::default());
    let pipeline = h.builder.build().unwrap();

    // WHEN they run concurrently
    let (first, second, third) = tokio::join!(
        pipeline.submit(submission("s1", 2)),
        pipeline.submit(submission("s2", 1)),
        pipeline.submit(submission("s1", 1)),
    );

    // THEN all commit and each session holds only its own batches
    assert!(first.success && second.success && third.success);
    let state = pipeline.state();
    assert_eq!(state.session("s1").unwrap().changes.len(), 4);
    assert_eq!(state.session("s1").unwrap().batch_ids.len(), 3);
    assert_eq!(state.session("s2").unwrap().changes.len(), 1);
    assert_eq!(state.batches_for("s2").count(), 1);
    let report = pipeline.verify_integrity(VerifyOptions::quick()).await.unwrap();
    assert!(report.valid, "{:?}", report.errors);
}

#[tokio::test]
async fn test_verification_sees_pre_transaction_content_while_in_flight() {
    // GIVEN a submission paused after its first operation
    let h = harness(EngineConfig::default());
    let persistence = Arc::new(GatedPersistence::armed());
    let pipeline = h.builder.persistence(persistence.clone()).build().unwrap();

    // WHEN a quick pass runs during the pause
    let (result, (raw_changes, report)) = tokio::join!(pipeline.submit(submission("s1", 1)), async {
        persistence.entered.notified().await;
        let raw_changes = pipeline.state().change_count();
        let report = pipeline.verify_integrity(VerifyOptions::quick()).await.unwrap();
        persistence.release.notify_one();
        (raw_changes, report)
    });

    // THEN the pass saw the committed content only
    assert_eq!(raw_changes, 2);
    assert!(report.valid, "{:?}", report.errors);
    assert_eq!(report.stats.changes, 1);

    // AND the submission then committed normally
    assert!(result.success);
    let after = pipeline.verify_integrity(VerifyOptions::quick()).await.unwrap();
    assert!(after.valid);
    assert_eq!(after.stats.changes, 2);
}

#[tokio::test]
async fn test_housekeeping_purges_after_retention() {
    // GIVEN a committed submission
    let h = harness(EngineConfig::default());
    let pipeline = h.builder.build().unwrap();
    let result = pipeline.submit(submission("s1", 1)).await;
    let txn_id = result.transaction_id.clone().unwrap();
    assert!(pipeline.transaction(&txn_id).is_some());

    // WHEN housekeeping runs inside the retention window
    assert_eq!(pipeline.housekeeping().transactions_purged, 0);

    // AND again after it has passed
    h.clock.advance(chrono::Duration::minutes(6));
    let swept = pipeline.housekeeping();

    // THEN the transaction and its retry context are gone
    assert_eq!(swept.transactions_purged, 1);
    assert_eq!(swept.retry_contexts_dropped, 1);
    assert!(pipeline.transaction(&txn_id).is_none());
}

#[tokio::test]
async fn test_repairing_pass_fixes_injected_orphan() {
    // GIVEN a batch whose session vanished
    let h = harness(EngineConfig::default());
    let now = h.clock.now();
    let mut state = seeded_state(now);
    state.batches.insert(
        "orphan".into(),
        Batch::new("orphan".into(), "ghost", "seed", vec![], now),
    );
    let pipeline = h.builder.initial_state(state).build().unwrap();

    // WHEN a repairing pass runs
    let report = pipeline
        .verify_integrity(VerifyOptions::quick().repairing())
        .await
        .unwrap();

    // THEN the orphan is removed and the final report is clean
    assert!(!report.valid);
    assert!(!report.executed_repairs.is_empty());
    assert!(report.final_report().valid);
    assert!(!pipeline.state().batches.contains_key("orphan"));
    assert!(!pipeline.integrity_audit_trail().is_empty());
}
