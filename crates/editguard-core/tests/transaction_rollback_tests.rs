//! Transaction Manager rollback tests
//!
//! ## Scenarios Covered
//!
//! 1. Rejected reference: unknown session, nothing persisted
//! 2. Reverse-order rollback after a Critical storage error
//! 3. Scoped backups leave other sessions alone
//! 4. Rollback closure for any number of completed operations (property)

mod common;

use chrono::Utc;
use common::{kernel, seeded_state, submission_plan};
use editguard_core::core_types::schema::{AUDIT_INVERSE, AUDIT_SNAPSHOT_RESTORE};
use editguard_core::errors::{ErrorCategory, ErrorContext};
use editguard_core::integrity::IntegrityErrorKind;
use editguard_core::{
    classify, Clock, EditGuardError, ErrorKind, Session, Severity, TransactionStatus,
    VerifyOptions,
};
use proptest::prelude::*;

#[test]
fn test_rejected_reference_persists_nothing() {
    // GIVEN a submission targeting a session that does not exist
    let mut k = kernel();
    let now = k.clock.now();
    let mut state = seeded_state(now);
    let before = state.clone();
    let id = k
        .transactions
        .begin("no-such-session", submission_plan("no-such-session", "b1", &["c1"], now));

    // WHEN the first operation is applied
    let err = k
        .transactions
        .execute_operation(&id, 0, &mut state)
        .unwrap_err();
    let record = classify(
        &err,
        ErrorContext::new().with_owner("no-such-session"),
        Utc::now(),
    );

    // THEN the failure is a non-retryable, rollback-required user error
    assert!(matches!(err, EditGuardError::SessionNotFound { .. }));
    assert_eq!(record.kind, ErrorKind::Validation);
    assert_eq!(record.category, ErrorCategory::UserError);
    assert!(!record.retryable);
    assert!(record.rollback_required);

    // AND rolling back leaves the state as it was
    let result = k.transactions.rollback(&id, &record, &mut state).unwrap();
    assert!(result.success);
    assert_eq!(state, before);

    let report = k.integrity.verify(&mut state, VerifyOptions::deep()).unwrap();
    assert_eq!(report.count(IntegrityErrorKind::OrphanedData), 0);
}

#[test]
fn test_reverse_order_rollback_after_critical_storage_error() {
    // GIVEN a transaction that applied create-changes, update-session, create-batch
    let mut k = kernel();
    let now = k.clock.now();
    let mut state = seeded_state(now);
    let before = state.clone();
    let id = k
        .transactions
        .begin("s1", submission_plan("s1", "b1", &["c1", "c2"], now));
    for index in 0..3 {
        k.transactions
            .execute_operation(&id, index, &mut state)
            .unwrap();
    }

    // WHEN persistence then fails with a Critical storage error
    let record = classify(
        &EditGuardError::StorageQuotaExceeded {
            message: "quota exhausted".into(),
        },
        ErrorContext::new().with_owner("s1").with_transaction(id.clone()),
        Utc::now(),
    );
    assert_eq!(record.kind, ErrorKind::Storage);
    assert_eq!(record.severity, Severity::Critical);
    let result = k.transactions.rollback(&id, &record, &mut state).unwrap();

    // THEN inverses ran newest first, then the snapshot restore
    assert!(result.success);
    let steps: Vec<(&str, &str)> = result
        .steps
        .iter()
        .map(|s| (s.kind.as_str(), s.description.as_str()))
        .collect();
    assert_eq!(steps.len(), 4);
    assert_eq!(steps[0].0, AUDIT_INVERSE);
    assert!(steps[0].1.starts_with("undo create-batch"));
    assert!(steps[1].1.starts_with("undo update-session"));
    assert!(steps[2].1.starts_with("undo create-changes"));
    assert_eq!(steps[3].0, AUDIT_SNAPSHOT_RESTORE);

    assert_eq!(state, before);
    assert_eq!(
        k.transactions.get(&id).unwrap().status,
        TransactionStatus::RolledBack
    );

    // AND the session's rollback log holds one entry with all four steps
    let history = k.transactions.rollback_history("s1");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].steps.len(), 4);
    assert_eq!(history[0].cause_kind, ErrorKind::Storage);
}

#[test]
fn test_scoped_backup_keeps_other_sessions() {
    // GIVEN a pending transaction on s1 and independent work on s2
    let mut k = kernel();
    let now = k.clock.now();
    let mut state = seeded_state(now);
    state.insert_session(Session::new("s2", "doc-2", now));

    let id = k
        .transactions
        .begin("s1", submission_plan("s1", "b1", &["c1"], now));
    k.transactions.execute_operation(&id, 0, &mut state).unwrap();

    let other = k
        .transactions
        .begin("s2", submission_plan("s2", "b2", &["c2"], now));
    for index in 0..3 {
        k.transactions
            .execute_operation(&other, index, &mut state)
            .unwrap();
    }
    k.transactions.commit(&other, &mut state).unwrap();

    // WHEN s1 rolls back
    let record = classify(
        &EditGuardError::Storage {
            message: "write failed".into(),
        },
        ErrorContext::new(),
        Utc::now(),
    );
    let result = k.transactions.rollback(&id, &record, &mut state).unwrap();

    // THEN s2's committed changes survive
    assert!(result.success);
    assert_eq!(state.session("s1").unwrap().changes.len(), 1);
    assert_eq!(state.session("s2").unwrap().changes.len(), 1);
    assert!(state.batches.contains_key("b2"));
    assert!(k.integrity.inspect(&state, true).unwrap().valid);
}

proptest! {
    #[test]
    fn prop_rollback_closure(completed in 0usize..=3, extra_changes in 1usize..4) {
        let mut k = kernel();
        let now = k.clock.now();
        let mut state = seeded_state(now);
        let before = state.clone();

        let ids: Vec<String> = (0..extra_changes).map(|i| format!("n{}", i)).collect();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let id = k.transactions.begin("s1", submission_plan("s1", "bn", &id_refs, now));
        for index in 0..completed {
            k.transactions.execute_operation(&id, index, &mut state).unwrap();
        }

        let record = classify(
            &EditGuardError::Network { message: "reset".into() },
            ErrorContext::new(),
            Utc::now(),
        );
        let result = k.transactions.rollback(&id, &record, &mut state).unwrap();

        prop_assert!(result.success);
        prop_assert_eq!(&state, &before);
    }
}
