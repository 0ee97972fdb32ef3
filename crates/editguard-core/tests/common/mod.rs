use chrono::{DateTime, Utc};
use editguard_core::config::{IntegrityConfig, SnapshotConfig, TransactionConfig};
use editguard_core::model::{Batch, Change, ProposedEdit, SessionStatus};
use editguard_core::{
    Clock, DocumentState, IntegrityEngine, ManualClock, PlannedOperation, Session, SnapshotStore,
    TransactionManager,
};
use std::sync::Arc;

/// Kernel components wired to one manual clock and one snapshot ring
#[allow(dead_code)]
pub struct Kernel {
    pub clock: ManualClock,
    pub snapshots: Arc<SnapshotStore>,
    pub transactions: TransactionManager,
    pub integrity: IntegrityEngine,
}

#[allow(dead_code)]
pub fn kernel() -> Kernel {
    let clock = ManualClock::starting_now();
    let shared: Arc<dyn Clock> = Arc::new(clock.clone());
    let snapshots = Arc::new(SnapshotStore::new(&SnapshotConfig::default(), shared.clone()));
    Kernel {
        transactions: TransactionManager::new(
            TransactionConfig::default(),
            shared.clone(),
            snapshots.clone(),
        ),
        integrity: IntegrityEngine::new(IntegrityConfig::default(), shared, snapshots.clone()),
        snapshots,
        clock,
    }
}

/// State with one open session `s1` holding a single batched change
#[allow(dead_code)]
pub fn seeded_state(now: DateTime<Utc>) -> DocumentState {
    let mut state = DocumentState::new();
    let mut session = Session::new("s1", "doc-1", now);
    let mut change = test_change("c0", "s1", now);
    change.batch_id = Some("b0".into());
    session.changes.push(change);
    session.batch_ids.push("b0".into());
    state.insert_session(session);
    state.batches.insert(
        "b0".into(),
        Batch::new("b0".into(), "s1", "seed", vec!["c0".into()], now),
    );
    state
}

#[allow(dead_code)]
pub fn test_change(id: &str, session_id: &str, now: DateTime<Utc>) -> Change {
    Change::from_edit(
        id.to_string(),
        session_id,
        "tester",
        &ProposedEdit::new("before", "after edit"),
        now,
    )
}

/// The standard create-changes, update-session, create-batch plan
#[allow(dead_code)]
pub fn submission_plan(session_id: &str, group_id: &str, ids: &[&str], now: DateTime<Utc>) -> Vec<PlannedOperation> {
    let changes: Vec<Change> = ids
        .iter()
        .map(|id| {
            let mut c = test_change(id, session_id, now);
            c.batch_id = Some(group_id.to_string());
            c
        })
        .collect();
    vec![
        PlannedOperation::CreateChanges { changes },
        PlannedOperation::UpdateSession {
            status: Some(SessionStatus::Reviewing),
            producer: Some("tester".into()),
            add_batch_id: Some(group_id.to_string()),
        },
        PlannedOperation::CreateBatch {
            batch: Batch::new(
                group_id.to_string(),
                session_id,
                "tester",
                ids.iter().map(|s| s.to_string()).collect(),
                now,
            ),
        },
    ]
}
