use chrono::{DateTime, Duration, Utc};
use editguard_core_types::schema::{
    AUDIT_INVERSE, AUDIT_INVERSE_FAILED, AUDIT_SNAPSHOT_RESTORE, AUDIT_SNAPSHOT_RESTORE_FAILED,
};
use editguard_core_types::{SubmissionId, TransactionId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::operation::{AppliedData, PlannedOperation};
use super::transaction::{Transaction, TransactionStatus};
use crate::audit::AuditEntry;
use crate::clock::Clock;
use crate::config::TransactionConfig;
use crate::errors::{EditGuardError, ErrorKind, ErrorRecord, Result, Severity};
use crate::model::DocumentState;
use crate::retention::RetentionLog;
use crate::snapshot::{BackupSnapshot, SnapshotStore};

/// Outcome of one rollback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackResult {
    pub transaction_id: TransactionId,
    /// False if any inverse or the snapshot restore failed
    pub success: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// One audit entry per inverse and per snapshot restore, in execution order
    pub steps: Vec<AuditEntry>,
}

/// Entry in a session's rollback log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackRecord {
    pub transaction_id: TransactionId,
    pub session_id: String,
    pub cause_kind: ErrorKind,
    pub cause_severity: Severity,
    pub success: bool,
    pub errors: Vec<String>,
    pub steps: Vec<AuditEntry>,
    pub at: DateTime<Utc>,
}

/// Owns the begin / record / commit / rollback lifecycle
///
/// The manager is the only component that mutates document state. It is not
/// internally synchronized: callers serialize transactions on one session by
/// holding that session's lock for the whole of application and rollback.
pub struct TransactionManager {
    config: TransactionConfig,
    clock: Arc<dyn Clock>,
    snapshots: Arc<SnapshotStore>,
    transactions: BTreeMap<TransactionId, Transaction>,
    rollback_logs: HashMap<String, RetentionLog<RollbackRecord>>,
}

impl TransactionManager {
    pub fn new(
        config: TransactionConfig,
        clock: Arc<dyn Clock>,
        snapshots: Arc<SnapshotStore>,
    ) -> Self {
        Self {
            config,
            clock,
            snapshots,
            transactions: BTreeMap::new(),
            rollback_logs: HashMap::new(),
        }
    }

    /// Register a pending transaction; state is not touched
    pub fn begin(&mut self, session_id: &str, planned: Vec<PlannedOperation>) -> TransactionId {
        self.register(Transaction::new(session_id, None, planned, self.clock.now()))
    }

    /// Like `begin`, tagged with the submission it serves
    pub fn begin_for_submission(
        &mut self,
        submission_id: &SubmissionId,
        session_id: &str,
        planned: Vec<PlannedOperation>,
    ) -> TransactionId {
        self.register(Transaction::new(
            session_id,
            Some(submission_id.clone()),
            planned,
            self.clock.now(),
        ))
    }

    fn register(&mut self, txn: Transaction) -> TransactionId {
        let id = txn.id.clone();
        tracing::debug!(
            component = module_path!(),
            transaction_id = %id,
            session_id = %txn.session_id,
            operations = txn.operations.len(),
            "transaction begun"
        );
        self.transactions.insert(id.clone(), txn);
        id
    }

    pub fn get(&self, id: &TransactionId) -> Option<&Transaction> {
        self.transactions.get(id)
    }

    /// Snapshot the owner session before the first mutation
    ///
    /// Returns the existing backup if one was already captured.
    ///
    /// # Errors
    ///
    /// Returns `TransactionNotFound`, `TransactionState` if not pending, or
    /// `Serialization` if the snapshot cannot be checksummed.
    pub fn capture_backup(
        &mut self,
        id: &TransactionId,
        state: &DocumentState,
    ) -> Result<Arc<BackupSnapshot>> {
        let snapshots = self.snapshots.clone();
        let txn = self.pending_mut(id, "capture backup")?;
        if let Some(existing) = &txn.backup {
            return Ok(existing.clone());
        }
        let backup = snapshots.create_session_snapshot(state, &txn.session_id)?;
        txn.backup = Some(backup.clone());
        Ok(backup)
    }

    /// Apply the operation at `index` and record its inverse data
    ///
    /// Operations must run in order. The backup is captured lazily before
    /// the first one.
    ///
    /// # Errors
    ///
    /// Returns `TransactionState` for out-of-order or repeated application,
    /// or whatever the operation itself fails with (state unchanged).
    pub fn execute_operation(
        &mut self,
        id: &TransactionId,
        index: usize,
        state: &mut DocumentState,
    ) -> Result<()> {
        self.check_next(id, index)?;
        self.capture_backup(id, state)?;

        let now = self.clock.now();
        let (planned, target) = {
            let txn = self.pending_mut(id, "execute operation")?;
            let op = &txn.operations[index];
            (op.planned.clone(), op.target.clone())
        };
        let applied = planned.apply(&target, state, now)?;
        self.record_applied(id, index, applied)
    }

    /// Mark one operation complete with the data needed to invert it
    ///
    /// Must be called right after the mutation succeeds and before the next
    /// operation starts.
    ///
    /// # Errors
    ///
    /// Returns `TransactionNotFound`, or `TransactionState` if the
    /// transaction is not pending or `index` is not the next operation.
    pub fn record_applied(
        &mut self,
        id: &TransactionId,
        index: usize,
        applied: AppliedData,
    ) -> Result<()> {
        self.check_next(id, index)?;
        let now = self.clock.now();
        let txn = self.pending_mut(id, "record applied")?;
        let op = &mut txn.operations[index];
        op.applied = Some(applied);
        op.completed = true;
        op.timestamp = Some(now);
        tracing::debug!(
            component = module_path!(),
            transaction_id = %id,
            index,
            kind = op.kind.as_str(),
            "operation applied"
        );
        Ok(())
    }

    /// Mark committed and refresh the owner's checksums
    ///
    /// The transaction stays queryable until `purge_expired` runs past the
    /// retention window.
    ///
    /// # Errors
    ///
    /// Returns `TransactionState` if any operation is incomplete.
    pub fn commit(&mut self, id: &TransactionId, state: &mut DocumentState) -> Result<()> {
        let now = self.clock.now();
        let txn = self.pending_mut(id, "commit")?;
        if txn.next_index().is_some() {
            return Err(EditGuardError::TransactionState {
                transaction_id: id.to_string(),
                status: "pending".to_string(),
                action: "commit with incomplete operations".to_string(),
            });
        }
        if state.sessions.contains_key(&txn.session_id) {
            state.refresh_checksums(&txn.session_id)?;
        }
        txn.status = TransactionStatus::Committed;
        txn.ended_at = Some(now);
        tracing::info!(
            component = module_path!(),
            transaction_id = %id,
            session_id = %txn.session_id,
            "transaction committed"
        );
        Ok(())
    }

    /// Undo a pending transaction
    ///
    /// Completed operations are inverted in reverse order; each failure is
    /// collected and the remaining steps still run. If a backup exists it is
    /// restored last and defines the final state.
    ///
    /// # Errors
    ///
    /// Returns `TransactionNotFound` or `TransactionState`. Step failures are
    /// reported in the result, not as `Err`.
    pub fn rollback(
        &mut self,
        id: &TransactionId,
        cause: &ErrorRecord,
        state: &mut DocumentState,
    ) -> Result<RollbackResult> {
        let now = self.clock.now();
        let txn = self.pending_mut(id, "rollback")?;

        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut steps = Vec::new();
        let location = format!("session:{}", txn.session_id);

        for (index, op) in txn.operations.iter().enumerate().rev() {
            if !op.completed {
                continue;
            }
            let Some(applied) = &op.applied else {
                warnings.push(format!("operation {} ({}) has no inverse data", index, op.kind));
                continue;
            };
            match applied.invert(&op.target, state) {
                Ok(description) => steps.push(AuditEntry::new(
                    now,
                    AUDIT_INVERSE,
                    Severity::Medium,
                    location.clone(),
                    format!("undo {}: {}", op.kind, description),
                )),
                Err(e) => {
                    errors.push(format!("undo {} failed: {}", op.kind, e));
                    steps.push(AuditEntry::new(
                        now,
                        AUDIT_INVERSE_FAILED,
                        Severity::High,
                        location.clone(),
                        format!("undo {} failed: {}", op.kind, e),
                    ));
                }
            }
        }

        match &txn.backup {
            Some(backup) => match SnapshotStore::apply(backup, state) {
                Ok(()) => steps.push(AuditEntry::new(
                    now,
                    AUDIT_SNAPSHOT_RESTORE,
                    Severity::Medium,
                    location.clone(),
                    format!("restored snapshot {}", backup.id),
                )),
                Err(e) => {
                    errors.push(format!("snapshot restore failed: {}", e));
                    steps.push(AuditEntry::new(
                        now,
                        AUDIT_SNAPSHOT_RESTORE_FAILED,
                        Severity::Critical,
                        location.clone(),
                        format!("snapshot {} refused: {}", backup.id, e),
                    ));
                }
            },
            None if txn.completed_count() > 0 => {
                warnings.push("no backup snapshot; state restored from inverses only".to_string());
            }
            None => warnings.push("no operations were applied".to_string()),
        }

        let success = errors.is_empty();
        txn.status = if success {
            TransactionStatus::RolledBack
        } else {
            TransactionStatus::Failed
        };
        txn.ended_at = Some(now);
        let session_id = txn.session_id.clone();

        if success {
            tracing::info!(
                component = module_path!(),
                transaction_id = %id,
                session_id = %session_id,
                steps = steps.len(),
                cause = cause.code(),
                "transaction rolled back"
            );
        } else {
            tracing::error!(
                component = module_path!(),
                transaction_id = %id,
                session_id = %session_id,
                failures = errors.len(),
                cause = cause.code(),
                "rollback incomplete"
            );
        }

        let policy = self.config.rollback_log;
        self.rollback_logs
            .entry(session_id.clone())
            .or_insert_with(|| RetentionLog::new(policy))
            .push(
                now,
                RollbackRecord {
                    transaction_id: id.clone(),
                    session_id,
                    cause_kind: cause.kind,
                    cause_severity: cause.severity,
                    success,
                    errors: errors.clone(),
                    steps: steps.clone(),
                    at: now,
                },
            );

        Ok(RollbackResult {
            transaction_id: id.clone(),
            success,
            errors,
            warnings,
            steps,
        })
    }

    /// Mark a finished rollback as failed after the fact
    ///
    /// Used when a step outside the manager, such as persisting the restored
    /// state, fails. The transaction moves to `Failed` and its rollback log
    /// entry records the error.
    ///
    /// # Errors
    ///
    /// Returns `TransactionNotFound` if the transaction is unknown.
    pub fn record_rollback_failure(&mut self, id: &TransactionId, error: &str) -> Result<()> {
        let txn = self
            .transactions
            .get_mut(id)
            .ok_or_else(|| EditGuardError::TransactionNotFound {
                transaction_id: id.to_string(),
            })?;
        txn.status = TransactionStatus::Failed;
        let session_id = txn.session_id.clone();
        if let Some(record) = self
            .rollback_logs
            .get_mut(&session_id)
            .and_then(|log| log.find_latest_mut(|r| &r.transaction_id == id))
        {
            record.success = false;
            record.errors.push(error.to_string());
        }
        Ok(())
    }

    /// Pending transactions serving a submission
    pub fn pending_for_submission(&self, submission_id: &SubmissionId) -> Vec<TransactionId> {
        self.transactions
            .values()
            .filter(|t| t.is_pending() && t.submission_id.as_ref() == Some(submission_id))
            .map(|t| t.id.clone())
            .collect()
    }

    /// Every transaction still pending
    pub fn pending(&self) -> impl Iterator<Item = &Transaction> {
        self.transactions.values().filter(|t| t.is_pending())
    }

    /// Rollback log of a session, oldest first
    pub fn rollback_history(&self, session_id: &str) -> Vec<RollbackRecord> {
        self.rollback_logs
            .get(session_id)
            .map(|log| log.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop terminal transactions older than the retention window
    ///
    /// Returns how many were removed.
    pub fn purge_expired(&mut self) -> usize {
        let now = self.clock.now();
        let retention = Duration::seconds(
            i64::try_from(self.config.retention_secs)
                .unwrap_or(i64::MAX)
                .min(i64::MAX / 1000),
        );
        let before = self.transactions.len();
        self.transactions.retain(|_, t| match t.ended_at {
            Some(ended) if t.status.is_terminal() => ended
                .checked_add_signed(retention)
                .map_or(true, |expiry| expiry > now),
            _ => true,
        });
        for log in self.rollback_logs.values_mut() {
            log.evict_expired(now);
        }
        self.rollback_logs.retain(|_, log| !log.is_empty());
        before - self.transactions.len()
    }

    pub fn active_count(&self) -> usize {
        self.transactions.values().filter(|t| t.is_pending()).count()
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    fn pending_mut(&mut self, id: &TransactionId, action: &str) -> Result<&mut Transaction> {
        let txn = self
            .transactions
            .get_mut(id)
            .ok_or_else(|| EditGuardError::TransactionNotFound {
                transaction_id: id.to_string(),
            })?;
        if !txn.is_pending() {
            return Err(EditGuardError::TransactionState {
                transaction_id: id.to_string(),
                status: format!("{:?}", txn.status).to_lowercase(),
                action: action.to_string(),
            });
        }
        Ok(txn)
    }

    fn check_next(&mut self, id: &TransactionId, index: usize) -> Result<()> {
        let txn = self.pending_mut(id, "apply operation")?;
        if txn.next_index() != Some(index) {
            return Err(EditGuardError::TransactionState {
                transaction_id: id.to_string(),
                status: "pending".to_string(),
                action: format!(
                    "apply operation {} (next is {:?})",
                    index,
                    txn.next_index()
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::classify;
    use crate::clock::ManualClock;
    use crate::config::SnapshotConfig;
    use crate::errors::ErrorContext;
    use crate::model::{Batch, Change, Metadata, ProposedEdit, Session, SessionStatus};

    struct Fixture {
        manager: TransactionManager,
        clock: ManualClock,
        state: DocumentState,
    }

    fn fixture() -> Fixture {
        let clock = ManualClock::starting_now();
        let shared: Arc<dyn Clock> = Arc::new(clock.clone());
        let snapshots = Arc::new(SnapshotStore::new(&SnapshotConfig::default(), shared.clone()));
        let manager = TransactionManager::new(TransactionConfig::default(), shared, snapshots);
        let mut state = DocumentState::new();
        state.insert_session(Session::new("s1", "doc", clock.now()));
        Fixture {
            manager,
            clock,
            state,
        }
    }

    fn planned(now: DateTime<Utc>) -> Vec<PlannedOperation> {
        let mut change =
            Change::from_edit("c1".into(), "s1", "bot", &ProposedEdit::new("a", "b"), now);
        change.batch_id = Some("b1".into());
        vec![
            PlannedOperation::CreateChanges {
                changes: vec![change],
            },
            PlannedOperation::UpdateSession {
                status: Some(SessionStatus::Reviewing),
                producer: Some("bot".into()),
                add_batch_id: Some("b1".into()),
            },
            PlannedOperation::CreateBatch {
                batch: Batch::new("b1".into(), "s1", "bot", vec!["c1".into()], now),
            },
        ]
    }

    fn storage_failure() -> ErrorRecord {
        classify(
            &EditGuardError::StorageQuotaExceeded {
                message: "disk full".into(),
            },
            ErrorContext::new(),
            Utc::now(),
        )
    }

    #[test]
    fn test_begin_does_not_touch_state() {
        let mut f = fixture();
        let before = f.state.clone();
        let id = f.manager.begin("s1", planned(f.clock.now()));

        let txn = f.manager.get(&id).unwrap();
        assert!(txn.is_pending());
        assert_eq!(txn.completed_count(), 0);
        assert!(txn.backup.is_none());
        assert_eq!(f.state, before);
    }

    #[test]
    fn test_commit_refreshes_checksums() {
        let mut f = fixture();
        let id = f.manager.begin("s1", planned(f.clock.now()));
        for i in 0..3 {
            f.manager.execute_operation(&id, i, &mut f.state).unwrap();
        }
        f.manager.commit(&id, &mut f.state).unwrap();

        assert_eq!(f.manager.get(&id).unwrap().status, TransactionStatus::Committed);
        assert!(f.state.checksums.contains_key("session:s1"));
        assert!(f.state.checksums.contains_key("batch:b1"));
    }

    #[test]
    fn test_out_of_order_application_is_rejected() {
        let mut f = fixture();
        let id = f.manager.begin("s1", planned(f.clock.now()));
        assert!(matches!(
            f.manager.execute_operation(&id, 1, &mut f.state),
            Err(EditGuardError::TransactionState { .. })
        ));
        assert!(matches!(
            f.manager.commit(&id, &mut f.state),
            Err(EditGuardError::TransactionState { .. })
        ));
    }

    #[test]
    fn test_rollback_reverse_order_with_snapshot_last() {
        let mut f = fixture();
        let before = f.state.clone();
        let id = f.manager.begin("s1", planned(f.clock.now()));
        for i in 0..3 {
            f.manager.execute_operation(&id, i, &mut f.state).unwrap();
        }

        let result = f
            .manager
            .rollback(&id, &storage_failure(), &mut f.state)
            .unwrap();

        assert!(result.success);
        let kinds: Vec<&str> = result.steps.iter().map(|s| s.kind.as_str()).collect();
        assert_eq!(
            kinds,
            vec![AUDIT_INVERSE, AUDIT_INVERSE, AUDIT_INVERSE, AUDIT_SNAPSHOT_RESTORE]
        );
        assert!(result.steps[0].description.contains("create-batch"));
        assert!(result.steps[1].description.contains("update-session"));
        assert!(result.steps[2].description.contains("create-changes"));
        assert_eq!(f.state, before);
        assert_eq!(f.manager.get(&id).unwrap().status, TransactionStatus::RolledBack);
        assert_eq!(f.manager.rollback_history("s1").len(), 1);
    }

    #[test]
    fn test_failed_inverse_does_not_stop_rollback() {
        let mut f = fixture();
        let before = f.state.clone();
        let id = f.manager.begin("s1", planned(f.clock.now()));
        for i in 0..3 {
            f.manager.execute_operation(&id, i, &mut f.state).unwrap();
        }
        f.state.batches.clear();

        let result = f
            .manager
            .rollback(&id, &storage_failure(), &mut f.state)
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.steps.len(), 4);
        assert_eq!(result.steps[0].kind, AUDIT_INVERSE_FAILED);
        // snapshot restore still brings the session back
        assert_eq!(f.state, before);
        assert_eq!(f.manager.get(&id).unwrap().status, TransactionStatus::Failed);
    }

    #[test]
    fn test_rollback_without_backup_uses_inverses() {
        let mut f = fixture();
        let before = f.state.clone();
        let mut patch = Metadata::new();
        patch.set("k", serde_json::json!(1));
        let id = f
            .manager
            .begin("s1", vec![PlannedOperation::UpdateMetadata { patch: patch.clone() }]);

        let previous = f.state.session("s1").unwrap().metadata.clone();
        f.state.session_mut("s1").unwrap().metadata.merge(&patch);
        f.manager
            .record_applied(&id, 0, AppliedData::MetadataUpdated { previous })
            .unwrap();

        let result = f
            .manager
            .rollback(&id, &storage_failure(), &mut f.state)
            .unwrap();
        assert!(result.success);
        assert_eq!(result.steps.len(), 1);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(f.state, before);
    }

    #[test]
    fn test_committed_transaction_cannot_roll_back() {
        let mut f = fixture();
        let id = f.manager.begin("s1", vec![]);
        f.manager.commit(&id, &mut f.state).unwrap();
        assert!(matches!(
            f.manager.rollback(&id, &storage_failure(), &mut f.state),
            Err(EditGuardError::TransactionState { .. })
        ));
    }

    #[test]
    fn test_purge_after_retention_window() {
        let mut f = fixture();
        let id = f.manager.begin("s1", vec![]);
        f.manager.commit(&id, &mut f.state).unwrap();
        let pending = f.manager.begin("s1", vec![]);

        f.clock.advance(Duration::seconds(299));
        assert_eq!(f.manager.purge_expired(), 0);

        f.clock.advance(Duration::seconds(2));
        assert_eq!(f.manager.purge_expired(), 1);
        assert!(f.manager.get(&id).is_none());
        assert!(f.manager.get(&pending).is_some());
    }

    #[test]
    fn test_pending_for_submission() {
        let mut f = fixture();
        let submission = SubmissionId::new();
        let id = f
            .manager
            .begin_for_submission(&submission, "s1", planned(f.clock.now()));
        f.manager.begin("s1", vec![]);

        assert_eq!(f.manager.pending_for_submission(&submission), vec![id.clone()]);
        f.manager
            .rollback(&id, &storage_failure(), &mut f.state)
            .unwrap();
        assert!(f.manager.pending_for_submission(&submission).is_empty());
    }
}
