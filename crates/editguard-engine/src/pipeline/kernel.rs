//! Shared state behind a pipeline
//!
//! Lock order is session lock, then transaction manager, then document
//! state. The std mutexes are never held across an await.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use editguard_core::classifier::classify;
use editguard_core::clock::Clock;
use editguard_core::error_log::ErrorLog;
use editguard_core::errors::{EditGuardError, ErrorContext, ErrorRecord, Result};
use editguard_core::integrity::IntegrityEngine;
use editguard_core::model::{Batch, Change, ChangeSubmission, DocumentState, Metadata};
use editguard_core::snapshot::SnapshotStore;
use editguard_core::txn::{PlannedOperation, RollbackResult, TransactionManager};
use editguard_core_types::{SubmissionId, TransactionId};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::apply::{AppliedSubmission, ApplyMode, ChangeOutcome, ChangeStatusOutcome, SubmissionApplier};
use crate::locks::SessionLocks;
use crate::persistence::Persistence;
use crate::processor::{direct_changes, ChangeProcessor};

pub(crate) struct Kernel {
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) state: Mutex<DocumentState>,
    pub(crate) transactions: Mutex<TransactionManager>,
    pub(crate) snapshots: Arc<SnapshotStore>,
    pub(crate) integrity: IntegrityEngine,
    pub(crate) locks: SessionLocks,
    pub(crate) processor: Arc<dyn ChangeProcessor>,
    pub(crate) persistence: Arc<dyn Persistence>,
    pub(crate) errors: Arc<ErrorLog>,
    cancelled: Mutex<HashSet<SubmissionId>>,
    rollbacks: Mutex<HashMap<SubmissionId, Vec<RollbackResult>>>,
    /// Pending transactions with at least one durable write
    written: Mutex<HashSet<TransactionId>>,
}

impl Kernel {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        clock: Arc<dyn Clock>,
        state: DocumentState,
        transactions: TransactionManager,
        snapshots: Arc<SnapshotStore>,
        integrity: IntegrityEngine,
        processor: Arc<dyn ChangeProcessor>,
        persistence: Arc<dyn Persistence>,
        errors: Arc<ErrorLog>,
    ) -> Self {
        Self {
            clock,
            state: Mutex::new(state),
            transactions: Mutex::new(transactions),
            snapshots,
            integrity,
            locks: SessionLocks::new(),
            processor,
            persistence,
            errors,
            cancelled: Mutex::new(HashSet::new()),
            rollbacks: Mutex::new(HashMap::new()),
            written: Mutex::new(HashSet::new()),
        }
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, DocumentState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn lock_transactions(&self) -> MutexGuard<'_, TransactionManager> {
        self.transactions.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn request_cancel(&self, id: &SubmissionId) {
        lock(&self.cancelled).insert(id.clone());
    }

    pub(crate) fn is_cancelled(&self, id: &SubmissionId) -> bool {
        lock(&self.cancelled).contains(id)
    }

    pub(crate) fn clear_cancel(&self, id: &SubmissionId) {
        lock(&self.cancelled).remove(id);
    }

    /// Rollbacks recorded for a submission since the last call
    pub(crate) fn take_rollbacks(&self, id: &SubmissionId) -> Vec<RollbackResult> {
        lock(&self.rollbacks).remove(id).unwrap_or_default()
    }

    fn push_rollback(&self, id: &SubmissionId, result: RollbackResult) {
        lock(&self.rollbacks)
            .entry(id.clone())
            .or_default()
            .push(result);
    }

    /// Current scope of a session, for persisting outside the state lock
    fn scope_of(&self, session_id: &str) -> DocumentState {
        self.lock_state().scope(session_id)
    }

    /// Apply one unit of edits in a single transaction
    async fn apply_unit(
        &self,
        submission: &ChangeSubmission,
        mode: ApplyMode,
    ) -> Result<AppliedSubmission> {
        submission.validate()?;
        self.check_cancelled(&submission.id)?;

        let now = self.clock.now();
        // Processing may be slow; it runs before the session lock is taken.
        let mut changes = match mode {
            ApplyMode::Processed => self.processor.process(submission, now).await?,
            ApplyMode::Direct | ApplyMode::MemoryOnly => direct_changes(submission, now),
        };
        let group_id = uuid::Uuid::now_v7().to_string();
        for change in &mut changes {
            change.batch_id = Some(group_id.clone());
        }
        let change_ids: Vec<String> = changes.iter().map(|c| c.id.clone()).collect();
        let plan = plan_for(submission, &group_id, changes, now);
        let steps = plan.len();

        let session_id = submission.session_id.as_str();
        let _guard = self.locks.acquire(session_id).await;
        let txn_id = self
            .lock_transactions()
            .begin_for_submission(&submission.id, session_id, plan);

        for index in 0..steps {
            let applied = self.check_cancelled(&submission.id).and_then(|()| {
                let mut tm = self.lock_transactions();
                let mut state = self.lock_state();
                tm.execute_operation(&txn_id, index, &mut state)
            });
            if let Err(err) = applied {
                self.abort(submission, &txn_id, &err, mode).await;
                return Err(err);
            }
            if mode.persists() {
                let scoped = self.scope_of(session_id);
                if let Err(err) = self.persistence.persist_session(&scoped, session_id).await {
                    self.abort(submission, &txn_id, &err, mode).await;
                    return Err(err);
                }
                lock(&self.written).insert(txn_id.clone());
            }
        }

        let committed = {
            let mut tm = self.lock_transactions();
            let mut state = self.lock_state();
            tm.commit(&txn_id, &mut state)
        };
        if let Err(err) = committed {
            self.abort(submission, &txn_id, &err, mode).await;
            return Err(err);
        }
        lock(&self.written).remove(&txn_id);
        if mode.persists() {
            let scoped = self.scope_of(session_id);
            if let Err(err) = self.persistence.persist_session(&scoped, session_id).await {
                // Content is already on disk from the per-operation writes;
                // only the refreshed checksums are missing.
                tracing::warn!(
                    transaction_id = %txn_id,
                    session_id = session_id,
                    error = %err,
                    "persisting committed checksums failed"
                );
            }
        }

        let status = match mode {
            ApplyMode::MemoryOnly => ChangeStatusOutcome::MemoryOnly,
            ApplyMode::Processed | ApplyMode::Direct => ChangeStatusOutcome::Applied,
        };
        Ok(AppliedSubmission {
            transaction_ids: vec![txn_id],
            changes: change_ids
                .into_iter()
                .enumerate()
                .map(|(edit_index, id)| ChangeOutcome {
                    edit_index,
                    change_id: Some(id),
                    status: status.clone(),
                })
                .collect(),
            mode,
        })
    }

    /// Roll back a failed transaction and persist the restored scope
    ///
    /// Caller holds the session lock.
    async fn abort(
        &self,
        submission: &ChangeSubmission,
        txn_id: &TransactionId,
        err: &EditGuardError,
        mode: ApplyMode,
    ) {
        let cause = classify(
            err,
            ErrorContext::new()
                .with_operation("apply_submission")
                .with_owner(submission.session_id.as_str())
                .with_transaction(txn_id.clone()),
            self.clock.now(),
        );
        self.rollback_locked(&submission.id, &submission.session_id, txn_id, &cause, mode)
            .await;
    }

    async fn rollback_locked(
        &self,
        submission_id: &SubmissionId,
        session_id: &str,
        txn_id: &TransactionId,
        cause: &ErrorRecord,
        mode: ApplyMode,
    ) -> Option<RollbackResult> {
        let result = {
            let mut tm = self.lock_transactions();
            let mut state = self.lock_state();
            tm.rollback(txn_id, cause, &mut state)
        };
        let mut result = match result {
            Ok(result) => result,
            Err(err) => {
                tracing::debug!(transaction_id = %txn_id, error = %err, "rollback skipped");
                return None;
            }
        };

        // A transaction that wrote to storage is only rolled back once the
        // restored scope is durable too.
        let written = lock(&self.written).remove(txn_id);
        if mode.persists() {
            let scoped = self.scope_of(session_id);
            match self.persistence.persist_session(&scoped, session_id).await {
                Ok(()) => {}
                Err(err) if !written => {
                    tracing::warn!(
                        transaction_id = %txn_id,
                        session_id = session_id,
                        error = %err,
                        "persisting rolled-back state failed; storage holds none of this transaction"
                    );
                }
                Err(err) => {
                    tracing::error!(
                        transaction_id = %txn_id,
                        session_id = session_id,
                        error = %err,
                        "persisting rolled-back state failed"
                    );
                    let message = format!("persisting restored state failed: {}", err);
                    if let Err(mark_err) = self
                        .lock_transactions()
                        .record_rollback_failure(txn_id, &message)
                    {
                        tracing::debug!(transaction_id = %txn_id, error = %mark_err, "rollback log not updated");
                    }
                    result.success = false;
                    result.errors.push(message);
                }
            }
        }
        self.push_rollback(submission_id, result.clone());
        Some(result)
    }

    /// Roll back every still-pending transaction of a submission
    pub(crate) async fn rollback_pending(
        &self,
        submission_id: &SubmissionId,
        cause: &ErrorRecord,
    ) -> Vec<RollbackResult> {
        let pending: Vec<(TransactionId, String)> = {
            let tm = self.lock_transactions();
            tm.pending_for_submission(submission_id)
                .into_iter()
                .filter_map(|id| tm.get(&id).map(|t| (id, t.session_id.clone())))
                .collect()
        };

        let mut results = Vec::new();
        for (txn_id, session_id) in pending {
            let _guard = self.locks.acquire(&session_id).await;
            if let Some(result) = self
                .rollback_locked(submission_id, &session_id, &txn_id, cause, ApplyMode::Processed)
                .await
            {
                results.push(result);
            }
        }
        results
    }

    fn check_cancelled(&self, id: &SubmissionId) -> Result<()> {
        if self.is_cancelled(id) {
            return Err(EditGuardError::Cancelled {
                submission_id: id.to_string(),
            });
        }
        Ok(())
    }

    /// State with in-flight transactions replaced by their backups
    ///
    /// A pending transaction's session shows its pre-transaction content, so
    /// half-applied operations never reach a verification pass.
    pub(crate) fn consistent_view(&self) -> DocumentState {
        let tm = self.lock_transactions();
        let mut view = self.lock_state().clone();
        for txn in tm.pending() {
            if let Some(backup) = &txn.backup {
                view.replace_scope(&txn.session_id, &backup.state);
            }
        }
        view
    }
}

#[async_trait]
impl SubmissionApplier for Kernel {
    async fn apply(&self, submission: &ChangeSubmission, mode: ApplyMode) -> Result<AppliedSubmission> {
        self.apply_unit(submission, mode).await
    }

    async fn apply_individually(&self, submission: &ChangeSubmission) -> Result<AppliedSubmission> {
        let total = submission.edits.len();
        let mut transaction_ids = Vec::new();
        let mut changes = Vec::with_capacity(total);

        for (edit_index, edit) in submission.edits.iter().enumerate() {
            let mut single = submission.clone();
            single.edits = vec![edit.clone()];
            match self.apply_unit(&single, ApplyMode::Processed).await {
                Ok(applied) => {
                    transaction_ids.extend(applied.transaction_ids);
                    changes.extend(applied.changes.into_iter().map(|mut c| {
                        c.edit_index = edit_index;
                        c
                    }));
                }
                Err(err) => changes.push(ChangeOutcome::failed(edit_index, err.to_string())),
            }
        }

        let failed = changes.iter().filter(|c| !c.is_applied()).count();
        if failed == total {
            return Err(EditGuardError::BatchPartialFailure { failed, total });
        }
        Ok(AppliedSubmission {
            transaction_ids,
            changes,
            mode: ApplyMode::Processed,
        })
    }
}

/// create-changes, update-session, create-batch, then update-metadata when
/// the submission carries a processing context
fn plan_for(
    submission: &ChangeSubmission,
    group_id: &str,
    changes: Vec<Change>,
    now: DateTime<Utc>,
) -> Vec<PlannedOperation> {
    let change_ids = changes.iter().map(|c| c.id.clone()).collect();
    let batch = Batch::new(
        group_id.to_string(),
        &submission.session_id,
        &submission.producer,
        change_ids,
        now,
    )
    .with_label(submission.label.clone());

    let mut plan = vec![
        PlannedOperation::CreateChanges { changes },
        PlannedOperation::UpdateSession {
            status: None,
            producer: Some(submission.producer.clone()),
            add_batch_id: Some(group_id.to_string()),
        },
        PlannedOperation::CreateBatch { batch },
    ];

    if let Some(context) = &submission.context {
        let mut patch = Metadata::new();
        if let Some(model) = &context.model {
            patch.set("last_model", serde_json::Value::String(model.clone()));
        }
        if let Some(provider) = &context.provider {
            patch.set("last_provider", serde_json::Value::String(provider.clone()));
        }
        for (key, value) in &context.extra {
            patch.set(format!("context.{}", key), serde_json::Value::String(value.clone()));
        }
        if !patch.is_empty() {
            plan.push(PlannedOperation::UpdateMetadata { patch });
        }
    }
    plan
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
