//! Submission pipeline
//!
//! Entry point for change submissions: wraps kernel application in the
//! Retry & Fallback Engine, guarantees rollback on every failure path,
//! and exposes integrity passes over a consistent view of state.

mod kernel;
pub mod result;

use editguard_core::clock::{Clock, SystemClock};
use editguard_core::error_log::{ErrorLog, ErrorStatistics};
use editguard_core::errors::{DataPreservation, EditGuardError, ErrorContext, Result};
use editguard_core::integrity::{ExecutedRepair, IntegrityEngine, IntegrityReport, VerifyOptions};
use editguard_core::model::{ChangeSubmission, DocumentState};
use editguard_core::snapshot::SnapshotStore;
use editguard_core::txn::{RollbackRecord, Transaction, TransactionManager};
use editguard_core::{log_op_end, log_op_error, log_op_start, AuditEntry};
use editguard_core_types::{SubmissionId, TransactionId};
use editguard_store::SnapshotFiles;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use self::kernel::Kernel;
pub use self::result::{CancelOutcome, HousekeepingReport, SubmissionResult};
use crate::apply::{ApplyMode, ChangeOutcome, ChangeStatusOutcome, SubmissionApplier};
use crate::config::EngineConfig;
use crate::fallback::{
    FallbackCatalog, FallbackEnv, FallbackRequest, FallbackStrategy, LocalCache, MemoryStore,
};
use crate::persistence::{InMemoryPersistence, Persistence};
use crate::processor::{ChangeProcessor, PassthroughProcessor};
use crate::retry::{Resolution, RetryEngine, RetryStats};
use crate::time::{JitterSource, RandomJitter, Sleeper, TokioSleeper};

pub struct SubmissionPipeline {
    config: EngineConfig,
    kernel: Arc<Kernel>,
    retry: RetryEngine,
}

impl SubmissionPipeline {
    pub fn builder(config: EngineConfig) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Apply a submission with retries, fallbacks and rollback
    ///
    /// Never returns an `Err`: every failure is classified into the result.
    pub async fn submit(&self, submission: ChangeSubmission) -> SubmissionResult {
        let started = self.kernel.clock.now();
        log_op_start!(
            "submit",
            submission_id = %submission.id,
            session_id = %submission.session_id,
            edits = submission.edits.len()
        );

        let request = FallbackRequest {
            operation_id: format!("submit:{}", submission.id),
            submission: submission.clone(),
        };
        let kernel = self.kernel.clone();
        let outcome = self
            .retry
            .execute_with_retry(
                &request.operation_id,
                &submission.session_id,
                |_attempt| {
                    let kernel = kernel.clone();
                    let submission = submission.clone();
                    async move { kernel.apply(&submission, ApplyMode::Processed).await }
                },
                Some(&request),
            )
            .await;

        // Leftover pending work after a failed or rollback-flagged run is
        // never abandoned.
        if !outcome.success || outcome.rollback_requested() {
            let cause = outcome
                .error
                .clone()
                .or_else(|| outcome.fallback_failures.last().map(|f| f.error.clone()));
            if let Some(cause) = cause {
                self.kernel.rollback_pending(&submission.id, &cause).await;
            }
        }
        self.kernel.clear_cancel(&submission.id);

        let rollbacks = self.kernel.take_rollbacks(&submission.id);
        let repairs_executed = if rollbacks.iter().any(|r| !r.success) {
            self.repair_after_failure().await
        } else {
            Vec::new()
        };

        let (change_outcomes, data_preservation, applied_txn) = match &outcome.value {
            Some(Resolution::Primary(applied)) => (
                applied.changes.clone(),
                DataPreservation::Persisted,
                applied.transaction_ids.last().cloned(),
            ),
            Some(Resolution::Fallback(value)) => match &value.applied {
                Some(applied) => (
                    applied.changes.clone(),
                    value.preservation,
                    applied.transaction_ids.last().cloned(),
                ),
                None => (
                    unapplied_outcomes(&submission, ChangeStatusOutcome::Cached),
                    value.preservation,
                    None,
                ),
            },
            None => {
                let reason = outcome
                    .error
                    .as_ref()
                    .map(|e| e.message.clone())
                    .unwrap_or_default();
                let preserved = if !rollbacks.is_empty() && rollbacks.iter().all(|r| r.success) {
                    DataPreservation::Snapshot
                } else {
                    DataPreservation::Lost
                };
                (
                    unapplied_outcomes(&submission, ChangeStatusOutcome::Failed { reason }),
                    preserved,
                    None,
                )
            }
        };

        let transaction_id =
            applied_txn.or_else(|| rollbacks.last().map(|r| r.transaction_id.clone()));
        let error = outcome
            .error
            .map(|e| e.with_data_preserved(data_preservation));
        let duration_ms =
            u64::try_from((self.kernel.clock.now() - started).num_milliseconds()).unwrap_or(0);

        match &error {
            Some(record) => {
                log_op_error!(
                    "submit",
                    record,
                    duration_ms = duration_ms,
                    submission_id = %submission.id,
                    rollbacks = rollbacks.len()
                );
            }
            None => {
                log_op_end!(
                    "submit",
                    duration_ms = duration_ms,
                    submission_id = %submission.id,
                    attempts = outcome.attempts.len(),
                    fallback = outcome.fallback_used.as_deref().unwrap_or("none")
                );
            }
        }

        SubmissionResult {
            submission_id: submission.id.clone(),
            transaction_id,
            success: outcome.success,
            change_outcomes,
            error,
            recovered_from: outcome.recovered_from,
            attempts: u32::try_from(outcome.attempts.len()).unwrap_or(u32::MAX),
            fallback_used: outcome.fallback_used,
            data_preservation,
            rollbacks,
            repairs_executed,
            duration_ms,
        }
    }

    /// Like `submit`, bounded by an overall deadline
    ///
    /// On expiry the in-flight attempt is dropped and any transaction it left
    /// pending is rolled back.
    pub async fn submit_with_deadline(
        &self,
        submission: ChangeSubmission,
        deadline: Duration,
    ) -> SubmissionResult {
        let started = self.kernel.clock.now();
        match tokio::time::timeout(deadline, self.submit(submission.clone())).await {
            Ok(result) => result,
            Err(_) => {
                let err = EditGuardError::DeadlineExceeded {
                    deadline_ms: u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
                };
                let record = self.kernel.errors.record(
                    &err,
                    ErrorContext::new()
                        .with_operation("submit")
                        .with_owner(submission.session_id.as_str()),
                );
                self.kernel.rollback_pending(&submission.id, &record).await;
                self.kernel.clear_cancel(&submission.id);
                let rollbacks = self.kernel.take_rollbacks(&submission.id);
                let repairs_executed = if rollbacks.iter().any(|r| !r.success) {
                    self.repair_after_failure().await
                } else {
                    Vec::new()
                };
                let preserved = if rollbacks.iter().all(|r| r.success) {
                    DataPreservation::Snapshot
                } else {
                    DataPreservation::Lost
                };
                tracing::warn!(
                    submission_id = %submission.id,
                    deadline_ms = deadline.as_millis() as u64,
                    rollbacks = rollbacks.len(),
                    "submission deadline exceeded"
                );

                SubmissionResult {
                    submission_id: submission.id.clone(),
                    transaction_id: rollbacks.last().map(|r| r.transaction_id.clone()),
                    success: false,
                    change_outcomes: unapplied_outcomes(
                        &submission,
                        ChangeStatusOutcome::Failed {
                            reason: err.to_string(),
                        },
                    ),
                    error: Some(record.with_data_preserved(preserved)),
                    recovered_from: None,
                    attempts: 0,
                    fallback_used: None,
                    data_preservation: preserved,
                    rollbacks,
                    repairs_executed,
                    duration_ms: u64::try_from((self.kernel.clock.now() - started).num_milliseconds())
                        .unwrap_or(0),
                }
            }
        }
    }

    /// Flag a submission as cancelled without waiting
    ///
    /// An in-flight attempt stops before its next operation and rolls back;
    /// a submission that has not started yet fails immediately.
    pub fn request_cancel(&self, submission_id: &SubmissionId) {
        self.kernel.request_cancel(submission_id);
    }

    /// Cancel a submission and roll back anything it left pending
    pub async fn cancel(&self, submission_id: &SubmissionId) -> CancelOutcome {
        self.kernel.request_cancel(submission_id);
        let err = EditGuardError::Cancelled {
            submission_id: submission_id.to_string(),
        };
        let record = self
            .kernel
            .errors
            .record(&err, ErrorContext::new().with_operation("cancel"));
        self.kernel.rollback_pending(submission_id, &record).await;
        CancelOutcome {
            submission_id: submission_id.clone(),
            rolled_back: self.kernel.take_rollbacks(submission_id),
        }
    }

    /// Run an integrity pass
    ///
    /// Read-only passes verify a consistent view in which in-flight
    /// transactions show their pre-transaction content; deep passes also wait
    /// for every session lock. Repairing passes hold every session lock and
    /// persist the repaired state.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if hashing fails.
    pub async fn verify_integrity(&self, options: VerifyOptions) -> Result<IntegrityReport> {
        let session_ids: Vec<String> = self.kernel.lock_state().sessions.keys().cloned().collect();

        if !options.repair_mode {
            let _guards = if options.deep {
                self.kernel.locks.acquire_all(&session_ids).await
            } else {
                Vec::new()
            };
            let mut view = self.kernel.consistent_view();
            return self.kernel.integrity.verify(&mut view, options);
        }

        let _guards = self.kernel.locks.acquire_all(&session_ids).await;
        let (report, touched) = {
            let mut state = self.kernel.lock_state();
            let report = self.kernel.integrity.verify(&mut state, options)?;
            let mut touched = session_ids.clone();
            touched.extend(state.sessions.keys().cloned());
            touched.sort();
            touched.dedup();
            (report, touched)
        };

        if !report.executed_repairs.is_empty() {
            for session_id in &touched {
                let scoped = self.kernel.lock_state().scope(session_id);
                if let Err(err) = self.kernel.persistence.persist_session(&scoped, session_id).await {
                    tracing::error!(session_id = %session_id, error = %err, "persisting repaired state failed");
                }
            }
        }
        Ok(report)
    }

    /// Repairing pass after a rollback that did not restore cleanly
    async fn repair_after_failure(&self) -> Vec<ExecutedRepair> {
        match self.verify_integrity(VerifyOptions::quick().repairing()).await {
            Ok(report) => report.executed_repairs,
            Err(err) => {
                tracing::error!(error = %err, "post-failure integrity pass failed");
                Vec::new()
            }
        }
    }

    /// Run an unsafe repair after explicit confirmation, under every session lock
    ///
    /// # Errors
    ///
    /// Returns `BackupRequired` if the action needs a snapshot and none exists.
    pub async fn execute_confirmed_repair(
        &self,
        action: &editguard_core::integrity::RepairAction,
    ) -> Result<ExecutedRepair> {
        let session_ids: Vec<String> = self.kernel.lock_state().sessions.keys().cloned().collect();
        let _guards = self.kernel.locks.acquire_all(&session_ids).await;
        let (executed, touched) = {
            let mut state = self.kernel.lock_state();
            let executed = self.kernel.integrity.execute_confirmed(&mut state, action)?;
            let mut touched = session_ids.clone();
            touched.extend(state.sessions.keys().cloned());
            touched.sort();
            touched.dedup();
            (executed, touched)
        };
        for session_id in &touched {
            let scoped = self.kernel.lock_state().scope(session_id);
            self.kernel.persistence.persist_session(&scoped, session_id).await?;
        }
        Ok(executed)
    }

    /// Purge expired transactions, stale retry contexts and idle locks
    pub fn housekeeping(&self) -> HousekeepingReport {
        let transactions_purged = self.kernel.lock_transactions().purge_expired();
        let report = HousekeepingReport {
            transactions_purged,
            retry_contexts_dropped: self.retry.cleanup_expired_contexts(),
            idle_locks_pruned: self.kernel.locks.prune_idle(),
        };
        if report != HousekeepingReport::default() {
            tracing::debug!(
                transactions = report.transactions_purged,
                retry_contexts = report.retry_contexts_dropped,
                locks = report.idle_locks_pruned,
                "housekeeping sweep"
            );
        }
        report
    }

    /// Start periodic verification plus housekeeping
    ///
    /// The first pass runs one interval after spawning.
    pub fn spawn_periodic_verification(
        self: &Arc<Self>,
        interval: Duration,
        options: VerifyOptions,
    ) -> JoinHandle<()> {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let swept = pipeline.housekeeping();
                match pipeline.verify_integrity(options).await {
                    Ok(report) => tracing::info!(
                        valid = report.valid,
                        level = ?report.final_report().corruption_level,
                        repaired = report.executed_repairs.len(),
                        purged = swept.transactions_purged,
                        "periodic verification"
                    ),
                    Err(err) => tracing::warn!(error = %err, "periodic verification failed"),
                }
            }
        })
    }

    /// Spawn the periodic task if the config enables it
    pub fn start_background_tasks(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let cfg = &self.config.verification;
        let secs = cfg.interval_secs?;
        let mut options = if cfg.deep {
            VerifyOptions::deep()
        } else {
            VerifyOptions::quick()
        };
        if cfg.repair {
            options = options.repairing();
        }
        Some(self.spawn_periodic_verification(Duration::from_secs(secs), options))
    }

    /// Re-submit everything parked by cache-locally
    pub async fn replay_cached(&self) -> Vec<SubmissionResult> {
        let mut results = Vec::new();
        for cached in self.retry.env().cache.drain() {
            results.push(self.submit(cached.submission).await);
        }
        results
    }

    /// Persist sessions held only in memory; returns how many were flushed
    pub async fn flush_memory_resident(&self) -> usize {
        let memory = &self.retry.env().memory;
        let mut flushed = 0;
        for session_id in memory.sessions() {
            let _guard = self.kernel.locks.acquire(&session_id).await;
            let scoped = self.kernel.lock_state().scope(&session_id);
            match self.kernel.persistence.persist_session(&scoped, &session_id).await {
                Ok(()) => {
                    memory.clear(&session_id);
                    flushed += 1;
                }
                Err(err) => {
                    tracing::warn!(session_id = %session_id, error = %err, "flush still failing");
                }
            }
        }
        flushed
    }

    /// Write every snapshot in the ring to disk
    ///
    /// # Errors
    ///
    /// Returns the first write failure.
    pub fn export_snapshots(&self, files: &SnapshotFiles) -> Result<usize> {
        let snapshots = self.kernel.snapshots.list();
        for snapshot in &snapshots {
            files.persist(snapshot)?;
        }
        Ok(snapshots.len())
    }

    /// Copy of the current document state
    pub fn state(&self) -> DocumentState {
        self.kernel.lock_state().clone()
    }

    pub fn transaction(&self, id: &TransactionId) -> Option<Transaction> {
        self.kernel.lock_transactions().get(id).cloned()
    }

    pub fn rollback_history(&self, session_id: &str) -> Vec<RollbackRecord> {
        self.kernel.lock_transactions().rollback_history(session_id)
    }

    pub fn active_transactions(&self) -> usize {
        self.kernel.lock_transactions().active_count()
    }

    pub fn error_statistics(&self) -> ErrorStatistics {
        self.kernel.errors.statistics()
    }

    pub fn error_log(&self) -> &Arc<ErrorLog> {
        &self.kernel.errors
    }

    pub fn retry_stats(&self) -> RetryStats {
        self.retry.stats()
    }

    pub fn retry_engine(&self) -> &RetryEngine {
        &self.retry
    }

    pub fn integrity_audit_trail(&self) -> Vec<AuditEntry> {
        self.kernel.integrity.audit_trail()
    }

    pub fn snapshots(&self) -> &Arc<SnapshotStore> {
        &self.kernel.snapshots
    }

    pub fn local_cache(&self) -> &Arc<LocalCache> {
        &self.retry.env().cache
    }

    pub fn memory_store(&self) -> &Arc<MemoryStore> {
        &self.retry.env().memory
    }
}

fn unapplied_outcomes(submission: &ChangeSubmission, status: ChangeStatusOutcome) -> Vec<ChangeOutcome> {
    (0..submission.edits.len())
        .map(|edit_index| ChangeOutcome {
            edit_index,
            change_id: None,
            status: status.clone(),
        })
        .collect()
}

/// Wires a pipeline from config plus optional collaborators
///
/// Anything not supplied gets a production default: system clock, tokio
/// timers, entropy-seeded jitter, passthrough processor, in-memory
/// persistence and the default fallback catalog.
pub struct PipelineBuilder {
    config: EngineConfig,
    clock: Option<Arc<dyn Clock>>,
    sleeper: Option<Arc<dyn Sleeper>>,
    jitter: Option<Arc<dyn JitterSource>>,
    processor: Option<Arc<dyn ChangeProcessor>>,
    persistence: Option<Arc<dyn Persistence>>,
    catalog: Option<FallbackCatalog>,
    strategies: Vec<FallbackStrategy>,
    state: DocumentState,
}

impl PipelineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            clock: None,
            sleeper: None,
            jitter: None,
            processor: None,
            persistence: None,
            catalog: None,
            strategies: Vec::new(),
            state: DocumentState::new(),
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = Some(sleeper);
        self
    }

    pub fn jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = Some(jitter);
        self
    }

    pub fn processor(mut self, processor: Arc<dyn ChangeProcessor>) -> Self {
        self.processor = Some(processor);
        self
    }

    pub fn persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Replace the whole catalog
    pub fn catalog(mut self, catalog: FallbackCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Register one more strategy on top of the defaults
    pub fn strategy(mut self, strategy: FallbackStrategy) -> Self {
        self.strategies.push(strategy);
        self
    }

    /// Start from previously persisted state
    pub fn initial_state(mut self, state: DocumentState) -> Self {
        self.state = state;
        self
    }

    /// # Errors
    ///
    /// Returns `Configuration` if the config fails validation.
    pub fn build(self) -> Result<SubmissionPipeline> {
        self.config.validate()?;
        let config = self.config;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let sleeper = self.sleeper.unwrap_or_else(|| Arc::new(TokioSleeper));
        let jitter = self
            .jitter
            .unwrap_or_else(|| Arc::new(RandomJitter::from_entropy()));

        let catalog = match self.catalog {
            Some(catalog) if self.strategies.is_empty() => catalog,
            base => {
                let mut builder = FallbackCatalog::builder();
                match base {
                    Some(catalog) => {
                        for strategy in catalog.strategies() {
                            builder = builder.register(strategy.clone());
                        }
                    }
                    None => builder = builder.with_defaults(),
                }
                for strategy in self.strategies {
                    builder = builder.register(strategy);
                }
                builder.build()
            }
        };

        let snapshots = Arc::new(SnapshotStore::new(&config.snapshot, clock.clone()));
        let errors = Arc::new(ErrorLog::new(&config.error_log, clock.clone()));
        let kernel = Arc::new(Kernel::new(
            clock.clone(),
            self.state,
            TransactionManager::new(config.transaction.clone(), clock.clone(), snapshots.clone()),
            snapshots.clone(),
            IntegrityEngine::new(config.integrity.clone(), clock.clone(), snapshots),
            self.processor
                .unwrap_or_else(|| Arc::new(PassthroughProcessor)),
            self.persistence
                .unwrap_or_else(|| Arc::new(InMemoryPersistence::new())),
            errors.clone(),
        ));

        let applier: Arc<dyn SubmissionApplier> = kernel.clone();
        let env = FallbackEnv {
            cache: Arc::new(LocalCache::new(config.fallback.cache_capacity)),
            memory: Arc::new(MemoryStore::new()),
            applier: Some(applier),
            sleeper,
            clock,
            config: config.fallback.clone(),
        };
        let retry = RetryEngine::new(
            config.retry.clone(),
            catalog,
            env,
            jitter,
            errors,
            config.verification.retry_context_grace_secs,
        );

        tracing::info!(
            strategies = retry.catalog().len(),
            max_retries = config.retry.max_retries,
            "submission pipeline ready"
        );
        Ok(SubmissionPipeline {
            config,
            kernel,
            retry,
        })
    }
}
