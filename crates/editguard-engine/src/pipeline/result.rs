//! Outcomes handed back to the submission entry layer

use editguard_core::errors::{DataPreservation, ErrorRecord};
use editguard_core::integrity::ExecutedRepair;
use editguard_core::txn::RollbackResult;
use editguard_core_types::{SubmissionId, TransactionId};
use serde::Serialize;

use crate::apply::ChangeOutcome;

/// Terminal outcome of one submission
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionResult {
    pub submission_id: SubmissionId,
    /// Committed transaction, or the last one rolled back on failure
    pub transaction_id: Option<TransactionId>,
    pub success: bool,
    pub change_outcomes: Vec<ChangeOutcome>,
    /// Terminal classified failure
    pub error: Option<ErrorRecord>,
    /// Failure a fallback recovered from
    pub recovered_from: Option<ErrorRecord>,
    pub attempts: u32,
    pub fallback_used: Option<String>,
    pub data_preservation: DataPreservation,
    /// Every rollback run on behalf of this submission, in order
    pub rollbacks: Vec<RollbackResult>,
    /// Repairs executed by the post-failure integrity pass
    pub repairs_executed: Vec<ExecutedRepair>,
    pub duration_ms: u64,
}

impl SubmissionResult {
    pub fn applied_change_ids(&self) -> Vec<&str> {
        self.change_outcomes
            .iter()
            .filter(|c| c.is_applied())
            .filter_map(|c| c.change_id.as_deref())
            .collect()
    }

    /// True if every rollback run for this submission restored cleanly
    pub fn rollbacks_clean(&self) -> bool {
        self.rollbacks.iter().all(|r| r.success)
    }
}

/// Result of `cancel`
#[derive(Debug, Clone, Serialize)]
pub struct CancelOutcome {
    pub submission_id: SubmissionId,
    /// Pending transactions rolled back by the cancellation itself
    pub rolled_back: Vec<RollbackResult>,
}

/// Counts from one housekeeping sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HousekeepingReport {
    pub transactions_purged: usize,
    pub retry_contexts_dropped: usize,
    pub idle_locks_pruned: usize,
}
