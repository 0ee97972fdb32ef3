//! Submission application seam
//!
//! Fallback strategies re-enter the kernel through [`SubmissionApplier`]
//! rather than holding the pipeline itself.

use async_trait::async_trait;
use editguard_core::errors::Result;
use editguard_core::model::ChangeSubmission;
use editguard_core_types::TransactionId;
use serde::Serialize;

/// How a submission's edits reach the document state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApplyMode {
    /// Through the configured change processor, then persisted
    Processed,
    /// Built-in edit conversion, bypassing the processor, then persisted
    Direct,
    /// Built-in conversion, kept in memory only
    MemoryOnly,
}

impl ApplyMode {
    pub fn persists(&self) -> bool {
        !matches!(self, ApplyMode::MemoryOnly)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChangeStatusOutcome {
    Applied,
    Cached,
    MemoryOnly,
    Failed { reason: String },
}

/// What happened to one proposed edit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeOutcome {
    pub edit_index: usize,
    pub change_id: Option<String>,
    #[serde(flatten)]
    pub status: ChangeStatusOutcome,
}

impl ChangeOutcome {
    pub fn applied(edit_index: usize, change_id: String) -> Self {
        Self {
            edit_index,
            change_id: Some(change_id),
            status: ChangeStatusOutcome::Applied,
        }
    }

    pub fn failed(edit_index: usize, reason: impl Into<String>) -> Self {
        Self {
            edit_index,
            change_id: None,
            status: ChangeStatusOutcome::Failed {
                reason: reason.into(),
            },
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(
            self.status,
            ChangeStatusOutcome::Applied | ChangeStatusOutcome::MemoryOnly
        )
    }
}

/// Result of a committed application
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedSubmission {
    /// Committed transactions, one per independently applied unit
    pub transaction_ids: Vec<TransactionId>,
    pub changes: Vec<ChangeOutcome>,
    pub mode: ApplyMode,
}

impl AppliedSubmission {
    pub fn applied_count(&self) -> usize {
        self.changes.iter().filter(|c| c.is_applied()).count()
    }
}

/// Applies a submission atomically under its session lock
#[async_trait]
pub trait SubmissionApplier: Send + Sync {
    /// Apply every edit in one transaction
    async fn apply(&self, submission: &ChangeSubmission, mode: ApplyMode)
        -> Result<AppliedSubmission>;

    /// Apply each edit in its own transaction
    ///
    /// Succeeds if at least one edit committed; per-edit failures are
    /// reported in the outcome list.
    async fn apply_individually(&self, submission: &ChangeSubmission) -> Result<AppliedSubmission>;
}
