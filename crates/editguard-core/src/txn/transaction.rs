use chrono::{DateTime, Utc};
use editguard_core_types::{SubmissionId, TransactionId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::operation::{Operation, PlannedOperation};
use crate::snapshot::BackupSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Committed,
    /// Rollback ran but at least one step failed
    Failed,
    RolledBack,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

/// Transaction - the unit of durability for one submission attempt
#[derive(Debug, Clone)]
pub struct Transaction {
    pub id: TransactionId,
    pub submission_id: Option<SubmissionId>,
    /// Owning session
    pub session_id: String,
    pub operations: Vec<Operation>,
    pub status: TransactionStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Pre-mutation backup, captured before the first operation applies
    pub backup: Option<Arc<BackupSnapshot>>,
}

impl Transaction {
    pub(crate) fn new(
        session_id: &str,
        submission_id: Option<SubmissionId>,
        planned: Vec<PlannedOperation>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TransactionId::new(),
            submission_id,
            session_id: session_id.to_string(),
            operations: planned
                .into_iter()
                .map(|p| Operation::planned(session_id, p))
                .collect(),
            status: TransactionStatus::Pending,
            started_at: at,
            ended_at: None,
            backup: None,
        }
    }

    pub fn completed_count(&self) -> usize {
        self.operations.iter().filter(|o| o.completed).count()
    }

    /// Index of the first operation not yet applied
    pub fn next_index(&self) -> Option<usize> {
        self.operations.iter().position(|o| !o.completed)
    }

    pub fn is_pending(&self) -> bool {
        self.status == TransactionStatus::Pending
    }
}
