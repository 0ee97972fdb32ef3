//! Transaction operations and their inverses
//!
//! Applying a [`PlannedOperation`] returns the [`AppliedData`] needed to undo
//! it. Inverses read nothing but that data and the target id, so they stay
//! computable after arbitrary intervening failures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::errors::{EditGuardError, Result};
use crate::model::{Batch, Change, DocumentState, Metadata, SessionFields, SessionStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    CreateChanges,
    UpdateSession,
    CreateBatch,
    UpdateMetadata,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::CreateChanges => "create-changes",
            OperationKind::UpdateSession => "update-session",
            OperationKind::CreateBatch => "create-batch",
            OperationKind::UpdateMetadata => "update-metadata",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A mutation planned at `begin` time, carrying its full payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum PlannedOperation {
    /// Append changes to a session
    CreateChanges { changes: Vec<Change> },
    /// Overwrite session bookkeeping fields
    UpdateSession {
        status: Option<SessionStatus>,
        producer: Option<String>,
        add_batch_id: Option<String>,
    },
    /// Insert a batch into the batch index
    CreateBatch { batch: Batch },
    /// Merge entries into the session metadata
    UpdateMetadata { patch: Metadata },
}

/// Minimal data needed to invert one applied operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum AppliedData {
    ChangesCreated { change_ids: Vec<String> },
    SessionUpdated { previous: SessionFields },
    BatchCreated { group_id: String },
    MetadataUpdated { previous: Metadata },
}

impl PlannedOperation {
    pub fn kind(&self) -> OperationKind {
        match self {
            PlannedOperation::CreateChanges { .. } => OperationKind::CreateChanges,
            PlannedOperation::UpdateSession { .. } => OperationKind::UpdateSession,
            PlannedOperation::CreateBatch { .. } => OperationKind::CreateBatch,
            PlannedOperation::UpdateMetadata { .. } => OperationKind::UpdateMetadata,
        }
    }

    /// Apply to `state` for the session `target`
    ///
    /// Validation happens before any mutation, so on `Err` the state is
    /// unchanged.
    ///
    /// # Errors
    ///
    /// - `SessionNotFound` if the target session does not exist
    /// - `SessionClosed` if the session no longer accepts changes
    /// - `InvalidSubmission` for id collisions
    pub fn apply(
        &self,
        target: &str,
        state: &mut DocumentState,
        at: DateTime<Utc>,
    ) -> Result<AppliedData> {
        match self {
            PlannedOperation::CreateChanges { changes } => {
                let existing: HashSet<&str> = state
                    .sessions
                    .values()
                    .flat_map(|s| s.changes.iter().map(|c| c.id.as_str()))
                    .collect();
                let session = state.session(target)?;
                if session.is_closed() {
                    return Err(EditGuardError::SessionClosed {
                        session_id: target.to_string(),
                    });
                }
                let mut seen = HashSet::new();
                for change in changes {
                    if existing.contains(change.id.as_str()) || !seen.insert(change.id.as_str()) {
                        return Err(EditGuardError::InvalidSubmission {
                            reason: format!("duplicate change id {}", change.id),
                        });
                    }
                }
                let change_ids = changes.iter().map(|c| c.id.clone()).collect();
                state.session_mut(target)?.changes.extend(changes.iter().cloned());
                Ok(AppliedData::ChangesCreated { change_ids })
            }
            PlannedOperation::UpdateSession {
                status,
                producer,
                add_batch_id,
            } => {
                let session = state.session_mut(target)?;
                let previous = session.fields();
                if let Some(status) = status {
                    session.status = *status;
                }
                if let Some(producer) = producer {
                    session.last_producer = Some(producer.clone());
                }
                if let Some(group_id) = add_batch_id {
                    if !session.batch_ids.contains(group_id) {
                        session.batch_ids.push(group_id.clone());
                    }
                }
                session.updated_at = at;
                Ok(AppliedData::SessionUpdated { previous })
            }
            PlannedOperation::CreateBatch { batch } => {
                state.session(target)?;
                if state.batches.contains_key(&batch.group_id) {
                    return Err(EditGuardError::InvalidSubmission {
                        reason: format!("duplicate batch id {}", batch.group_id),
                    });
                }
                state.batches.insert(batch.group_id.clone(), batch.clone());
                Ok(AppliedData::BatchCreated {
                    group_id: batch.group_id.clone(),
                })
            }
            PlannedOperation::UpdateMetadata { patch } => {
                let session = state.session_mut(target)?;
                let previous = session.metadata.clone();
                session.metadata.merge(patch);
                Ok(AppliedData::MetadataUpdated { previous })
            }
        }
    }
}

impl AppliedData {
    /// Undo the operation this data was recorded for
    ///
    /// Returns a short description of what was undone.
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound` or `BatchNotFound` if the target vanished.
    pub fn invert(&self, target: &str, state: &mut DocumentState) -> Result<String> {
        match self {
            AppliedData::ChangesCreated { change_ids } => {
                let session = state.session_mut(target)?;
                let before = session.changes.len();
                session.changes.retain(|c| !change_ids.contains(&c.id));
                Ok(format!(
                    "removed {} of {} created changes",
                    before - session.changes.len(),
                    change_ids.len()
                ))
            }
            AppliedData::SessionUpdated { previous } => {
                state.session_mut(target)?.restore_fields(previous.clone());
                Ok("restored previous session fields".to_string())
            }
            AppliedData::BatchCreated { group_id } => {
                state
                    .batches
                    .remove(group_id)
                    .ok_or_else(|| EditGuardError::BatchNotFound {
                        group_id: group_id.clone(),
                    })?;
                Ok(format!("deleted batch {}", group_id))
            }
            AppliedData::MetadataUpdated { previous } => {
                state.session_mut(target)?.metadata = previous.clone();
                Ok("restored previous metadata".to_string())
            }
        }
    }
}

/// One step of a transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub kind: OperationKind,
    /// Session the operation mutates
    pub target: String,
    pub planned: PlannedOperation,
    pub applied: Option<AppliedData>,
    pub completed: bool,
    pub timestamp: Option<DateTime<Utc>>,
}

impl Operation {
    pub fn planned(target: &str, planned: PlannedOperation) -> Self {
        Self {
            kind: planned.kind(),
            target: target.to_string(),
            planned,
            applied: None,
            completed: false,
            timestamp: None,
        }
    }
}
