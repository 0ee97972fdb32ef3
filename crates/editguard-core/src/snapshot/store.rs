use chrono::{DateTime, Utc};
use editguard_core_types::SnapshotId;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};

use super::digest::compute_state_digest;
use crate::clock::Clock;
use crate::config::SnapshotConfig;
use crate::errors::{EditGuardError, Result};
use crate::model::DocumentState;
use crate::retention::{RetentionLog, RetentionPolicy};

/// What part of the document state a snapshot covers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "session_id", rename_all = "snake_case")]
pub enum SnapshotScope {
    Full,
    Session(String),
}

/// Immutable point-in-time copy of state plus its checksum
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupSnapshot {
    pub id: SnapshotId,
    pub scope: SnapshotScope,
    pub state: DocumentState,
    pub checksum: String,
    pub created_at: DateTime<Utc>,
}

impl BackupSnapshot {
    /// Recompute the content checksum and compare with the stored one
    ///
    /// # Errors
    ///
    /// Returns `DataCorruption` on mismatch, or `Serialization` if hashing fails.
    pub fn verify(&self) -> Result<()> {
        let actual = compute_state_digest(&self.state)?;
        if actual != self.checksum {
            return Err(EditGuardError::DataCorruption {
                location: format!("snapshot:{}", self.id),
                message: format!(
                    "checksum mismatch: expected {}, computed {}",
                    self.checksum, actual
                ),
            });
        }
        Ok(())
    }
}

/// Bounded ring of backup snapshots
///
/// The oldest snapshot is evicted once capacity is exceeded. Snapshots are
/// handed out as `Arc`s, so a transaction keeps its backup even after the
/// ring has evicted it.
pub struct SnapshotStore {
    clock: Arc<dyn Clock>,
    ring: Mutex<RetentionLog<Arc<BackupSnapshot>>>,
}

impl SnapshotStore {
    pub fn new(config: &SnapshotConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            ring: Mutex::new(RetentionLog::new(RetentionPolicy::count_only(config.capacity))),
        }
    }

    /// Snapshot the whole state
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if the checksum cannot be computed.
    pub fn create_snapshot(&self, state: &DocumentState) -> Result<Arc<BackupSnapshot>> {
        self.capture(SnapshotScope::Full, state.clone())
    }

    /// Snapshot one session and its batches
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if the checksum cannot be computed.
    pub fn create_session_snapshot(
        &self,
        state: &DocumentState,
        session_id: &str,
    ) -> Result<Arc<BackupSnapshot>> {
        self.capture(
            SnapshotScope::Session(session_id.to_string()),
            state.scope(session_id),
        )
    }

    /// Restore a snapshot held in the ring
    ///
    /// # Errors
    ///
    /// Returns `SnapshotNotFound` if the id is not in the ring, or
    /// `DataCorruption` if its checksum no longer matches.
    pub fn restore_snapshot(&self, id: &SnapshotId, state: &mut DocumentState) -> Result<()> {
        let snapshot = self.get(id).ok_or_else(|| EditGuardError::SnapshotNotFound {
            snapshot_id: id.to_string(),
        })?;
        Self::apply(&snapshot, state)
    }

    /// Restore a snapshot whether or not it is still in the ring
    ///
    /// The checksum is recomputed first; on mismatch the state is left as is.
    ///
    /// # Errors
    ///
    /// Returns `DataCorruption` if the checksum no longer matches.
    pub fn apply(snapshot: &BackupSnapshot, state: &mut DocumentState) -> Result<()> {
        snapshot.verify()?;
        match &snapshot.scope {
            SnapshotScope::Full => *state = snapshot.state.clone(),
            SnapshotScope::Session(session_id) => state.replace_scope(session_id, &snapshot.state),
        }
        tracing::info!(
            component = module_path!(),
            snapshot_id = %snapshot.id,
            scope = ?snapshot.scope,
            "snapshot restored"
        );
        Ok(())
    }

    /// Add an externally loaded snapshot to the ring
    pub fn import(&self, snapshot: BackupSnapshot) -> Arc<BackupSnapshot> {
        let snapshot = Arc::new(snapshot);
        self.lock().push(snapshot.created_at, snapshot.clone());
        snapshot
    }

    pub fn get(&self, id: &SnapshotId) -> Option<Arc<BackupSnapshot>> {
        self.lock().find(|s| s.id == *id).cloned()
    }

    /// Most recent whole-state snapshot
    pub fn latest_full(&self) -> Option<Arc<BackupSnapshot>> {
        self.lock()
            .iter()
            .rev()
            .find(|s| s.scope == SnapshotScope::Full)
            .cloned()
    }

    /// Snapshots currently in the ring, oldest first
    pub fn list(&self) -> Vec<Arc<BackupSnapshot>> {
        self.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn capture(&self, scope: SnapshotScope, state: DocumentState) -> Result<Arc<BackupSnapshot>> {
        let checksum = compute_state_digest(&state)?;
        let snapshot = Arc::new(BackupSnapshot {
            id: SnapshotId::new(),
            scope,
            state,
            checksum,
            created_at: self.clock.now(),
        });
        let evicted = self.lock().push(snapshot.created_at, snapshot.clone());
        tracing::debug!(
            component = module_path!(),
            snapshot_id = %snapshot.id,
            evicted = evicted.len(),
            "snapshot created"
        );
        Ok(snapshot)
    }

    fn lock(&self) -> MutexGuard<'_, RetentionLog<Arc<BackupSnapshot>>> {
        self.ring.lock().unwrap_or_else(|e| e.into_inner())
    }
}
