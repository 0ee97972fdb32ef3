//! Snapshot files
//!
//! Snapshots are written as-is, checksum included. Loading does not
//! verify: a reloaded snapshot is checked when it is restored, so a file
//! altered on disk is refused at that point.

use crate::errors::{corrupt_file, io_error, snapshot_missing, Result};
use crate::fs::atomic::atomic_write;
use editguard_core::snapshot::{BackupSnapshot, SnapshotStore};
use editguard_core_types::SnapshotId;
use std::fs;
use std::path::{Path, PathBuf};

const SNAPSHOTS_DIR: &str = "snapshots";

pub struct SnapshotFiles {
    dir: PathBuf,
}

impl SnapshotFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            dir: root.into().join(SNAPSHOTS_DIR),
        }
    }

    pub fn path_for(&self, id: &SnapshotId) -> PathBuf {
        self.dir.join(format!("{}.json", id.as_str()))
    }

    /// Write a snapshot file
    ///
    /// # Errors
    ///
    /// Returns `Serialization` or `Io` on failure.
    pub fn persist(&self, snapshot: &BackupSnapshot) -> Result<PathBuf> {
        let path = self.path_for(&snapshot.id);
        let content = serde_json::to_vec_pretty(snapshot)?;
        atomic_write(&path, &content)?;
        tracing::debug!(snapshot_id = %snapshot.id, "snapshot persisted");
        Ok(path)
    }

    /// Read a snapshot file without verifying its checksum
    ///
    /// # Errors
    ///
    /// Returns `SnapshotNotFound` if no file exists, `DataCorruption` if it
    /// cannot be decoded.
    pub fn load(&self, id: &SnapshotId) -> Result<BackupSnapshot> {
        let path = self.path_for(id);
        if !path.exists() {
            return Err(snapshot_missing(id.as_str()));
        }
        read_snapshot(&path)
    }

    /// Ids of all snapshot files, oldest first
    ///
    /// # Errors
    ///
    /// Returns `Io` if the directory cannot be read.
    pub fn list(&self) -> Result<Vec<SnapshotId>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(|e| io_error("read_snapshot_dir", e))? {
            let path = entry.map_err(|e| io_error("read_snapshot_dir", e))?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(SnapshotId::from_string(stem));
                }
            }
        }
        // v7 ids sort by creation time
        ids.sort();
        Ok(ids)
    }

    /// Load every snapshot file into the in-memory ring, oldest first
    ///
    /// The ring's capacity still applies, so only the newest survive.
    ///
    /// # Errors
    ///
    /// Returns the first load failure.
    pub fn load_into(&self, store: &SnapshotStore) -> Result<usize> {
        let ids = self.list()?;
        for id in &ids {
            store.import(self.load(id)?);
        }
        Ok(ids.len())
    }
}

fn read_snapshot(path: &Path) -> Result<BackupSnapshot> {
    let bytes = fs::read(path).map_err(|e| io_error("read_snapshot_file", e))?;
    serde_json::from_slice(&bytes).map_err(|e| corrupt_file(path, e))
}
