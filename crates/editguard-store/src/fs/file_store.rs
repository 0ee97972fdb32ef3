//! Per-session state files
//!
//! Each file holds the scope of one session: the session, the batches it
//! owns and their cached checksums. Writing a session never touches
//! another session's file.

use crate::errors::{corrupt_file, io_error, Result};
use crate::fs::atomic::atomic_write;
use editguard_core::model::DocumentState;
use std::fs;
use std::path::{Path, PathBuf};

const SESSIONS_DIR: &str = "sessions";

/// Filesystem-backed state store
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Create a store rooted at the given directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the file holding one session's scope
    pub fn session_path(&self, session_id: &str) -> PathBuf {
        self.root
            .join(SESSIONS_DIR)
            .join(format!("{}.json", hex::encode(session_id)))
    }

    /// Persist the current scope of a session
    ///
    /// A session that no longer exists in `state` (and owns no batches) has
    /// its file removed, so a rolled-back creation leaves nothing behind.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` or `Io` on failure.
    pub fn save_session(&self, state: &DocumentState, session_id: &str) -> Result<()> {
        let scoped = state.scope(session_id);
        if scoped.sessions.is_empty() && scoped.batches.is_empty() {
            return self.remove_session(session_id);
        }

        let content = serde_json::to_vec_pretty(&scoped)?;
        atomic_write(&self.session_path(session_id), &content)?;

        tracing::debug!(
            session_id = session_id,
            batches = scoped.batches.len(),
            "session persisted"
        );
        Ok(())
    }

    /// Load one session's scope, if a file exists for it
    ///
    /// # Errors
    ///
    /// Returns `DataCorruption` if the file cannot be decoded, or `Io`.
    pub fn load_session(&self, session_id: &str) -> Result<Option<DocumentState>> {
        let path = self.session_path(session_id);
        if !path.exists() {
            return Ok(None);
        }
        read_scope(&path).map(Some)
    }

    /// Remove a session's file; removing a missing file is not an error
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file exists but cannot be removed.
    pub fn remove_session(&self, session_id: &str) -> Result<()> {
        let path = self.session_path(session_id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error("remove_session_file", e)),
        }
    }

    /// Persist every session in the state
    ///
    /// # Errors
    ///
    /// Returns the first write failure.
    pub fn save_all(&self, state: &DocumentState) -> Result<()> {
        for session_id in state.sessions.keys() {
            self.save_session(state, session_id)?;
        }
        Ok(())
    }

    /// Load and merge every session file under the root
    ///
    /// A missing root yields an empty state.
    ///
    /// # Errors
    ///
    /// Returns `DataCorruption` naming the first undecodable file, or `Io`.
    pub fn load_all(&self) -> Result<DocumentState> {
        let dir = self.root.join(SESSIONS_DIR);
        let mut state = DocumentState::new();
        if !dir.exists() {
            return Ok(state);
        }

        let mut paths = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|e| io_error("read_sessions_dir", e))? {
            let entry = entry.map_err(|e| io_error("read_sessions_dir", e))?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();

        for path in paths {
            let scoped = read_scope(&path)?;
            state.sessions.extend(scoped.sessions);
            state.batches.extend(scoped.batches);
            state.checksums.extend(scoped.checksums);
        }

        tracing::debug!(sessions = state.sessions.len(), "state loaded");
        Ok(state)
    }
}

fn read_scope(path: &Path) -> Result<DocumentState> {
    let bytes = fs::read(path).map_err(|e| io_error("read_session_file", e))?;
    serde_json::from_slice(&bytes).map_err(|e| corrupt_file(path, e))
}
