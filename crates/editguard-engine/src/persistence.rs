//! Durable write seam
//!
//! The pipeline persists the owner session's scope after every applied
//! operation, after rollback and after commit.

use async_trait::async_trait;
use editguard_core::errors::{EditGuardError, Result};
use editguard_core::model::DocumentState;
use editguard_store::FileStore;
use std::collections::BTreeMap;
use std::sync::Mutex;

#[async_trait]
pub trait Persistence: Send + Sync {
    /// Persist everything `session_id` owns in `state`
    async fn persist_session(&self, state: &DocumentState, session_id: &str) -> Result<()>;
}

/// Persistence backed by per-session JSON files
pub struct FilePersistence {
    store: FileStore,
}

impl FilePersistence {
    pub fn new(store: FileStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &FileStore {
        &self.store
    }
}

#[async_trait]
impl Persistence for FilePersistence {
    async fn persist_session(&self, state: &DocumentState, session_id: &str) -> Result<()> {
        let scoped = state.scope(session_id);
        let store = self.store.clone();
        let id = session_id.to_string();
        tokio::task::spawn_blocking(move || store.save_session(&scoped, &id))
            .await
            .map_err(|e| EditGuardError::Internal {
                message: format!("persist task failed: {}", e),
            })?
    }
}

/// Keeps the last persisted scope of each session in memory
#[derive(Default)]
pub struct InMemoryPersistence {
    sessions: Mutex<BTreeMap<String, DocumentState>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last persisted scope of a session
    pub fn persisted(&self, session_id: &str) -> Option<DocumentState> {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(session_id)
            .cloned()
    }
}

#[async_trait]
impl Persistence for InMemoryPersistence {
    async fn persist_session(&self, state: &DocumentState, session_id: &str) -> Result<()> {
        let scoped = state.scope(session_id);
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        if scoped.sessions.is_empty() && scoped.batches.is_empty() {
            sessions.remove(session_id);
        } else {
            sessions.insert(session_id.to_string(), scoped);
        }
        Ok(())
    }
}
