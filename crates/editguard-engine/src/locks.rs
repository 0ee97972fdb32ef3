//! Per-session exclusive locks
//!
//! Transactions on different sessions run concurrently; transactions on the
//! same session are serialized for the full apply-and-rollback span.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

pub type SessionGuard = OwnedMutexGuard<()>;

#[derive(Default)]
pub struct SessionLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to one session
    pub async fn acquire(&self, session_id: &str) -> SessionGuard {
        let lock = self.entry(session_id);
        lock.lock_owned().await
    }

    /// Take exclusive access to several sessions
    ///
    /// Locks are taken in sorted order so two multi-session callers cannot
    /// deadlock each other.
    pub async fn acquire_all(&self, session_ids: &[String]) -> Vec<SessionGuard> {
        let mut ids: Vec<&String> = session_ids.iter().collect();
        ids.sort();
        ids.dedup();
        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            guards.push(self.acquire(id).await);
        }
        guards
    }

    /// Whether someone currently holds the session's lock
    pub fn is_locked(&self, session_id: &str) -> bool {
        self.lock_map()
            .get(session_id)
            .is_some_and(|l| l.try_lock().is_err())
    }

    /// Forget locks nobody holds or waits on
    pub fn prune_idle(&self) -> usize {
        let mut map = self.lock_map();
        let before = map.len();
        map.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - map.len()
    }

    pub fn len(&self) -> usize {
        self.lock_map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_map().is_empty()
    }

    fn entry(&self, session_id: &str) -> Arc<AsyncMutex<()>> {
        self.lock_map()
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    fn lock_map(&self) -> MutexGuard<'_, HashMap<String, Arc<AsyncMutex<()>>>> {
        self.locks.lock().unwrap_or_else(|e| e.into_inner())
    }
}
