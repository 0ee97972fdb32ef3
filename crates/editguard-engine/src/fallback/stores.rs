//! Holding areas used by the cache-locally and memory-resident fallbacks

use chrono::{DateTime, Utc};
use editguard_core::errors::ErrorKind;
use editguard_core::model::ChangeSubmission;
use editguard_core::retention::{RetentionLog, RetentionPolicy};
use editguard_core_types::SubmissionId;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

/// A submission parked for later replay
#[derive(Debug, Clone, PartialEq)]
pub struct CachedSubmission {
    pub submission: ChangeSubmission,
    /// Failure that sent it here
    pub cause: ErrorKind,
    pub cached_at: DateTime<Utc>,
}

/// Bounded local cache of submissions that could not be delivered
///
/// Oldest entries are dropped once the capacity is reached.
pub struct LocalCache {
    entries: Mutex<RetentionLog<CachedSubmission>>,
}

impl LocalCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(RetentionLog::new(RetentionPolicy::count_only(capacity))),
        }
    }

    /// Park a submission; re-caching the same submission replaces it
    ///
    /// Returns how many older entries were evicted to make room.
    pub fn store(&self, submission: ChangeSubmission, cause: ErrorKind, at: DateTime<Utc>) -> usize {
        let mut entries = self.lock();
        entries.remove_where(|c| c.submission.id == submission.id);
        let evicted = entries.push(
            at,
            CachedSubmission {
                submission,
                cause,
                cached_at: at,
            },
        );
        if !evicted.is_empty() {
            tracing::warn!(evicted = evicted.len(), "local cache full, oldest submissions dropped");
        }
        evicted.len()
    }

    pub fn contains(&self, id: &SubmissionId) -> bool {
        self.lock().find(|c| &c.submission.id == id).is_some()
    }

    /// Cached submissions, oldest first
    pub fn list(&self) -> Vec<CachedSubmission> {
        self.lock().iter().cloned().collect()
    }

    /// Remove and return everything, oldest first
    pub fn drain(&self) -> Vec<CachedSubmission> {
        let mut entries = self.lock();
        let all: Vec<CachedSubmission> = entries.iter().cloned().collect();
        entries.remove_where(|_| true);
        all
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, RetentionLog<CachedSubmission>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Sessions whose latest state lives only in memory
///
/// Anything tracked here is lost on process restart until a later flush
/// persists it.
#[derive(Default)]
pub struct MemoryStore {
    sessions: Mutex<BTreeMap<String, BTreeSet<SubmissionId>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always true: contents do not survive a restart
    pub fn is_lossy(&self) -> bool {
        true
    }

    pub fn mark(&self, session_id: &str, submission_id: SubmissionId) {
        self.lock()
            .entry(session_id.to_string())
            .or_default()
            .insert(submission_id);
    }

    /// Sessions with unpersisted state
    pub fn sessions(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn submissions_for(&self, session_id: &str) -> Vec<SubmissionId> {
        self.lock()
            .get(session_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Forget a session once its state has been persisted
    pub fn clear(&self, session_id: &str) -> bool {
        self.lock().remove(session_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, BTreeSet<SubmissionId>>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }
}
