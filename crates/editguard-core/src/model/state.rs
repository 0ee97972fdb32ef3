use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::batch::Batch;
use super::session::Session;
use crate::errors::{EditGuardError, Result};
use crate::snapshot::digest::{compute_batch_digest, compute_session_digest};

/// Cache key for a session's checksum
pub fn session_key(session_id: &str) -> String {
    format!("session:{}", session_id)
}

/// Cache key for a batch's checksum
pub fn batch_key(group_id: &str) -> String {
    format!("batch:{}", group_id)
}

/// DocumentState - the persisted session map plus batch index
///
/// Fields are public so integrity checks and repairs can inspect raw,
/// possibly inconsistent, content. Ordinary mutation goes through the
/// Transaction Manager.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentState {
    /// Session id to session
    pub sessions: BTreeMap<String, Session>,
    /// Group id to batch
    pub batches: BTreeMap<String, Batch>,
    /// Cached per-entity digests keyed by `session:<id>` / `batch:<id>`
    #[serde(default)]
    pub checksums: BTreeMap<String, String>,
}

impl DocumentState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a session under its own id
    pub fn insert_session(&mut self, session: Session) -> Option<Session> {
        self.sessions.insert(session.id.clone(), session)
    }

    /// Get a session by ID
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound` if no such session exists.
    pub fn session(&self, id: &str) -> Result<&Session> {
        self.sessions
            .get(id)
            .ok_or_else(|| EditGuardError::SessionNotFound {
                session_id: id.to_string(),
            })
    }

    /// Get a mutable session by ID
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound` if no such session exists.
    pub fn session_mut(&mut self, id: &str) -> Result<&mut Session> {
        self.sessions
            .get_mut(id)
            .ok_or_else(|| EditGuardError::SessionNotFound {
                session_id: id.to_string(),
            })
    }

    /// Get a batch by group ID
    ///
    /// # Errors
    ///
    /// Returns `BatchNotFound` if no such batch exists.
    pub fn batch(&self, group_id: &str) -> Result<&Batch> {
        self.batches
            .get(group_id)
            .ok_or_else(|| EditGuardError::BatchNotFound {
                group_id: group_id.to_string(),
            })
    }

    /// Batches owned by a session, either by back-reference or by listing
    pub fn batches_for<'a>(&'a self, session_id: &'a str) -> impl Iterator<Item = &'a Batch> + 'a {
        let listed = self.sessions.get(session_id).map(|s| &s.batch_ids);
        self.batches.values().filter(move |b| {
            b.session_id == session_id
                || listed.is_some_and(|ids| ids.iter().any(|id| *id == b.group_id))
        })
    }

    /// Total number of changes across all sessions
    pub fn change_count(&self) -> usize {
        self.sessions.values().map(|s| s.changes.len()).sum()
    }

    /// Copy of everything a transaction on `session_id` can touch
    pub fn scope(&self, session_id: &str) -> DocumentState {
        let mut scoped = DocumentState::new();
        if let Some(session) = self.sessions.get(session_id) {
            scoped.insert_session(session.clone());
        }
        for batch in self.batches_for(session_id) {
            scoped.batches.insert(batch.group_id.clone(), batch.clone());
        }
        for key in scoped.entity_keys() {
            if let Some(sum) = self.checksums.get(&key) {
                scoped.checksums.insert(key, sum.clone());
            }
        }
        scoped
    }

    /// Replace everything owned by `session_id` with the content of `scoped`
    ///
    /// Other sessions and their batches are left untouched.
    pub fn replace_scope(&mut self, session_id: &str, scoped: &DocumentState) {
        let current = self.scope(session_id);
        for key in current.entity_keys() {
            self.checksums.remove(&key);
        }
        for group_id in current.batches.keys() {
            self.batches.remove(group_id);
        }
        self.sessions.remove(session_id);

        for session in scoped.sessions.values() {
            self.insert_session(session.clone());
        }
        for (group_id, batch) in &scoped.batches {
            self.batches.insert(group_id.clone(), batch.clone());
        }
        for (key, sum) in &scoped.checksums {
            self.checksums.insert(key.clone(), sum.clone());
        }
    }

    /// Recompute cached digests for a session and its batches
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound` if the session is missing, or
    /// `Serialization` if hashing fails.
    pub fn refresh_checksums(&mut self, session_id: &str) -> Result<()> {
        let session_sum = compute_session_digest(self.session(session_id)?)?;
        let mut updates = vec![(session_key(session_id), session_sum)];
        for batch in self.batches_for(session_id) {
            updates.push((batch_key(&batch.group_id), compute_batch_digest(batch)?));
        }
        self.checksums.extend(updates);
        Ok(())
    }

    /// Recompute cached digests for every entity
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if hashing fails.
    pub fn refresh_all_checksums(&mut self) -> Result<()> {
        let mut fresh = BTreeMap::new();
        for (id, session) in &self.sessions {
            fresh.insert(session_key(id), compute_session_digest(session)?);
        }
        for (id, batch) in &self.batches {
            fresh.insert(batch_key(id), compute_batch_digest(batch)?);
        }
        self.checksums = fresh;
        Ok(())
    }

    fn entity_keys(&self) -> Vec<String> {
        self.sessions
            .keys()
            .map(|id| session_key(id))
            .chain(self.batches.keys().map(|id| batch_key(id)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn state_with_two_sessions() -> DocumentState {
        let now = Utc::now();
        let mut state = DocumentState::new();
        for id in ["s1", "s2"] {
            let mut session = Session::new(id, "doc", now);
            let group = format!("b-{}", id);
            session.batch_ids.push(group.clone());
            state.insert_session(session);
            state
                .batches
                .insert(group.clone(), Batch::new(group, id, "bot", vec![], now));
        }
        state
    }

    #[test]
    fn test_session_lookup_errors() {
        let state = DocumentState::new();
        assert!(matches!(
            state.session("missing"),
            Err(EditGuardError::SessionNotFound { .. })
        ));
        assert!(matches!(
            state.batch("missing"),
            Err(EditGuardError::BatchNotFound { .. })
        ));
    }

    #[test]
    fn test_scope_contains_only_owner() {
        let mut state = state_with_two_sessions();
        state.refresh_all_checksums().unwrap();

        let scoped = state.scope("s1");
        assert_eq!(scoped.sessions.len(), 1);
        assert_eq!(scoped.batches.len(), 1);
        assert_eq!(scoped.checksums.len(), 2);
        assert!(scoped.checksums.contains_key("session:s1"));
    }

    #[test]
    fn test_replace_scope_leaves_other_sessions() {
        let mut state = state_with_two_sessions();
        let before = state.scope("s1");

        state.session_mut("s1").unwrap().batch_ids.push("extra".into());
        state.session_mut("s2").unwrap().last_producer = Some("other".into());
        state.batches.insert(
            "extra".into(),
            Batch::new("extra".into(), "s1", "bot", vec![], Utc::now()),
        );

        state.replace_scope("s1", &before);
        assert_eq!(state.scope("s1"), before);
        assert!(!state.batches.contains_key("extra"));
        assert_eq!(
            state.session("s2").unwrap().last_producer.as_deref(),
            Some("other")
        );
    }

    #[test]
    fn test_refresh_checksums_covers_batches() {
        let mut state = state_with_two_sessions();
        state.refresh_checksums("s2").unwrap();
        assert!(state.checksums.contains_key("session:s2"));
        assert!(state.checksums.contains_key("batch:b-s2"));
        assert!(!state.checksums.contains_key("session:s1"));
    }
}
