//! Repair execution
//!
//! Each repair acts on the one entity its action targets and re-checks the
//! condition first, so running an action twice is harmless.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use uuid::Uuid;

use super::checks::{cache_key_for, expected_members, listing_session};
use super::report::{IntegrityError, IntegrityErrorKind, Location, RepairAction, RepairKind};
use crate::errors::{Result, Severity};
use crate::model::state::{batch_key, session_key};
use crate::model::DocumentState;
use crate::snapshot::digest::{compute_batch_digest, compute_session_digest};
use crate::snapshot::{BackupSnapshot, SnapshotStore};

const UNKNOWN: &str = "unknown";

#[derive(Debug)]
pub(crate) struct RepairOutcome {
    pub success: bool,
    pub outcome: String,
    pub error: Option<IntegrityError>,
    /// Cache keys whose entity changed
    pub touched: BTreeSet<String>,
}

impl RepairOutcome {
    fn done(outcome: impl Into<String>, touched: impl IntoIterator<Item = String>) -> Self {
        Self {
            success: true,
            outcome: outcome.into(),
            error: None,
            touched: touched.into_iter().collect(),
        }
    }

    fn failed(outcome: impl Into<String>) -> Self {
        Self {
            success: false,
            outcome: outcome.into(),
            error: None,
            touched: BTreeSet::new(),
        }
    }

    fn gone() -> Self {
        Self::done("target no longer present", None)
    }
}

/// Run one repair; `backup` is the restore source for restore-from-backup
pub(crate) fn execute(
    action: &RepairAction,
    state: &mut DocumentState,
    backup: Option<&BackupSnapshot>,
    now: DateTime<Utc>,
) -> RepairOutcome {
    match action.kind {
        RepairKind::SanitizeData => sanitize(&action.target, state, now),
        RepairKind::RegenerateIds => regenerate_id(&action.target, state),
        RepairKind::RemoveCorrupted => remove_corrupted(&action.target, state),
        RepairKind::FixReferences => fix_reference(&action.target, state),
        RepairKind::RecreateRelationships => recreate_relationship(&action.target, state),
        RepairKind::MergeDuplicates => merge_duplicate(&action.target, state),
        RepairKind::UpdateChecksums => match update_checksum(&action.target, state) {
            Ok(outcome) => outcome,
            Err(e) => RepairOutcome::failed(format!("could not hash entity: {}", e)),
        },
        RepairKind::RestoreFromBackup => restore_from_backup(state, backup),
    }
}

/// Recompute cache entries that exist for the given keys
///
/// # Errors
///
/// Returns `Serialization` if an entity cannot be hashed.
pub(crate) fn refresh_cached(state: &mut DocumentState, keys: &BTreeSet<String>) -> Result<()> {
    for key in keys {
        if !state.checksums.contains_key(key) {
            continue;
        }
        let digest = if let Some(id) = key.strip_prefix("session:") {
            state.sessions.get(id).map(compute_session_digest).transpose()?
        } else if let Some(id) = key.strip_prefix("batch:") {
            state.batches.get(id).map(compute_batch_digest).transpose()?
        } else {
            None
        };
        match digest {
            Some(d) => {
                state.checksums.insert(key.clone(), d);
            }
            None => {
                state.checksums.remove(key);
            }
        }
    }
    Ok(())
}

fn sanitize(target: &Location, state: &mut DocumentState, now: DateTime<Utc>) -> RepairOutcome {
    let mut fixed = Vec::new();
    match target {
        Location::Session { session } => {
            let Some(s) = state.sessions.get_mut(session) else {
                return RepairOutcome::gone();
            };
            if s.id.is_empty() {
                s.id = session.clone();
                fixed.push("id");
            }
            if s.document_id.is_empty() {
                s.document_id = UNKNOWN.to_string();
                fixed.push("document_id");
            }
            if s.created_at > now {
                s.created_at = now;
                fixed.push("created_at");
            }
            if s.updated_at > now {
                s.updated_at = now;
                fixed.push("updated_at");
            }
        }
        Location::Change { session, index } => {
            let Some(c) = state
                .sessions
                .get_mut(session)
                .and_then(|s| s.changes.get_mut(*index))
            else {
                return RepairOutcome::gone();
            };
            if c.id.is_empty() {
                c.id = Uuid::now_v7().to_string();
                fixed.push("id");
            }
            if c.session_id.is_empty() {
                c.session_id = session.clone();
                fixed.push("session_id");
            }
            if c.producer.is_empty() {
                c.producer = UNKNOWN.to_string();
                fixed.push("producer");
            }
            if c.created_at > now {
                c.created_at = now;
                fixed.push("created_at");
            }
        }
        Location::Batch { group } => {
            let owner = listing_session(state, group).map(str::to_string);
            let Some(b) = state.batches.get_mut(group) else {
                return RepairOutcome::gone();
            };
            if b.group_id.is_empty() {
                b.group_id = group.clone();
                fixed.push("group_id");
            }
            if b.session_id.is_empty() {
                if let Some(owner) = owner {
                    b.session_id = owner;
                    fixed.push("session_id");
                }
            }
            if b.created_at > now {
                b.created_at = now;
                fixed.push("created_at");
            }
        }
        Location::State | Location::Snapshot { .. } => {
            return RepairOutcome::failed(format!("cannot sanitize {}", target));
        }
    }
    if fixed.is_empty() {
        return RepairOutcome::done("nothing left to sanitize", None);
    }
    RepairOutcome::done(
        format!("sanitized {}", fixed.join(", ")),
        cache_key_for(target),
    )
}

fn regenerate_id(target: &Location, state: &mut DocumentState) -> RepairOutcome {
    let (session, index) = match target {
        Location::Change { session, index } => (session, index),
        Location::Session { session } => return rekey_session(session, state),
        _ => return RepairOutcome::failed(format!("cannot regenerate id at {}", target)),
    };
    let Some(old_id) = state
        .sessions
        .get(session)
        .and_then(|s| s.changes.get(*index))
        .map(|c| c.id.clone())
    else {
        return RepairOutcome::gone();
    };

    let uses = state
        .sessions
        .values()
        .flat_map(|s| s.changes.iter())
        .filter(|c| c.id == old_id)
        .count();
    if uses < 2 {
        return RepairOutcome::done(format!("{} is already unique", old_id), None);
    }

    let new_id = Uuid::now_v7().to_string();
    let mut touched = vec![session_key(session)];
    let batch_id = match state
        .sessions
        .get_mut(session)
        .and_then(|s| s.changes.get_mut(*index))
    {
        Some(change) => {
            change.id = new_id.clone();
            change.batch_id.clone()
        }
        None => return RepairOutcome::gone(),
    };
    if let Some(batch) = batch_id.and_then(|g| state.batches.get_mut(&g)) {
        if !batch.contains(&new_id) {
            batch.change_ids.push(new_id.clone());
        }
        touched.push(batch_key(&batch.group_id));
    }
    RepairOutcome::done(format!("renamed duplicate {} to {}", old_id, new_id), touched)
}

/// Give a misfiled session the id of the key it is stored under
fn rekey_session(key: &str, state: &mut DocumentState) -> RepairOutcome {
    let taken = state
        .sessions
        .iter()
        .any(|(other, s)| other != key && s.id == key);
    let Some(session) = state.sessions.get_mut(key) else {
        return RepairOutcome::gone();
    };
    if session.id == key {
        return RepairOutcome::done(format!("{} is already unique", key), None);
    }
    if taken {
        return RepairOutcome::failed(format!("id {} is claimed by another session", key));
    }
    let old_id = std::mem::replace(&mut session.id, key.to_string());
    RepairOutcome::done(
        format!("renamed duplicate session {} to {}", old_id, key),
        vec![session_key(key)],
    )
}

fn remove_corrupted(target: &Location, state: &mut DocumentState) -> RepairOutcome {
    match target {
        Location::Session { session } => {
            let known: BTreeSet<String> = state.batches.keys().cloned().collect();
            let Some(s) = state.sessions.get_mut(session) else {
                return RepairOutcome::gone();
            };
            let before = s.batch_ids.len();
            s.batch_ids.retain(|id| known.contains(id));
            RepairOutcome::done(
                format!("dropped {} dangling batch id(s)", before - s.batch_ids.len()),
                cache_key_for(target),
            )
        }
        Location::Change { session, index } => {
            let known: BTreeSet<String> = state.batches.keys().cloned().collect();
            let Some(c) = state
                .sessions
                .get_mut(session)
                .and_then(|s| s.changes.get_mut(*index))
            else {
                return RepairOutcome::gone();
            };
            match c.batch_id.take() {
                Some(group) if !known.contains(&group) => RepairOutcome::done(
                    format!("cleared dangling batch reference {}", group),
                    cache_key_for(target),
                ),
                other => {
                    c.batch_id = other;
                    RepairOutcome::done("reference resolves", None)
                }
            }
        }
        Location::Batch { group } => {
            let orphaned = state
                .batches
                .get(group)
                .is_some_and(|b| !b.session_id.is_empty() && !state.sessions.contains_key(&b.session_id));
            if !orphaned {
                return RepairOutcome::done("batch has an owner", None);
            }
            state.batches.remove(group);
            state.checksums.remove(&batch_key(group));
            RepairOutcome::done(format!("removed orphaned batch {}", group), None)
        }
        Location::State | Location::Snapshot { .. } => {
            RepairOutcome::failed(format!("cannot remove {}", target))
        }
    }
}

fn fix_reference(target: &Location, state: &mut DocumentState) -> RepairOutcome {
    match target {
        Location::Change { session, index } => {
            let Some(c) = state
                .sessions
                .get_mut(session)
                .and_then(|s| s.changes.get_mut(*index))
            else {
                return RepairOutcome::gone();
            };
            c.session_id = session.clone();
            RepairOutcome::done(
                format!("pointed change {} at {}", c.id, session),
                cache_key_for(target),
            )
        }
        Location::Batch { group } => {
            let Some(owner) = listing_session(state, group).map(str::to_string) else {
                return RepairOutcome::failed(format!("no session lists batch {}", group));
            };
            let Some(b) = state.batches.get_mut(group) else {
                return RepairOutcome::gone();
            };
            b.session_id = owner.clone();
            RepairOutcome::done(
                format!("pointed batch {} at {}", group, owner),
                cache_key_for(target),
            )
        }
        _ => RepairOutcome::failed(format!("cannot fix references at {}", target)),
    }
}

fn recreate_relationship(target: &Location, state: &mut DocumentState) -> RepairOutcome {
    let Location::Batch { group } = target else {
        return RepairOutcome::failed(format!("cannot rebuild membership at {}", target));
    };
    let Some(expected) = expected_members(state, group) else {
        return RepairOutcome::gone();
    };
    let Some(b) = state.batches.get_mut(group) else {
        return RepairOutcome::gone();
    };
    b.change_ids = expected;
    RepairOutcome::done(
        format!("rebuilt membership of {} ({} change(s))", group, b.change_ids.len()),
        cache_key_for(target),
    )
}

fn merge_duplicate(target: &Location, state: &mut DocumentState) -> RepairOutcome {
    let Location::Batch { group } = target else {
        return RepairOutcome::failed(format!("cannot merge at {}", target));
    };
    let Some(dup) = state.batches.get(group) else {
        return RepairOutcome::gone();
    };
    let members: BTreeSet<&String> = dup.change_ids.iter().collect();
    let keep = state
        .batches
        .iter()
        .find(|(key, b)| {
            *key != group
                && b.session_id == dup.session_id
                && b.producer == dup.producer
                && b.change_ids.iter().collect::<BTreeSet<_>>() == members
        })
        .map(|(key, _)| key.clone());
    let Some(keep) = keep else {
        return RepairOutcome::done("no duplicate remains", None);
    };
    let owner = dup.session_id.clone();

    state.batches.remove(group);
    state.checksums.remove(&batch_key(group));
    if let Some(session) = state.sessions.get_mut(&owner) {
        session.batch_ids.retain(|id| id != group);
        for change in &mut session.changes {
            if change.batch_id.as_deref() == Some(group.as_str()) {
                change.batch_id = Some(keep.clone());
            }
        }
    }
    RepairOutcome::done(
        format!("merged {} into {}", group, keep),
        [session_key(&owner), batch_key(&keep)],
    )
}

fn update_checksum(target: &Location, state: &mut DocumentState) -> Result<RepairOutcome> {
    let (key, digest) = match target {
        Location::Session { session } => match state.sessions.get(session) {
            Some(s) => (session_key(session), compute_session_digest(s)?),
            None => return Ok(RepairOutcome::gone()),
        },
        Location::Batch { group } => match state.batches.get(group) {
            Some(b) => (batch_key(group), compute_batch_digest(b)?),
            None => return Ok(RepairOutcome::gone()),
        },
        _ => {
            return Ok(RepairOutcome::failed(format!(
                "no checksum kept for {}",
                target
            )))
        }
    };
    state.checksums.insert(key.clone(), digest);
    Ok(RepairOutcome::done(format!("recomputed {}", key), None))
}

fn restore_from_backup(state: &mut DocumentState, backup: Option<&BackupSnapshot>) -> RepairOutcome {
    let Some(snapshot) = backup else {
        return RepairOutcome::failed("no restorable snapshot available");
    };
    match SnapshotStore::apply(snapshot, state) {
        Ok(()) => RepairOutcome::done(format!("restored snapshot {}", snapshot.id), None),
        Err(e) => RepairOutcome {
            success: false,
            outcome: format!("snapshot {} refused", snapshot.id),
            error: Some(
                IntegrityError::new(
                    IntegrityErrorKind::ChecksumMismatch,
                    Location::Snapshot {
                        id: snapshot.id.to_string(),
                    },
                    e.to_string(),
                    vec![snapshot.id.to_string()],
                )
                .with_severity(Severity::Critical),
            ),
            touched: BTreeSet::new(),
        },
    }
}
