//! Integrity checks
//!
//! Each `find_*` function is pure and returns findings in a deterministic
//! order (map key order, then change position), so two passes over the same
//! state produce identical lists.

use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeSet, HashMap, HashSet};

use super::report::{IntegrityError, IntegrityErrorKind, IntegrityWarning, Location, WarningKind};
use crate::config::IntegrityConfig;
use crate::errors::Result;
use crate::model::state::{batch_key, session_key};
use crate::model::{text_counts, DocumentState};
use crate::snapshot::digest::{compute_batch_digest, compute_session_digest};

fn change_loc(session: &str, index: usize) -> Location {
    Location::Change {
        session: session.to_string(),
        index,
    }
}

fn session_loc(session: &str) -> Location {
    Location::Session {
        session: session.to_string(),
    }
}

fn batch_loc(group: &str) -> Location {
    Location::Batch {
        group: group.to_string(),
    }
}

/// Required fields that are empty
pub fn find_missing_fields(state: &DocumentState) -> Vec<IntegrityError> {
    let mut found = Vec::new();
    let missing = |loc: Location, fields: Vec<&str>, id: &str| {
        IntegrityError::new(
            IntegrityErrorKind::MissingField,
            loc,
            format!("missing required field(s): {}", fields.join(", ")),
            vec![id.to_string()],
        )
    };

    for (key, session) in &state.sessions {
        let mut fields = Vec::new();
        if session.id.is_empty() {
            fields.push("id");
        }
        if session.document_id.is_empty() {
            fields.push("document_id");
        }
        if !fields.is_empty() {
            found.push(missing(session_loc(key), fields, key));
        }

        for (index, change) in session.changes.iter().enumerate() {
            let mut fields = Vec::new();
            if change.id.is_empty() {
                fields.push("id");
            }
            if change.session_id.is_empty() {
                fields.push("session_id");
            }
            if change.producer.is_empty() {
                fields.push("producer");
            }
            if !fields.is_empty() {
                found.push(missing(change_loc(key, index), fields, &change.id));
            }
        }
    }

    for (key, batch) in &state.batches {
        let mut fields = Vec::new();
        if batch.group_id.is_empty() {
            fields.push("group_id");
        }
        if batch.session_id.is_empty() {
            fields.push("session_id");
        }
        if !fields.is_empty() {
            found.push(missing(batch_loc(key), fields, key));
        }
    }
    found
}

/// Map entries whose record id disagrees with the key they are stored under
pub fn find_index_corruption(state: &DocumentState) -> Vec<IntegrityError> {
    let mut found = Vec::new();
    for (key, session) in &state.sessions {
        if !session.id.is_empty() && session.id != *key {
            found.push(IntegrityError::new(
                IntegrityErrorKind::CorruptedData,
                session_loc(key),
                format!("session stored under {} claims id {}", key, session.id),
                vec![key.clone(), session.id.clone()],
            ));
        }
    }
    for (key, batch) in &state.batches {
        if !batch.group_id.is_empty() && batch.group_id != *key {
            found.push(IntegrityError::new(
                IntegrityErrorKind::CorruptedData,
                batch_loc(key),
                format!("batch stored under {} claims id {}", key, batch.group_id),
                vec![key.clone(), batch.group_id.clone()],
            ));
        }
    }
    found
}

/// Session and change ids used more than once across the whole state
///
/// A session's map key is its canonical id. A session stored under another
/// key that claims an id already held (as a key, or by an earlier such
/// session) is a duplicate; it is also reported by [`find_index_corruption`].
/// For changes, the first occurrence is kept as canonical and each later one
/// is a finding.
pub fn find_duplicate_ids(state: &DocumentState) -> Vec<IntegrityError> {
    let mut found = Vec::new();
    let keys: HashSet<&str> = state.sessions.keys().map(String::as_str).collect();
    let mut claimed: HashSet<&str> = HashSet::new();
    for (key, session) in &state.sessions {
        if session.id.is_empty() || session.id == *key {
            continue;
        }
        if keys.contains(session.id.as_str()) || !claimed.insert(session.id.as_str()) {
            found.push(IntegrityError::new(
                IntegrityErrorKind::DuplicateId,
                session_loc(key),
                format!("session stored under {} repeats id {}", key, session.id),
                vec![key.clone(), session.id.clone()],
            ));
        }
    }

    let mut first_seen: HashMap<&str, Location> = HashMap::new();
    for (key, session) in &state.sessions {
        for (index, change) in session.changes.iter().enumerate() {
            if change.id.is_empty() {
                continue;
            }
            match first_seen.get(change.id.as_str()) {
                Some(first) => found.push(IntegrityError::new(
                    IntegrityErrorKind::DuplicateId,
                    change_loc(key, index),
                    format!("change id {} already used at {}", change.id, first),
                    vec![change.id.clone()],
                )),
                None => {
                    first_seen.insert(change.id.as_str(), change_loc(key, index));
                }
            }
        }
    }
    found
}

/// References that resolve to nothing
pub fn find_orphaned_data(state: &DocumentState) -> Vec<IntegrityError> {
    let mut found = Vec::new();
    for (key, session) in &state.sessions {
        let dangling: Vec<String> = session
            .batch_ids
            .iter()
            .filter(|id| !state.batches.contains_key(*id))
            .cloned()
            .collect();
        if !dangling.is_empty() {
            found.push(IntegrityError::new(
                IntegrityErrorKind::OrphanedData,
                session_loc(key),
                format!("session lists {} unknown batch(es)", dangling.len()),
                dangling,
            ));
        }

        for (index, change) in session.changes.iter().enumerate() {
            if let Some(group) = &change.batch_id {
                if !state.batches.contains_key(group) {
                    found.push(IntegrityError::new(
                        IntegrityErrorKind::OrphanedData,
                        change_loc(key, index),
                        format!("change {} references unknown batch {}", change.id, group),
                        vec![change.id.clone(), group.clone()],
                    ));
                }
            }
        }
    }

    for (key, batch) in &state.batches {
        if !batch.session_id.is_empty() && !state.sessions.contains_key(&batch.session_id) {
            found.push(IntegrityError::new(
                IntegrityErrorKind::OrphanedData,
                batch_loc(key),
                format!("batch belongs to unknown session {}", batch.session_id),
                vec![key.clone(), batch.session_id.clone()],
            ));
        }
    }
    found
}

/// Back-references that point at the wrong owner
pub fn find_broken_references(state: &DocumentState) -> Vec<IntegrityError> {
    let mut found = Vec::new();
    for (key, session) in &state.sessions {
        for (index, change) in session.changes.iter().enumerate() {
            if !change.session_id.is_empty() && change.session_id != *key {
                found.push(IntegrityError::new(
                    IntegrityErrorKind::BrokenReference,
                    change_loc(key, index),
                    format!(
                        "change {} is held by {} but points at {}",
                        change.id, key, change.session_id
                    ),
                    vec![change.id.clone()],
                ));
            }
        }
    }

    for (key, batch) in &state.batches {
        if batch.session_id.is_empty() || !state.sessions.contains_key(&batch.session_id) {
            continue;
        }
        if let Some(lister) = listing_session(state, key) {
            if lister != batch.session_id {
                found.push(IntegrityError::new(
                    IntegrityErrorKind::BrokenReference,
                    batch_loc(key),
                    format!(
                        "batch is listed by {} but points at {}",
                        lister, batch.session_id
                    ),
                    vec![key.clone()],
                ));
            }
        }
    }
    found
}

/// First session (in key order) listing `group` in its batch ids
pub(crate) fn listing_session<'a>(state: &'a DocumentState, group: &str) -> Option<&'a str> {
    state
        .sessions
        .iter()
        .find(|(_, s)| s.batch_ids.iter().any(|id| id == group))
        .map(|(key, _)| key.as_str())
}

/// Member ids a batch should hold, derived from its owner's changes
pub(crate) fn expected_members(state: &DocumentState, group: &str) -> Option<Vec<String>> {
    let batch = state.batches.get(group)?;
    let owner = state.sessions.get(&batch.session_id)?;
    Some(
        owner
            .changes
            .iter()
            .filter(|c| c.batch_id.as_deref() == Some(group) && !c.id.is_empty())
            .map(|c| c.id.clone())
            .collect(),
    )
}

/// Batches whose member list disagrees with their changes' back-references
pub fn find_stale_relationships(state: &DocumentState) -> Vec<IntegrityError> {
    let mut found = Vec::new();
    for (key, batch) in &state.batches {
        let Some(expected) = expected_members(state, key) else {
            continue;
        };
        let expected: BTreeSet<&String> = expected.iter().collect();
        let actual: BTreeSet<&String> = batch.change_ids.iter().collect();
        if expected != actual {
            let mut affected: Vec<String> = expected
                .symmetric_difference(&actual)
                .map(|id| (*id).clone())
                .collect();
            affected.sort();
            found.push(IntegrityError::new(
                IntegrityErrorKind::StaleRelationship,
                batch_loc(key),
                format!("batch membership out of date for {} change(s)", affected.len()),
                affected,
            ));
        }
    }
    found
}

/// Batches with the same owner, producer and member set as an earlier one
pub fn find_duplicate_batches(state: &DocumentState) -> Vec<IntegrityError> {
    let mut seen: HashMap<(&str, &str, BTreeSet<&str>), &str> = HashMap::new();
    let mut found = Vec::new();
    for (key, batch) in &state.batches {
        if batch.change_ids.is_empty() {
            continue;
        }
        let signature = (
            batch.session_id.as_str(),
            batch.producer.as_str(),
            batch.change_ids.iter().map(String::as_str).collect(),
        );
        match seen.get(&signature) {
            Some(first) => found.push(IntegrityError::new(
                IntegrityErrorKind::DuplicateBatch,
                batch_loc(key),
                format!("batch duplicates {}", first),
                vec![(*first).to_string(), key.clone()],
            )),
            None => {
                seen.insert(signature, key.as_str());
            }
        }
    }
    found
}

/// Creation or update timestamps beyond the clock-skew tolerance
pub fn find_future_timestamps(
    state: &DocumentState,
    now: DateTime<Utc>,
    config: &IntegrityConfig,
) -> Vec<IntegrityError> {
    let skew = Duration::seconds(
        i64::try_from(config.clock_skew_secs)
            .unwrap_or(i64::MAX)
            .min(i64::MAX / 1000),
    );
    let limit = now.checked_add_signed(skew).unwrap_or(now);
    let future = |loc: Location, what: &str, at: DateTime<Utc>, id: &str| {
        IntegrityError::new(
            IntegrityErrorKind::FutureTimestamp,
            loc,
            format!("{} {} is in the future", what, at.to_rfc3339()),
            vec![id.to_string()],
        )
    };

    let mut found = Vec::new();
    for (key, session) in &state.sessions {
        let newest = session.created_at.max(session.updated_at);
        if newest > limit {
            found.push(future(session_loc(key), "session timestamp", newest, key));
        }
        for (index, change) in session.changes.iter().enumerate() {
            if change.created_at > limit {
                found.push(future(
                    change_loc(key, index),
                    "change created_at",
                    change.created_at,
                    &change.id,
                ));
            }
        }
    }
    for (key, batch) in &state.batches {
        if batch.created_at > limit {
            found.push(future(batch_loc(key), "batch created_at", batch.created_at, key));
        }
    }
    found
}

/// Cached digests that no longer match their entity
///
/// Returns the findings, stale-entry warnings and the number of entries compared.
///
/// # Errors
///
/// Returns `Serialization` if an entity cannot be hashed.
pub fn find_checksum_mismatches(
    state: &DocumentState,
) -> Result<(Vec<IntegrityError>, Vec<IntegrityWarning>, usize)> {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let mut compared = 0;

    for (cache_key, expected) in &state.checksums {
        let (actual, location) = if let Some(id) = cache_key.strip_prefix("session:") {
            match state.sessions.get(id) {
                Some(session) => (compute_session_digest(session)?, session_loc(id)),
                None => {
                    warnings.push(stale_entry(cache_key));
                    continue;
                }
            }
        } else if let Some(id) = cache_key.strip_prefix("batch:") {
            match state.batches.get(id) {
                Some(batch) => (compute_batch_digest(batch)?, batch_loc(id)),
                None => {
                    warnings.push(stale_entry(cache_key));
                    continue;
                }
            }
        } else {
            warnings.push(stale_entry(cache_key));
            continue;
        };

        compared += 1;
        if actual != *expected {
            errors.push(IntegrityError::new(
                IntegrityErrorKind::ChecksumMismatch,
                location,
                format!("{} digest {} does not match cached {}", cache_key, actual, expected),
                vec![cache_key.clone()],
            ));
        }
    }
    Ok((errors, warnings, compared))
}

fn stale_entry(cache_key: &str) -> IntegrityWarning {
    IntegrityWarning {
        kind: WarningKind::StaleChecksumEntry,
        location: Location::State,
        description: format!("checksum cached for missing entity {}", cache_key),
    }
}

/// Stored word/char counts outside the tolerance band
///
/// Reported as warnings only.
pub fn find_count_mismatches(state: &DocumentState, tolerance: f64) -> Vec<IntegrityWarning> {
    let outside = |stored: usize, actual: usize| {
        let diff = stored.abs_diff(actual) as f64;
        diff > tolerance * (actual.max(1) as f64)
    };

    let mut found = Vec::new();
    for (key, session) in &state.sessions {
        for (index, change) in session.changes.iter().enumerate() {
            let (words, chars) = text_counts(&change.proposed_text);
            if outside(change.word_count, words) || outside(change.char_count, chars) {
                found.push(IntegrityWarning {
                    kind: WarningKind::CountMismatch,
                    location: change_loc(key, index),
                    description: format!(
                        "stored counts {}w/{}c, recomputed {}w/{}c",
                        change.word_count, change.char_count, words, chars
                    ),
                });
            }
        }
    }
    found
}

/// Injection-like content; never mutates anything
pub fn find_suspicious_content(
    state: &DocumentState,
    config: &IntegrityConfig,
) -> Vec<IntegrityWarning> {
    let mut found = Vec::new();
    for (key, session) in &state.sessions {
        for (index, change) in session.changes.iter().enumerate() {
            let lowered = change.proposed_text.to_lowercase();
            if let Some(pattern) = config
                .suspicious_patterns
                .iter()
                .find(|p| lowered.contains(p.as_str()))
            {
                found.push(IntegrityWarning {
                    kind: WarningKind::SuspiciousContent,
                    location: change_loc(key, index),
                    description: format!("proposed text contains {:?}", pattern),
                });
            }
        }
    }
    found
}

/// Cache keys for the entity at a location, if it has one
pub(crate) fn cache_key_for(location: &Location) -> Option<String> {
    match location {
        Location::Session { session } | Location::Change { session, .. } => {
            Some(session_key(session))
        }
        Location::Batch { group } => Some(batch_key(group)),
        Location::State | Location::Snapshot { .. } => None,
    }
}
