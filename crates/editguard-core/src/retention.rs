//! Bounded, time-windowed retention log
//!
//! One eviction policy shared by the error log, the snapshot ring, the
//! rollback audit log and the committed-transaction audit window: entries are
//! dropped oldest-first once `max_entries` is exceeded, and any entry older
//! than `max_age` is dropped on the next push or explicit sweep.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

// ~100 years; keeps chrono arithmetic in range.
const MAX_WINDOW_SECS: i64 = 100 * 365 * 24 * 60 * 60;

/// Count and age limits for a retention log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub max_entries: usize,
    /// Maximum age in seconds; `None` keeps entries until evicted by count
    pub max_age_secs: Option<u64>,
}

impl RetentionPolicy {
    pub fn new(max_entries: usize, max_age_secs: Option<u64>) -> Self {
        Self {
            max_entries,
            max_age_secs,
        }
    }

    /// Count-only policy (the snapshot ring)
    pub fn count_only(max_entries: usize) -> Self {
        Self::new(max_entries, None)
    }

    fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let secs = i64::try_from(self.max_age_secs?)
            .unwrap_or(MAX_WINDOW_SECS)
            .min(MAX_WINDOW_SECS);
        now.checked_sub_signed(Duration::seconds(secs))
    }
}

/// Ring buffer of timestamped entries
#[derive(Debug, Clone)]
pub struct RetentionLog<T> {
    policy: RetentionPolicy,
    entries: VecDeque<(DateTime<Utc>, T)>,
}

impl<T> RetentionLog<T> {
    pub fn new(policy: RetentionPolicy) -> Self {
        Self {
            policy,
            entries: VecDeque::new(),
        }
    }

    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    /// Append an entry, returning whatever was evicted to make room
    pub fn push(&mut self, at: DateTime<Utc>, entry: T) -> Vec<T> {
        let mut evicted = self.evict_expired(at);
        self.entries.push_back((at, entry));
        while self.entries.len() > self.policy.max_entries {
            if let Some((_, old)) = self.entries.pop_front() {
                evicted.push(old);
            }
        }
        evicted
    }

    /// Drop entries older than the age window
    pub fn evict_expired(&mut self, now: DateTime<Utc>) -> Vec<T> {
        let mut evicted = Vec::new();
        if let Some(cutoff) = self.policy.cutoff(now) {
            while matches!(self.entries.front(), Some((at, _)) if *at < cutoff) {
                if let Some((_, old)) = self.entries.pop_front() {
                    evicted.push(old);
                }
            }
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate oldest first
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        self.entries.iter().map(|(_, e)| e)
    }

    /// Iterate with insertion timestamps, oldest first
    pub fn iter_timed(&self) -> impl DoubleEndedIterator<Item = (&DateTime<Utc>, &T)> {
        self.entries.iter().map(|(at, e)| (at, e))
    }

    pub fn latest(&self) -> Option<&T> {
        self.entries.back().map(|(_, e)| e)
    }

    /// Find the first entry matching a predicate
    pub fn find<F>(&self, predicate: F) -> Option<&T>
    where
        F: Fn(&T) -> bool,
    {
        self.iter().find(|e| predicate(e))
    }

    /// Newest entry matching a predicate, mutably
    pub fn find_latest_mut<F>(&mut self, predicate: F) -> Option<&mut T>
    where
        F: Fn(&T) -> bool,
    {
        self.entries
            .iter_mut()
            .rev()
            .map(|(_, e)| e)
            .find(|e| predicate(e))
    }

    /// Remove every entry matching a predicate
    pub fn remove_where<F>(&mut self, predicate: F) -> usize
    where
        F: Fn(&T) -> bool,
    {
        let before = self.entries.len();
        self.entries.retain(|(_, e)| !predicate(e));
        before - self.entries.len()
    }
}
