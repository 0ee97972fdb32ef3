//! Configuration for the synchronous kernel components
//!
//! All sections deserialize with `#[serde(default)]`, so a partial TOML file
//! only overrides what it names. Loading from disk lives in the engine crate.

use serde::{Deserialize, Serialize};

use crate::retention::RetentionPolicy;

/// Transaction Manager settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    /// How long a committed or rolled-back transaction stays queryable
    pub retention_secs: u64,
    /// Per-session rollback audit log limits
    pub rollback_log: RetentionPolicy,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            retention_secs: 300,
            rollback_log: RetentionPolicy::new(100, Some(24 * 60 * 60)),
        }
    }
}

/// Snapshot ring settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub capacity: usize,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self { capacity: 10 }
    }
}

/// Error log settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorLogConfig {
    pub retention: RetentionPolicy,
}

impl Default for ErrorLogConfig {
    fn default() -> Self {
        Self {
            retention: RetentionPolicy::new(1000, Some(60 * 60)),
        }
    }
}

/// Integrity verification settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrityConfig {
    /// Creation timestamps may lead the clock by this much before being flagged
    pub clock_skew_secs: u64,
    /// Relative tolerance when comparing stored and recomputed counts
    pub count_tolerance: f64,
    /// Lower-cased substrings reported by the deep content scan
    pub suspicious_patterns: Vec<String>,
    /// Limits for the pass/repair audit trail
    pub audit_log: RetentionPolicy,
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        Self {
            clock_skew_secs: 300,
            count_tolerance: 0.10,
            suspicious_patterns: [
                "<script",
                "javascript:",
                "onerror=",
                "onload=",
                "data:text/html",
                "${",
                "{{",
                "; drop table",
            ]
            .iter()
            .map(|p| p.to_string())
            .collect(),
            audit_log: RetentionPolicy::new(500, Some(24 * 60 * 60)),
        }
    }
}
