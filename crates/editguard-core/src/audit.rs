//! Exportable audit records
//!
//! One entry per rollback step and per integrity pass, in a flat shape that
//! external tooling can consume as line-delimited JSON without transformation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{Result, Severity};

/// Stable audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub kind: String,
    pub severity: Severity,
    pub location: String,
    pub description: String,
}

impl AuditEntry {
    pub fn new(
        timestamp: DateTime<Utc>,
        kind: impl Into<String>,
        severity: Severity,
        location: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            kind: kind.into(),
            severity,
            location: location.into(),
            description: description.into(),
        }
    }

    /// Serialize as a single JSON line (no trailing newline)
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if JSON encoding fails.
    pub fn to_json_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
