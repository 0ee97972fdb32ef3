//! Error Classifier
//!
//! Pure mapping from a raw [`EditGuardError`] to a structured
//! [`ErrorRecord`]. Every variant is matched explicitly so adding a failure
//! mode forces a classification decision here.

use chrono::{DateTime, Utc};

use crate::errors::{EditGuardError, ErrorCategory, ErrorContext, ErrorKind, ErrorRecord, Severity};

/// The tag portion of an error record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub kind: ErrorKind,
    pub category: ErrorCategory,
    pub severity: Severity,
    pub retryable: bool,
    pub rollback_required: bool,
}

impl Classification {
    const fn new(
        kind: ErrorKind,
        category: ErrorCategory,
        severity: Severity,
        retryable: bool,
        rollback_required: bool,
    ) -> Self {
        Self {
            kind,
            category,
            severity,
            retryable,
            rollback_required,
        }
    }
}

/// Classify a raw failure without building a record
pub fn classification_of(err: &EditGuardError) -> Classification {
    use ErrorCategory::*;
    use ErrorKind as K;
    use Severity::*;

    match err {
        EditGuardError::Network { .. } | EditGuardError::Timeout { .. } => {
            Classification::new(K::Network, Transient, Medium, true, false)
        }

        // Validation: never retried, always rolled back
        EditGuardError::InvalidSubmission { .. }
        | EditGuardError::SessionNotFound { .. }
        | EditGuardError::BatchNotFound { .. } => {
            Classification::new(K::Validation, UserError, Medium, false, true)
        }

        EditGuardError::Storage { .. } | EditGuardError::Io { .. } => {
            Classification::new(K::Storage, SystemError, High, true, true)
        }
        EditGuardError::StorageQuotaExceeded { .. } => {
            Classification::new(K::Storage, Configuration, Critical, false, true)
        }
        EditGuardError::SnapshotNotFound { .. } => {
            Classification::new(K::Storage, SystemError, High, false, false)
        }

        EditGuardError::EngineUnavailable { .. } => {
            Classification::new(K::EngineUnavailable, Transient, High, true, false)
        }

        EditGuardError::Processing { .. } | EditGuardError::Serialization { .. } => {
            Classification::new(K::Processing, SystemError, Medium, false, true)
        }
        EditGuardError::DeadlineExceeded { .. } => {
            Classification::new(K::Processing, Transient, High, false, true)
        }
        EditGuardError::Configuration { .. } => {
            Classification::new(K::Processing, Configuration, High, false, false)
        }
        EditGuardError::Internal { .. } => {
            Classification::new(K::Processing, SystemError, High, false, true)
        }

        EditGuardError::BatchPartialFailure { .. } => {
            Classification::new(K::BatchOperation, SystemError, Medium, false, true)
        }

        EditGuardError::SessionClosed { .. } => {
            Classification::new(K::SessionManagement, Permanent, High, false, true)
        }
        EditGuardError::TransactionNotFound { .. } => {
            Classification::new(K::SessionManagement, SystemError, High, false, false)
        }
        EditGuardError::TransactionState { .. } => {
            Classification::new(K::SessionManagement, SystemError, Medium, false, false)
        }
        EditGuardError::Cancelled { .. } => {
            Classification::new(K::SessionManagement, UserError, Low, false, true)
        }

        EditGuardError::DataCorruption { .. } => {
            Classification::new(K::DataCorruption, SystemError, Critical, false, true)
        }
        EditGuardError::ChecksumMismatch { .. } => {
            Classification::new(K::DataCorruption, SystemError, High, false, true)
        }
        EditGuardError::BackupRequired { .. } => {
            Classification::new(K::DataCorruption, Configuration, High, false, false)
        }

        EditGuardError::RateLimited { .. } => {
            Classification::new(K::RateLimiting, Transient, Low, true, false)
        }

        EditGuardError::Unauthorized { .. } => {
            Classification::new(K::Authentication, Configuration, High, false, false)
        }
    }
}

/// Classify a raw failure into a full error record
///
/// # Example
///
/// ```
/// use chrono::Utc;
/// use editguard_core::classifier::classify;
/// use editguard_core::errors::{EditGuardError, ErrorContext, ErrorKind};
///
/// let err = EditGuardError::SessionNotFound { session_id: "s-404".into() };
/// let record = classify(&err, ErrorContext::new(), Utc::now());
/// assert_eq!(record.kind, ErrorKind::Validation);
/// assert!(!record.retryable);
/// assert!(record.rollback_required);
/// ```
pub fn classify(err: &EditGuardError, context: ErrorContext, at: DateTime<Utc>) -> ErrorRecord {
    let c = classification_of(err);
    ErrorRecord::new(
        c.kind,
        c.category,
        c.severity,
        c.retryable,
        c.rollback_required,
        err.to_string(),
        at,
    )
    .with_context(context)
}
