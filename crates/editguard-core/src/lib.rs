//! EditGuard Core - transactional recovery kernel for change submissions
//!
//! This crate provides the synchronous building blocks used by the engine:
//! - Session / change / batch data model and the persisted document state
//! - Error facility and the Error Classifier
//! - Bounded retention logs and an injectable clock
//! - Snapshot Store (checksummed ring of backups)
//! - Transaction Manager (begin / record / commit / reverse-order rollback)
//! - Integrity Verification & Repair Engine
//! - Exportable audit records and the structured logging facility

pub mod audit;
pub mod classifier;
pub mod clock;
pub mod config;
pub mod error_log;
pub mod errors;
pub mod integrity;
pub mod logging_facility;
pub mod model;
pub mod retention;
pub mod snapshot;
pub mod txn;

/// Re-exported so exported macros can name schema constants
pub use editguard_core_types as core_types;

// Re-export commonly used types
pub use audit::AuditEntry;
pub use classifier::classify;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error_log::ErrorLog;
pub use errors::{
    DataPreservation, EditGuardError, ErrorCategory, ErrorContext, ErrorKind, ErrorRecord, Result,
    Severity,
};
pub use integrity::{CorruptionLevel, IntegrityEngine, IntegrityReport, VerifyOptions};
pub use model::{Batch, Change, ChangeSubmission, DocumentState, Metadata, ProposedEdit, Session};
pub use retention::{RetentionLog, RetentionPolicy};
pub use snapshot::{BackupSnapshot, SnapshotStore};
pub use txn::{PlannedOperation, RollbackResult, TransactionManager, TransactionStatus};
