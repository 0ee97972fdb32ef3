use chrono::{DateTime, Utc};
use editguard_core_types::{ErrorId, TransactionId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using EditGuardError
pub type Result<T> = std::result::Result<T, EditGuardError>;

// ========== Error Facility ==========

/// Canonical error kind taxonomy
///
/// Every failure is mapped onto exactly one kind by the classifier. Recovery
/// logic (retry eligibility, fallback predicates, rollback) matches on this
/// tag, never on message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Validation,
    Storage,
    Processing,
    EngineUnavailable,
    BatchOperation,
    SessionManagement,
    DataCorruption,
    RateLimiting,
    Authentication,
}

impl ErrorKind {
    /// All kinds, in declaration order
    pub const ALL: [ErrorKind; 10] = [
        ErrorKind::Network,
        ErrorKind::Validation,
        ErrorKind::Storage,
        ErrorKind::Processing,
        ErrorKind::EngineUnavailable,
        ErrorKind::BatchOperation,
        ErrorKind::SessionManagement,
        ErrorKind::DataCorruption,
        ErrorKind::RateLimiting,
        ErrorKind::Authentication,
    ];

    /// Get the stable error code for this kind
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Network => "ERR_NETWORK",
            ErrorKind::Validation => "ERR_VALIDATION",
            ErrorKind::Storage => "ERR_STORAGE",
            ErrorKind::Processing => "ERR_PROCESSING",
            ErrorKind::EngineUnavailable => "ERR_ENGINE_UNAVAILABLE",
            ErrorKind::BatchOperation => "ERR_BATCH_OPERATION",
            ErrorKind::SessionManagement => "ERR_SESSION_MANAGEMENT",
            ErrorKind::DataCorruption => "ERR_DATA_CORRUPTION",
            ErrorKind::RateLimiting => "ERR_RATE_LIMITING",
            ErrorKind::Authentication => "ERR_AUTHENTICATION",
        }
    }
}

/// Broad category of a failure, orthogonal to its kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Transient,
    Permanent,
    UserError,
    SystemError,
    Configuration,
}

/// Severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

/// Where the submitted data ended up after a terminal outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DataPreservation {
    /// Applied and durably persisted
    Persisted,
    /// State was restored from a backup snapshot
    Snapshot,
    /// Held in the local cache for later replay
    LocalCache,
    /// Held in process memory only; lost on restart
    MemoryOnly,
    /// Nothing of the submission survived
    #[default]
    Lost,
}

/// Structured context attached to a classified error
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ErrorContext {
    pub operation: Option<String>,
    pub owner_id: Option<String>,
    pub transaction_id: Option<TransactionId>,
    pub attempt: Option<u32>,
    pub data_preserved: Option<DataPreservation>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add operation context
    pub fn with_operation(mut self, op: impl Into<String>) -> Self {
        self.operation = Some(op.into());
        self
    }

    /// Add owner (session) context
    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    /// Add transaction context
    pub fn with_transaction(mut self, id: TransactionId) -> Self {
        self.transaction_id = Some(id);
        self
    }

    /// Add attempt number
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }
}

/// Canonical structured error record
///
/// Produced once, at the failure boundary, by the classifier. Immutable
/// afterwards except for the builder-style context helpers used while it is
/// still owned by the code that created it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub id: ErrorId,
    pub kind: ErrorKind,
    pub category: ErrorCategory,
    pub severity: Severity,
    pub retryable: bool,
    pub rollback_required: bool,
    pub message: String,
    pub context: ErrorContext,
    pub timestamp: DateTime<Utc>,
}

impl ErrorRecord {
    /// Build a record directly from its classification
    ///
    /// Critical severity always forces `rollback_required`.
    pub fn new(
        kind: ErrorKind,
        category: ErrorCategory,
        severity: Severity,
        retryable: bool,
        rollback_required: bool,
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ErrorId::new(),
            kind,
            category,
            severity,
            retryable,
            rollback_required: rollback_required || severity == Severity::Critical,
            message: message.into(),
            context: ErrorContext::default(),
            timestamp,
        }
    }

    /// Replace the context
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = context;
        self
    }

    /// Record where the submitted data survived
    pub fn with_data_preserved(mut self, preserved: DataPreservation) -> Self {
        self.context.data_preserved = Some(preserved);
        self
    }

    /// Get the stable error code
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn is_critical(&self) -> bool {
        self.severity == Severity::Critical
    }
}

impl std::fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code(), self.severity.as_str())?;
        if let Some(op) = &self.context.operation {
            write!(f, " in operation '{}'", op)?;
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        if let Some(owner) = &self.context.owner_id {
            write!(f, " (owner: {})", owner)?;
        }
        Ok(())
    }
}

// ========== End Error Facility ==========

/// Raw failures raised anywhere in the submission path
///
/// These are never inspected by recovery logic directly; the classifier turns
/// each one into an [`ErrorRecord`] first.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EditGuardError {
    // ===== Transport =====
    /// Remote call failed
    #[error("Network failure: {message}")]
    Network { message: String },

    /// Remote call did not answer in time
    #[error("Operation timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    // ===== Validation =====
    /// Submission is structurally invalid
    #[error("Invalid submission: {reason}")]
    InvalidSubmission { reason: String },

    /// Submission targets a session that does not exist
    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    /// Submission references a batch that does not exist
    #[error("Batch not found: {group_id}")]
    BatchNotFound { group_id: String },

    // ===== Storage =====
    /// Durable write failed
    #[error("Storage write failed: {message}")]
    Storage { message: String },

    /// Durable storage has no room left
    #[error("Storage quota exceeded: {message}")]
    StorageQuotaExceeded { message: String },

    // ===== Processing =====
    /// The change-processing engine cannot be reached
    #[error("Processing engine unavailable: {engine}")]
    EngineUnavailable { engine: String },

    /// The change-processing engine failed on this input
    #[error("Processing failed: {message}")]
    Processing { message: String },

    /// Some items of a batch failed
    #[error("Batch operation failed: {failed} of {total} items")]
    BatchPartialFailure { failed: usize, total: usize },

    // ===== Sessions =====
    /// Session exists but no longer accepts changes
    #[error("Session {session_id} is closed")]
    SessionClosed { session_id: String },

    /// Transaction id is unknown to the transaction manager
    #[error("Transaction not found: {transaction_id}")]
    TransactionNotFound { transaction_id: String },

    /// Transaction is not in a state that allows the requested step
    #[error("Transaction {transaction_id} is {status}, cannot {action}")]
    TransactionState {
        transaction_id: String,
        status: String,
        action: String,
    },

    // ===== Integrity =====
    /// State is internally inconsistent
    #[error("Data corruption detected at {location}: {message}")]
    DataCorruption { location: String, message: String },

    /// Stored checksum does not match recomputed content
    #[error("Checksum mismatch for {location}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        location: String,
        expected: String,
        actual: String,
    },

    /// Snapshot is not (or no longer) in the ring
    #[error("Snapshot not found: {snapshot_id}")]
    SnapshotNotFound { snapshot_id: String },

    /// An unsafe repair was requested without a backup to fall back on
    #[error("Repair requires a backup snapshot: {reason}")]
    BackupRequired { reason: String },

    // ===== Throttling / Auth =====
    /// Upstream asked us to slow down
    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Producer credentials were rejected
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    // ===== Caller control =====
    /// Caller cancelled the submission before commit
    #[error("Submission {submission_id} cancelled")]
    Cancelled { submission_id: String },

    /// Caller deadline expired before the submission finished
    #[error("Deadline of {deadline_ms}ms exceeded")]
    DeadlineExceeded { deadline_ms: u64 },

    // ===== Generic =====
    /// Serialization error (JSON encoding/decoding)
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// Filesystem error
    #[error("I/O error during {operation}: {message}")]
    Io { operation: String, message: String },

    /// Configuration could not be loaded
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Generic internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl EditGuardError {
    /// Wrap an io::Error with the operation that produced it
    pub fn io(operation: &str, err: std::io::Error) -> Self {
        EditGuardError::Io {
            operation: operation.to_string(),
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for EditGuardError {
    fn from(err: std::io::Error) -> Self {
        EditGuardError::io("io", err)
    }
}

/// Conversion from serde_json::Error to EditGuardError
impl From<serde_json::Error> for EditGuardError {
    fn from(err: serde_json::Error) -> Self {
        EditGuardError::Serialization {
            message: err.to_string(),
        }
    }
}
