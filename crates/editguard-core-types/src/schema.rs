//! Canonical schema constants for structured logging and audit records
//!
//! These constants ensure consistency across all logging and error reporting.

// Canonical field keys for structured logging
pub const FIELD_COMPONENT: &str = "component";
pub const FIELD_OP: &str = "op";
pub const FIELD_EVENT: &str = "event";
pub const FIELD_DURATION_MS: &str = "duration_ms";

// Entity identifiers
pub const FIELD_SESSION_ID: &str = "session_id";
pub const FIELD_TRANSACTION_ID: &str = "transaction_id";
pub const FIELD_SUBMISSION_ID: &str = "submission_id";
pub const FIELD_SNAPSHOT_ID: &str = "snapshot_id";

// Retry bookkeeping
pub const FIELD_ATTEMPT: &str = "attempt";
pub const FIELD_DELAY_MS: &str = "delay_ms";
pub const FIELD_STRATEGY: &str = "strategy";

// Error fields
pub const FIELD_ERR_KIND: &str = "err.kind";
pub const FIELD_ERR_CODE: &str = "err.code";
pub const FIELD_ERR_SEVERITY: &str = "err.severity";

// Canonical event names
pub const EVENT_START: &str = "start";
pub const EVENT_END: &str = "end";
pub const EVENT_END_ERROR: &str = "end_error";

// Audit record kinds
pub const AUDIT_INVERSE: &str = "rollback.inverse";
pub const AUDIT_INVERSE_FAILED: &str = "rollback.inverse_failed";
pub const AUDIT_SNAPSHOT_RESTORE: &str = "rollback.snapshot_restore";
pub const AUDIT_SNAPSHOT_RESTORE_FAILED: &str = "rollback.snapshot_restore_failed";
pub const AUDIT_INTEGRITY_PASS: &str = "integrity.pass";
pub const AUDIT_INTEGRITY_REPAIR: &str = "integrity.repair";
