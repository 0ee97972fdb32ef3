//! Operation boundary macros
//!
//! Every recovery operation (`submit`, `execute_with_retry`,
//! `integrity_verify`) logs one start event and exactly one end event.
//! The end event is either `end` or `end_error`, and an `end_error` always
//! carries the classification of the failure that ended the operation.
//! Extra fields after the required ones are passed to `tracing` unchanged.

/// Start of a recovery operation
///
/// ```
/// # use editguard_core::log_op_start;
/// let session_id = "s1";
/// log_op_start!("submit");
/// log_op_start!("submit", session_id = %session_id, edits = 2);
/// ```
#[macro_export]
macro_rules! log_op_start {
    ($op:expr $(, $($field:tt)+)?) => {
        tracing::info!(
            component = module_path!(),
            op = $op,
            event = $crate::core_types::schema::EVENT_START,
            $($($field)+)?
        );
    };
}

/// Successful end of a recovery operation
///
/// ```
/// # use editguard_core::log_op_end;
/// log_op_end!("execute_with_retry", duration_ms = 3000, attempts = 3);
/// ```
#[macro_export]
macro_rules! log_op_end {
    ($op:expr, duration_ms = $duration:expr $(, $($field:tt)+)?) => {
        tracing::info!(
            component = module_path!(),
            op = $op,
            event = $crate::core_types::schema::EVENT_END,
            duration_ms = $duration,
            $($($field)+)?
        );
    };
}

/// Failed end of a recovery operation
///
/// `$record` is an [`ErrorRecord`](crate::errors::ErrorRecord); its kind,
/// code and severity become `err.*` fields.
///
/// ```
/// # use editguard_core::log_op_error;
/// use chrono::Utc;
/// use editguard_core::classifier::classify;
/// use editguard_core::errors::{EditGuardError, ErrorContext};
///
/// let record = classify(
///     &EditGuardError::Storage { message: "disk full".into() },
///     ErrorContext::new().with_operation("submit"),
///     Utc::now(),
/// );
/// log_op_error!("submit", record, duration_ms = 12, rollbacks = 1);
/// ```
#[macro_export]
macro_rules! log_op_error {
    ($op:expr, $record:expr, duration_ms = $duration:expr $(, $($field:tt)+)?) => {{
        let record: &$crate::errors::ErrorRecord = &$record;
        tracing::error!(
            component = module_path!(),
            op = $op,
            event = $crate::core_types::schema::EVENT_END_ERROR,
            duration_ms = $duration,
            err.kind = ?record.kind,
            err.code = record.code(),
            err.severity = record.severity.as_str(),
            $($($field)+)?
        );
    }};
}
