//! Bounded error log
//!
//! Classified errors are appended here before any recovery logic runs, so
//! the audit trail exists whether or not recovery later succeeds.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::classifier::classify;
use crate::clock::Clock;
use crate::config::ErrorLogConfig;
use crate::errors::{EditGuardError, ErrorContext, ErrorKind, ErrorRecord, Severity};
use crate::retention::RetentionLog;

/// Aggregate counts over the current log window
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ErrorStatistics {
    pub total: usize,
    pub retryable: usize,
    pub rollback_required: usize,
    pub by_kind: BTreeMap<ErrorKind, usize>,
    pub by_severity: BTreeMap<Severity, usize>,
}

/// Thread-safe, time-windowed log of classified errors
pub struct ErrorLog {
    clock: Arc<dyn Clock>,
    records: Mutex<RetentionLog<ErrorRecord>>,
}

impl ErrorLog {
    pub fn new(config: &ErrorLogConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            records: Mutex::new(RetentionLog::new(config.retention)),
        }
    }

    /// Classify a raw failure and append the record
    pub fn record(&self, err: &EditGuardError, context: ErrorContext) -> ErrorRecord {
        let record = classify(err, context, self.clock.now());
        self.append(record.clone());
        record
    }

    /// Append an already-classified record
    pub fn append(&self, record: ErrorRecord) {
        tracing::warn!(
            component = module_path!(),
            op = record.context.operation.as_deref().unwrap_or("unknown"),
            err.kind = record.kind.code(),
            err.severity = record.severity.as_str(),
            retryable = record.retryable,
            rollback_required = record.rollback_required,
            message = %record.message,
            "error classified"
        );
        let now = self.clock.now();
        self.lock().push(now, record);
    }

    /// Records in the current window, oldest first
    pub fn recent(&self) -> Vec<ErrorRecord> {
        let mut log = self.lock();
        log.evict_expired(self.clock.now());
        log.iter().cloned().collect()
    }

    /// Records for one owner, oldest first
    pub fn for_owner(&self, owner_id: &str) -> Vec<ErrorRecord> {
        self.recent()
            .into_iter()
            .filter(|r| r.context.owner_id.as_deref() == Some(owner_id))
            .collect()
    }

    pub fn statistics(&self) -> ErrorStatistics {
        let mut stats = ErrorStatistics::default();
        for record in self.recent() {
            stats.total += 1;
            if record.retryable {
                stats.retryable += 1;
            }
            if record.rollback_required {
                stats.rollback_required += 1;
            }
            *stats.by_kind.entry(record.kind).or_insert(0) += 1;
            *stats.by_severity.entry(record.severity).or_insert(0) += 1;
        }
        stats
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RetentionLog<ErrorRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::retention::RetentionPolicy;
    use chrono::Duration;

    fn log_with(policy: RetentionPolicy) -> (ErrorLog, ManualClock) {
        let clock = ManualClock::starting_now();
        let log = ErrorLog::new(
            &ErrorLogConfig { retention: policy },
            Arc::new(clock.clone()),
        );
        (log, clock)
    }

    #[test]
    fn test_record_appends_classified_error() {
        let (log, _) = log_with(RetentionPolicy::new(10, None));
        let record = log.record(
            &EditGuardError::Network {
                message: "down".into(),
            },
            ErrorContext::new().with_owner("s1"),
        );
        assert_eq!(record.kind, ErrorKind::Network);
        assert_eq!(log.recent().len(), 1);
        assert_eq!(log.for_owner("s1").len(), 1);
        assert!(log.for_owner("s2").is_empty());
    }

    #[test]
    fn test_window_expires_old_records() {
        let (log, clock) = log_with(RetentionPolicy::new(10, Some(60)));
        log.record(&EditGuardError::RateLimited { retry_after_ms: 5 }, ErrorContext::new());
        clock.advance(Duration::seconds(61));
        assert!(log.recent().is_empty());
    }

    #[test]
    fn test_statistics_group_by_kind_and_severity() {
        let (log, _) = log_with(RetentionPolicy::new(10, None));
        log.record(
            &EditGuardError::Network {
                message: "a".into(),
            },
            ErrorContext::new(),
        );
        log.record(
            &EditGuardError::Network {
                message: "b".into(),
            },
            ErrorContext::new(),
        );
        log.record(
            &EditGuardError::InvalidSubmission {
                reason: "c".into(),
            },
            ErrorContext::new(),
        );

        let stats = log.statistics();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.retryable, 2);
        assert_eq!(stats.rollback_required, 1);
        assert_eq!(stats.by_kind.get(&ErrorKind::Network), Some(&2));
        assert_eq!(stats.by_severity.get(&Severity::Medium), Some(&3));
    }
}
