//! Per-operation retry bookkeeping

use crate::config::RetryConfig;
use chrono::{DateTime, Utc};
use editguard_core::errors::{ErrorKind, ErrorRecord};
use serde::Serialize;

/// Outcome of a single attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded,
    Failed { kind: ErrorKind, code: &'static str, retryable: bool },
}

/// One attempt of the wrapped operation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptRecord {
    /// 1-based
    pub number: u32,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Backoff slept before this attempt, zero for the first
    pub delay_before_ms: u64,
    pub outcome: AttemptOutcome,
}

impl AttemptRecord {
    pub fn failed(&self) -> bool {
        matches!(self.outcome, AttemptOutcome::Failed { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStatus {
    Active,
    Succeeded,
    /// Primary attempts failed but a fallback strategy succeeded
    RecoveredByFallback,
    Failed,
}

impl RetryStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RetryStatus::Active)
    }
}

/// Live or recently finished retry context
#[derive(Debug, Clone, Serialize)]
pub struct RetryContext {
    pub operation_id: String,
    pub owner_id: String,
    pub config: RetryConfig,
    pub attempts: Vec<AttemptRecord>,
    pub status: RetryStatus,
    pub fallback_used: Option<String>,
    pub last_error: Option<ErrorRecord>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RetryContext {
    pub(crate) fn new(
        operation_id: &str,
        owner_id: &str,
        config: RetryConfig,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            operation_id: operation_id.to_string(),
            owner_id: owner_id.to_string(),
            config,
            attempts: Vec::new(),
            status: RetryStatus::Active,
            fallback_used: None,
            last_error: None,
            started_at: at,
            finished_at: None,
        }
    }

    /// Whether another attempt is allowed after the ones recorded so far
    pub fn has_attempts_left(&self) -> bool {
        (self.attempts.len() as u64) <= u64::from(self.config.max_retries)
    }

    pub(crate) fn finish(&mut self, status: RetryStatus, at: DateTime<Utc>) {
        self.status = status;
        self.finished_at = Some(at);
    }
}

/// Aggregate counters over the retry engine's lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetryStats {
    pub operations: u64,
    pub attempts: u64,
    pub succeeded_first_try: u64,
    pub succeeded_after_retry: u64,
    pub recovered_by_fallback: u64,
    pub failed: u64,
    /// Contexts currently tracked (active plus within grace)
    pub tracked_contexts: usize,
}
