//! Retry & Fallback Engine
//!
//! Wraps one operation with classified retries and exponential backoff,
//! then walks the fallback catalog once retries are exhausted or the
//! failure was never retryable.

use chrono::{DateTime, Utc};
use editguard_core::clock::Clock;
use editguard_core::error_log::ErrorLog;
use editguard_core::errors::{ErrorContext, ErrorRecord, Result};
use editguard_core::{log_op_end, log_op_error, log_op_start};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use super::backoff::jittered_delay;
use super::context::{AttemptOutcome, AttemptRecord, RetryContext, RetryStats, RetryStatus};
use crate::config::RetryConfig;
use crate::fallback::{FallbackCatalog, FallbackEnv, FallbackInput, FallbackRequest, FallbackValue};
use crate::time::JitterSource;

/// Where a successful result came from
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution<T> {
    Primary(T),
    Fallback(FallbackValue),
}

/// A fallback strategy that ran and failed
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackFailure {
    pub strategy: String,
    pub error: ErrorRecord,
    pub rollback_required: bool,
}

/// Outcome of `execute_with_retry`
#[derive(Debug, Clone)]
pub struct RetryResult<T> {
    pub success: bool,
    pub value: Option<Resolution<T>>,
    /// Last classified error of the primary operation, set on failure
    pub error: Option<ErrorRecord>,
    /// Primary error that a fallback recovered from
    pub recovered_from: Option<ErrorRecord>,
    pub attempts: Vec<AttemptRecord>,
    pub fallback_used: Option<String>,
    pub fallback_failures: Vec<FallbackFailure>,
    pub duration_ms: u64,
}

impl<T> RetryResult<T> {
    pub fn attempt_count(&self) -> u32 {
        u32::try_from(self.attempts.len()).unwrap_or(u32::MAX)
    }

    /// Whether any failed fallback asked for a rollback
    pub fn rollback_requested(&self) -> bool {
        self.fallback_failures.iter().any(|f| f.rollback_required)
    }
}

pub struct RetryEngine {
    config: RetryConfig,
    catalog: FallbackCatalog,
    env: FallbackEnv,
    jitter: Arc<dyn JitterSource>,
    errors: Arc<ErrorLog>,
    grace: chrono::Duration,
    contexts: Mutex<HashMap<String, RetryContext>>,
    stats: Mutex<RetryStats>,
}

impl RetryEngine {
    /// Sleeper and clock are taken from the fallback environment
    pub fn new(
        config: RetryConfig,
        catalog: FallbackCatalog,
        env: FallbackEnv,
        jitter: Arc<dyn JitterSource>,
        errors: Arc<ErrorLog>,
        grace_secs: u64,
    ) -> Self {
        let grace = chrono::Duration::seconds(
            i64::try_from(grace_secs)
                .unwrap_or(i64::MAX)
                .min(i64::MAX / 1000),
        );
        Self {
            config,
            catalog,
            env,
            jitter,
            errors,
            grace,
            contexts: Mutex::new(HashMap::new()),
            stats: Mutex::new(RetryStats::default()),
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn catalog(&self) -> &FallbackCatalog {
        &self.catalog
    }

    pub fn env(&self) -> &FallbackEnv {
        &self.env
    }

    pub fn error_log(&self) -> &Arc<ErrorLog> {
        &self.errors
    }

    /// Run `operation` under the engine's default config
    ///
    /// `operation` receives the 1-based attempt number. Fallbacks only run
    /// when a `request` is supplied.
    pub async fn execute_with_retry<T, F, Fut>(
        &self,
        operation_id: &str,
        owner_id: &str,
        operation: F,
        request: Option<&FallbackRequest>,
    ) -> RetryResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let config = self.config.clone();
        self.execute_with_config(operation_id, owner_id, operation, &config, request)
            .await
    }

    /// Run `operation` under an explicit config
    pub async fn execute_with_config<T, F, Fut>(
        &self,
        operation_id: &str,
        owner_id: &str,
        mut operation: F,
        config: &RetryConfig,
        request: Option<&FallbackRequest>,
    ) -> RetryResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let clock = self.env.clock.clone();
        let started = clock.now();
        log_op_start!("execute_with_retry", operation_id = operation_id, owner_id = owner_id);
        self.track(RetryContext::new(operation_id, owner_id, config.clone(), started));

        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let mut delay_before_ms = 0;
        let last_error = loop {
            let number = u32::try_from(attempts.len() + 1).unwrap_or(u32::MAX);
            let attempt_started = clock.now();
            let outcome = operation(number).await;
            let duration_ms = elapsed_ms(attempt_started, clock.now());

            match outcome {
                Ok(value) => {
                    attempts.push(AttemptRecord {
                        number,
                        started_at: attempt_started,
                        duration_ms,
                        delay_before_ms,
                        outcome: AttemptOutcome::Succeeded,
                    });
                    let status = RetryStatus::Succeeded;
                    let total_ms = elapsed_ms(started, clock.now());
                    self.finish(operation_id, &attempts, status, None, None);
                    log_op_end!(
                        "execute_with_retry",
                        duration_ms = total_ms,
                        operation_id = operation_id,
                        attempts = number
                    );
                    return RetryResult {
                        success: true,
                        value: Some(Resolution::Primary(value)),
                        error: None,
                        recovered_from: None,
                        attempts,
                        fallback_used: None,
                        fallback_failures: Vec::new(),
                        duration_ms: total_ms,
                    };
                }
                Err(err) => {
                    let record = self.errors.record(
                        &err,
                        ErrorContext::new()
                            .with_operation(operation_id)
                            .with_owner(owner_id)
                            .with_attempt(number),
                    );
                    attempts.push(AttemptRecord {
                        number,
                        started_at: attempt_started,
                        duration_ms,
                        delay_before_ms,
                        outcome: AttemptOutcome::Failed {
                            kind: record.kind,
                            code: record.code(),
                            retryable: record.retryable,
                        },
                    });
                    self.update(operation_id, &attempts, &record);

                    let eligible = record.retryable && config.allows(record.kind);
                    let attempts_left =
                        (attempts.len() as u64) <= u64::from(config.max_retries);
                    if !(eligible && attempts_left) {
                        break record;
                    }

                    let delay = jittered_delay(config, number, self.jitter.as_ref());
                    tracing::info!(
                        operation_id = operation_id,
                        attempt = number,
                        delay_ms = delay.as_millis() as u64,
                        err.code = record.code(),
                        "retrying after backoff"
                    );
                    self.env.sleeper.sleep(delay).await;
                    delay_before_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                }
            }
        };

        let mut fallback_failures = Vec::new();
        if let Some(request) = request {
            for strategy in self.catalog.matching(&last_error, request) {
                tracing::info!(
                    operation_id = operation_id,
                    strategy = %strategy.name,
                    err.code = last_error.code(),
                    "trying fallback"
                );
                let input = FallbackInput {
                    record: &last_error,
                    request,
                    env: &self.env,
                };
                match strategy.action.run(&input).await {
                    Ok(value) => {
                        let total_ms = elapsed_ms(started, clock.now());
                        self.finish(
                            operation_id,
                            &attempts,
                            RetryStatus::RecoveredByFallback,
                            Some(strategy.name.clone()),
                            Some(&last_error),
                        );
                        log_op_end!(
                            "execute_with_retry",
                            duration_ms = total_ms,
                            operation_id = operation_id,
                            attempts = attempts.len(),
                            fallback = strategy.name.as_str()
                        );
                        return RetryResult {
                            success: true,
                            value: Some(Resolution::Fallback(value)),
                            error: None,
                            recovered_from: Some(last_error),
                            attempts,
                            fallback_used: Some(strategy.name.clone()),
                            fallback_failures,
                            duration_ms: total_ms,
                        };
                    }
                    Err(err) => {
                        let record = self.errors.record(
                            &err,
                            ErrorContext::new()
                                .with_operation(format!("fallback:{}", strategy.name))
                                .with_owner(owner_id),
                        );
                        fallback_failures.push(FallbackFailure {
                            strategy: strategy.name.clone(),
                            error: record,
                            rollback_required: strategy.rollback_on_failure,
                        });
                    }
                }
            }
        }

        let total_ms = elapsed_ms(started, clock.now());
        self.finish(operation_id, &attempts, RetryStatus::Failed, None, Some(&last_error));
        log_op_error!(
            "execute_with_retry",
            last_error,
            duration_ms = total_ms,
            operation_id = operation_id,
            attempts = attempts.len()
        );
        RetryResult {
            success: false,
            value: None,
            error: Some(last_error),
            recovered_from: None,
            attempts,
            fallback_used: None,
            fallback_failures,
            duration_ms: total_ms,
        }
    }

    /// Snapshot of a tracked context
    pub fn context(&self, operation_id: &str) -> Option<RetryContext> {
        self.lock_contexts().get(operation_id).cloned()
    }

    pub fn active_contexts(&self) -> Vec<RetryContext> {
        self.lock_contexts()
            .values()
            .filter(|c| !c.status.is_terminal())
            .cloned()
            .collect()
    }

    /// Drop terminal contexts whose grace period has passed
    ///
    /// Returns how many were removed.
    pub fn cleanup_expired_contexts(&self) -> usize {
        let now = self.env.clock.now();
        let grace = self.grace;
        let mut contexts = self.lock_contexts();
        let before = contexts.len();
        contexts.retain(|_, ctx| match ctx.finished_at {
            Some(finished) if ctx.status.is_terminal() => finished
                .checked_add_signed(grace)
                .map_or(true, |expiry| expiry > now),
            _ => true,
        });
        before - contexts.len()
    }

    pub fn stats(&self) -> RetryStats {
        let mut stats = *self.stats.lock().unwrap_or_else(|e| e.into_inner());
        stats.tracked_contexts = self.lock_contexts().len();
        stats
    }

    fn track(&self, context: RetryContext) {
        self.lock_contexts()
            .insert(context.operation_id.clone(), context);
    }

    fn update(&self, operation_id: &str, attempts: &[AttemptRecord], error: &ErrorRecord) {
        if let Some(ctx) = self.lock_contexts().get_mut(operation_id) {
            ctx.attempts = attempts.to_vec();
            ctx.last_error = Some(error.clone());
        }
    }

    fn finish(
        &self,
        operation_id: &str,
        attempts: &[AttemptRecord],
        status: RetryStatus,
        fallback: Option<String>,
        error: Option<&ErrorRecord>,
    ) {
        let now = self.env.clock.now();
        if let Some(ctx) = self.lock_contexts().get_mut(operation_id) {
            ctx.attempts = attempts.to_vec();
            ctx.fallback_used = fallback;
            ctx.last_error = error.cloned();
            ctx.finish(status, now);
        }

        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        stats.operations += 1;
        stats.attempts += attempts.len() as u64;
        match status {
            RetryStatus::Succeeded if attempts.len() == 1 => stats.succeeded_first_try += 1,
            RetryStatus::Succeeded => stats.succeeded_after_retry += 1,
            RetryStatus::RecoveredByFallback => stats.recovered_by_fallback += 1,
            RetryStatus::Failed => stats.failed += 1,
            RetryStatus::Active => {}
        }
    }

    fn lock_contexts(&self) -> MutexGuard<'_, HashMap<String, RetryContext>> {
        self.contexts.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn elapsed_ms(from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
    u64::try_from((to - from).num_milliseconds()).unwrap_or(0)
}
