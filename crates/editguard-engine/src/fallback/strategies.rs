//! Built-in fallback strategies
//!
//! | priority | name | handles |
//! |---|---|---|
//! | 10 | cache-locally | Network |
//! | 20 | direct-processing | EngineUnavailable |
//! | 30 | sanitize-and-retry | Validation |
//! | 40 | individual-processing | BatchOperation |
//! | 50 | memory-resident-storage | Storage |
//! | 60 | extended-backoff | RateLimiting |

use async_trait::async_trait;
use editguard_core::clock::Clock;
use editguard_core::errors::{DataPreservation, EditGuardError, ErrorKind, ErrorRecord, Result};
use editguard_core::model::{ChangeSubmission, ProposedEdit};
use std::sync::Arc;
use std::time::Duration;

use super::catalog::{FallbackAction, FallbackInput, FallbackRequest, FallbackStrategy, FallbackValue};
use crate::apply::ApplyMode;

pub const CACHE_LOCALLY: &str = "cache-locally";
pub const DIRECT_PROCESSING: &str = "direct-processing";
pub const SANITIZE_AND_RETRY: &str = "sanitize-and-retry";
pub const INDIVIDUAL_PROCESSING: &str = "individual-processing";
pub const MEMORY_RESIDENT_STORAGE: &str = "memory-resident-storage";
pub const EXTENDED_BACKOFF: &str = "extended-backoff";

fn is_network(r: &ErrorRecord, _: &FallbackRequest) -> bool {
    r.kind == ErrorKind::Network
}

fn is_engine_unavailable(r: &ErrorRecord, _: &FallbackRequest) -> bool {
    r.kind == ErrorKind::EngineUnavailable
}

fn is_validation(r: &ErrorRecord, _: &FallbackRequest) -> bool {
    r.kind == ErrorKind::Validation
}

fn is_batch_operation(r: &ErrorRecord, req: &FallbackRequest) -> bool {
    r.kind == ErrorKind::BatchOperation && req.submission.edits.len() > 1
}

fn is_storage(r: &ErrorRecord, _: &FallbackRequest) -> bool {
    r.kind == ErrorKind::Storage
}

fn is_rate_limited(r: &ErrorRecord, _: &FallbackRequest) -> bool {
    r.kind == ErrorKind::RateLimiting
}

/// The default catalog entries, in priority order
pub fn default_strategies() -> Vec<FallbackStrategy> {
    vec![
        FallbackStrategy::new(CACHE_LOCALLY, 10, is_network, Arc::new(CacheLocally)),
        FallbackStrategy::new(
            DIRECT_PROCESSING,
            20,
            is_engine_unavailable,
            Arc::new(DirectProcessing),
        )
        .rollback_on_failure(true),
        FallbackStrategy::new(SANITIZE_AND_RETRY, 30, is_validation, Arc::new(SanitizeAndRetry))
            .rollback_on_failure(true),
        FallbackStrategy::new(
            INDIVIDUAL_PROCESSING,
            40,
            is_batch_operation,
            Arc::new(IndividualProcessing),
        ),
        FallbackStrategy::new(
            MEMORY_RESIDENT_STORAGE,
            50,
            is_storage,
            Arc::new(MemoryResidentStorage),
        )
        .rollback_on_failure(true),
        FallbackStrategy::new(EXTENDED_BACKOFF, 60, is_rate_limited, Arc::new(ExtendedBackoff)),
    ]
}

/// Park the submission for later replay
///
/// Reports success so the caller can continue, but nothing reached the
/// document state.
pub struct CacheLocally;

#[async_trait]
impl FallbackAction for CacheLocally {
    async fn run(&self, input: &FallbackInput<'_>) -> Result<FallbackValue> {
        let env = input.env;
        env.cache.store(
            input.request.submission.clone(),
            input.record.kind,
            env.clock.now(),
        );
        Ok(FallbackValue {
            strategy: CACHE_LOCALLY.to_string(),
            applied: None,
            preservation: DataPreservation::LocalCache,
            lossy: false,
            note: format!("{} edit(s) cached for replay", input.request.submission.edits.len()),
        })
    }
}

/// Apply through the built-in conversion, skipping the unavailable processor
pub struct DirectProcessing;

#[async_trait]
impl FallbackAction for DirectProcessing {
    async fn run(&self, input: &FallbackInput<'_>) -> Result<FallbackValue> {
        let applier = input.env.require_applier(DIRECT_PROCESSING)?;
        let applied = applier.apply(&input.request.submission, ApplyMode::Direct).await?;
        Ok(FallbackValue {
            strategy: DIRECT_PROCESSING.to_string(),
            note: format!("{} change(s) applied without the processor", applied.applied_count()),
            applied: Some(applied),
            preservation: DataPreservation::Persisted,
            lossy: false,
        })
    }
}

/// Clean the submission and apply it once more
pub struct SanitizeAndRetry;

#[async_trait]
impl FallbackAction for SanitizeAndRetry {
    async fn run(&self, input: &FallbackInput<'_>) -> Result<FallbackValue> {
        let original = &input.request.submission;
        let sanitized = sanitize(original).ok_or_else(|| EditGuardError::InvalidSubmission {
            reason: "no edits left after sanitization".to_string(),
        })?;
        if &sanitized == original {
            return Err(EditGuardError::InvalidSubmission {
                reason: "sanitization changed nothing".to_string(),
            });
        }

        let applier = input.env.require_applier(SANITIZE_AND_RETRY)?;
        let applied = applier.apply(&sanitized, ApplyMode::Processed).await?;
        Ok(FallbackValue {
            strategy: SANITIZE_AND_RETRY.to_string(),
            note: format!(
                "applied {} of {} edit(s) after sanitization",
                sanitized.edits.len(),
                original.edits.len()
            ),
            applied: Some(applied),
            preservation: DataPreservation::Persisted,
            lossy: false,
        })
    }
}

/// Split a batch into independent single-edit transactions
pub struct IndividualProcessing;

#[async_trait]
impl FallbackAction for IndividualProcessing {
    async fn run(&self, input: &FallbackInput<'_>) -> Result<FallbackValue> {
        let applier = input.env.require_applier(INDIVIDUAL_PROCESSING)?;
        let applied = applier.apply_individually(&input.request.submission).await?;
        Ok(FallbackValue {
            strategy: INDIVIDUAL_PROCESSING.to_string(),
            note: format!(
                "{} of {} edit(s) applied individually",
                applied.applied_count(),
                applied.changes.len()
            ),
            applied: Some(applied),
            preservation: DataPreservation::Persisted,
            lossy: false,
        })
    }
}

/// Apply in memory without persisting; lost on restart until flushed
pub struct MemoryResidentStorage;

#[async_trait]
impl FallbackAction for MemoryResidentStorage {
    async fn run(&self, input: &FallbackInput<'_>) -> Result<FallbackValue> {
        let submission = &input.request.submission;
        let applier = input.env.require_applier(MEMORY_RESIDENT_STORAGE)?;
        let applied = applier.apply(submission, ApplyMode::MemoryOnly).await?;
        input
            .env
            .memory
            .mark(&submission.session_id, submission.id.clone());
        tracing::warn!(
            session_id = %submission.session_id,
            submission_id = %submission.id,
            "changes held in memory only"
        );
        Ok(FallbackValue {
            strategy: MEMORY_RESIDENT_STORAGE.to_string(),
            note: "state kept in memory; lost on restart until flushed".to_string(),
            applied: Some(applied),
            preservation: DataPreservation::MemoryOnly,
            lossy: true,
        })
    }
}

/// Wait longer than the regular backoff, then apply once
pub struct ExtendedBackoff;

#[async_trait]
impl FallbackAction for ExtendedBackoff {
    async fn run(&self, input: &FallbackInput<'_>) -> Result<FallbackValue> {
        let config = &input.env.config;
        let wait = Duration::from_millis(config.extended_backoff_ms.min(config.extended_backoff_cap_ms));
        input.env.sleeper.sleep(wait).await;

        let applier = input.env.require_applier(EXTENDED_BACKOFF)?;
        let applied = applier
            .apply(&input.request.submission, ApplyMode::Processed)
            .await?;
        Ok(FallbackValue {
            strategy: EXTENDED_BACKOFF.to_string(),
            note: format!("applied after waiting {}ms", wait.as_millis()),
            applied: Some(applied),
            preservation: DataPreservation::Persisted,
            lossy: false,
        })
    }
}

/// Strip control characters and surrounding whitespace, drop empty edits
///
/// Returns `None` when nothing usable remains.
pub fn sanitize(submission: &ChangeSubmission) -> Option<ChangeSubmission> {
    fn clean(text: &str) -> String {
        text.chars()
            .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
            .collect::<String>()
            .trim()
            .to_string()
    }

    let edits: Vec<ProposedEdit> = submission
        .edits
        .iter()
        .map(|e| ProposedEdit {
            original_text: clean(&e.original_text),
            proposed_text: clean(&e.proposed_text),
            rationale: e.rationale.as_deref().map(clean).filter(|r| !r.is_empty()),
        })
        .filter(|e| !(e.original_text.is_empty() && e.proposed_text.is_empty()))
        .collect();

    let producer = clean(&submission.producer);
    let session_id = submission.session_id.trim().to_string();
    if edits.is_empty() || producer.is_empty() || session_id.is_empty() {
        return None;
    }

    let mut sanitized = submission.clone();
    sanitized.producer = producer;
    sanitized.session_id = session_id;
    sanitized.edits = edits;
    Some(sanitized)
}
