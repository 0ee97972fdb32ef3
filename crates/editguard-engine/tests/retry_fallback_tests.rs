//! Retry & Fallback scenarios driven through the submission pipeline

mod common;

use common::*;
use editguard_core::errors::{DataPreservation, EditGuardError, ErrorCategory, ErrorKind};
use editguard_core::{TransactionStatus, VerifyOptions};
use editguard_engine::{ChangeStatusOutcome, EngineConfig, FallbackCatalog};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_network_failure_backs_off_then_caches_locally() {
    // GIVEN a processor that never reaches the network
    let h = harness(EngineConfig::default());
    let processor = Arc::new(FlakyProcessor::always(network_error()));
    let pipeline = h.builder.processor(processor.clone()).build().unwrap();
    let before = pipeline.state();

    // WHEN a submission is made
    let result = pipeline.submit(submission("s1", 2)).await;

    // THEN it is retried with doubling delays and parked in the local cache
    let delays = h.sleeper.delays();
    assert_eq!(
        delays,
        vec![
            Duration::from_millis(1000),
            Duration::from_millis(2000),
            Duration::from_millis(4000)
        ]
    );
    assert_eq!(result.attempts, 4);
    assert_eq!(processor.calls(), 4);
    assert!(result.success);
    assert_eq!(result.fallback_used.as_deref(), Some("cache-locally"));
    assert_eq!(result.data_preservation, DataPreservation::LocalCache);
    assert_eq!(
        result.recovered_from.as_ref().map(|r| r.kind),
        Some(ErrorKind::Network)
    );
    assert!(result
        .change_outcomes
        .iter()
        .all(|c| c.status == ChangeStatusOutcome::Cached));
    assert_eq!(pipeline.local_cache().len(), 1);
    assert_eq!(pipeline.state(), before);
}

#[tokio::test]
async fn test_jittered_delays_stay_within_ten_percent() {
    // GIVEN seeded random jitter
    let h = harness(EngineConfig::default());
    let pipeline = h
        .builder
        .jitter(Arc::new(editguard_engine::RandomJitter::seeded(7)))
        .processor(Arc::new(FlakyProcessor::always(network_error())))
        .catalog(FallbackCatalog::empty())
        .build()
        .unwrap();

    // WHEN every attempt fails
    let result = pipeline.submit(submission("s1", 1)).await;

    // THEN each delay sits within 10% of its nominal value
    assert!(!result.success);
    let nominal = [1000.0, 2000.0, 4000.0];
    let delays = h.sleeper.delays();
    assert_eq!(delays.len(), nominal.len());
    for (delay, expected) in delays.iter().zip(nominal) {
        let ms = delay.as_secs_f64() * 1000.0;
        assert!(ms >= expected * 0.9 - 1.0 && ms <= expected * 1.1 + 1.0, "{} vs {}", ms, expected);
    }
}

#[tokio::test]
async fn test_recovers_on_retry_without_fallback() {
    // GIVEN a processor that fails twice
    let h = harness(EngineConfig::default());
    let pipeline = h
        .builder
        .processor(Arc::new(FlakyProcessor::failing(2, network_error())))
        .build()
        .unwrap();

    // WHEN a submission is made
    let result = pipeline.submit(submission("s1", 1)).await;

    // THEN the third attempt commits
    assert!(result.success);
    assert_eq!(result.attempts, 3);
    assert!(result.fallback_used.is_none());
    assert_eq!(result.data_preservation, DataPreservation::Persisted);
    assert_eq!(result.applied_change_ids().len(), 1);
    assert_eq!(pipeline.state().session("s1").unwrap().changes.len(), 2);
    assert_eq!(pipeline.retry_stats().succeeded_after_retry, 1);
}

#[tokio::test]
async fn test_rejected_reference_is_not_retried_and_leaves_state_untouched() {
    // GIVEN a submission for a session that does not exist
    let h = harness(EngineConfig::default());
    let pipeline = h.builder.build().unwrap();
    let before = pipeline.state();

    // WHEN it is submitted
    let result = pipeline.submit(submission("missing", 1)).await;

    // THEN it fails once, classified as a user validation error
    assert!(!result.success);
    assert_eq!(result.attempts, 1);
    assert!(h.sleeper.delays().is_empty());
    let error = result.error.as_ref().unwrap();
    assert_eq!(error.kind, ErrorKind::Validation);
    assert_eq!(error.category, ErrorCategory::UserError);
    assert!(!error.retryable);
    assert!(error.rollback_required);

    // AND the transaction was rolled back with nothing left behind
    assert!(result.rollbacks_clean());
    assert_eq!(result.rollbacks.len(), 1);
    assert_eq!(pipeline.active_transactions(), 0);
    assert_eq!(pipeline.state(), before);
    let report = pipeline.verify_integrity(VerifyOptions::quick()).await.unwrap();
    assert!(report.valid);
}

#[tokio::test]
async fn test_engine_unavailable_falls_back_to_direct_processing() {
    // GIVEN the processing engine is down
    let h = harness(EngineConfig::default());
    let pipeline = h
        .builder
        .processor(Arc::new(FlakyProcessor::always(
            EditGuardError::EngineUnavailable {
                engine: "rewriter".into(),
            },
        )))
        .build()
        .unwrap();

    // WHEN a submission is made
    let result = pipeline.submit(submission("s2", 3)).await;

    // THEN the edits are applied without the processor
    assert!(result.success);
    assert_eq!(result.fallback_used.as_deref(), Some("direct-processing"));
    assert_eq!(result.data_preservation, DataPreservation::Persisted);
    assert_eq!(result.applied_change_ids().len(), 3);
    let state = pipeline.state();
    assert_eq!(state.session("s2").unwrap().changes.len(), 3);
    assert_eq!(state.session("s2").unwrap().batch_ids.len(), 1);
}

#[tokio::test]
async fn test_storage_failure_keeps_changes_in_memory_until_flushed() {
    // GIVEN durable storage that rejects every write
    let h = harness(EngineConfig::default());
    let persistence = Arc::new(FlakyPersistence::failing());
    let pipeline = h.builder.persistence(persistence.clone()).build().unwrap();

    // WHEN a submission is made
    let result = pipeline.submit(submission("s1", 1)).await;

    // THEN every failed attempt is rolled back and the changes stay in memory
    assert!(result.success);
    assert_eq!(result.attempts, 4);
    assert_eq!(result.rollbacks.len(), 4);
    assert!(result.rollbacks_clean());
    assert_eq!(
        result.fallback_used.as_deref(),
        Some("memory-resident-storage")
    );
    assert_eq!(result.data_preservation, DataPreservation::MemoryOnly);
    assert!(result
        .change_outcomes
        .iter()
        .all(|c| c.status == ChangeStatusOutcome::MemoryOnly));
    assert_eq!(pipeline.memory_store().sessions(), vec!["s1".to_string()]);
    assert_eq!(pipeline.state().session("s1").unwrap().changes.len(), 2);
    assert!(persistence.inner.persisted("s1").is_none());

    // WHEN storage recovers and memory-resident sessions are flushed
    persistence.heal();
    let flushed = pipeline.flush_memory_resident().await;

    // THEN the session reaches storage
    assert_eq!(flushed, 1);
    assert!(pipeline.memory_store().is_empty());
    let stored = persistence.inner.persisted("s1").unwrap();
    assert_eq!(stored.session("s1").unwrap().changes.len(), 2);
}

#[tokio::test]
async fn test_rollback_that_cannot_reach_storage_is_reported_as_failed() {
    // GIVEN storage that accepts one write and then rejects everything
    let h = harness(EngineConfig::default());
    let persistence = Arc::new(FlakyPersistence::failing_after(1));
    let pipeline = h
        .builder
        .persistence(persistence.clone())
        .catalog(FallbackCatalog::empty())
        .build()
        .unwrap();
    let before = pipeline.state();

    // WHEN a submission half-reaches storage before the writes start failing
    let result = pipeline.submit(submission("s1", 1)).await;

    // THEN memory is restored but the first rollback is not reported clean
    assert!(!result.success);
    assert_eq!(pipeline.state(), before);
    let first = &result.rollbacks[0];
    assert!(!first.success);
    assert!(first
        .errors
        .iter()
        .any(|e| e.contains("persisting restored state failed")));
    assert!(!result.rollbacks_clean());
    assert_eq!(result.data_preservation, DataPreservation::Lost);
    assert_eq!(
        pipeline
            .transaction(&first.transaction_id)
            .map(|t| t.status),
        Some(TransactionStatus::Failed)
    );
    let history = pipeline.rollback_history("s1");
    assert!(!history[0].success);
    assert_eq!(history[0].errors, first.errors);

    // AND later attempts that never reached storage still roll back cleanly
    assert!(result.rollbacks[1..].iter().all(|r| r.success));

    // WHEN storage recovers and the session is written again
    persistence.heal();
    let retried = pipeline.submit(submission("s1", 1)).await;

    // THEN storage matches memory again
    assert!(retried.success);
    assert_eq!(
        persistence.inner.persisted("s1"),
        Some(pipeline.state().scope("s1"))
    );
}

#[tokio::test]
async fn test_cached_submissions_replay_once_the_network_returns() {
    // GIVEN a submission parked by cache-locally
    let h = harness(EngineConfig::default());
    let pipeline = h
        .builder
        .processor(Arc::new(FlakyProcessor::failing(4, network_error())))
        .build()
        .unwrap();
    let parked = pipeline.submit(submission("s1", 1)).await;
    assert_eq!(parked.fallback_used.as_deref(), Some("cache-locally"));

    // WHEN the cache is replayed
    let replayed = pipeline.replay_cached().await;

    // THEN the submission is applied for real
    assert_eq!(replayed.len(), 1);
    assert!(replayed[0].success);
    assert_eq!(replayed[0].data_preservation, DataPreservation::Persisted);
    assert!(pipeline.local_cache().is_empty());
    assert_eq!(pipeline.state().session("s1").unwrap().changes.len(), 2);
}

#[tokio::test]
async fn test_non_matching_kind_fails_with_primary_error() {
    // GIVEN a processor failure no strategy handles
    let h = harness(EngineConfig::default());
    let pipeline = h
        .builder
        .processor(Arc::new(FlakyProcessor::always(EditGuardError::Processing {
            message: "model refused".into(),
        })))
        .build()
        .unwrap();

    // WHEN a submission is made
    let result = pipeline.submit(submission("s1", 1)).await;

    // THEN it fails after one attempt with nothing preserved
    assert!(!result.success);
    assert_eq!(result.attempts, 1);
    assert_eq!(result.error.as_ref().unwrap().kind, ErrorKind::Processing);
    assert_eq!(result.data_preservation, DataPreservation::Lost);
    assert_eq!(
        result.error.as_ref().unwrap().context.data_preserved,
        Some(DataPreservation::Lost)
    );
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn prop_attempts_are_bounded_by_max_retries(max_retries in 0u32..6) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let mut config = EngineConfig::default();
            config.retry.max_retries = max_retries;
            let h = harness(config);
            let pipeline = h
                .builder
                .processor(Arc::new(FlakyProcessor::always(network_error())))
                .catalog(FallbackCatalog::empty())
                .build()
                .unwrap();

            let result = pipeline.submit(submission("s1", 1)).await;

            prop_assert!(!result.success);
            prop_assert_eq!(result.attempts, max_retries + 1);
            let delays = h.sleeper.delays();
            prop_assert_eq!(delays.len() as u32, max_retries);
            for delay in delays {
                prop_assert!(delay <= Duration::from_millis(33_000));
            }
            Ok(())
        })?;
    }
}
