//! Pipeline wired to the filesystem store and loaded from TOML

mod common;

use common::*;
use editguard_core::errors::EditGuardError;
use editguard_core::{Clock, VerifyOptions};
use editguard_engine::{EngineConfig, FilePersistence, SubmissionPipeline};
use editguard_store::{FileStore, SnapshotFiles};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

#[tokio::test]
async fn test_committed_session_survives_restart() {
    // GIVEN a pipeline persisting to disk
    let dir = TempDir::new().unwrap();
    let store = FileStore::new(dir.path());
    let h = harness(EngineConfig::default());
    let clock = h.clock.clone();
    let pipeline = h
        .builder
        .persistence(Arc::new(FilePersistence::new(store.clone())))
        .build()
        .unwrap();

    // WHEN a submission commits
    let result = pipeline.submit(submission("s1", 2)).await;
    assert!(result.success);

    // THEN a fresh pipeline started from disk sees the committed session
    let loaded = store.load_all().unwrap();
    assert_eq!(loaded.session("s1").unwrap().changes.len(), 3);
    assert_eq!(loaded.session("s1").unwrap().batch_ids.len(), 2);
    assert!(loaded.sessions.get("s2").is_none());

    let shared: Arc<dyn Clock> = Arc::new(clock);
    let restarted = SubmissionPipeline::builder(EngineConfig::default())
        .clock(shared)
        .initial_state(loaded)
        .build()
        .unwrap();
    let report = restarted
        .verify_integrity(VerifyOptions::deep())
        .await
        .unwrap();
    assert!(report.valid, "{:?}", report.errors);
}

#[tokio::test]
async fn test_snapshot_ring_exports_to_disk() {
    // GIVEN a pipeline that has taken transaction backups
    let dir = TempDir::new().unwrap();
    let h = harness(EngineConfig::default());
    let pipeline = h.builder.build().unwrap();
    pipeline.submit(submission("s1", 1)).await;
    pipeline.submit(submission("s2", 1)).await;

    // WHEN the ring is exported
    let files = SnapshotFiles::new(dir.path());
    let written = pipeline.export_snapshots(&files).unwrap();

    // THEN every snapshot in the ring has a file
    assert_eq!(written, pipeline.snapshots().len());
    assert_eq!(files.list().unwrap().len(), written);
    assert!(written >= 2);
}

#[test]
fn test_config_from_toml_drives_retry_bound() {
    let config = EngineConfig::from_toml_str(
        r#"
        [retry]
        max_retries = 1
        base_delay_ms = 200
        "#,
    )
    .unwrap();

    assert_eq!(config.retry.max_retries, 1);
    assert_eq!(config.retry.base_delay_ms, 200);
    assert_eq!(config.retry.max_delay_ms, 30_000);
}

#[tokio::test]
async fn test_config_loaded_from_file_applies_to_pipeline() {
    // GIVEN a config file allowing a single retry
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("engine.toml");
    std::fs::write(&path, "[retry]\nmax_retries = 1\nbase_delay_ms = 50\n").unwrap();
    let config = EngineConfig::from_file(&path).unwrap();

    // WHEN the network keeps failing
    let h = harness(config);
    let pipeline = h
        .builder
        .processor(Arc::new(FlakyProcessor::always(network_error())))
        .build()
        .unwrap();
    let result = pipeline.submit(submission("s1", 1)).await;

    // THEN only the configured retry is made before falling back
    assert_eq!(result.attempts, 2);
    assert_eq!(h.sleeper.delays(), vec![Duration::from_millis(50)]);
    assert_eq!(result.fallback_used.as_deref(), Some("cache-locally"));
}

#[test]
fn test_invalid_config_is_rejected_at_build() {
    let mut config = EngineConfig::default();
    config.retry.backoff_multiplier = 0.5;

    let err = SubmissionPipeline::builder(config).build().err().unwrap();

    assert!(matches!(err, EditGuardError::Configuration { .. }));
}

#[tokio::test]
async fn test_periodic_verification_records_passes() {
    // GIVEN a pipeline with a fast verification interval
    let h = harness(EngineConfig::default());
    let pipeline = Arc::new(h.builder.build().unwrap());

    // WHEN the background task runs for a while
    let handle = pipeline.spawn_periodic_verification(Duration::from_millis(10), VerifyOptions::quick());
    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.abort();

    // THEN passes were recorded in the audit trail
    assert!(!pipeline.integrity_audit_trail().is_empty());
}

#[tokio::test]
async fn test_background_tasks_follow_config() {
    let h = harness(EngineConfig::default());
    let pipeline = Arc::new(h.builder.build().unwrap());
    assert!(pipeline.start_background_tasks().is_none());

    let mut config = EngineConfig::default();
    config.verification.interval_secs = Some(3600);
    let h = harness(config);
    let pipeline = Arc::new(h.builder.build().unwrap());
    let handle = pipeline.start_background_tasks().unwrap();
    handle.abort();
}
