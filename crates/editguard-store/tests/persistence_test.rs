//! File persistence tests: session files, snapshot files and audit export

use chrono::Utc;
use editguard_core::config::SnapshotConfig;
use editguard_core::errors::{EditGuardError, Severity};
use editguard_core::model::{Batch, DocumentState, Session};
use editguard_core::snapshot::SnapshotStore;
use editguard_core::{AuditEntry, Clock, SystemClock};
use editguard_store::audit_export::{export_to_file, read_jsonl};
use editguard_store::{FileStore, SnapshotFiles};
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

fn two_session_state() -> DocumentState {
    let now = Utc::now();
    let mut state = DocumentState::new();
    let mut s1 = Session::new("s1", "doc", now);
    s1.batch_ids.push("b1".into());
    state.insert_session(s1);
    state.insert_session(Session::new("s2", "doc", now));
    state
        .batches
        .insert("b1".into(), Batch::new("b1".into(), "s1", "p", vec![], now));
    state
}

fn snapshot_store() -> SnapshotStore {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    SnapshotStore::new(&SnapshotConfig::default(), clock)
}

#[test]
fn test_load_all_restores_every_session() {
    // GIVEN two sessions persisted separately
    let temp_dir = TempDir::new().unwrap();
    let store = FileStore::new(temp_dir.path());
    let state = two_session_state();

    // WHEN every session is saved and the state reloaded
    store.save_all(&state).unwrap();
    let loaded = store.load_all().unwrap();

    // THEN sessions and batches match
    assert_eq!(loaded.sessions, state.sessions);
    assert_eq!(loaded.batches, state.batches);
}

#[test]
fn test_saving_one_session_leaves_other_file_untouched() {
    // GIVEN both sessions on disk
    let temp_dir = TempDir::new().unwrap();
    let store = FileStore::new(temp_dir.path());
    let mut state = two_session_state();
    store.save_all(&state).unwrap();
    let s2_before = fs::read(store.session_path("s2")).unwrap();

    // WHEN s1 changes and only s1 is saved
    state.session_mut("s1").unwrap().last_producer = Some("other".into());
    store.save_session(&state, "s1").unwrap();

    // THEN the s2 file is byte-identical
    assert_eq!(fs::read(store.session_path("s2")).unwrap(), s2_before);
}

#[test]
fn test_saving_removed_session_deletes_its_file() {
    // GIVEN a persisted session
    let temp_dir = TempDir::new().unwrap();
    let store = FileStore::new(temp_dir.path());
    let mut state = two_session_state();
    store.save_all(&state).unwrap();

    // WHEN it disappears from state and is saved
    state.sessions.remove("s2");
    store.save_session(&state, "s2").unwrap();

    // THEN its file is gone
    assert!(!store.session_path("s2").exists());
    assert!(store.load_session("s2").unwrap().is_none());
}

#[test]
fn test_undecodable_session_file_is_corruption() {
    // GIVEN a garbage session file
    let temp_dir = TempDir::new().unwrap();
    let store = FileStore::new(temp_dir.path());
    let path = store.session_path("s1");
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, b"{not json").unwrap();

    // WHEN loading
    let result = store.load_all();

    // THEN a DataCorruption error names the file
    match result {
        Err(EditGuardError::DataCorruption { location, .. }) => {
            assert!(location.ends_with(".json"));
        }
        other => panic!("expected DataCorruption, got {:?}", other),
    }
}

#[test]
fn test_persisted_snapshot_reloads_and_restores() {
    // GIVEN a persisted full snapshot
    let temp_dir = TempDir::new().unwrap();
    let files = SnapshotFiles::new(temp_dir.path());
    let ring = snapshot_store();
    let original = two_session_state();
    let snapshot = ring.create_snapshot(&original).unwrap();
    files.persist(&snapshot).unwrap();

    // WHEN a fresh ring loads it and restores into an empty state
    let fresh = snapshot_store();
    assert_eq!(files.load_into(&fresh).unwrap(), 1);
    let mut state = DocumentState::new();
    fresh.restore_snapshot(&snapshot.id, &mut state).unwrap();

    // THEN the content matches
    assert_eq!(state.sessions, original.sessions);
}

#[test]
fn test_snapshot_altered_on_disk_is_refused_on_restore() {
    // GIVEN a snapshot file edited after it was written
    let temp_dir = TempDir::new().unwrap();
    let files = SnapshotFiles::new(temp_dir.path());
    let ring = snapshot_store();
    let snapshot = ring.create_snapshot(&two_session_state()).unwrap();
    let path = files.persist(&snapshot).unwrap();
    let tampered = fs::read_to_string(&path)
        .unwrap()
        .replace("\"doc\"", "\"forged\"");
    fs::write(&path, tampered).unwrap();

    // WHEN it is reloaded and restored
    let loaded = files.load(&snapshot.id).unwrap();
    let mut state = DocumentState::new();
    let result = SnapshotStore::apply(&loaded, &mut state);

    // THEN the restore is refused and state is untouched
    assert!(matches!(result, Err(EditGuardError::DataCorruption { .. })));
    assert!(state.sessions.is_empty());
}

#[test]
fn test_missing_snapshot_file() {
    let temp_dir = TempDir::new().unwrap();
    let files = SnapshotFiles::new(temp_dir.path());
    let id = editguard_core_types::SnapshotId::new();

    assert!(matches!(
        files.load(&id),
        Err(EditGuardError::SnapshotNotFound { .. })
    ));
    assert!(files.list().unwrap().is_empty());
}

#[test]
fn test_audit_export_roundtrip_through_file() {
    // GIVEN two audit entries
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("audit").join("trail.jsonl");
    let entries = vec![
        AuditEntry::new(Utc::now(), "rollback.inverse", Severity::Medium, "session:s1", "removed 1 change"),
        AuditEntry::new(Utc::now(), "rollback.snapshot_restore", Severity::Medium, "session:s1", "restored"),
    ];

    // WHEN exported and read back
    let written = export_to_file(&path, &entries).unwrap();
    let read = read_jsonl(&path).unwrap();

    // THEN every entry survives in order
    assert_eq!(written, 2);
    assert_eq!(read, entries);
}
