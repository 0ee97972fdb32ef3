//! EditGuard Store - filesystem persistence for document state
//!
//! Provides:
//! - Atomic temp→rename writes
//! - Per-session state files (a session plus its batches and cached checksums)
//! - Snapshot files that can be reloaded into the snapshot ring
//! - Line-delimited JSON export of audit entries

pub mod audit_export;
pub mod errors;
pub mod fs;
pub mod snapshot;

// Re-export key types
pub use errors::Result;
pub use fs::FileStore;
pub use snapshot::SnapshotFiles;
