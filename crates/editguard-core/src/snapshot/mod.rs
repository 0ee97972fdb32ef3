//! Snapshot domain logic.
//!
//! Immutable, checksummed backups of document state held in a bounded ring,
//! shared by the Transaction Manager (rollback) and the integrity engine
//! (repair).
//!
//! ## Non-Responsibilities
//!
//! - Persistence of snapshot files (handled by `editguard-store`)

pub mod digest;
pub mod store;

pub use digest::{compute_digest, compute_state_digest};
pub use store::{BackupSnapshot, SnapshotScope, SnapshotStore};
