//! Snapshot persistence

pub mod files;

pub use files::SnapshotFiles;
