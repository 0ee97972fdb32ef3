//! Core types shared across EditGuard crates
//!
//! This crate provides foundational types used by the recovery kernel,
//! the persistence layer and the async engine:
//!
//! - **Identifiers**: TransactionId, SnapshotId, SubmissionId, ErrorId
//! - **Schema constants**: Canonical field keys and event names

pub mod ids;
pub mod schema;

pub use ids::{ErrorId, SnapshotId, SubmissionId, TransactionId};
