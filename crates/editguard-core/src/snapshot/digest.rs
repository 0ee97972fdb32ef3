//! Checksum computation for document state and snapshots.
//!
//! SHA-256 over canonical JSON. Every map in the model is a `BTreeMap`, so
//! the serialized form, and therefore the digest, depends only on content.
//!
//! ## Digest Types
//!
//! - **Entity digest**: one session or batch, cached in `DocumentState::checksums`
//! - **State digest**: a whole (or session-scoped) `DocumentState`, stored on snapshots

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::errors::Result;
use crate::model::{Batch, DocumentState, Session};

/// Digest of any serializable value.
///
/// ## Errors
///
/// Returns `EditGuardError::Serialization` if JSON serialization fails.
///
/// ## Example
///
/// ```
/// use editguard_core::snapshot::digest::compute_digest;
///
/// let digest = compute_digest(&vec!["a", "b"]).unwrap();
/// assert_eq!(digest.len(), 64);
/// ```
pub fn compute_digest<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let canonical = serde_json::to_vec(value)?;
    Ok(hash_bytes(&canonical))
}

pub fn compute_session_digest(session: &Session) -> Result<String> {
    compute_digest(session)
}

pub fn compute_batch_digest(batch: &Batch) -> Result<String> {
    compute_digest(batch)
}

/// Digest of a whole state, including its checksum cache.
///
/// # Errors
///
/// Same as [`compute_digest`].
pub fn compute_state_digest(state: &DocumentState) -> Result<String> {
    compute_digest(state)
}

fn hash_bytes(input: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input);
    hex::encode(hasher.finalize())
}
