//! Error handling for editguard-store
//!
//! Wraps editguard-core's EditGuardError with store-specific helpers

use editguard_core::errors::EditGuardError;
use std::path::Path;

/// Result type alias using EditGuardError
pub type Result<T> = std::result::Result<T, EditGuardError>;

/// Create an IO error tagged with the failing operation
pub fn io_error(operation: &str, err: std::io::Error) -> EditGuardError {
    EditGuardError::io(operation, err)
}

/// Create an error for a file whose content cannot be decoded
pub fn corrupt_file(path: &Path, err: serde_json::Error) -> EditGuardError {
    EditGuardError::DataCorruption {
        location: path.display().to_string(),
        message: format!("cannot decode: {}", err),
    }
}

/// Create a missing snapshot file error
pub fn snapshot_missing(snapshot_id: &str) -> EditGuardError {
    EditGuardError::SnapshotNotFound {
        snapshot_id: snapshot_id.to_string(),
    }
}
