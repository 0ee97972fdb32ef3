//! Typed identifiers
//!
//! Every identifier is a UUIDv7 string, matching the ids stored on
//! sessions, changes and batches.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Generate a new time-ordered id using UUIDv7
            pub fn new() -> Self {
                Self(Uuid::now_v7().to_string())
            }

            /// Get the string representation
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Create from an existing string (for deserialization)
            pub fn from_string(s: impl Into<String>) -> Self {
                Self(s.into())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(
    /// Identifier of one transaction (one submission attempt)
    TransactionId
);

define_id!(
    /// Identifier of a backup snapshot held in the snapshot ring
    SnapshotId
);

define_id!(
    /// Identifier of a change submission, stable across retry attempts
    SubmissionId
);

define_id!(
    /// Identifier of a classified error record
    ErrorId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        let a = TransactionId::new();
        let b = TransactionId::new();
        assert_ne!(a, b);
        assert!(!a.as_str().is_empty());
    }

    #[test]
    fn test_ids_are_uuid_shaped() {
        let id = SnapshotId::new();
        assert_eq!(id.as_str().len(), 36);
        assert!(Uuid::parse_str(id.as_str()).is_ok());
    }

    #[test]
    fn test_display_matches_as_str() {
        let id = SubmissionId::from_string("sub-1");
        assert_eq!(format!("{}", id), "sub-1");
        assert_eq!(id.as_str(), "sub-1");
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let id = ErrorId::from_string("err-7");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"err-7\"");
        let back: ErrorId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
