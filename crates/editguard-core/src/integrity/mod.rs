//! Integrity Verification & Repair Engine
//!
//! Scans document state for structural, referential, temporal and checksum
//! violations, classifies the overall corruption level, proposes one repair
//! per finding and optionally executes the safe ones.

pub mod checks;
pub mod engine;
mod repair;
pub mod report;

pub use engine::{IntegrityEngine, VerifyOptions};
pub use report::{
    CorruptionLevel, ExecutedRepair, IntegrityError, IntegrityErrorKind, IntegrityReport,
    IntegrityStats, IntegrityWarning, Location, RepairAction, RepairKind, WarningKind,
};
