use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::Severity;

/// Where in the document state a finding applies
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Location {
    State,
    /// Keyed by the session map key
    Session { session: String },
    /// A change by position inside its session
    Change { session: String, index: usize },
    /// Keyed by the batch index key
    Batch { group: String },
    Snapshot { id: String },
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Location::State => f.write_str("state"),
            Location::Session { session } => write!(f, "session:{}", session),
            Location::Change { session, index } => {
                write!(f, "session:{}/change:{}", session, index)
            }
            Location::Batch { group } => write!(f, "batch:{}", group),
            Location::Snapshot { id } => write!(f, "snapshot:{}", id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IntegrityErrorKind {
    MissingField,
    DuplicateId,
    OrphanedData,
    FutureTimestamp,
    ChecksumMismatch,
    CorruptedData,
    BrokenReference,
    StaleRelationship,
    DuplicateBatch,
}

impl IntegrityErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrityErrorKind::MissingField => "missing-field",
            IntegrityErrorKind::DuplicateId => "duplicate-id",
            IntegrityErrorKind::OrphanedData => "orphaned-data",
            IntegrityErrorKind::FutureTimestamp => "future-timestamp",
            IntegrityErrorKind::ChecksumMismatch => "checksum-mismatch",
            IntegrityErrorKind::CorruptedData => "corrupted-data",
            IntegrityErrorKind::BrokenReference => "broken-reference",
            IntegrityErrorKind::StaleRelationship => "stale-relationship",
            IntegrityErrorKind::DuplicateBatch => "duplicate-batch",
        }
    }

    /// Severity a check assigns to this kind
    pub fn severity(&self) -> Severity {
        match self {
            IntegrityErrorKind::CorruptedData => Severity::Critical,
            IntegrityErrorKind::MissingField
            | IntegrityErrorKind::DuplicateId
            | IntegrityErrorKind::ChecksumMismatch => Severity::High,
            IntegrityErrorKind::OrphanedData | IntegrityErrorKind::BrokenReference => {
                Severity::Medium
            }
            IntegrityErrorKind::FutureTimestamp
            | IntegrityErrorKind::StaleRelationship
            | IntegrityErrorKind::DuplicateBatch => Severity::Low,
        }
    }

    /// The one repair that addresses this kind
    pub fn repair_kind(&self) -> RepairKind {
        match self {
            IntegrityErrorKind::MissingField | IntegrityErrorKind::FutureTimestamp => {
                RepairKind::SanitizeData
            }
            IntegrityErrorKind::DuplicateId => RepairKind::RegenerateIds,
            IntegrityErrorKind::OrphanedData => RepairKind::RemoveCorrupted,
            IntegrityErrorKind::ChecksumMismatch => RepairKind::UpdateChecksums,
            IntegrityErrorKind::CorruptedData => RepairKind::RestoreFromBackup,
            IntegrityErrorKind::BrokenReference => RepairKind::FixReferences,
            IntegrityErrorKind::StaleRelationship => RepairKind::RecreateRelationships,
            IntegrityErrorKind::DuplicateBatch => RepairKind::MergeDuplicates,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityError {
    pub kind: IntegrityErrorKind,
    pub severity: Severity,
    pub location: Location,
    pub description: String,
    /// Ids of the records involved
    pub affected: Vec<String>,
}

impl IntegrityError {
    pub fn new(
        kind: IntegrityErrorKind,
        location: Location,
        description: impl Into<String>,
        affected: Vec<String>,
    ) -> Self {
        Self {
            kind,
            severity: kind.severity(),
            location,
            description: description.into(),
            affected,
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WarningKind {
    /// Stored word/char count differs from the recomputed one beyond tolerance
    CountMismatch,
    /// Content matches an injection-like pattern
    SuspiciousContent,
    /// Cached checksum for an entity that no longer exists
    StaleChecksumEntry,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityWarning {
    pub kind: WarningKind,
    pub location: Location,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RepairKind {
    RemoveCorrupted,
    RestoreFromBackup,
    RegenerateIds,
    FixReferences,
    MergeDuplicates,
    RecreateRelationships,
    UpdateChecksums,
    SanitizeData,
}

impl RepairKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepairKind::RemoveCorrupted => "remove-corrupted",
            RepairKind::RestoreFromBackup => "restore-from-backup",
            RepairKind::RegenerateIds => "regenerate-ids",
            RepairKind::FixReferences => "fix-references",
            RepairKind::MergeDuplicates => "merge-duplicates",
            RepairKind::RecreateRelationships => "recreate-relationships",
            RepairKind::UpdateChecksums => "update-checksums",
            RepairKind::SanitizeData => "sanitize-data",
        }
    }

    /// Safe repairs may run without confirmation
    pub fn is_safe(&self) -> bool {
        !matches!(
            self,
            RepairKind::RestoreFromBackup | RepairKind::MergeDuplicates
        )
    }

    pub fn requires_backup(&self) -> bool {
        !self.is_safe()
    }
}

/// A proposed remediation for one finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairAction {
    pub kind: RepairKind,
    pub target: Location,
    pub safe: bool,
    pub backup_required: bool,
    /// Kind of the finding this action addresses
    pub addresses: IntegrityErrorKind,
}

impl RepairAction {
    pub fn for_error(error: &IntegrityError) -> Self {
        let kind = error.kind.repair_kind();
        Self {
            kind,
            target: error.location.clone(),
            safe: kind.is_safe(),
            backup_required: kind.requires_backup(),
            addresses: error.kind,
        }
    }
}

/// Result of running one repair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutedRepair {
    pub action: RepairAction,
    pub success: bool,
    pub outcome: String,
    /// New finding raised while repairing, e.g. a refused snapshot
    pub error: Option<IntegrityError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorruptionLevel {
    None,
    Minor,
    Moderate,
    Severe,
    Critical,
}

impl CorruptionLevel {
    /// Total function of the error severities
    ///
    /// Any Critical is Critical; more than two High is Severe; any High or
    /// more than five Medium is Moderate; any other error is Minor.
    pub fn classify(errors: &[IntegrityError]) -> Self {
        let count = |s: Severity| errors.iter().filter(|e| e.severity == s).count();
        let (critical, high, medium) = (
            count(Severity::Critical),
            count(Severity::High),
            count(Severity::Medium),
        );
        if critical > 0 {
            CorruptionLevel::Critical
        } else if high > 2 {
            CorruptionLevel::Severe
        } else if high > 0 || medium > 5 {
            CorruptionLevel::Moderate
        } else if !errors.is_empty() {
            CorruptionLevel::Minor
        } else {
            CorruptionLevel::None
        }
    }
}

/// Entity counts seen by one pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityStats {
    pub sessions: usize,
    pub changes: usize,
    pub batches: usize,
    pub checksums_verified: usize,
}

/// Result of one verification pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub valid: bool,
    pub deep: bool,
    pub errors: Vec<IntegrityError>,
    pub warnings: Vec<IntegrityWarning>,
    /// One proposed action per error, in error order
    pub repairs: Vec<RepairAction>,
    pub corruption_level: CorruptionLevel,
    pub stats: IntegrityStats,
    pub executed_repairs: Vec<ExecutedRepair>,
    /// Non-repairing pass run after executed repairs
    pub post_repair: Option<Box<IntegrityReport>>,
    pub checked_at: DateTime<Utc>,
}

impl IntegrityReport {
    pub(crate) fn from_findings(
        deep: bool,
        errors: Vec<IntegrityError>,
        warnings: Vec<IntegrityWarning>,
        stats: IntegrityStats,
        checked_at: DateTime<Utc>,
    ) -> Self {
        let repairs = errors.iter().map(RepairAction::for_error).collect();
        Self {
            valid: errors.is_empty(),
            deep,
            corruption_level: CorruptionLevel::classify(&errors),
            errors,
            warnings,
            repairs,
            stats,
            executed_repairs: Vec::new(),
            post_repair: None,
            checked_at,
        }
    }

    /// Equal in everything but timestamps
    pub fn findings_eq(&self, other: &IntegrityReport) -> bool {
        self.valid == other.valid
            && self.deep == other.deep
            && self.errors == other.errors
            && self.warnings == other.warnings
            && self.repairs == other.repairs
            && self.corruption_level == other.corruption_level
            && self.stats == other.stats
            && self.executed_repairs == other.executed_repairs
            && match (&self.post_repair, &other.post_repair) {
                (Some(a), Some(b)) => a.findings_eq(b),
                (None, None) => true,
                _ => false,
            }
    }

    pub fn count(&self, kind: IntegrityErrorKind) -> usize {
        self.errors.iter().filter(|e| e.kind == kind).count()
    }

    /// Highest error severity, if any
    pub fn max_severity(&self) -> Option<Severity> {
        self.errors.iter().map(|e| e.severity).max()
    }

    /// The report that describes the state as it is now
    pub fn final_report(&self) -> &IntegrityReport {
        match &self.post_repair {
            Some(post) => post.final_report(),
            None => self,
        }
    }
}
