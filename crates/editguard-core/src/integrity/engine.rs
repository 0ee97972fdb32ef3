use editguard_core_types::schema::{AUDIT_INTEGRITY_PASS, AUDIT_INTEGRITY_REPAIR};
use editguard_core_types::SnapshotId;
use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use super::checks;
use super::repair::{self, RepairOutcome};
use super::report::{ExecutedRepair, IntegrityReport, IntegrityStats, RepairAction, RepairKind};
use crate::audit::AuditEntry;
use crate::clock::Clock;
use crate::config::IntegrityConfig;
use crate::errors::{EditGuardError, Result, Severity};
use crate::model::DocumentState;
use crate::retention::RetentionLog;
use crate::snapshot::{BackupSnapshot, SnapshotScope, SnapshotStore};
use crate::{log_op_end, log_op_start};

/// Options for one verification pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerifyOptions {
    /// Also compare cached checksums and scan content
    pub deep: bool,
    /// Execute safe repairs, then re-verify
    pub repair_mode: bool,
}

impl VerifyOptions {
    pub fn quick() -> Self {
        Self::default()
    }

    pub fn deep() -> Self {
        Self {
            deep: true,
            repair_mode: false,
        }
    }

    pub fn repairing(mut self) -> Self {
        self.repair_mode = true;
        self
    }
}

/// Integrity Verification & Repair Engine
///
/// Shares the snapshot ring with the Transaction Manager. Every pass and every
/// executed repair is appended to an audit trail.
pub struct IntegrityEngine {
    config: IntegrityConfig,
    clock: Arc<dyn Clock>,
    snapshots: Arc<SnapshotStore>,
    audit: Mutex<RetentionLog<AuditEntry>>,
    /// Snapshots taken of a state just before repairing it
    pre_repair: Mutex<HashSet<SnapshotId>>,
}

impl IntegrityEngine {
    pub fn new(
        config: IntegrityConfig,
        clock: Arc<dyn Clock>,
        snapshots: Arc<SnapshotStore>,
    ) -> Self {
        let audit = Mutex::new(RetentionLog::new(config.audit_log));
        Self {
            config,
            clock,
            snapshots,
            audit,
            pre_repair: Mutex::new(HashSet::new()),
        }
    }

    /// Run every check without touching state or the audit trail
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if an entity cannot be hashed (deep only).
    pub fn inspect(&self, state: &DocumentState, deep: bool) -> Result<IntegrityReport> {
        let now = self.clock.now();
        let mut errors = Vec::new();
        errors.extend(checks::find_missing_fields(state));
        errors.extend(checks::find_index_corruption(state));
        errors.extend(checks::find_duplicate_ids(state));
        errors.extend(checks::find_orphaned_data(state));
        errors.extend(checks::find_broken_references(state));
        errors.extend(checks::find_stale_relationships(state));
        errors.extend(checks::find_duplicate_batches(state));
        errors.extend(checks::find_future_timestamps(state, now, &self.config));

        let mut warnings = checks::find_count_mismatches(state, self.config.count_tolerance);
        let mut stats = IntegrityStats {
            sessions: state.sessions.len(),
            changes: state.change_count(),
            batches: state.batches.len(),
            checksums_verified: 0,
        };

        if deep {
            let (mismatches, stale, compared) = checks::find_checksum_mismatches(state)?;
            errors.extend(mismatches);
            warnings.extend(stale);
            warnings.extend(checks::find_suspicious_content(state, &self.config));
            stats.checksums_verified = compared;
        }

        Ok(IntegrityReport::from_findings(
            deep, errors, warnings, stats, now,
        ))
    }

    /// Verify, and in repair mode run safe repairs and re-verify
    ///
    /// A full snapshot is taken before the first repair. Unsafe repairs are
    /// listed in the report but never executed here.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if hashing fails.
    pub fn verify(&self, state: &mut DocumentState, options: VerifyOptions) -> Result<IntegrityReport> {
        let started = Instant::now();
        log_op_start!("integrity_verify", deep = options.deep, repair_mode = options.repair_mode);

        let mut report = self.inspect(state, options.deep)?;
        self.record_pass(&report, "verification");

        let safe: Vec<RepairAction> = report.repairs.iter().filter(|r| r.safe).cloned().collect();
        if options.repair_mode && !safe.is_empty() {
            let backup = self.snapshots.create_snapshot(state)?;
            self.remember_pre_repair(backup.id.clone());
            let now = self.clock.now();
            let mut touched = BTreeSet::new();
            for action in safe {
                let outcome = repair::execute(&action, state, None, now);
                touched.extend(outcome.touched.iter().cloned());
                report.executed_repairs.push(self.record_repair(action, outcome));
            }
            repair::refresh_cached(state, &touched)?;

            let post = self.inspect(state, options.deep)?;
            self.record_pass(&post, "re-verification");
            report.post_repair = Some(Box::new(post));
        }

        let final_level = report.final_report().corruption_level;
        log_op_end!(
            "integrity_verify",
            duration_ms = started.elapsed().as_millis() as u64,
            errors = report.errors.len(),
            repaired = report.executed_repairs.len(),
            level = ?final_level
        );
        Ok(report)
    }

    /// Run one repair after explicit confirmation, safe or not
    ///
    /// Actions flagged `backup_required` need a full snapshot in the ring.
    /// Restore-from-backup restores [`restorable_snapshot`](Self::restorable_snapshot).
    ///
    /// # Errors
    ///
    /// Returns `BackupRequired` if no suitable snapshot exists, or
    /// `Serialization` if cached checksums cannot be refreshed.
    pub fn execute_confirmed(
        &self,
        state: &mut DocumentState,
        action: &RepairAction,
    ) -> Result<ExecutedRepair> {
        let backup = if action.kind == RepairKind::RestoreFromBackup {
            Some(self.restorable_snapshot()?.ok_or_else(|| EditGuardError::BackupRequired {
                reason: format!(
                    "{} at {} needs a full snapshot free of critical findings",
                    action.kind.as_str(),
                    action.target
                ),
            })?)
        } else {
            if action.backup_required && self.snapshots.latest_full().is_none() {
                return Err(EditGuardError::BackupRequired {
                    reason: format!("{} at {} needs a full snapshot", action.kind.as_str(), action.target),
                });
            }
            None
        };
        let outcome = repair::execute(action, state, backup.as_deref(), self.clock.now());
        repair::refresh_cached(state, &outcome.touched)?;
        Ok(self.record_repair(action.clone(), outcome))
    }

    /// Newest full snapshot fit to restore from
    ///
    /// Skips snapshots taken right before a repair, since they hold the
    /// state being repaired, and any whose content has a Critical finding.
    /// The checksum is not checked here; restoring a tampered snapshot is
    /// refused when it is applied.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if a snapshot's content cannot be inspected.
    pub fn restorable_snapshot(&self) -> Result<Option<Arc<BackupSnapshot>>> {
        let excluded = self.lock_pre_repair().clone();
        for snapshot in self.snapshots.list().into_iter().rev() {
            if snapshot.scope != SnapshotScope::Full || excluded.contains(&snapshot.id) {
                continue;
            }
            let findings = self.inspect(&snapshot.state, false)?;
            if findings.max_severity() == Some(Severity::Critical) {
                tracing::debug!(
                    component = module_path!(),
                    snapshot_id = %snapshot.id,
                    "skipping snapshot with critical findings"
                );
                continue;
            }
            return Ok(Some(snapshot));
        }
        Ok(None)
    }

    /// Audit entries for passes and repairs, oldest first
    pub fn audit_trail(&self) -> Vec<AuditEntry> {
        let mut log = self.lock_audit();
        log.evict_expired(self.clock.now());
        log.iter().cloned().collect()
    }

    pub fn snapshots(&self) -> &Arc<SnapshotStore> {
        &self.snapshots
    }

    fn record_pass(&self, report: &IntegrityReport, label: &str) {
        let severity = report.max_severity().unwrap_or(Severity::Low);
        let description = format!(
            "{}: {} error(s), {} warning(s), corruption {:?}",
            label,
            report.errors.len(),
            report.warnings.len(),
            report.corruption_level
        );
        tracing::info!(
            component = module_path!(),
            op = "integrity_verify",
            valid = report.valid,
            errors = report.errors.len(),
            warnings = report.warnings.len(),
            level = ?report.corruption_level,
            "{}",
            label
        );
        let now = self.clock.now();
        self.lock_audit().push(
            now,
            AuditEntry::new(now, AUDIT_INTEGRITY_PASS, severity, "state", description),
        );
    }

    fn record_repair(&self, action: RepairAction, outcome: RepairOutcome) -> ExecutedRepair {
        let severity = if outcome.success {
            Severity::Medium
        } else {
            Severity::High
        };
        if outcome.success {
            tracing::info!(
                component = module_path!(),
                repair = action.kind.as_str(),
                target = %action.target,
                outcome = %outcome.outcome,
                "repair executed"
            );
        } else {
            tracing::warn!(
                component = module_path!(),
                repair = action.kind.as_str(),
                target = %action.target,
                outcome = %outcome.outcome,
                "repair failed"
            );
        }
        let now = self.clock.now();
        self.lock_audit().push(
            now,
            AuditEntry::new(
                now,
                AUDIT_INTEGRITY_REPAIR,
                severity,
                action.target.to_string(),
                format!("{}: {}", action.kind.as_str(), outcome.outcome),
            ),
        );
        ExecutedRepair {
            action,
            success: outcome.success,
            outcome: outcome.outcome,
            error: outcome.error,
        }
    }

    fn remember_pre_repair(&self, id: SnapshotId) {
        let held: HashSet<SnapshotId> = self.snapshots.list().iter().map(|s| s.id.clone()).collect();
        let mut pre_repair = self.lock_pre_repair();
        pre_repair.retain(|known| held.contains(known));
        pre_repair.insert(id);
    }

    fn lock_pre_repair(&self) -> MutexGuard<'_, HashSet<SnapshotId>> {
        self.pre_repair.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_audit(&self) -> MutexGuard<'_, RetentionLog<AuditEntry>> {
        self.audit.lock().unwrap_or_else(|e| e.into_inner())
    }
}
