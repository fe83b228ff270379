//! Corruption detection and repair
//!
//! A check runs every [`RepairStrategy`] detector over a snapshot. When
//! anything is flagged, the snapshot is backed up and the strategies repair a
//! working copy in priority order. Live checks then write back only the
//! records a repair changed, and only while each still holds what was read.

pub mod graph;
pub mod report;
pub mod snapshot;
pub mod strategies;

pub use graph::{DataGraph, Edge, GraphError, Node, NodeId, NodePath, Num, WalkEvent};
pub use report::{
    AppliedFix, DetectorFinding, FailedRepair, IntegrityReport, Issue, RepairOutcome, Severity,
};
pub use snapshot::{Payload, Snapshot, SnapshotRecord};
pub use strategies::{RepairStrategy, StrategyOutcome};

use crate::backup::BackupManager;
use crate::errors::{RecoveryHint, Result, StoreError};
use async_trait::async_trait;
use quotevault_core::{ComponentCatalog, RecordId, StoreName};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Tag of the backup taken before a repair
pub const PRE_REPAIR_TAG: &str = "pre_repair";

/// One record a repair changed, with the version it was read as
#[derive(Debug, Clone)]
pub struct RepairedRecord {
    pub store: StoreName,
    pub original: SnapshotRecord,
    pub repaired: SnapshotRecord,
}

/// What a repair write-back did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairCommit {
    pub written: usize,
    /// Records left alone because they changed or vanished since the export
    pub stale: usize,
}

/// Where live data is read from and repaired data written back to
#[async_trait]
pub trait LiveStore: Send + Sync {
    async fn export_snapshot(&self) -> Result<Snapshot>;

    /// Write each repaired record whose stored payload still equals its
    /// `original`; anything else is counted as stale
    async fn commit_repairs(&self, repairs: &[RepairedRecord]) -> Result<RepairCommit>;

    /// Write every record of `snapshot` over the live store
    async fn commit_snapshot(&self, snapshot: &Snapshot) -> Result<()>;
}

/// Records touched by an applied fix, paired with their exported version
fn changed_records(snapshot: &Snapshot, outcome: &RepairOutcome) -> Vec<RepairedRecord> {
    let touched: BTreeSet<(StoreName, &RecordId)> = outcome
        .applied_repairs
        .iter()
        .map(|fix| (fix.store, &fix.record))
        .collect();
    snapshot
        .iter()
        .zip(outcome.repaired_snapshot.iter())
        .filter(|((store, original), _)| touched.contains(&(*store, &original.id)))
        .map(|((store, original), (_, repaired))| RepairedRecord {
            store,
            original: original.clone(),
            repaired: repaired.clone(),
        })
        .collect()
}

/// What an integrity check looks at
pub enum CheckTarget<'a> {
    /// The live store; repairs are committed back
    Live(&'a dyn LiveStore),
    /// A detached snapshot; repairs are reported but never committed
    Snapshot(Snapshot),
}

pub struct DataIntegrityManager {
    backups: Arc<BackupManager>,
    catalog: ComponentCatalog,
}

impl DataIntegrityManager {
    pub fn new(backups: Arc<BackupManager>, catalog: ComponentCatalog) -> Self {
        Self { backups, catalog }
    }

    pub fn catalog(&self) -> &ComponentCatalog {
        &self.catalog
    }

    pub fn backups(&self) -> &Arc<BackupManager> {
        &self.backups
    }

    /// Run every detector, keeping only those that flagged something
    pub fn detect(&self, snapshot: &Snapshot) -> Vec<DetectorFinding> {
        RepairStrategy::ALL
            .iter()
            .filter_map(|strategy| {
                let issues = strategy.detect(snapshot, &self.catalog);
                (!issues.is_empty()).then(|| DetectorFinding {
                    detector: strategy.name(),
                    severity: strategy.severity(),
                    issues,
                })
            })
            .collect()
    }

    /// Repair a copy of `snapshot`; each strategy re-detects against the
    /// working copy so earlier repairs can resolve or reveal later issues
    pub fn perform_automatic_repair(&self, snapshot: &Snapshot) -> RepairOutcome {
        let mut working = snapshot.clone();
        let mut applied_repairs = Vec::new();
        let mut failed_repairs = Vec::new();

        for strategy in RepairStrategy::ALL {
            if strategy.detect(&working, &self.catalog).is_empty() {
                continue;
            }
            let outcome = strategy.repair(&mut working, &self.catalog);
            for failure in &outcome.failures {
                warn!(
                    strategy = failure.strategy,
                    store = %failure.store,
                    record = %failure.record,
                    reason = %failure.reason,
                    "Repair strategy failed"
                );
            }
            applied_repairs.extend(outcome.fixes);
            failed_repairs.extend(outcome.failures);
        }

        let unresolved = RepairStrategy::ALL
            .iter()
            .flat_map(|strategy| strategy.detect(&working, &self.catalog))
            .collect();

        RepairOutcome {
            repaired_snapshot: working,
            applied_repairs,
            failed_repairs,
            unresolved,
        }
    }

    pub async fn perform_integrity_check(&self, target: CheckTarget<'_>) -> Result<IntegrityReport> {
        let (snapshot, live) = match target {
            CheckTarget::Live(live) => (live.export_snapshot().await?, Some(live)),
            CheckTarget::Snapshot(snapshot) => (snapshot, None),
        };

        let findings = self.detect(&snapshot);
        if findings.is_empty() {
            return Ok(IntegrityReport::clean());
        }
        let issue_count: usize = findings.iter().map(|f| f.issues.len()).sum();
        warn!(issues = issue_count, detectors = findings.len(), "Integrity issues detected");

        let backup = self.backups.create_backup(&snapshot, PRE_REPAIR_TAG)?;
        let outcome = self.perform_automatic_repair(&snapshot);

        if !outcome.unresolved.is_empty() && outcome.applied_repairs.is_empty() {
            return Err(StoreError::UnrepairableCorruption {
                issues: outcome.unresolved.iter().map(ToString::to_string).collect(),
                recovery_hint: RecoveryHint::RestoreBackup,
            });
        }

        let mut commit = RepairCommit::default();
        if let Some(live) = live {
            let repairs = changed_records(&snapshot, &outcome);
            if !repairs.is_empty() {
                commit = live.commit_repairs(&repairs).await?;
            }
            if commit.stale > 0 {
                warn!(stale = commit.stale, "Skipped repairs of records changed since the check read them");
            }
        }
        let committed = commit.written > 0;
        info!(
            applied = outcome.applied_repairs.len(),
            failed = outcome.failed_repairs.len(),
            unresolved = outcome.unresolved.len(),
            written = commit.written,
            backup = %backup.id,
            "Integrity repair finished"
        );

        Ok(IntegrityReport {
            findings,
            backup_id: Some(backup.id),
            repair: Some(outcome),
            committed,
            stale_records: commit.stale,
        })
    }
}
