//! Findings and outcomes of integrity checks

use super::snapshot::Snapshot;
use crate::backup::BackupId;
use quotevault_core::{RecordId, StoreName};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// One problem found in one record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub store: StoreName,
    pub record: RecordId,
    /// Location inside the payload (`$` for the whole payload)
    pub path: String,
    pub description: String,
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} at {}: {}",
            self.store, self.record, self.path, self.description
        )
    }
}

/// Everything one detector flagged
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectorFinding {
    pub detector: &'static str,
    pub severity: Severity,
    pub issues: Vec<Issue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedFix {
    pub strategy: &'static str,
    pub store: StoreName,
    pub record: RecordId,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedRepair {
    pub strategy: &'static str,
    pub store: StoreName,
    pub record: RecordId,
    pub reason: String,
}

/// Result of running the repair pipeline over a snapshot
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairOutcome {
    #[serde(skip)]
    pub repaired_snapshot: Snapshot,
    pub applied_repairs: Vec<AppliedFix>,
    pub failed_repairs: Vec<FailedRepair>,
    /// Issues still present after every strategy ran
    pub unresolved: Vec<Issue>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    pub findings: Vec<DetectorFinding>,
    /// Backup taken before repairing
    pub backup_id: Option<BackupId>,
    pub repair: Option<RepairOutcome>,
    /// Whether repaired records were written back to the live store
    pub committed: bool,
    /// Repaired records not written because they changed after being read
    pub stale_records: usize,
}

impl IntegrityReport {
    pub fn clean() -> Self {
        Self {
            findings: Vec::new(),
            backup_id: None,
            repair: None,
            committed: false,
            stale_records: 0,
        }
    }

    pub fn issue_count(&self) -> usize {
        self.findings.iter().map(|f| f.issues.len()).sum()
    }

    pub fn is_clean(&self) -> bool {
        self.issue_count() == 0
    }

    pub fn max_severity(&self) -> Option<Severity> {
        self.findings.iter().map(|f| f.severity).max()
    }
}
