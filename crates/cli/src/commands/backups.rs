use crate::output::{human_bytes, Output};
use clap::Subcommand;
use quotevault_core::StoreName;
use quotevault_store::{BackupId, LiveStore, Snapshot, StorageManager};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Subcommand)]
pub enum BackupCommands {
    /// List backups, newest first
    List,

    /// Show what a backup holds
    Restore {
        /// Backup id as printed by `backups list`
        id: BackupId,

        /// Write every backed-up record over the live store
        #[arg(long)]
        apply: bool,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RestoreSummary {
    id: BackupId,
    tag: String,
    records: BTreeMap<StoreName, usize>,
    applied: bool,
}

fn record_counts(snapshot: &Snapshot) -> BTreeMap<StoreName, usize> {
    StoreName::ALL
        .into_iter()
        .map(|store| (store, snapshot.records(store).len()))
        .filter(|(_, count)| *count > 0)
        .collect()
}

impl BackupCommands {
    pub async fn execute(self, manager: &StorageManager, output: Output) -> eyre::Result<()> {
        match self {
            BackupCommands::List => {
                let backups = manager.backups().list_backups();
                output.emit(&backups, || {
                    if backups.is_empty() {
                        return vec!["No backups".to_string()];
                    }
                    backups
                        .iter()
                        .map(|b| {
                            format!(
                                "{}  {:<12} {}  {}",
                                b.id,
                                b.tag,
                                b.created_at.format("%Y-%m-%d %H:%M:%S"),
                                human_bytes(b.size_bytes)
                            )
                        })
                        .collect()
                })
            }
            BackupCommands::Restore { id, apply } => {
                let restored = manager.backups().restore_backup(id)?;
                if apply {
                    manager.commit_snapshot(&restored.snapshot).await?;
                    tracing::info!(backup = %id, "Backup written to the live store");
                }
                let summary = RestoreSummary {
                    id,
                    tag: restored.metadata.tag.clone(),
                    records: record_counts(&restored.snapshot),
                    applied: apply,
                };
                output.emit(&summary, || {
                    let mut lines = vec![format!(
                        "Backup {} ({}, {})",
                        summary.id,
                        summary.tag,
                        restored.metadata.created_at.to_rfc3339()
                    )];
                    for (store, count) in &summary.records {
                        lines.push(format!("  {store:<12} {count} record(s)"));
                    }
                    if summary.applied {
                        lines.push("Written to the live store".to_string());
                    }
                    lines
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quotevault_core::RecordId;
    use quotevault_store::integrity::SnapshotRecord;
    use serde_json::json;

    #[test]
    fn counts_skip_empty_stores() {
        let mut snapshot = Snapshot::new();
        for i in 0..3 {
            snapshot.push(
                StoreName::Quotes,
                SnapshotRecord::from_value(RecordId::Seq(i), &json!({}), 0),
            );
        }
        let counts = record_counts(&snapshot);
        assert_eq!(counts.len(), 1);
        assert_eq!(counts[&StoreName::Quotes], 3);
    }
}
