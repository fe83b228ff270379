//! Cleanup, quota recovery, statistics and integrity checks

use super::retention::{self, CleanupReport, RetentionPolicy};
use super::{now_ms, quota, record_from_stored, StorageManager, StorageStats};
use crate::backend::{
    BackendFailure, BackendKind, FallbackEntry, FallbackStore, Mutation, ScanControl,
    StoredRecord,
};
use crate::errors::{RecoveryHint, Result, StoreError};
use crate::integrity::{
    CheckTarget, IntegrityReport, LiveStore, Payload, RepairCommit, RepairedRecord, Snapshot,
    SnapshotRecord,
};
use async_trait::async_trait;
use quotevault_core::{Record, RecordId, StoreName};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use tracing::{info, warn};

impl StorageManager {
    /// Apply a retention policy to every store it names
    pub async fn cleanup(&self, policy: RetentionPolicy) -> Result<CleanupReport> {
        let mut report = CleanupReport::default();
        match self.backend_kind() {
            BackendKind::Transactional => {
                if let Some(cutoff) = policy.history_cutoff(now_ms()) {
                    let removed = self
                        .execute("cleanup", Some(StoreName::History), |connection| async move {
                            retention::expire_before(connection.as_ref(), StoreName::History, cutoff).await
                        })
                        .await?;
                    report.add(StoreName::History, removed);
                }
                for (store, keep) in policy.keep_counts() {
                    let Some(keep) = keep else { continue };
                    let removed = self
                        .execute("cleanup", Some(store), |connection| async move {
                            retention::trim_to(connection.as_ref(), store, keep).await
                        })
                        .await?;
                    report.add(store, removed);
                }
            }
            BackendKind::Fallback => {
                for (store, keep) in policy.keep_counts() {
                    let Some(keep) = keep else { continue };
                    let removed = self
                        .execute_fallback("cleanup", Some(store), |fallback| {
                            retention::trim_fallback(fallback, store, keep)
                        })
                        .await?;
                    report.add(store, removed);
                }
            }
            BackendKind::Unavailable => {
                return Err(StoreError::unavailable("no storage backend is usable"))
            }
        }
        info!(removed = report.total(), "Cleanup finished");
        Ok(report)
    }

    /// Trim stores in cascade order, retry the write once if anything was
    /// freed, then park the record in the fallback medium
    pub(super) async fn recover_from_quota(
        &self,
        store: StoreName,
        id: Option<RecordId>,
        payload: Value,
        raw: String,
    ) -> Result<Option<(Record, BackendKind)>> {
        let mut freed = 0;
        for (target, keep) in quota::cascade(self.config().retention, store) {
            let trimmed = self
                .execute("quota cleanup", Some(target), |connection| async move {
                    retention::trim_to(connection.as_ref(), target, keep).await
                })
                .await;
            match trimmed {
                Ok(0) => {}
                Ok(removed) => {
                    info!(store = %target, removed, keep, "Trimmed store to recover quota");
                    freed += removed;
                }
                Err(err) => warn!(store = %target, error = %err, "Quota cleanup step failed"),
            }
        }

        if freed > 0 {
            let retried = self
                .execute("save", Some(store), |connection| {
                    let (id, raw) = (id.clone(), raw.clone());
                    async move { connection.put(store, id, raw).await }
                })
                .await;
            match retried {
                Ok(row) => {
                    if let Some(record) = record_from_stored(&row) {
                        info!(store = %store, freed, "Write succeeded after quota cleanup");
                        return Ok(Some((record, BackendKind::Transactional)));
                    }
                }
                Err(err) => warn!(store = %store, error = %err, "Write still failing after quota cleanup"),
            }
        } else {
            warn!(store = %store, "Quota cleanup found nothing to remove");
        }

        self.save_to_fallback(store, id, payload).map_err(|failure| {
            self.inner.errors.record("fallback save", &failure);
            tracing::error!(store = %store, error = %failure, "Primary and fallback storage exhausted");
            StoreError::StorageExhausted {
                store,
                reason: failure.to_string(),
                recovery_hint: RecoveryHint::RunCleanup,
            }
        })
    }

    pub async fn get_storage_stats(&self) -> Result<StorageStats> {
        let kind = self.backend_kind();
        let mut counts: BTreeMap<StoreName, usize> = BTreeMap::new();
        let mut stored_bytes = 0;

        match kind {
            BackendKind::Transactional => {
                let (primary, bytes) = self
                    .execute("stats", None, |connection| async move {
                        let mut counts = Vec::with_capacity(StoreName::ALL.len());
                        for store in StoreName::ALL {
                            counts.push((store, connection.count(store).await?));
                        }
                        let bytes = connection.stored_bytes().await?;
                        Ok::<_, BackendFailure>((counts, bytes))
                    })
                    .await?;
                counts.extend(primary);
                stored_bytes = bytes;
            }
            BackendKind::Fallback => {}
            BackendKind::Unavailable => {
                return Err(StoreError::unavailable("no storage backend is usable"))
            }
        }

        let fallback_bytes = {
            let fallback = self.inner.fallback.lock();
            for store in StoreName::ALL {
                let parked = fallback.count(store).unwrap_or(0);
                *counts.entry(store).or_default() += parked;
            }
            fallback.usage_bytes()
        };

        Ok(StorageStats {
            backend_kind: kind,
            counts,
            stored_bytes,
            fallback_bytes,
            backups: self.backups().len(),
        })
    }

    /// Check the live store and commit whatever was repaired
    pub async fn run_integrity_check(&self) -> Result<IntegrityReport> {
        self.inner
            .integrity
            .perform_integrity_check(CheckTarget::Live(self))
            .await
    }

    /// Check a detached snapshot; nothing is committed
    pub async fn check_snapshot(&self, snapshot: Snapshot) -> Result<IntegrityReport> {
        self.inner
            .integrity
            .perform_integrity_check(CheckTarget::Snapshot(snapshot))
            .await
    }

    /// Opportunistic check after something looked wrong; never fails and
    /// never nests
    pub(super) async fn audit(&self, reason: &'static str) {
        if self.backend_kind() != BackendKind::Transactional
            || self.inner.auditing.swap(true, Ordering::SeqCst)
        {
            return;
        }
        info!(reason, "Running integrity check");
        match self.run_integrity_check().await {
            Ok(report) if report.is_clean() => {}
            Ok(report) => info!(
                issues = report.issue_count(),
                committed = report.committed,
                "Integrity check repaired stored data"
            ),
            Err(err) => {
                self.inner.errors.record_message(format!("integrity check: {err}"));
                warn!(error = %err, "Integrity check failed");
            }
        }
        self.inner.auditing.store(false, Ordering::SeqCst);
    }
}

fn fallback_snapshot(fallback: &FallbackStore) -> std::result::Result<Snapshot, BackendFailure> {
    let mut snapshot = Snapshot::new();
    for store in StoreName::ALL {
        if !FallbackStore::supports(store) {
            continue;
        }
        for entry in fallback.list(store)? {
            snapshot.push(
                store,
                SnapshotRecord::from_value(entry.id, &entry.payload, entry.created_at_ms),
            );
        }
    }
    Ok(snapshot)
}

#[async_trait]
impl LiveStore for StorageManager {
    async fn export_snapshot(&self) -> Result<Snapshot> {
        match self.backend_kind() {
            BackendKind::Transactional => {
                self.execute("export", None, |connection| async move {
                    let mut snapshot = Snapshot::new();
                    for store in StoreName::ALL {
                        let mut rows = Vec::new();
                        connection
                            .scan(store, None, &mut |row: &StoredRecord| {
                                rows.push(SnapshotRecord::from_raw(
                                    row.id.clone(),
                                    &row.raw,
                                    row.created_at_ms,
                                    row.schema_version,
                                ));
                                ScanControl::Continue
                            })
                            .await?;
                        for row in rows {
                            snapshot.push(store, row);
                        }
                    }
                    Ok::<_, BackendFailure>(snapshot)
                })
                .await
            }
            BackendKind::Fallback => self.execute_fallback("export", None, fallback_snapshot).await,
            BackendKind::Unavailable => Err(StoreError::unavailable("no storage backend is usable")),
        }
    }

    async fn commit_repairs(&self, repairs: &[RepairedRecord]) -> Result<RepairCommit> {
        let mut planned = Vec::with_capacity(repairs.len());
        for repair in repairs {
            match repair.repaired.to_value() {
                Ok(value) => planned.push((repair, value)),
                Err(err) => warn!(
                    store = %repair.store,
                    record = %repair.original.id,
                    error = %err,
                    "Skipping repaired record that cannot be written"
                ),
            }
        }

        match self.backend_kind() {
            BackendKind::Transactional => {
                let planned: Vec<(StoreName, RecordId, Payload, String)> = planned
                    .into_iter()
                    .map(|(repair, value)| {
                        (
                            repair.store,
                            repair.original.id.clone(),
                            repair.original.payload.clone(),
                            value.to_string(),
                        )
                    })
                    .collect();
                let attempted = planned.len();
                let written = self
                    .execute("commit repairs", None, |connection| {
                        let planned = planned.clone();
                        async move {
                            let mut batch = Vec::with_capacity(planned.len());
                            for (store, id, original, raw) in planned {
                                let Some(current) = connection.get(store, &id).await? else {
                                    continue;
                                };
                                let live = SnapshotRecord::from_raw(
                                    id.clone(),
                                    &current.raw,
                                    current.created_at_ms,
                                    current.schema_version,
                                );
                                if live.payload != original {
                                    continue;
                                }
                                // Dropped by the backend if the row moves on before the commit
                                batch.push(Mutation::Replace {
                                    store,
                                    id,
                                    expected: current.raw,
                                    raw,
                                });
                            }
                            if batch.is_empty() {
                                return Ok(0);
                            }
                            connection.commit(batch).await.map(|stored| stored.len())
                        }
                    })
                    .await?;
                Ok(RepairCommit {
                    written,
                    stale: attempted - written,
                })
            }
            BackendKind::Fallback => {
                let attempted = planned.len();
                let written = self
                    .execute_fallback("commit repairs", None, |fallback| {
                        let mut written = 0;
                        for (repair, value) in planned {
                            let current = fallback.get(repair.store, &repair.original.id)?;
                            let unchanged = current.is_some_and(|entry| {
                                SnapshotRecord::from_value(entry.id, &entry.payload, entry.created_at_ms)
                                    .payload
                                    == repair.original.payload
                            });
                            if unchanged
                                && fallback.replace_payload(repair.store, &repair.original.id, value)?
                            {
                                written += 1;
                            }
                        }
                        Ok(written)
                    })
                    .await?;
                Ok(RepairCommit {
                    written,
                    stale: attempted - written,
                })
            }
            BackendKind::Unavailable => Err(StoreError::unavailable("no storage backend is usable")),
        }
    }

    async fn commit_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let mut values = Vec::with_capacity(snapshot.len());
        for (store, record) in snapshot.iter() {
            match record.to_value() {
                Ok(value) => values.push((store, record, value)),
                Err(err) => warn!(store = %store, record = %record.id, error = %err, "Skipping record that cannot be written"),
            }
        }

        match self.backend_kind() {
            BackendKind::Transactional => {
                let batch: Vec<Mutation> = values
                    .into_iter()
                    .map(|(store, record, value)| Mutation::Put {
                        store,
                        id: Some(record.id.clone()),
                        raw: value.to_string(),
                    })
                    .collect();
                self.execute("commit repairs", None, |connection| {
                    let batch = batch.clone();
                    async move { connection.commit(batch).await.map(|_| ()) }
                })
                .await
            }
            BackendKind::Fallback => {
                let mut per_store: BTreeMap<StoreName, Vec<FallbackEntry>> = BTreeMap::new();
                for (store, record, value) in values {
                    per_store.entry(store).or_default().push(FallbackEntry {
                        id: record.id.clone(),
                        payload: value,
                        created_at_ms: record.created_at_ms,
                    });
                }
                self.execute_fallback("commit repairs", None, |fallback| {
                    for (store, entries) in per_store {
                        fallback.replace_all(store, entries)?;
                    }
                    Ok(())
                })
                .await
            }
            BackendKind::Unavailable => Err(StoreError::unavailable("no storage backend is usable")),
        }
    }
}
