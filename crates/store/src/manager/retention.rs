//! Retention policies and the row-level trimming behind them

use crate::backend::{
    BackendFailure, Connection, FallbackStore, IndexRange, Mutation, ScanControl, StoredRecord,
    TIMESTAMP_INDEX,
};
use crate::config::RetentionLimits;
use quotevault_core::{IndexValue, RecordId, StoreName};
use serde::Serialize;
use std::collections::BTreeMap;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// What a cleanup run should remove; unset fields leave a store alone
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionPolicy {
    /// Drop history older than this many days
    pub history_keep_days: Option<u32>,
    pub history_keep_count: Option<usize>,
    pub quotes_keep_count: Option<usize>,
    pub components_keep_count: Option<usize>,
}

impl RetentionPolicy {
    /// Keep-counts from configuration
    pub fn from_limits(limits: RetentionLimits) -> Self {
        Self {
            history_keep_days: None,
            history_keep_count: Some(limits.history),
            quotes_keep_count: Some(limits.quotes),
            components_keep_count: Some(limits.components),
        }
    }

    pub(crate) fn keep_counts(&self) -> [(StoreName, Option<usize>); 3] {
        [
            (StoreName::History, self.history_keep_count),
            (StoreName::Quotes, self.quotes_keep_count),
            (StoreName::Components, self.components_keep_count),
        ]
    }

    pub(crate) fn history_cutoff(&self, now_ms: i64) -> Option<i64> {
        self.history_keep_days
            .map(|days| now_ms - i64::from(days) * DAY_MS)
    }
}

/// Rows removed per store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub removed: BTreeMap<StoreName, usize>,
}

impl CleanupReport {
    pub(crate) fn add(&mut self, store: StoreName, removed: usize) {
        if removed > 0 {
            *self.removed.entry(store).or_default() += removed;
        }
    }

    pub fn total(&self) -> usize {
        self.removed.values().sum()
    }

    pub fn removed_from(&self, store: StoreName) -> usize {
        self.removed.get(&store).copied().unwrap_or(0)
    }
}

async fn delete_all(
    connection: &dyn Connection,
    store: StoreName,
    ids: Vec<RecordId>,
) -> Result<usize, BackendFailure> {
    if ids.is_empty() {
        return Ok(0);
    }
    let removed = ids.len();
    let batch = ids
        .into_iter()
        .map(|id| Mutation::Delete { store, id })
        .collect();
    connection.commit(batch).await?;
    Ok(removed)
}

/// Delete all but the newest `keep` rows of `store`
pub(crate) async fn trim_to(
    connection: &dyn Connection,
    store: StoreName,
    keep: usize,
) -> Result<usize, BackendFailure> {
    let mut seen = 0usize;
    let mut doomed = Vec::new();
    connection
        .scan(store, None, &mut |row: &StoredRecord| {
            seen += 1;
            if seen > keep {
                doomed.push(row.id.clone());
            }
            ScanControl::Continue
        })
        .await?;
    delete_all(connection, store, doomed).await
}

/// Delete rows of `store` whose timestamp is before `cutoff_ms`
pub(crate) async fn expire_before(
    connection: &dyn Connection,
    store: StoreName,
    cutoff_ms: i64,
) -> Result<usize, BackendFailure> {
    let range = IndexRange {
        index: TIMESTAMP_INDEX.to_string(),
        lower: None,
        upper: Some(IndexValue::Int(cutoff_ms - 1)),
    };
    let mut doomed = Vec::new();
    connection
        .scan(store, Some(range), &mut |row: &StoredRecord| {
            doomed.push(row.id.clone());
            ScanControl::Continue
        })
        .await?;
    delete_all(connection, store, doomed).await
}

/// Keep-count trimming on the fallback medium, whose lists are already
/// newest-first
pub(crate) fn trim_fallback(
    fallback: &FallbackStore,
    store: StoreName,
    keep: usize,
) -> Result<usize, BackendFailure> {
    if !FallbackStore::supports(store) || store == StoreName::Settings {
        return Ok(0);
    }
    let mut entries = fallback.list(store)?;
    if entries.len() <= keep {
        return Ok(0);
    }
    let removed = entries.len() - keep;
    entries.truncate(keep);
    fallback.replace_all(store, entries)?;
    Ok(removed)
}
