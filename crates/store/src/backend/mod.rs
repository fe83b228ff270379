//! Storage backends
//!
//! The manager talks to a transactional backend through [`BackendProvider`]
//! and [`Connection`], and to the degraded key-value medium through
//! [`FallbackStore`]. Backend errors are plain [`BackendFailure`] values so
//! the manager can classify them before deciding how to recover.

mod flat;
mod journal;
mod memory;
mod schema;
mod tables;

pub use flat::{FallbackEntry, FallbackStore, FileMedium, KeyValueMedium, LegacyData, MemoryMedium};
pub use journal::JournalProvider;
pub use memory::{FaultPoint, MemoryProvider};
pub use schema::{IndexSpec, Schema, StoreSchema, TIMESTAMP_INDEX};
pub use tables::Tables;

use async_trait::async_trait;
use quotevault_core::{IndexValue, RecordId, StoreName};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Which medium is serving requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// The preferred transactional backend
    Transactional,
    /// The flat key-value medium with a reduced feature set
    Fallback,
    /// Nothing usable; every operation fails with `BackendUnavailable`
    Unavailable,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BackendKind::Transactional => "transactional",
            BackendKind::Fallback => "fallback",
            BackendKind::Unavailable => "unavailable",
        })
    }
}

/// Failure reported by a backend
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendFailure {
    #[error("backend busy: {0}")]
    Busy(String),

    #[error("connection blocked: {0}")]
    Blocked(String),

    #[error("connection in invalid state: {0}")]
    InvalidState(String),

    #[error("storage quota exceeded: {used} of {limit} bytes")]
    QuotaExceeded { used: u64, limit: u64 },

    #[error("schema version conflict: found {found}, expected {expected}")]
    VersionConflict { found: u32, expected: u32 },

    #[error("{0}")]
    Other(String),
}

/// How the manager reacts to a [`BackendFailure`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Drop the handle and reconnect
    Transient,
    /// Run the cleanup cascade, then fall back
    Quota,
    /// Surface to the caller
    Fatal,
}

impl FailureClass {
    pub const fn is_transient(self) -> bool {
        matches!(self, FailureClass::Transient)
    }
}

impl BackendFailure {
    pub const fn classify(&self) -> FailureClass {
        match self {
            BackendFailure::Busy(_)
            | BackendFailure::Blocked(_)
            | BackendFailure::InvalidState(_) => FailureClass::Transient,
            BackendFailure::QuotaExceeded { .. } => FailureClass::Quota,
            BackendFailure::VersionConflict { .. } | BackendFailure::Other(_) => FailureClass::Fatal,
        }
    }
}

impl From<crate::journal::JournalError> for BackendFailure {
    fn from(error: crate::journal::JournalError) -> Self {
        BackendFailure::Other(error.to_string())
    }
}

/// A record as held by a backend: the payload stays JSON text so damaged
/// rows can still be read back and handed to the repair pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub store: StoreName,
    pub id: RecordId,
    pub raw: String,
    pub created_at_ms: i64,
    pub schema_version: u32,
}

/// A write requested by the manager
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Insert (`id == None`, backend assigns) or replace a record
    Put {
        store: StoreName,
        id: Option<RecordId>,
        raw: String,
    },
    /// Replace `id` only while its stored text is still `expected`;
    /// otherwise the mutation is dropped from the batch
    Replace {
        store: StoreName,
        id: RecordId,
        expected: String,
        raw: String,
    },
    Delete { store: StoreName, id: RecordId },
}

impl Mutation {
    pub fn store(&self) -> StoreName {
        match self {
            Mutation::Put { store, .. }
            | Mutation::Replace { store, .. }
            | Mutation::Delete { store, .. } => *store,
        }
    }
}

/// Bounds for an index scan; both ends inclusive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRange {
    pub index: String,
    pub lower: Option<IndexValue>,
    pub upper: Option<IndexValue>,
}

impl IndexRange {
    pub fn exact(index: impl Into<String>, value: IndexValue) -> Self {
        Self {
            index: index.into(),
            lower: Some(value.clone()),
            upper: Some(value),
        }
    }

    pub fn contains(&self, value: &IndexValue) -> bool {
        self.lower.as_ref().map_or(true, |lo| value >= lo)
            && self.upper.as_ref().map_or(true, |hi| value <= hi)
    }
}

/// Returned by scan visitors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanControl {
    Continue,
    Stop,
}

/// Visitor handed every record of a scan, newest first
pub type ScanVisitor<'a> = dyn FnMut(&StoredRecord) -> ScanControl + Send + 'a;

/// An open handle to a transactional backend
#[async_trait]
pub trait Connection: Send + Sync {
    /// Schema version the handle was opened at
    fn schema_version(&self) -> u32;

    /// Apply every mutation atomically; puts and applied replaces return the
    /// stored record
    async fn commit(&self, batch: Vec<Mutation>) -> Result<Vec<StoredRecord>, BackendFailure>;

    async fn get(&self, store: StoreName, id: &RecordId)
        -> Result<Option<StoredRecord>, BackendFailure>;

    /// Reverse scan over `range` (the timestamp index when `None`)
    async fn scan(
        &self,
        store: StoreName,
        range: Option<IndexRange>,
        visit: &mut ScanVisitor<'_>,
    ) -> Result<(), BackendFailure>;

    async fn count(&self, store: StoreName) -> Result<usize, BackendFailure>;

    /// Bytes of payload currently held
    async fn stored_bytes(&self) -> Result<u64, BackendFailure>;

    /// Release the handle; later calls fail with `InvalidState`
    async fn close(&self);

    async fn put(
        &self,
        store: StoreName,
        id: Option<RecordId>,
        raw: String,
    ) -> Result<StoredRecord, BackendFailure> {
        self.commit(vec![Mutation::Put { store, id, raw }])
            .await?
            .pop()
            .ok_or_else(|| BackendFailure::Other("commit returned no record".to_string()))
    }

    async fn delete(&self, store: StoreName, id: RecordId) -> Result<(), BackendFailure> {
        self.commit(vec![Mutation::Delete { store, id }]).await.map(|_| ())
    }
}

/// Opens connections to a transactional backend
#[async_trait]
pub trait BackendProvider: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Whether the backend can be used at all on this host
    async fn probe(&self) -> bool;

    /// Open a connection, upgrading the stored schema to `schema` if older
    async fn open(&self, schema: &Schema) -> Result<Arc<dyn Connection>, BackendFailure>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_classes() {
        assert_eq!(BackendFailure::Busy(String::new()).classify(), FailureClass::Transient);
        assert_eq!(BackendFailure::Blocked(String::new()).classify(), FailureClass::Transient);
        assert_eq!(
            BackendFailure::InvalidState(String::new()).classify(),
            FailureClass::Transient
        );
        assert_eq!(
            BackendFailure::QuotaExceeded { used: 1, limit: 1 }.classify(),
            FailureClass::Quota
        );
        assert_eq!(
            BackendFailure::VersionConflict { found: 4, expected: 3 }.classify(),
            FailureClass::Fatal
        );
    }

    #[test]
    fn range_bounds_are_inclusive() {
        let range = IndexRange {
            index: TIMESTAMP_INDEX.to_string(),
            lower: Some(IndexValue::Int(10)),
            upper: Some(IndexValue::Int(20)),
        };
        assert!(range.contains(&IndexValue::Int(10)));
        assert!(range.contains(&IndexValue::Int(20)));
        assert!(!range.contains(&IndexValue::Int(21)));
    }
}
