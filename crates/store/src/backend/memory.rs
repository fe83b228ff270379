//! In-process transactional backend with fault injection

use super::schema::Schema;
use super::tables::Tables;
use super::{
    BackendFailure, BackendProvider, Connection, IndexRange, Mutation, ScanVisitor, StoredRecord,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use quotevault_core::{RecordId, StoreName};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Where an injected failure fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPoint {
    Open,
    Commit,
    Read,
}

#[derive(Debug)]
struct MemoryState {
    tables: Option<Tables>,
    available: bool,
    quota_bytes: Option<u64>,
    faults: VecDeque<(FaultPoint, BackendFailure)>,
    opens: usize,
}

impl MemoryState {
    fn take_fault(&mut self, point: FaultPoint) -> Option<BackendFailure> {
        let position = self.faults.iter().position(|(p, _)| *p == point)?;
        self.faults.remove(position).map(|(_, failure)| failure)
    }
}

/// Keeps its tables across reconnects, so a dropped handle loses nothing
#[derive(Clone)]
pub struct MemoryProvider {
    state: Arc<Mutex<MemoryState>>,
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                tables: None,
                available: true,
                quota_bytes: None,
                faults: VecDeque::new(),
                opens: 0,
            })),
        }
    }

    /// A provider whose probe fails, as on a host without the backend
    pub fn unavailable() -> Self {
        let provider = Self::new();
        provider.state.lock().available = false;
        provider
    }

    pub fn with_quota(quota_bytes: u64) -> Self {
        let provider = Self::new();
        provider.set_quota(Some(quota_bytes));
        provider
    }

    pub fn set_quota(&self, quota_bytes: Option<u64>) {
        self.state.lock().quota_bytes = quota_bytes;
    }

    /// Queue a one-shot failure for the next operation at `point`
    pub fn inject(&self, point: FaultPoint, failure: BackendFailure) {
        self.state.lock().faults.push_back((point, failure));
    }

    /// Number of successful opens so far
    pub fn open_count(&self) -> usize {
        self.state.lock().opens
    }

    /// Overwrite a row's raw payload, bypassing every check
    pub fn write_raw(&self, store: StoreName, id: RecordId, raw: &str) -> Result<(), BackendFailure> {
        let mut state = self.state.lock();
        let tables = state
            .tables
            .as_mut()
            .ok_or_else(|| BackendFailure::InvalidState("backend never opened".to_string()))?;
        let resolved = tables.resolve(
            vec![Mutation::Put {
                store,
                id: Some(id),
                raw: raw.to_string(),
            }],
            chrono::Utc::now().timestamp_millis(),
            tables.schema().version,
        )?;
        tables.apply(&resolved);
        Ok(())
    }
}

#[async_trait]
impl BackendProvider for MemoryProvider {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn probe(&self) -> bool {
        self.state.lock().available
    }

    async fn open(&self, schema: &Schema) -> Result<Arc<dyn Connection>, BackendFailure> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if let Some(failure) = state.take_fault(FaultPoint::Open) {
            return Err(failure);
        }
        if !state.available {
            return Err(BackendFailure::Other("memory backend disabled".to_string()));
        }

        match state.tables.as_mut() {
            None => state.tables = Some(Tables::new(schema.clone())),
            Some(tables) if tables.schema().version > schema.version => {
                return Err(BackendFailure::VersionConflict {
                    found: tables.schema().version,
                    expected: schema.version,
                });
            }
            Some(tables) if tables.schema().version < schema.version => {
                let touched = tables.upgrade(schema);
                tracing::info!(stores = ?touched, "Upgraded in-memory schema");
            }
            Some(_) => {}
        }
        state.opens += 1;

        Ok(Arc::new(MemoryConnection {
            state: Arc::clone(&self.state),
            closed: AtomicBool::new(false),
            version: schema.version,
        }))
    }
}

struct MemoryConnection {
    state: Arc<Mutex<MemoryState>>,
    closed: AtomicBool,
    version: u32,
}

impl MemoryConnection {
    fn ensure_open(&self) -> Result<(), BackendFailure> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BackendFailure::InvalidState("connection closed".to_string()));
        }
        Ok(())
    }

    fn with_tables<T>(
        &self,
        point: FaultPoint,
        f: impl FnOnce(&mut Tables, Option<u64>) -> Result<T, BackendFailure>,
    ) -> Result<T, BackendFailure> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        if let Some(failure) = state.take_fault(point) {
            return Err(failure);
        }
        let quota = state.quota_bytes;
        let tables = state
            .tables
            .as_mut()
            .ok_or_else(|| BackendFailure::InvalidState("backend dropped".to_string()))?;
        f(tables, quota)
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    fn schema_version(&self) -> u32 {
        self.version
    }

    async fn commit(&self, batch: Vec<Mutation>) -> Result<Vec<StoredRecord>, BackendFailure> {
        let version = self.version;
        self.with_tables(FaultPoint::Commit, |tables, quota| {
            let resolved = tables.resolve(batch, chrono::Utc::now().timestamp_millis(), version)?;
            if let Some(limit) = quota {
                let used = tables.projected_bytes(&resolved);
                if used > limit && used > tables.bytes() {
                    return Err(BackendFailure::QuotaExceeded { used, limit });
                }
            }
            Ok(tables.apply(&resolved))
        })
    }

    async fn get(
        &self,
        store: StoreName,
        id: &RecordId,
    ) -> Result<Option<StoredRecord>, BackendFailure> {
        self.with_tables(FaultPoint::Read, |tables, _| Ok(tables.get(store, id).cloned()))
    }

    async fn scan(
        &self,
        store: StoreName,
        range: Option<IndexRange>,
        visit: &mut ScanVisitor<'_>,
    ) -> Result<(), BackendFailure> {
        self.with_tables(FaultPoint::Read, |tables, _| {
            tables.scan(store, range.as_ref(), visit)
        })
    }

    async fn count(&self, store: StoreName) -> Result<usize, BackendFailure> {
        self.with_tables(FaultPoint::Read, |tables, _| Ok(tables.count(store)))
    }

    async fn stored_bytes(&self) -> Result<u64, BackendFailure> {
        self.with_tables(FaultPoint::Read, |tables, _| Ok(tables.bytes()))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
