//! The storage façade
//!
//! [`StorageManager`] owns the single transactional connection. Every
//! operation is admitted through a FIFO queue capped at
//! `max_concurrent_operations`, checks the connection state, and runs against
//! whichever backend `initialize` selected. Transient backend failures are
//! recovered by reconnecting, quota failures by the cleanup cascade and then
//! the fallback medium.

mod connection;
mod health;
mod maintenance;
mod migration;
mod operations;
mod query;
mod queue;
mod quota;
mod retention;
mod validate;

pub use connection::ConnectionState;
pub use health::{HealthStatus, StorageStats};
pub use query::{DateRange, QueryFilter};
pub use retention::{CleanupReport, RetentionPolicy};

use crate::backend::{
    BackendFailure, BackendKind, BackendProvider, Connection, FallbackEntry, FallbackStore,
    FileMedium, JournalProvider, MemoryMedium, MemoryProvider, Schema, StoredRecord,
};
use crate::backup::BackupManager;
use crate::config::StoreConfig;
use crate::errors::{Result, StoreError};
use crate::integrity::DataIntegrityManager;
use chrono::{DateTime, TimeZone, Utc};
use connection::{ConnectionManager, Unavailable};
use health::ErrorLog;
use parking_lot::{Mutex, RwLock};
use quotevault_core::{
    Adjustment, ComponentCatalog, Record, StoreName, BACKUP_JOURNAL_NAME, FALLBACK_FILE_NAME,
    PRIMARY_DIR_NAME, SCHEMA_VERSION,
};
use queue::OperationQueue;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{info, warn};

/// Result of a save
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveReceipt {
    pub record: Record,
    /// Where the record landed
    pub medium: BackendKind,
    /// Component rule changes applied on top of the request
    pub adjustments: Vec<Adjustment>,
    /// Defaults filled in for missing fields
    pub defaults: Vec<String>,
}

struct Inner {
    config: StoreConfig,
    schema: Schema,
    connection: ConnectionManager,
    fallback: Mutex<FallbackStore>,
    integrity: DataIntegrityManager,
    queue: OperationQueue,
    kind: RwLock<BackendKind>,
    errors: ErrorLog,
    auditing: AtomicBool,
}

#[derive(Clone)]
pub struct StorageManager {
    inner: Arc<Inner>,
}

impl StorageManager {
    pub fn new(
        config: StoreConfig,
        provider: Arc<dyn BackendProvider>,
        fallback: FallbackStore,
        backups: Arc<BackupManager>,
        catalog: ComponentCatalog,
    ) -> Result<Self> {
        config.validate()?;
        let schema = Schema::current();
        let connection = ConnectionManager::new(
            provider,
            schema.clone(),
            config.max_reconnect_attempts,
            config.reconnect_backoff_base,
        );
        let queue = OperationQueue::new(config.max_concurrent_operations, config.max_queue_depth);
        Ok(Self {
            inner: Arc::new(Inner {
                schema,
                connection,
                fallback: Mutex::new(fallback),
                integrity: DataIntegrityManager::new(backups, catalog),
                queue,
                kind: RwLock::new(BackendKind::Unavailable),
                errors: ErrorLog::default(),
                auditing: AtomicBool::new(false),
                config,
            }),
        })
    }

    /// Journal backend, flat fallback file and backup journal under `data_dir`
    pub fn open_default(config: StoreConfig) -> Result<Self> {
        let dir = config.data_dir.clone();
        std::fs::create_dir_all(&dir)
            .map_err(|e| StoreError::io(&dir, "create data directory", e))?;

        let provider = JournalProvider::new(dir.join(PRIMARY_DIR_NAME))
            .with_quota(config.quota_bytes)
            .with_compact_threshold(config.journal_compact_threshold);
        let medium = FileMedium::open(
            dir.join(FALLBACK_FILE_NAME),
            Some(config.fallback_capacity_bytes),
        )
        .map_err(|failure| StoreError::unavailable(format!("fallback medium: {failure}")))?;
        let fallback = FallbackStore::new(
            Box::new(medium),
            config.max_local_fallback_entries,
            config.max_fallback_record_bytes,
        );
        let backups = BackupManager::open(&dir.join(BACKUP_JOURNAL_NAME), config.max_backups)?;

        Self::new(
            config,
            Arc::new(provider),
            fallback,
            Arc::new(backups),
            ComponentCatalog::default(),
        )
    }

    /// Everything in memory; nothing survives the process
    pub fn ephemeral(config: StoreConfig) -> Result<Self> {
        let fallback = FallbackStore::new(
            Box::new(MemoryMedium::new(Some(config.fallback_capacity_bytes))),
            config.max_local_fallback_entries,
            config.max_fallback_record_bytes,
        );
        let backups = BackupManager::in_memory(config.max_backups);
        let provider = MemoryProvider::with_quota(config.quota_bytes);
        Self::new(
            config,
            Arc::new(provider),
            fallback,
            Arc::new(backups),
            ComponentCatalog::default(),
        )
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub fn catalog(&self) -> &ComponentCatalog {
        self.inner.integrity.catalog()
    }

    pub fn integrity(&self) -> &DataIntegrityManager {
        &self.inner.integrity
    }

    pub fn backups(&self) -> &Arc<BackupManager> {
        self.inner.integrity.backups()
    }

    pub fn backend_kind(&self) -> BackendKind {
        *self.inner.kind.read()
    }

    fn set_kind(&self, kind: BackendKind) {
        *self.inner.kind.write() = kind;
    }

    /// Select a backend. Never fails: the returned kind says what is usable.
    pub async fn initialize(&self) -> BackendKind {
        let kind = self.select_backend().await;
        self.set_kind(kind);
        info!(backend = %kind, "Storage initialised");

        if kind == BackendKind::Transactional {
            if let Err(err) = self.migrate_fallback().await {
                self.inner.errors.record_message(format!("migration: {err}"));
                warn!(error = %err, "Migration from fallback storage failed; data left in place");
            }
        }
        kind
    }

    async fn select_backend(&self) -> BackendKind {
        let connection = &self.inner.connection;
        if self.inner.config.fallback_only {
            info!("Transactional backend disabled by configuration");
        } else if !connection.provider().probe().await {
            warn!(backend = connection.provider().name(), "Transactional backend not available");
        } else {
            match connection.connect().await {
                Ok(_) => return BackendKind::Transactional,
                Err(failure) => {
                    self.inner.errors.record("open", &failure);
                    warn!(error = %failure, "Could not open transactional backend; degrading to fallback");
                }
            }
        }

        match self.inner.fallback.lock().count(StoreName::Quotes) {
            Ok(_) => BackendKind::Fallback,
            Err(failure) => {
                self.inner.errors.record("open fallback", &failure);
                warn!(error = %failure, "Fallback medium unusable");
                BackendKind::Unavailable
            }
        }
    }

    /// Run `op` against the live connection under a queue slot, reconnecting
    /// after transient failures. Quota and other failures are returned as
    /// [`StoreError::OperationFailed`] for the caller to handle.
    async fn execute<T, F, Fut>(
        &self,
        operation: &'static str,
        store: Option<StoreName>,
        op: F,
    ) -> Result<T>
    where
        F: Fn(Arc<dyn Connection>) -> Fut + Send + Sync,
        Fut: Future<Output = std::result::Result<T, BackendFailure>> + Send,
        T: Send,
    {
        let _slot = self.inner.queue.admit(operation).await?;
        let connection = &self.inner.connection;
        let mut handle = connection.current().await.map_err(|e| unavailable(operation, e))?;

        let mut retries = 0;
        loop {
            let failure = match op(Arc::clone(&handle.connection)).await {
                Ok(value) => return Ok(value),
                Err(failure) => failure,
            };
            self.inner.errors.record(operation, &failure);
            if !failure.classify().is_transient() || retries >= self.inner.config.max_reconnect_attempts {
                return Err(StoreError::operation_failed(operation, store, failure));
            }
            retries += 1;
            warn!(operation, error = %failure, "Transient backend failure; reconnecting");
            handle = match connection.reconnect(handle.generation).await {
                Ok(handle) => handle,
                Err(Unavailable::Exhausted(last)) => {
                    self.inner.errors.record("reconnect", &last);
                    return Err(StoreError::operation_failed(operation, store, last));
                }
                Err(other) => return Err(unavailable(operation, other)),
            };
        }
    }

    /// Run caller-supplied work against the transactional connection under
    /// the same queueing, state checks and reconnect handling as every
    /// built-in operation
    pub async fn queue_operation<T, F, Fut>(&self, operation: &'static str, op: F) -> Result<T>
    where
        F: Fn(Arc<dyn Connection>) -> Fut + Send + Sync,
        Fut: Future<Output = std::result::Result<T, BackendFailure>> + Send,
        T: Send,
    {
        match self.backend_kind() {
            BackendKind::Transactional => self.execute(operation, None, op).await,
            BackendKind::Fallback | BackendKind::Unavailable => Err(StoreError::unavailable(format!(
                "cannot {operation}: no transactional backend"
            ))),
        }
    }

    /// Run a fallback-medium operation under a queue slot
    async fn execute_fallback<T>(
        &self,
        operation: &'static str,
        store: Option<StoreName>,
        op: impl FnOnce(&FallbackStore) -> std::result::Result<T, BackendFailure>,
    ) -> Result<T> {
        let _slot = self.inner.queue.admit(operation).await?;
        let result = op(&self.inner.fallback.lock());
        result.map_err(|failure| {
            self.inner.errors.record(operation, &failure);
            StoreError::operation_failed(operation, store, failure)
        })
    }

    pub fn get_health_status(&self) -> HealthStatus {
        let (error_count, last_error) = self.inner.errors.snapshot();
        let connection = &self.inner.connection;
        HealthStatus {
            backend_kind: self.backend_kind(),
            connection_state: connection.state(),
            error_count,
            last_error,
            active_operations: self.inner.queue.active(),
            queue_depth: self.inner.queue.queued(),
            reconnect_attempts: connection.reconnect_attempts(),
        }
    }

    /// Stop admitting work, wait for in-flight operations up to
    /// `close_timeout`, then release the connection
    pub async fn close(&self) {
        if self.inner.queue.is_closed() {
            return;
        }
        let drained = self.inner.queue.drain(self.inner.config.close_timeout).await;
        if !drained {
            warn!(
                timeout = ?self.inner.config.close_timeout,
                active = self.inner.queue.active(),
                "Closing with operations still in flight"
            );
        }
        self.inner.connection.close().await;
        info!("Storage closed");
    }
}

fn unavailable(operation: &str, reason: Unavailable) -> StoreError {
    match reason {
        Unavailable::NotConnected(state) => {
            StoreError::unavailable(format!("cannot {operation}: connection is {state}"))
        }
        Unavailable::Exhausted(failure) => {
            StoreError::unavailable(format!("cannot {operation}: {failure}"))
        }
    }
}

fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_default()
}

/// `None` when the stored text is not valid JSON
fn record_from_stored(row: &StoredRecord) -> Option<Record> {
    let payload = serde_json::from_str(&row.raw).ok()?;
    Some(Record {
        id: row.id.clone(),
        payload,
        created_at: millis_to_datetime(row.created_at_ms),
        schema_version: row.schema_version,
    })
}

fn record_from_fallback(entry: FallbackEntry) -> Record {
    Record {
        id: entry.id,
        payload: entry.payload,
        created_at: millis_to_datetime(entry.created_at_ms),
        schema_version: SCHEMA_VERSION,
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
