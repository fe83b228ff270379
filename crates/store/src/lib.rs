//! Durable, self-healing local storage for quotevault
//!
//! - **`manager`**: [`StorageManager`], the façade callers use. It owns the
//!   transactional connection, queues operations under a concurrency cap,
//!   reconnects after transient failures, runs the quota cleanup cascade and
//!   degrades to the fallback medium.
//! - **`integrity`**: [`DataIntegrityManager`] and the ordered repair
//!   strategies (serialization, schema, type coercion, business rules,
//!   cycles).
//! - **`backup`**: [`BackupManager`], bounded point-in-time snapshots kept in
//!   their own append-only journal.
//! - **`backend`**: the transactional journal backend, an in-memory backend
//!   with fault injection, and the flat key-value fallback.
//! - **`journal`**: CRC-checked, length-prefixed frames shared by the journal
//!   backend and the backup channel.

pub mod backend;
pub mod backup;
pub mod config;
pub mod errors;
pub mod integrity;
pub mod journal;
pub mod manager;

pub use backend::{BackendFailure, BackendKind, BackendProvider, Connection};
pub use backup::{BackupId, BackupManager, BackupMetadata, RestoredBackup};
pub use config::{ConfigSource, RetentionLimits, StoreConfig, StoreConfigBuilder, StoreConfigLoader};
pub use errors::{RecoveryHint, Result, StoreError};
pub use integrity::{
    CheckTarget, DataIntegrityManager, IntegrityReport, LiveStore, RepairCommit, RepairOutcome,
    RepairedRecord, Severity, Snapshot,
};
pub use manager::{
    CleanupReport, ConnectionState, DateRange, HealthStatus, QueryFilter, RetentionPolicy,
    SaveReceipt, StorageManager, StorageStats,
};
