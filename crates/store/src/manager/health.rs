//! Health and usage reporting

use super::connection::ConnectionState;
use crate::backend::{BackendFailure, BackendKind};
use parking_lot::Mutex;
use quotevault_core::StoreName;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub backend_kind: BackendKind,
    pub connection_state: ConnectionState,
    pub error_count: u64,
    pub last_error: Option<String>,
    pub active_operations: usize,
    pub queue_depth: usize,
    pub reconnect_attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageStats {
    pub backend_kind: BackendKind,
    pub counts: BTreeMap<StoreName, usize>,
    /// Bytes held by the transactional backend
    pub stored_bytes: u64,
    /// Bytes held by the fallback medium
    pub fallback_bytes: u64,
    pub backups: usize,
}

impl StorageStats {
    pub fn total_records(&self) -> usize {
        self.counts.values().sum()
    }
}

#[derive(Default)]
struct Counters {
    errors: u64,
    last_error: Option<String>,
}

/// Failure bookkeeping shared by every operation
#[derive(Default)]
pub(crate) struct ErrorLog {
    counters: Mutex<Counters>,
}

impl ErrorLog {
    pub(crate) fn record(&self, operation: &str, failure: &BackendFailure) {
        self.record_message(format!("{operation}: {failure}"));
    }

    pub(crate) fn record_message(&self, message: String) {
        let mut counters = self.counters.lock();
        counters.errors += 1;
        counters.last_error = Some(message);
    }

    pub(crate) fn snapshot(&self) -> (u64, Option<String>) {
        let counters = self.counters.lock();
        (counters.errors, counters.last_error.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_latest_error() {
        let log = ErrorLog::default();
        log.record("save", &BackendFailure::Busy("locked".into()));
        log.record("query", &BackendFailure::Other("boom".into()));

        let (count, last) = log.snapshot();
        assert_eq!(count, 2);
        assert_eq!(last.as_deref(), Some("query: boom"));
    }
}
