//! Ownership and lifecycle of the single transactional connection

use crate::backend::{BackendFailure, BackendProvider, Connection, Schema};
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

/// Lifecycle of the transactional connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Blocked,
    VersionConflict,
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Blocked => "blocked",
            ConnectionState::VersionConflict => "version_conflict",
            ConnectionState::Error => "error",
        })
    }
}

impl ConnectionState {
    fn after_failure(failure: &BackendFailure) -> Self {
        match failure {
            BackendFailure::Blocked(_) => ConnectionState::Blocked,
            BackendFailure::VersionConflict { .. } => ConnectionState::VersionConflict,
            _ => ConnectionState::Error,
        }
    }
}

/// A handle together with the generation it was opened in
#[derive(Clone)]
pub(crate) struct Handle {
    pub(crate) connection: Arc<dyn Connection>,
    pub(crate) generation: u64,
}

/// Why no handle could be produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Unavailable {
    /// Not connected and no reconnect is in flight
    NotConnected(ConnectionState),
    /// Every reconnect attempt failed
    Exhausted(BackendFailure),
}

pub(crate) struct ConnectionManager {
    provider: Arc<dyn BackendProvider>,
    schema: Schema,
    max_attempts: u32,
    backoff_base: Duration,
    state: watch::Sender<ConnectionState>,
    handle: RwLock<Option<Handle>>,
    next_generation: RwLock<u64>,
    reconnecting: Mutex<()>,
    reconnect_attempts: AtomicU32,
}

impl ConnectionManager {
    pub(crate) fn new(
        provider: Arc<dyn BackendProvider>,
        schema: Schema,
        max_attempts: u32,
        backoff_base: Duration,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            provider,
            schema,
            max_attempts,
            backoff_base,
            state,
            handle: RwLock::new(None),
            next_generation: RwLock::new(0),
            reconnecting: Mutex::new(()),
            reconnect_attempts: AtomicU32::new(0),
        }
    }

    pub(crate) fn provider(&self) -> &Arc<dyn BackendProvider> {
        &self.provider
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    /// Total reconnect attempts made since creation
    pub(crate) fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::SeqCst)
    }

    fn install(&self, connection: Arc<dyn Connection>) -> Handle {
        let generation = {
            let mut next = self.next_generation.write();
            *next += 1;
            *next
        };
        let handle = Handle {
            connection,
            generation,
        };
        *self.handle.write() = Some(handle.clone());
        self.set_state(ConnectionState::Connected);
        handle
    }

    /// Open the first connection
    pub(crate) async fn connect(&self) -> Result<Handle, BackendFailure> {
        self.set_state(ConnectionState::Connecting);
        match self.provider.open(&self.schema).await {
            Ok(connection) => {
                info!(
                    backend = self.provider.name(),
                    schema_version = connection.schema_version(),
                    "Connected to storage backend"
                );
                Ok(self.install(connection))
            }
            Err(failure) => {
                self.set_state(ConnectionState::after_failure(&failure));
                Err(failure)
            }
        }
    }

    /// The live handle. While a reconnect is in flight this waits for its
    /// outcome; in any other disconnected state it fails immediately.
    pub(crate) async fn current(&self) -> Result<Handle, Unavailable> {
        let mut state = self.state.subscribe();
        let settled = match state
            .wait_for(|s| *s != ConnectionState::Connecting)
            .await
        {
            Ok(settled) => *settled,
            Err(_) => self.state(),
        };
        match (settled, self.handle.read().clone()) {
            (ConnectionState::Connected, Some(handle)) => Ok(handle),
            (other, _) => Err(Unavailable::NotConnected(other)),
        }
    }

    /// Replace the handle of generation `failed` after a transient failure.
    /// Concurrent callers share one attempt: whoever arrives after a
    /// successful reconnect gets the new handle straight away.
    pub(crate) async fn reconnect(&self, failed: u64) -> Result<Handle, Unavailable> {
        let _attempt = self.reconnecting.lock().await;
        if let Some(handle) = self.handle.read().clone() {
            if handle.generation != failed && self.state() == ConnectionState::Connected {
                return Ok(handle);
            }
        }

        self.set_state(ConnectionState::Connecting);
        let stale = self.handle.write().take();
        if let Some(stale) = stale {
            stale.connection.close().await;
        }

        let mut last = BackendFailure::InvalidState("no reconnect attempt made".to_string());
        for attempt in 1..=self.max_attempts {
            self.reconnect_attempts.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.backoff_base * attempt).await;
            match self.provider.open(&self.schema).await {
                Ok(connection) => {
                    info!(attempt, "Reconnected to storage backend");
                    return Ok(self.install(connection));
                }
                Err(failure) => {
                    warn!(attempt, max = self.max_attempts, error = %failure, "Reconnect attempt failed");
                    let fatal = !failure.classify().is_transient();
                    last = failure;
                    if fatal {
                        break;
                    }
                }
            }
        }

        self.set_state(match &last {
            BackendFailure::VersionConflict { .. } => ConnectionState::VersionConflict,
            _ => ConnectionState::Error,
        });
        Err(Unavailable::Exhausted(last))
    }

    /// Release the handle and mark the connection closed
    pub(crate) async fn close(&self) {
        let handle = self.handle.write().take();
        if let Some(handle) = handle {
            handle.connection.close().await;
        }
        self.set_state(ConnectionState::Disconnected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{FaultPoint, MemoryProvider};

    fn manager(provider: &MemoryProvider) -> ConnectionManager {
        ConnectionManager::new(
            Arc::new(provider.clone()),
            Schema::current(),
            3,
            Duration::from_millis(1),
        )
    }

    #[tokio::test]
    async fn reconnect_replaces_handle() {
        let provider = MemoryProvider::new();
        let connections = manager(&provider);
        let first = connections.connect().await.unwrap();

        let second = connections.reconnect(first.generation).await.unwrap();

        assert!(second.generation > first.generation);
        assert_eq!(connections.state(), ConnectionState::Connected);
        assert_eq!(provider.open_count(), 2);
    }

    #[tokio::test]
    async fn stale_generation_reuses_newer_handle() {
        let provider = MemoryProvider::new();
        let connections = manager(&provider);
        let first = connections.connect().await.unwrap();
        let second = connections.reconnect(first.generation).await.unwrap();

        let again = connections.reconnect(first.generation).await.unwrap();

        assert_eq!(again.generation, second.generation);
        assert_eq!(provider.open_count(), 2);
    }

    #[tokio::test]
    async fn exhausted_reconnect_sets_error() {
        let provider = MemoryProvider::new();
        let connections = manager(&provider);
        let first = connections.connect().await.unwrap();
        for _ in 0..3 {
            provider.inject(FaultPoint::Open, BackendFailure::Busy("locked".into()));
        }

        let result = connections.reconnect(first.generation).await;

        assert!(matches!(result, Err(Unavailable::Exhausted(BackendFailure::Busy(_)))));
        assert_eq!(connections.state(), ConnectionState::Error);
        assert_eq!(connections.reconnect_attempts(), 3);
        assert!(matches!(
            connections.current().await,
            Err(Unavailable::NotConnected(ConnectionState::Error))
        ));
    }
}
