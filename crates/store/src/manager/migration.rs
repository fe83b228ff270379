//! Move of fallback-only data into the transactional backend
//!
//! Runs whenever the fallback medium holds records while the transactional
//! backend is up. Moved records are cleared from the fallback, so each one
//! migrates once.

use super::StorageManager;
use crate::backend::{BackendFailure, Mutation};
use crate::errors::{Result, StoreError};
use quotevault_core::{StoreName, FALLBACK_FLAG_FIELD, MIGRATED_FLAG_FIELD};
use serde_json::Value;
use tracing::info;

impl StorageManager {
    /// Copy every record parked in the fallback medium into the primary
    /// backend in one commit, tagging each as migrated. Returns how many
    /// records moved.
    pub(super) async fn migrate_fallback(&self) -> Result<usize> {
        let legacy = self
            .inner
            .fallback
            .lock()
            .pending_migration()
            .map_err(|f| StoreError::operation_failed("read fallback", None, f))?;
        if legacy.is_empty() {
            return Ok(0);
        }

        let mut batch = Vec::new();
        for (store, entries) in [
            (StoreName::Quotes, &legacy.quotes),
            (StoreName::Components, &legacy.components),
            (StoreName::Settings, &legacy.settings),
        ] {
            // Oldest first so newest-first ordering survives the move
            for entry in entries.iter().rev() {
                let mut payload = entry.payload.clone();
                if let Value::Object(map) = &mut payload {
                    map.remove(FALLBACK_FLAG_FIELD);
                    map.insert(MIGRATED_FLAG_FIELD.to_string(), Value::Bool(true));
                }
                let id = store.is_keyed().then(|| entry.id.clone());
                batch.push(Mutation::Put {
                    store,
                    id,
                    raw: payload.to_string(),
                });
            }
        }
        let moved = batch.len();

        self.execute("migrate", None, |connection| {
            let batch = batch.clone();
            async move { connection.commit(batch).await.map(|_| ()) }
        })
        .await?;
        self.inner
            .fallback
            .lock()
            .finish_migration(&legacy)
            .map_err(|f: BackendFailure| StoreError::operation_failed("finish migration", None, f))?;

        info!(
            quotes = legacy.quotes.len(),
            components = legacy.components.len(),
            settings = legacy.settings.len(),
            "Migrated fallback records into transactional storage"
        );
        self.audit("migration").await;
        Ok(moved)
    }
}
