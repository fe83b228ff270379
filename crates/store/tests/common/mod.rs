#![allow(dead_code)]

use quotevault_core::ComponentCatalog;
use quotevault_store::backend::{FallbackStore, KeyValueMedium, MemoryMedium, MemoryProvider};
use quotevault_store::{BackupManager, StorageManager, StoreConfig};
use std::sync::Arc;
use std::time::Duration;

pub fn test_config() -> StoreConfig {
    StoreConfig::builder()
        .with_reconnect_backoff_base(Duration::from_millis(1))
        .with_close_timeout(Duration::from_secs(2))
        .build()
}

pub fn manager_with_medium(
    provider: &MemoryProvider,
    config: StoreConfig,
    medium: Box<dyn KeyValueMedium>,
) -> StorageManager {
    let fallback = FallbackStore::new(
        medium,
        config.max_local_fallback_entries,
        config.max_fallback_record_bytes,
    );
    let backups = Arc::new(BackupManager::in_memory(config.max_backups));
    StorageManager::new(
        config,
        Arc::new(provider.clone()),
        fallback,
        backups,
        ComponentCatalog::default(),
    )
    .unwrap()
}

pub fn manager(provider: &MemoryProvider) -> StorageManager {
    manager_with_medium(provider, test_config(), Box::new(MemoryMedium::new(None)))
}
