//! Degraded key-value medium used when the transactional backend is missing
//! or full
//!
//! Only `quotes` and `components` (bounded most-recent-first lists) and
//! per-key settings are kept. History writes are accepted and dropped.

use super::BackendFailure;
use parking_lot::Mutex;
use quotevault_core::{RecordId, StoreName};
use quotevault_utils::{read_if_exists, write_atomic};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const KEY_PREFIX: &str = "quotevault.";
const SEQ_KEY: &str = "quotevault.seq";
const SETTING_PREFIX: &str = "quotevault.setting.";
const FALLBACK_ID_PREFIX: &str = "fallback-";

/// A synchronous string-to-string store with a byte capacity
pub trait KeyValueMedium: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, BackendFailure>;
    fn set(&self, key: &str, value: String) -> Result<(), BackendFailure>;
    fn remove(&self, key: &str) -> Result<(), BackendFailure>;
    fn keys(&self) -> Result<Vec<String>, BackendFailure>;
    fn usage_bytes(&self) -> u64;
}

fn usage(map: &BTreeMap<String, String>) -> u64 {
    map.iter().map(|(k, v)| (k.len() + v.len()) as u64).sum()
}

fn check_capacity(
    map: &BTreeMap<String, String>,
    key: &str,
    value: &str,
    capacity: Option<u64>,
) -> Result<(), BackendFailure> {
    let Some(limit) = capacity else {
        return Ok(());
    };
    let current = usage(map);
    let previous = map.get(key).map_or(0, |v| (key.len() + v.len()) as u64);
    let used = current - previous + (key.len() + value.len()) as u64;
    if used > limit && used > current {
        return Err(BackendFailure::QuotaExceeded { used, limit });
    }
    Ok(())
}

/// One JSON object on disk, rewritten atomically on every change
pub struct FileMedium {
    path: PathBuf,
    capacity: Option<u64>,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileMedium {
    pub fn open(path: impl Into<PathBuf>, capacity: Option<u64>) -> Result<Self, BackendFailure> {
        let path = path.into();
        let entries = match read_if_exists(&path)
            .map_err(|e| BackendFailure::Other(e.to_string()))?
        {
            Some(bytes) => match serde_json::from_slice(&bytes) {
                Ok(entries) => entries,
                Err(e) => {
                    let aside = path.with_extension("json.corrupt");
                    tracing::warn!(
                        path = %path.display(),
                        moved_to = %aside.display(),
                        error = %e,
                        "Fallback file unreadable, starting empty"
                    );
                    if let Err(e) = std::fs::rename(&path, &aside) {
                        tracing::debug!(error = %e, "Could not move unreadable fallback file aside");
                    }
                    BTreeMap::new()
                }
            },
            None => BTreeMap::new(),
        };
        Ok(Self {
            path,
            capacity,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), BackendFailure> {
        let json = serde_json::to_vec(entries).map_err(|e| BackendFailure::Other(e.to_string()))?;
        write_atomic(&self.path, &json).map_err(|e| BackendFailure::Other(e.to_string()))
    }
}

impl KeyValueMedium for FileMedium {
    fn get(&self, key: &str) -> Result<Option<String>, BackendFailure> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: String) -> Result<(), BackendFailure> {
        let mut entries = self.entries.lock();
        check_capacity(&entries, key, &value, self.capacity)?;
        let previous = entries.insert(key.to_string(), value);
        if let Err(e) = self.persist(&entries) {
            match previous {
                Some(old) => entries.insert(key.to_string(), old),
                None => entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), BackendFailure> {
        let mut entries = self.entries.lock();
        if entries.remove(key).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, BackendFailure> {
        Ok(self.entries.lock().keys().cloned().collect())
    }

    fn usage_bytes(&self) -> u64 {
        usage(&self.entries.lock())
    }
}

/// Process-local medium for ephemeral stores and tests
#[derive(Default)]
pub struct MemoryMedium {
    capacity: Option<u64>,
    entries: Mutex<BTreeMap<String, String>>,
    failing: Mutex<Option<BackendFailure>>,
}

impl MemoryMedium {
    pub fn new(capacity: Option<u64>) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    /// Make every write fail with `failure` until cleared
    pub fn fail_writes(&self, failure: Option<BackendFailure>) {
        *self.failing.lock() = failure;
    }
}

impl KeyValueMedium for MemoryMedium {
    fn get(&self, key: &str) -> Result<Option<String>, BackendFailure> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: String) -> Result<(), BackendFailure> {
        if let Some(failure) = self.failing.lock().clone() {
            return Err(failure);
        }
        let mut entries = self.entries.lock();
        check_capacity(&entries, key, &value, self.capacity)?;
        entries.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), BackendFailure> {
        self.entries.lock().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, BackendFailure> {
        Ok(self.entries.lock().keys().cloned().collect())
    }

    fn usage_bytes(&self) -> u64 {
        usage(&self.entries.lock())
    }
}

/// A record held by the fallback medium
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackEntry {
    pub id: RecordId,
    pub payload: Value,
    pub created_at_ms: i64,
}

/// Everything waiting to be moved into the transactional backend
#[derive(Debug, Default)]
pub struct LegacyData {
    pub quotes: Vec<FallbackEntry>,
    pub components: Vec<FallbackEntry>,
    pub settings: Vec<FallbackEntry>,
}

impl LegacyData {
    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty() && self.components.is_empty() && self.settings.is_empty()
    }
}

/// The fallback medium's record layer
pub struct FallbackStore {
    medium: Box<dyn KeyValueMedium>,
    max_entries: usize,
    max_record_bytes: usize,
}

impl FallbackStore {
    pub fn new(medium: Box<dyn KeyValueMedium>, max_entries: usize, max_record_bytes: usize) -> Self {
        Self {
            medium,
            max_entries,
            max_record_bytes,
        }
    }

    /// Only lists and settings live here
    pub const fn supports(store: StoreName) -> bool {
        !matches!(store, StoreName::History)
    }

    fn list_key(store: StoreName) -> String {
        format!("{KEY_PREFIX}{store}")
    }

    fn next_id(&self) -> Result<RecordId, BackendFailure> {
        let seq = self
            .medium
            .get(SEQ_KEY)?
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0)
            + 1;
        self.medium.set(SEQ_KEY, seq.to_string())?;
        Ok(RecordId::Key(format!("{FALLBACK_ID_PREFIX}{seq}")))
    }

    fn check_size(&self, payload: &Value) -> Result<String, BackendFailure> {
        let encoded =
            serde_json::to_string(payload).map_err(|e| BackendFailure::Other(e.to_string()))?;
        if encoded.len() > self.max_record_bytes {
            return Err(BackendFailure::QuotaExceeded {
                used: encoded.len() as u64,
                limit: self.max_record_bytes as u64,
            });
        }
        Ok(encoded)
    }

    pub fn list(&self, store: StoreName) -> Result<Vec<FallbackEntry>, BackendFailure> {
        if store == StoreName::Settings {
            return self.settings();
        }
        match self.medium.get(&Self::list_key(store))? {
            Some(json) => serde_json::from_str(&json).map_err(|e| {
                BackendFailure::Other(format!("fallback list '{store}' unreadable: {e}"))
            }),
            None => Ok(Vec::new()),
        }
    }

    fn save_list(&self, store: StoreName, entries: &[FallbackEntry]) -> Result<(), BackendFailure> {
        if entries.is_empty() {
            return self.medium.remove(&Self::list_key(store));
        }
        let json =
            serde_json::to_string(entries).map_err(|e| BackendFailure::Other(e.to_string()))?;
        self.medium.set(&Self::list_key(store), json)
    }

    /// Insert at the front (or replace `id` in place), trimming to the cap.
    /// History is accepted and dropped, returning `None`.
    pub fn upsert(
        &self,
        store: StoreName,
        id: Option<RecordId>,
        payload: Value,
        now_ms: i64,
    ) -> Result<Option<FallbackEntry>, BackendFailure> {
        match store {
            StoreName::History => return Ok(None),
            StoreName::Settings => {
                let key = match id {
                    Some(RecordId::Key(key)) => key,
                    other => {
                        return Err(BackendFailure::Other(format!(
                            "settings need a key, got {other:?}"
                        )))
                    }
                };
                return self.set_setting(&key, payload, now_ms).map(Some);
            }
            StoreName::Quotes | StoreName::Components => {}
        }

        self.check_size(&payload)?;
        let mut entries = self.list(store)?;
        let existing = id
            .as_ref()
            .and_then(|id| entries.iter().position(|e| &e.id == id));
        let entry = match existing {
            Some(position) => {
                let mut entry = entries.remove(position);
                entry.payload = payload;
                entry
            }
            None => FallbackEntry {
                id: match id {
                    Some(id) => id,
                    None => self.next_id()?,
                },
                payload,
                created_at_ms: now_ms,
            },
        };
        entries.insert(0, entry.clone());
        entries.truncate(self.max_entries);
        self.save_list(store, &entries)?;
        Ok(Some(entry))
    }

    pub fn get(&self, store: StoreName, id: &RecordId) -> Result<Option<FallbackEntry>, BackendFailure> {
        if let (StoreName::Settings, RecordId::Key(key)) = (store, id) {
            return self.get_setting(key);
        }
        Ok(self.list(store)?.into_iter().find(|e| &e.id == id))
    }

    pub fn remove(&self, store: StoreName, id: &RecordId) -> Result<bool, BackendFailure> {
        if let (StoreName::Settings, RecordId::Key(key)) = (store, id) {
            let key = format!("{SETTING_PREFIX}{key}");
            let existed = self.medium.get(&key)?.is_some();
            self.medium.remove(&key)?;
            return Ok(existed);
        }
        let mut entries = self.list(store)?;
        let before = entries.len();
        entries.retain(|e| &e.id != id);
        if entries.len() == before {
            return Ok(false);
        }
        self.save_list(store, &entries)?;
        Ok(true)
    }

    /// Replace a whole store's contents
    pub fn replace_all(&self, store: StoreName, entries: Vec<FallbackEntry>) -> Result<(), BackendFailure> {
        match store {
            StoreName::History => Ok(()),
            StoreName::Settings => {
                for existing in self.settings()? {
                    if let RecordId::Key(key) = existing.id {
                        self.medium.remove(&format!("{SETTING_PREFIX}{key}"))?;
                    }
                }
                for entry in entries {
                    self.write_setting_entry(&entry)?;
                }
                Ok(())
            }
            StoreName::Quotes | StoreName::Components => {
                let mut entries = entries;
                entries.truncate(self.max_entries);
                self.save_list(store, &entries)
            }
        }
    }

    fn write_setting_entry(&self, entry: &FallbackEntry) -> Result<(), BackendFailure> {
        let RecordId::Key(key) = &entry.id else {
            return Err(BackendFailure::Other("setting without key".to_string()));
        };
        let json = serde_json::to_string(entry).map_err(|e| BackendFailure::Other(e.to_string()))?;
        self.medium.set(&format!("{SETTING_PREFIX}{key}"), json)
    }

    pub fn set_setting(&self, key: &str, payload: Value, now_ms: i64) -> Result<FallbackEntry, BackendFailure> {
        self.check_size(&payload)?;
        let created_at_ms = self
            .get_setting(key)?
            .map_or(now_ms, |existing| existing.created_at_ms);
        let entry = FallbackEntry {
            id: RecordId::Key(key.to_string()),
            payload,
            created_at_ms,
        };
        self.write_setting_entry(&entry)?;
        Ok(entry)
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<FallbackEntry>, BackendFailure> {
        match self.medium.get(&format!("{SETTING_PREFIX}{key}"))? {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| BackendFailure::Other(format!("setting '{key}' unreadable: {e}"))),
            None => Ok(None),
        }
    }

    pub fn settings(&self) -> Result<Vec<FallbackEntry>, BackendFailure> {
        let mut settings = Vec::new();
        for key in self.medium.keys()? {
            if let Some(name) = key.strip_prefix(SETTING_PREFIX) {
                if let Some(entry) = self.get_setting(name)? {
                    settings.push(entry);
                }
            }
        }
        Ok(settings)
    }

    pub fn count(&self, store: StoreName) -> Result<usize, BackendFailure> {
        match store {
            StoreName::History => Ok(0),
            other => self.list(other).map(|l| l.len()),
        }
    }

    pub fn usage_bytes(&self) -> u64 {
        self.medium.usage_bytes()
    }

    /// Everything that should move to the transactional backend
    pub fn pending_migration(&self) -> Result<LegacyData, BackendFailure> {
        Ok(LegacyData {
            quotes: self.list(StoreName::Quotes)?,
            components: self.list(StoreName::Components)?,
            settings: self.settings()?,
        })
    }

    /// Drop migrated data so nothing moves twice
    pub fn finish_migration(&self, migrated: &LegacyData) -> Result<(), BackendFailure> {
        for store in [StoreName::Quotes, StoreName::Components] {
            let moved = match store {
                StoreName::Quotes => &migrated.quotes,
                _ => &migrated.components,
            };
            let mut remaining = self.list(store)?;
            remaining.retain(|e| !moved.iter().any(|m| m.id == e.id));
            self.save_list(store, &remaining)?;
        }
        for setting in &migrated.settings {
            if let RecordId::Key(key) = &setting.id {
                self.medium.remove(&format!("{SETTING_PREFIX}{key}"))?;
            }
        }
        Ok(())
    }

    /// Overwrite the payload of an existing entry in place; `false` when the
    /// entry is gone
    pub fn replace_payload(
        &self,
        store: StoreName,
        id: &RecordId,
        payload: Value,
    ) -> Result<bool, BackendFailure> {
        self.check_size(&payload)?;
        if let (StoreName::Settings, RecordId::Key(key)) = (store, id) {
            let Some(mut entry) = self.get_setting(key)? else {
                return Ok(false);
            };
            entry.payload = payload;
            self.write_setting_entry(&entry)?;
            return Ok(true);
        }
        let mut entries = self.list(store)?;
        let Some(entry) = entries.iter_mut().find(|e| &e.id == id) else {
            return Ok(false);
        };
        entry.payload = payload;
        self.save_list(store, &entries)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn store(max_entries: usize) -> FallbackStore {
        FallbackStore::new(Box::new(MemoryMedium::new(None)), max_entries, 1024)
    }

    #[test]
    fn lists_are_most_recent_first_and_capped() {
        let fallback = store(3);
        for i in 0..5 {
            fallback
                .upsert(StoreName::Quotes, None, json!({ "n": i }), i)
                .unwrap();
        }

        let entries = fallback.list(StoreName::Quotes).unwrap();
        let ns: Vec<_> = entries.iter().map(|e| e.payload["n"].as_i64().unwrap()).collect();
        assert_eq!(ns, vec![4, 3, 2]);
    }

    #[test]
    fn history_is_a_no_op() {
        let fallback = store(3);
        let stored = fallback
            .upsert(StoreName::History, None, json!({}), 1)
            .unwrap();
        assert!(stored.is_none());
        assert_eq!(fallback.count(StoreName::History).unwrap(), 0);
    }

    #[test]
    fn oversized_records_are_rejected() {
        let fallback = FallbackStore::new(Box::new(MemoryMedium::new(None)), 5, 8);
        let err = fallback
            .upsert(StoreName::Components, None, json!({ "long": "xxxxxxxx" }), 1)
            .unwrap_err();
        assert!(matches!(err, BackendFailure::QuotaExceeded { limit: 8, .. }));
    }

    #[test]
    fn capacity_limit_applies_to_medium() {
        let fallback = FallbackStore::new(Box::new(MemoryMedium::new(Some(64))), 50, 1024);
        let result = fallback.upsert(
            StoreName::Quotes,
            None,
            json!({ "blob": "y".repeat(80) }),
            1,
        );
        assert!(matches!(result, Err(BackendFailure::QuotaExceeded { .. })));
    }

    #[test]
    fn settings_are_keyed() {
        let fallback = store(3);
        fallback.set_setting("theme", json!({ "value": "dark" }), 1).unwrap();
        fallback.set_setting("theme", json!({ "value": "light" }), 2).unwrap();

        let entry = fallback.get_setting("theme").unwrap().unwrap();
        assert_eq!(entry.payload["value"], "light");
        assert_eq!(entry.created_at_ms, 1);
        assert_eq!(fallback.settings().unwrap().len(), 1);
    }

    #[test]
    fn migration_clears_moved_entries() {
        let fallback = store(10);
        fallback.upsert(StoreName::Quotes, None, json!({}), 1).unwrap();
        fallback.set_setting("k", json!({}), 1).unwrap();

        let pending = fallback.pending_migration().unwrap();
        assert!(!pending.is_empty());
        fallback.finish_migration(&pending).unwrap();

        assert!(fallback.pending_migration().unwrap().is_empty());
        assert_eq!(fallback.count(StoreName::Quotes).unwrap(), 0);
    }

    #[test]
    fn replacing_a_payload_keeps_position_and_creation_time() {
        let fallback = store(10);
        let first = fallback
            .upsert(StoreName::Quotes, None, json!({ "n": 1 }), 1)
            .unwrap()
            .unwrap();
        fallback.upsert(StoreName::Quotes, None, json!({ "n": 2 }), 2).unwrap();

        assert!(fallback
            .replace_payload(StoreName::Quotes, &first.id, json!({ "n": 10 }))
            .unwrap());
        let listed = fallback.list(StoreName::Quotes).unwrap();
        assert_eq!(listed[1].id, first.id);
        assert_eq!(listed[1].payload, json!({ "n": 10 }));
        assert_eq!(listed[1].created_at_ms, 1);

        assert!(!fallback
            .replace_payload(StoreName::Quotes, &RecordId::from("gone"), json!({}))
            .unwrap());
    }

    #[test]
    fn file_medium_persists_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("fallback.json");

        let medium = FileMedium::open(&path, None).unwrap();
        medium.set("quotevault.quotes", "[]".to_string()).unwrap();
        drop(medium);

        let medium = FileMedium::open(&path, None).unwrap();
        assert_eq!(medium.get("quotevault.quotes").unwrap().as_deref(), Some("[]"));
    }

    #[test]
    fn unreadable_file_is_moved_aside() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("fallback.json");
        std::fs::write(&path, "{broken").unwrap();

        let medium = FileMedium::open(&path, None).unwrap();
        assert!(medium.keys().unwrap().is_empty());
        assert!(temp_dir.path().join("fallback.json.corrupt").exists());
    }
}
