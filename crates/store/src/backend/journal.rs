//! Directory-backed transactional backend
//!
//! Layout under the backend directory:
//! - `schema.json`: the stored [`Schema`]
//! - `tables.img`: one frame holding the compacted tables
//! - `journal.log`: frames of committed batches since the last compaction
//! - `LOCK`: exclusive lock held while a connection is open

use super::schema::Schema;
use super::tables::{Resolved, TableImage, Tables};
use super::{
    BackendFailure, BackendProvider, Connection, IndexRange, Mutation, ScanVisitor, StoredRecord,
};
use crate::journal::{decode_frame, encode_frame, replay, JournalWriter};
use async_trait::async_trait;
use fs2::FileExt;
use parking_lot::Mutex;
use quotevault_core::{RecordId, StoreName};
use quotevault_utils::{read_if_exists, write_atomic};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const SCHEMA_FILE: &str = "schema.json";
const IMAGE_FILE: &str = "tables.img";
const JOURNAL_FILE: &str = "journal.log";
const LOCK_FILE: &str = "LOCK";

fn other(context: &str, error: impl std::fmt::Display) -> BackendFailure {
    BackendFailure::Other(format!("{context}: {error}"))
}

/// Opens [`Connection`]s to a journal directory
#[derive(Debug, Clone)]
pub struct JournalProvider {
    dir: PathBuf,
    quota_bytes: Option<u64>,
    compact_threshold: u64,
}

impl JournalProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            quota_bytes: None,
            compact_threshold: 1024 * 1024,
        }
    }

    pub fn with_quota(mut self, quota_bytes: u64) -> Self {
        self.quota_bytes = Some(quota_bytes);
        self
    }

    pub fn with_compact_threshold(mut self, bytes: u64) -> Self {
        self.compact_threshold = bytes;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn acquire_lock(&self) -> Result<File, BackendFailure> {
        let path = self.dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| other("open lock file", e))?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(file),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Err(
                BackendFailure::Blocked(format!("'{}' is held by another connection", path.display())),
            ),
            Err(e) => Err(other("lock backend directory", e)),
        }
    }

    fn read_schema(&self) -> Result<Option<Schema>, BackendFailure> {
        let path = self.dir.join(SCHEMA_FILE);
        let Some(bytes) = read_if_exists(&path).map_err(|e| other("read schema", e))? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| other("parse schema.json", e))
    }

    fn write_schema(&self, schema: &Schema) -> Result<(), BackendFailure> {
        let json = serde_json::to_vec_pretty(schema).map_err(|e| other("encode schema", e))?;
        write_atomic(&self.dir.join(SCHEMA_FILE), &json).map_err(|e| other("write schema", e))
    }

    fn load_tables(&self, schema: Schema) -> Result<Tables, BackendFailure> {
        let image = match read_if_exists(&self.dir.join(IMAGE_FILE))
            .map_err(|e| other("read table image", e))?
        {
            Some(bytes) => decode_frame::<TableImage>(&bytes)
                .map(|(image, _)| image)
                .map_err(|e| other("decode table image", e))?,
            None => TableImage::default(),
        };
        let mut tables = Tables::from_image(schema, image);

        let outcome = replay(&self.dir.join(JOURNAL_FILE), |batch: Vec<Resolved>| {
            tables.apply(&batch);
        })?;
        if outcome.discarded > 0 {
            tracing::warn!(
                dir = %self.dir.display(),
                discarded = outcome.discarded,
                "Dropped torn journal tail"
            );
        }
        tracing::debug!(frames = outcome.frames, "Replayed journal");
        Ok(tables)
    }
}

#[async_trait]
impl BackendProvider for JournalProvider {
    fn name(&self) -> &'static str {
        "journal"
    }

    async fn probe(&self) -> bool {
        match fs::create_dir_all(&self.dir) {
            Ok(()) => fs::metadata(&self.dir).is_ok_and(|m| !m.permissions().readonly()),
            Err(e) => {
                tracing::debug!(dir = %self.dir.display(), error = %e, "Journal backend unavailable");
                false
            }
        }
    }

    async fn open(&self, schema: &Schema) -> Result<Arc<dyn Connection>, BackendFailure> {
        fs::create_dir_all(&self.dir).map_err(|e| other("create backend directory", e))?;
        let lock = self.acquire_lock()?;

        let stored = self.read_schema()?;
        let (stored_schema, needs_write) = match stored {
            Some(stored) if stored.version > schema.version => {
                return Err(BackendFailure::VersionConflict {
                    found: stored.version,
                    expected: schema.version,
                });
            }
            Some(stored) => {
                let older = stored.version < schema.version;
                (stored, older)
            }
            None => (schema.clone(), true),
        };

        let mut tables = self.load_tables(stored_schema)?;
        if tables.schema().version < schema.version {
            let from = tables.schema().version;
            let touched = tables.upgrade(schema);
            tracing::info!(from, to = schema.version, stores = ?touched, "Upgraded backend schema");
        }
        if needs_write {
            self.write_schema(tables.schema())?;
        }

        let writer = JournalWriter::open(&self.dir.join(JOURNAL_FILE))?;
        let mut state = JournalState {
            tables,
            writer,
            lock,
            image_path: self.dir.join(IMAGE_FILE),
        };
        if needs_write || state.writer.len() > self.compact_threshold {
            state.compact()?;
        }

        Ok(Arc::new(JournalConnection {
            state: Mutex::new(Some(state)),
            version: schema.version,
            quota_bytes: self.quota_bytes,
            compact_threshold: self.compact_threshold,
        }))
    }
}

struct JournalState {
    tables: Tables,
    writer: JournalWriter,
    lock: File,
    image_path: PathBuf,
}

impl JournalState {
    /// Fold the journal into the table image
    fn compact(&mut self) -> Result<(), BackendFailure> {
        let frame = encode_frame(&self.tables.image())?;
        write_atomic(&self.image_path, &frame).map_err(|e| other("write table image", e))?;
        self.writer.reset()?;
        Ok(())
    }
}

struct JournalConnection {
    state: Mutex<Option<JournalState>>,
    version: u32,
    quota_bytes: Option<u64>,
    compact_threshold: u64,
}

impl JournalConnection {
    fn with_state<T>(
        &self,
        f: impl FnOnce(&mut JournalState) -> Result<T, BackendFailure>,
    ) -> Result<T, BackendFailure> {
        let mut guard = self.state.lock();
        let state = guard
            .as_mut()
            .ok_or_else(|| BackendFailure::InvalidState("connection closed".to_string()))?;
        f(state)
    }
}

#[async_trait]
impl Connection for JournalConnection {
    fn schema_version(&self) -> u32 {
        self.version
    }

    async fn commit(&self, batch: Vec<Mutation>) -> Result<Vec<StoredRecord>, BackendFailure> {
        let version = self.version;
        let quota = self.quota_bytes;
        let threshold = self.compact_threshold;
        self.with_state(|state| {
            let resolved =
                state
                    .tables
                    .resolve(batch, chrono::Utc::now().timestamp_millis(), version)?;
            if resolved.is_empty() {
                return Ok(Vec::new());
            }
            if let Some(limit) = quota {
                let used = state.tables.projected_bytes(&resolved);
                if used > limit && used > state.tables.bytes() {
                    return Err(BackendFailure::QuotaExceeded { used, limit });
                }
            }

            state.writer.append(&resolved)?;
            let stored = state.tables.apply(&resolved);

            if state.writer.len() > threshold {
                if let Err(e) = state.compact() {
                    tracing::warn!(error = %e, "Journal compaction failed; will retry on next commit");
                }
            }
            Ok(stored)
        })
    }

    async fn get(
        &self,
        store: StoreName,
        id: &RecordId,
    ) -> Result<Option<StoredRecord>, BackendFailure> {
        self.with_state(|state| Ok(state.tables.get(store, id).cloned()))
    }

    async fn scan(
        &self,
        store: StoreName,
        range: Option<IndexRange>,
        visit: &mut ScanVisitor<'_>,
    ) -> Result<(), BackendFailure> {
        self.with_state(|state| state.tables.scan(store, range.as_ref(), visit))
    }

    async fn count(&self, store: StoreName) -> Result<usize, BackendFailure> {
        self.with_state(|state| Ok(state.tables.count(store)))
    }

    async fn stored_bytes(&self) -> Result<u64, BackendFailure> {
        self.with_state(|state| Ok(state.tables.bytes()))
    }

    async fn close(&self) {
        if let Some(state) = self.state.lock().take() {
            if let Err(e) = FileExt::unlock(&state.lock) {
                tracing::debug!(error = %e, "Failed to release backend lock");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{IndexSpec, StoreSchema, TIMESTAMP_INDEX};
    use std::io::Write;
    use tempfile::TempDir;

    #[tokio::test]
    async fn records_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let provider = JournalProvider::new(temp_dir.path());

        let conn = provider.open(&Schema::current()).await.unwrap();
        let stored = conn
            .put(StoreName::Quotes, None, r#"{"timestamp":1}"#.into())
            .await
            .unwrap();
        conn.close().await;

        let conn = provider.open(&Schema::current()).await.unwrap();
        let loaded = conn.get(StoreName::Quotes, &stored.id).await.unwrap();
        assert_eq!(loaded, Some(stored));
    }

    #[tokio::test]
    async fn second_connection_is_blocked() {
        let temp_dir = TempDir::new().unwrap();
        let provider = JournalProvider::new(temp_dir.path());

        let first = provider.open(&Schema::current()).await.unwrap();
        let second = provider.open(&Schema::current()).await;
        assert!(matches!(second, Err(BackendFailure::Blocked(_))));

        first.close().await;
        assert!(provider.open(&Schema::current()).await.is_ok());
    }

    #[tokio::test]
    async fn newer_schema_on_disk_is_a_conflict() {
        let temp_dir = TempDir::new().unwrap();
        let mut newer = Schema::current();
        newer.version += 1;
        fs::write(
            temp_dir.path().join(SCHEMA_FILE),
            serde_json::to_vec(&newer).unwrap(),
        )
        .unwrap();

        let result = JournalProvider::new(temp_dir.path())
            .open(&Schema::current())
            .await;
        assert!(matches!(result, Err(BackendFailure::VersionConflict { .. })));
    }

    #[tokio::test]
    async fn older_schema_is_upgraded_in_place() {
        let temp_dir = TempDir::new().unwrap();
        let old = Schema {
            version: 1,
            stores: vec![StoreSchema {
                name: StoreName::Quotes,
                indices: vec![IndexSpec::new(TIMESTAMP_INDEX, TIMESTAMP_INDEX)],
            }],
        };
        fs::write(temp_dir.path().join(SCHEMA_FILE), serde_json::to_vec(&old).unwrap()).unwrap();

        let provider = JournalProvider::new(temp_dir.path());
        let conn = provider.open(&Schema::current()).await.unwrap();
        conn.put(StoreName::History, None, "{}".into()).await.unwrap();
        conn.close().await;

        let on_disk: Schema =
            serde_json::from_slice(&fs::read(temp_dir.path().join(SCHEMA_FILE)).unwrap()).unwrap();
        assert_eq!(on_disk, {
            let mut upgraded = old.clone();
            upgraded.upgrade_to(&Schema::current());
            upgraded
        });
    }

    #[tokio::test]
    async fn torn_journal_tail_is_dropped() {
        let temp_dir = TempDir::new().unwrap();
        let provider = JournalProvider::new(temp_dir.path());

        let conn = provider.open(&Schema::current()).await.unwrap();
        conn.put(StoreName::Quotes, None, "{}".into()).await.unwrap();
        conn.close().await;

        let mut journal = OpenOptions::new()
            .append(true)
            .open(temp_dir.path().join(JOURNAL_FILE))
            .unwrap();
        journal.write_all(&[9, 9, 9, 9, 9]).unwrap();
        drop(journal);

        let conn = provider.open(&Schema::current()).await.unwrap();
        assert_eq!(conn.count(StoreName::Quotes).await.unwrap(), 1);
        conn.put(StoreName::Quotes, None, "{}".into()).await.unwrap();
        assert_eq!(conn.count(StoreName::Quotes).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn compaction_keeps_data() {
        let temp_dir = TempDir::new().unwrap();
        let provider = JournalProvider::new(temp_dir.path()).with_compact_threshold(64);

        let conn = provider.open(&Schema::current()).await.unwrap();
        for i in 0..20 {
            conn.put(StoreName::History, None, format!(r#"{{"timestamp":{i}}}"#))
                .await
                .unwrap();
        }
        conn.close().await;

        assert!(fs::metadata(temp_dir.path().join(JOURNAL_FILE)).unwrap().len() <= 64 + 128);
        let conn = provider.open(&Schema::current()).await.unwrap();
        assert_eq!(conn.count(StoreName::History).await.unwrap(), 20);
    }

    #[tokio::test]
    async fn quota_is_enforced() {
        let temp_dir = TempDir::new().unwrap();
        let provider = JournalProvider::new(temp_dir.path()).with_quota(4);
        let conn = provider.open(&Schema::current()).await.unwrap();

        let err = conn
            .put(StoreName::Quotes, None, r#"{"big":true}"#.into())
            .await
            .unwrap_err();
        assert!(matches!(err, BackendFailure::QuotaExceeded { .. }));
    }

    #[tokio::test]
    async fn closed_connection_rejects_work() {
        let temp_dir = TempDir::new().unwrap();
        let conn = JournalProvider::new(temp_dir.path())
            .open(&Schema::current())
            .await
            .unwrap();
        conn.close().await;
        assert!(matches!(
            conn.stored_bytes().await,
            Err(BackendFailure::InvalidState(_))
        ));
    }
}
