//! Persistence channels for backups

use super::BackupMetadata;
use crate::errors::{Result, StoreError};
use crate::journal::{encode_frame, replay, JournalWriter};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// One entry in a backup channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChannelEvent {
    Created {
        metadata: BackupMetadata,
        sequence: u64,
        /// bincode-encoded snapshot
        snapshot: Vec<u8>,
    },
    Evicted {
        id: Uuid,
    },
}

/// Append-only storage for backup events
pub trait BackupChannel: Send + Sync {
    /// Every event in write order
    fn load(&self) -> Result<Vec<ChannelEvent>>;

    fn append(&self, event: &ChannelEvent) -> Result<()>;

    /// Atomically replace the channel's contents
    fn rewrite(&self, events: &[ChannelEvent]) -> Result<()>;
}

/// Backups in a journal file next to, but independent of, the primary backend
pub struct JournalChannel {
    path: PathBuf,
    writer: Mutex<Option<JournalWriter>>,
}

impl JournalChannel {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_parent(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::io(parent, "create backup directory", e))?;
        }
        Ok(())
    }
}

impl BackupChannel for JournalChannel {
    fn load(&self) -> Result<Vec<ChannelEvent>> {
        let mut events = Vec::new();
        let outcome = replay(&self.path, |event: ChannelEvent| events.push(event))?;
        if outcome.discarded > 0 {
            tracing::warn!(
                path = %self.path.display(),
                discarded = outcome.discarded,
                "Backup journal had a damaged tail"
            );
        }
        Ok(events)
    }

    fn append(&self, event: &ChannelEvent) -> Result<()> {
        let mut writer = self.writer.lock();
        if writer.is_none() {
            self.ensure_parent()?;
            *writer = Some(JournalWriter::open(&self.path)?);
        }
        if let Some(writer) = writer.as_mut() {
            writer.append(event)?;
        }
        Ok(())
    }

    fn rewrite(&self, events: &[ChannelEvent]) -> Result<()> {
        self.ensure_parent()?;
        let mut bytes = Vec::new();
        for event in events {
            bytes.extend(encode_frame(event)?);
        }

        let mut writer = self.writer.lock();
        *writer = None;
        quotevault_utils::write_atomic(&self.path, &bytes)?;
        *writer = Some(JournalWriter::open(&self.path)?);
        Ok(())
    }
}

/// Keeps backup events in process memory
#[derive(Default)]
pub struct MemoryChannel {
    events: Mutex<Vec<ChannelEvent>>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from pre-existing events
    pub fn with_events(events: Vec<ChannelEvent>) -> Self {
        Self {
            events: Mutex::new(events),
        }
    }
}

impl BackupChannel for MemoryChannel {
    fn load(&self) -> Result<Vec<ChannelEvent>> {
        Ok(self.events.lock().clone())
    }

    fn append(&self, event: &ChannelEvent) -> Result<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }

    fn rewrite(&self, events: &[ChannelEvent]) -> Result<()> {
        *self.events.lock() = events.to_vec();
        Ok(())
    }
}
