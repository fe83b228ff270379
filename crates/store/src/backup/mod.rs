//! Point-in-time backups of store snapshots
//!
//! Backups persist through their own channel so they stay readable when the
//! primary backend is the thing that broke. At most `max_backups` are kept;
//! creating one more evicts the oldest.

mod channel;

pub use channel::{BackupChannel, ChannelEvent, JournalChannel, MemoryChannel};

use crate::errors::{Result, StoreError};
use crate::integrity::Snapshot;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

pub type BackupId = Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupMetadata {
    pub id: BackupId,
    pub tag: String,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
}

/// A restored backup
#[derive(Debug, Clone)]
pub struct RestoredBackup {
    pub snapshot: Snapshot,
    pub metadata: BackupMetadata,
}

struct Entry {
    metadata: BackupMetadata,
    sequence: u64,
    snapshot: Vec<u8>,
}

impl Entry {
    fn age_key(&self) -> (DateTime<Utc>, u64) {
        (self.metadata.created_at, self.sequence)
    }

    fn to_event(&self) -> ChannelEvent {
        ChannelEvent::Created {
            metadata: self.metadata.clone(),
            sequence: self.sequence,
            snapshot: self.snapshot.clone(),
        }
    }
}

#[derive(Default)]
struct BackupState {
    entries: Vec<Entry>,
    next_sequence: u64,
    evictions_since_rewrite: usize,
}

pub struct BackupManager {
    channel: Box<dyn BackupChannel>,
    max_backups: usize,
    state: Mutex<BackupState>,
}

impl BackupManager {
    /// Backups journaled at `path`
    pub fn open(path: &Path, max_backups: usize) -> Result<Self> {
        Self::with_channel(Box::new(JournalChannel::new(path)), max_backups)
    }

    pub fn in_memory(max_backups: usize) -> Self {
        Self {
            channel: Box::new(MemoryChannel::new()),
            max_backups: max_backups.max(1),
            state: Mutex::new(BackupState::default()),
        }
    }

    /// Rebuild the live set by replaying `channel`
    pub fn with_channel(channel: Box<dyn BackupChannel>, max_backups: usize) -> Result<Self> {
        let mut state = BackupState::default();
        for event in channel.load()? {
            match event {
                ChannelEvent::Created {
                    metadata,
                    sequence,
                    snapshot,
                } => {
                    state.next_sequence = state.next_sequence.max(sequence + 1);
                    state.entries.push(Entry {
                        metadata,
                        sequence,
                        snapshot,
                    });
                }
                ChannelEvent::Evicted { id } => {
                    state.entries.retain(|e| e.metadata.id != id);
                    state.evictions_since_rewrite += 1;
                }
            }
        }

        let manager = Self {
            channel,
            max_backups: max_backups.max(1),
            state: Mutex::new(state),
        };
        {
            let mut state = manager.state.lock();
            manager.evict_excess(&mut state)?;
        }
        tracing::debug!(backups = manager.len(), "Loaded backups");
        Ok(manager)
    }

    pub fn max_backups(&self) -> usize {
        self.max_backups
    }

    /// Store a deep copy of `snapshot` under `tag`
    pub fn create_backup(&self, snapshot: &Snapshot, tag: &str) -> Result<BackupMetadata> {
        let bytes = bincode::serialize(snapshot)?;
        let mut state = self.state.lock();

        let metadata = BackupMetadata {
            id: Uuid::new_v4(),
            tag: tag.to_string(),
            created_at: Utc::now(),
            size_bytes: bytes.len() as u64,
        };
        let entry = Entry {
            metadata: metadata.clone(),
            sequence: state.next_sequence,
            snapshot: bytes,
        };
        self.channel.append(&entry.to_event())?;
        state.next_sequence += 1;
        state.entries.push(entry);

        self.evict_excess(&mut state)?;
        tracing::info!(
            backup_id = %metadata.id,
            tag = %metadata.tag,
            size_bytes = metadata.size_bytes,
            "Created backup"
        );
        Ok(metadata)
    }

    fn evict_excess(&self, state: &mut BackupState) -> Result<()> {
        while state.entries.len() > self.max_backups {
            let Some(oldest) = state
                .entries
                .iter()
                .enumerate()
                .min_by_key(|(_, e)| e.age_key())
                .map(|(i, _)| i)
            else {
                break;
            };
            let evicted = state.entries.remove(oldest);
            self.channel.append(&ChannelEvent::Evicted {
                id: evicted.metadata.id,
            })?;
            state.evictions_since_rewrite += 1;
            tracing::debug!(backup_id = %evicted.metadata.id, "Evicted backup");
        }

        if state.evictions_since_rewrite >= self.max_backups {
            let events: Vec<ChannelEvent> = state.entries.iter().map(Entry::to_event).collect();
            self.channel.rewrite(&events)?;
            state.evictions_since_rewrite = 0;
        }
        Ok(())
    }

    /// Fails with `NotFound` when `id` is absent or its snapshot is unreadable
    pub fn restore_backup(&self, id: BackupId) -> Result<RestoredBackup> {
        let state = self.state.lock();
        let entry = state
            .entries
            .iter()
            .find(|e| e.metadata.id == id)
            .ok_or_else(|| StoreError::not_found(format!("backup {id}")))?;

        let snapshot = bincode::deserialize::<Snapshot>(&entry.snapshot).map_err(|e| {
            tracing::warn!(backup_id = %id, error = %e, "Backup snapshot is unreadable");
            StoreError::not_found(format!("backup {id} (unreadable snapshot)"))
        })?;
        Ok(RestoredBackup {
            snapshot,
            metadata: entry.metadata.clone(),
        })
    }

    /// Newest first
    pub fn list_backups(&self) -> Vec<BackupMetadata> {
        let state = self.state.lock();
        let mut entries: Vec<&Entry> = state.entries.iter().collect();
        entries.sort_by_key(|e| std::cmp::Reverse(e.age_key()));
        entries.into_iter().map(|e| e.metadata.clone()).collect()
    }

    /// Newest backup carrying `tag`
    pub fn latest_backup(&self, tag: &str) -> Option<BackupMetadata> {
        self.list_backups().into_iter().find(|m| m.tag == tag)
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
