//! Point-in-time copies of store contents

use super::graph::{DataGraph, GraphError};
use quotevault_core::{RecordId, StoreName};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A record payload as found in storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    Graph(DataGraph),
    /// Text that did not parse as JSON
    Unparsed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub id: RecordId,
    pub created_at_ms: i64,
    pub schema_version: u32,
    pub payload: Payload,
}

impl SnapshotRecord {
    /// Build from stored JSON text, keeping the text when it does not parse
    pub fn from_raw(id: RecordId, raw: &str, created_at_ms: i64, schema_version: u32) -> Self {
        let payload = match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(value) => Payload::Graph(DataGraph::from_value(&value)),
            Err(_) => Payload::Unparsed(raw.to_string()),
        };
        Self {
            id,
            created_at_ms,
            schema_version,
            payload,
        }
    }

    pub fn from_value(id: RecordId, value: &serde_json::Value, created_at_ms: i64) -> Self {
        Self {
            id,
            created_at_ms,
            schema_version: quotevault_core::SCHEMA_VERSION,
            payload: Payload::Graph(DataGraph::from_value(value)),
        }
    }

    pub fn graph(&self) -> Option<&DataGraph> {
        match &self.payload {
            Payload::Graph(graph) => Some(graph),
            Payload::Unparsed(_) => None,
        }
    }

    pub fn graph_mut(&mut self) -> Option<&mut DataGraph> {
        match &mut self.payload {
            Payload::Graph(graph) => Some(graph),
            Payload::Unparsed(_) => None,
        }
    }

    pub fn to_value(&self) -> Result<serde_json::Value, GraphError> {
        match &self.payload {
            Payload::Graph(graph) => graph.to_value(),
            Payload::Unparsed(_) => Err(GraphError::Parse {
                offset: 0,
                message: "payload was never parsed".to_string(),
            }),
        }
    }
}

/// Records of every store at one point in time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub stores: BTreeMap<StoreName, Vec<SnapshotRecord>>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, store: StoreName, record: SnapshotRecord) {
        self.stores.entry(store).or_default().push(record);
    }

    pub fn records(&self, store: StoreName) -> &[SnapshotRecord] {
        self.stores.get(&store).map_or(&[], Vec::as_slice)
    }

    pub fn find(&self, store: StoreName, id: &RecordId) -> Option<&SnapshotRecord> {
        self.records(store).iter().find(|r| &r.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (StoreName, &SnapshotRecord)> {
        self.stores
            .iter()
            .flat_map(|(store, records)| records.iter().map(move |r| (*store, r)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (StoreName, &mut SnapshotRecord)> {
        self.stores
            .iter_mut()
            .flat_map(|(store, records)| records.iter_mut().map(move |r| (*store, r)))
    }

    pub fn len(&self) -> usize {
        self.stores.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
