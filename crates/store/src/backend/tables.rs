//! In-memory tables and indices shared by the transactional backends

use super::schema::{Schema, StoreSchema, TIMESTAMP_INDEX};
use super::{BackendFailure, IndexRange, Mutation, ScanControl, ScanVisitor, StoredRecord};
use quotevault_core::{payload_timestamp, IndexValue, RecordId, StoreName};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A mutation with ids and creation times already assigned, as journaled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Resolved {
    Put(StoredRecord),
    Delete { store: StoreName, id: RecordId },
}

/// Compacted on-disk form of [`Tables`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableImage {
    pub next_seq: BTreeMap<StoreName, u64>,
    pub rows: Vec<StoredRecord>,
}

#[derive(Debug, Default)]
struct Table {
    next_seq: u64,
    rows: BTreeMap<RecordId, StoredRecord>,
    indices: BTreeMap<String, BTreeSet<(IndexValue, RecordId)>>,
}

/// All stores of one backend with their secondary indices
#[derive(Debug)]
pub struct Tables {
    schema: Schema,
    tables: BTreeMap<StoreName, Table>,
    bytes: u64,
}

fn index_entries(spec: &StoreSchema, record: &StoredRecord) -> Vec<(String, IndexValue)> {
    let payload: Option<serde_json::Value> = serde_json::from_str(&record.raw).ok();
    spec.indices
        .iter()
        .filter_map(|index| {
            let value = match (&payload, index.name.as_str()) {
                (Some(p), TIMESTAMP_INDEX) => Some(IndexValue::Int(
                    payload_timestamp(p).unwrap_or(record.created_at_ms),
                )),
                (None, TIMESTAMP_INDEX) => Some(IndexValue::Int(record.created_at_ms)),
                (Some(p), _) => index.extract(p),
                (None, _) => None,
            };
            value.map(|v| (index.name.clone(), v))
        })
        .collect()
}

impl Tables {
    pub fn new(schema: Schema) -> Self {
        let tables = schema
            .stores
            .iter()
            .map(|s| (s.name, Table::default()))
            .collect();
        Self {
            schema,
            tables,
            bytes: 0,
        }
    }

    pub fn from_image(schema: Schema, image: TableImage) -> Self {
        let mut tables = Self::new(schema);
        for (store, next) in image.next_seq {
            if let Some(table) = tables.tables.get_mut(&store) {
                table.next_seq = next;
            }
        }
        for row in image.rows {
            tables.insert_row(row);
        }
        tables
    }

    pub fn image(&self) -> TableImage {
        TableImage {
            next_seq: self
                .tables
                .iter()
                .map(|(store, t)| (*store, t.next_seq))
                .collect(),
            rows: self
                .tables
                .values()
                .flat_map(|t| t.rows.values().cloned())
                .collect(),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Add missing stores and indices, rebuilding indices of touched stores
    pub fn upgrade(&mut self, target: &Schema) -> Vec<StoreName> {
        let touched = self.schema.upgrade_to(target);
        for store in &touched {
            let Some(spec) = self.schema.store(*store).cloned() else {
                continue;
            };
            let table = self.tables.entry(*store).or_default();
            table.indices.clear();
            for row in table.rows.values() {
                for (name, value) in index_entries(&spec, row) {
                    table
                        .indices
                        .entry(name)
                        .or_default()
                        .insert((value, row.id.clone()));
                }
            }
        }
        touched
    }

    /// Assign ids and creation times without touching the tables
    pub fn resolve(
        &self,
        batch: Vec<Mutation>,
        now_ms: i64,
        schema_version: u32,
    ) -> Result<Vec<Resolved>, BackendFailure> {
        let mut next: BTreeMap<StoreName, u64> = BTreeMap::new();
        let mut resolved = Vec::with_capacity(batch.len());

        for mutation in batch {
            let store = mutation.store();
            let table = self
                .tables
                .get(&store)
                .ok_or_else(|| BackendFailure::Other(format!("store '{store}' does not exist")))?;

            match mutation {
                Mutation::Put { id, raw, .. } => {
                    let id = match id {
                        Some(id) => id,
                        None => {
                            let seq = next.entry(store).or_insert(table.next_seq.max(1));
                            let id = RecordId::Seq(*seq);
                            *seq += 1;
                            id
                        }
                    };
                    let created_at_ms = table
                        .rows
                        .get(&id)
                        .map_or(now_ms, |existing| existing.created_at_ms);
                    resolved.push(Resolved::Put(StoredRecord {
                        store,
                        id,
                        raw,
                        created_at_ms,
                        schema_version,
                    }));
                }
                Mutation::Replace {
                    id, expected, raw, ..
                } => {
                    let Some(existing) = table.rows.get(&id) else {
                        continue;
                    };
                    if existing.raw != expected {
                        continue;
                    }
                    resolved.push(Resolved::Put(StoredRecord {
                        store,
                        id,
                        raw,
                        created_at_ms: existing.created_at_ms,
                        schema_version,
                    }));
                }
                Mutation::Delete { id, .. } => resolved.push(Resolved::Delete { store, id }),
            }
        }
        Ok(resolved)
    }

    /// Payload bytes held after `resolved` would be applied
    pub fn projected_bytes(&self, resolved: &[Resolved]) -> u64 {
        let mut bytes = self.bytes as i128;
        let mut replaced: BTreeSet<(StoreName, &RecordId)> = BTreeSet::new();
        for change in resolved {
            let (store, id) = match change {
                Resolved::Put(record) => (record.store, &record.id),
                Resolved::Delete { store, id } => (*store, id),
            };
            if replaced.insert((store, id)) {
                if let Some(existing) = self.tables.get(&store).and_then(|t| t.rows.get(id)) {
                    bytes -= existing.raw.len() as i128;
                }
            }
            if let Resolved::Put(record) = change {
                bytes += record.raw.len() as i128;
            }
        }
        bytes.max(0) as u64
    }

    pub fn apply(&mut self, resolved: &[Resolved]) -> Vec<StoredRecord> {
        let mut stored = Vec::new();
        for change in resolved {
            match change {
                Resolved::Put(record) => {
                    self.insert_row(record.clone());
                    stored.push(record.clone());
                }
                Resolved::Delete { store, id } => {
                    self.remove_row(*store, id);
                }
            }
        }
        stored
    }

    fn insert_row(&mut self, record: StoredRecord) {
        self.remove_row(record.store, &record.id);
        let Some(spec) = self.schema.store(record.store) else {
            return;
        };
        let entries = index_entries(spec, &record);
        let table = self.tables.entry(record.store).or_default();
        if let RecordId::Seq(seq) = record.id {
            table.next_seq = table.next_seq.max(seq + 1);
        }
        for (name, value) in entries {
            table
                .indices
                .entry(name)
                .or_default()
                .insert((value, record.id.clone()));
        }
        self.bytes += record.raw.len() as u64;
        table.rows.insert(record.id.clone(), record);
    }

    fn remove_row(&mut self, store: StoreName, id: &RecordId) -> Option<StoredRecord> {
        let table = self.tables.get_mut(&store)?;
        let removed = table.rows.remove(id)?;
        if let Some(spec) = self.schema.store(store) {
            for (name, value) in index_entries(spec, &removed) {
                if let Some(entries) = table.indices.get_mut(&name) {
                    entries.remove(&(value, id.clone()));
                }
            }
        }
        self.bytes = self.bytes.saturating_sub(removed.raw.len() as u64);
        Some(removed)
    }

    pub fn get(&self, store: StoreName, id: &RecordId) -> Option<&StoredRecord> {
        self.tables.get(&store)?.rows.get(id)
    }

    /// Walk `range` newest-first, handing each record to `visit`
    pub fn scan(
        &self,
        store: StoreName,
        range: Option<&IndexRange>,
        visit: &mut ScanVisitor<'_>,
    ) -> Result<(), BackendFailure> {
        let table = self
            .tables
            .get(&store)
            .ok_or_else(|| BackendFailure::Other(format!("store '{store}' does not exist")))?;
        let index_name = range.map_or(TIMESTAMP_INDEX, |r| r.index.as_str());
        let Some(index) = table.indices.get(index_name) else {
            if self.schema.store(store).and_then(|s| s.index(index_name)).is_some() {
                return Ok(());
            }
            return Err(BackendFailure::Other(format!(
                "store '{store}' has no index '{index_name}'"
            )));
        };

        for (value, id) in index.iter().rev() {
            if let Some(range) = range {
                if range.upper.as_ref().is_some_and(|hi| value > hi) {
                    continue;
                }
                if range.lower.as_ref().is_some_and(|lo| value < lo) {
                    break;
                }
            }
            if let Some(record) = table.rows.get(id) {
                if visit(record) == ScanControl::Stop {
                    break;
                }
            }
        }
        Ok(())
    }

    pub fn count(&self, store: StoreName) -> usize {
        self.tables.get(&store).map_or(0, |t| t.rows.len())
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(tables: &mut Tables, store: StoreName, raw: &str, now: i64) -> StoredRecord {
        let resolved = tables
            .resolve(
                vec![Mutation::Put {
                    store,
                    id: None,
                    raw: raw.to_string(),
                }],
                now,
                3,
            )
            .unwrap();
        tables.apply(&resolved).pop().unwrap()
    }

    fn collect(tables: &Tables, store: StoreName, range: Option<&IndexRange>) -> Vec<RecordId> {
        let mut ids = Vec::new();
        tables
            .scan(store, range, &mut |r: &StoredRecord| {
                ids.push(r.id.clone());
                ScanControl::Continue
            })
            .unwrap();
        ids
    }

    #[test]
    fn assigns_monotonic_ids() {
        let mut tables = Tables::new(Schema::current());
        let a = put(&mut tables, StoreName::Quotes, "{}", 1);
        let b = put(&mut tables, StoreName::Quotes, "{}", 2);
        assert_eq!(a.id, RecordId::Seq(1));
        assert_eq!(b.id, RecordId::Seq(2));
    }

    #[test]
    fn scans_newest_first_by_payload_timestamp() {
        let mut tables = Tables::new(Schema::current());
        put(&mut tables, StoreName::History, r#"{"timestamp":300}"#, 1);
        put(&mut tables, StoreName::History, r#"{"timestamp":100}"#, 2);
        put(&mut tables, StoreName::History, r#"{"timestamp":200}"#, 3);

        assert_eq!(
            collect(&tables, StoreName::History, None),
            vec![RecordId::Seq(1), RecordId::Seq(3), RecordId::Seq(2)]
        );

        let range = IndexRange {
            index: TIMESTAMP_INDEX.to_string(),
            lower: Some(IndexValue::Int(150)),
            upper: Some(IndexValue::Int(250)),
        };
        assert_eq!(
            collect(&tables, StoreName::History, Some(&range)),
            vec![RecordId::Seq(3)]
        );
    }

    #[test]
    fn replacing_keeps_created_at_and_byte_count() {
        let mut tables = Tables::new(Schema::current());
        let first = put(&mut tables, StoreName::Settings, "{}", 10);
        let resolved = tables
            .resolve(
                vec![Mutation::Put {
                    store: StoreName::Settings,
                    id: Some(first.id.clone()),
                    raw: "{\"a\":1}".to_string(),
                }],
                99,
                3,
            )
            .unwrap();
        assert_eq!(tables.projected_bytes(&resolved), 7);
        let stored = tables.apply(&resolved);
        assert_eq!(stored[0].created_at_ms, 10);
        assert_eq!(tables.bytes(), 7);
        assert_eq!(tables.count(StoreName::Settings), 1);
    }

    #[test]
    fn unparsable_rows_still_scan_by_creation_time() {
        let mut tables = Tables::new(Schema::current());
        put(&mut tables, StoreName::Quotes, "{not json", 50);
        assert_eq!(collect(&tables, StoreName::Quotes, None).len(), 1);
    }

    #[test]
    fn replacing_moves_the_row_between_index_entries() {
        let mut tables = Tables::new(Schema::current());
        let first = put(&mut tables, StoreName::Components, r#"{"componentType":"sensors"}"#, 1);
        put(&mut tables, StoreName::Components, r#"{"componentType":"sensors"}"#, 2);
        let resolved = tables
            .resolve(
                vec![Mutation::Put {
                    store: StoreName::Components,
                    id: Some(first.id.clone()),
                    raw: r#"{"componentType":"locations"}"#.to_string(),
                }],
                3,
                3,
            )
            .unwrap();
        tables.apply(&resolved);

        let sensors = IndexRange::exact("componentType", IndexValue::from("sensors"));
        let locations = IndexRange::exact("componentType", IndexValue::from("locations"));
        assert_eq!(collect(&tables, StoreName::Components, Some(&sensors)), vec![RecordId::Seq(2)]);
        assert_eq!(collect(&tables, StoreName::Components, Some(&locations)), vec![first.id]);
        assert_eq!(collect(&tables, StoreName::Components, None).len(), 2);
    }

    #[test]
    fn conditional_replace_is_dropped_once_the_row_moved_on() {
        let mut tables = Tables::new(Schema::current());
        let row = put(&mut tables, StoreName::Quotes, r#"{"v":1}"#, 1);
        let replace = |expected: &str| Mutation::Replace {
            store: StoreName::Quotes,
            id: row.id.clone(),
            expected: expected.to_string(),
            raw: r#"{"v":3}"#.to_string(),
        };

        let stale = tables.resolve(vec![replace(r#"{"v":0}"#)], 5, 3).unwrap();
        assert!(stale.is_empty());
        let missing = tables
            .resolve(
                vec![Mutation::Replace {
                    store: StoreName::Quotes,
                    id: RecordId::Seq(40),
                    expected: "{}".to_string(),
                    raw: "{}".to_string(),
                }],
                5,
                3,
            )
            .unwrap();
        assert!(missing.is_empty());

        let current = tables.resolve(vec![replace(r#"{"v":1}"#)], 5, 3).unwrap();
        let stored = tables.apply(&current);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].created_at_ms, 1);
        assert_eq!(tables.get(StoreName::Quotes, &row.id).unwrap().raw, r#"{"v":3}"#);
    }

    #[test]
    fn image_round_trip_restores_indices() {
        let mut tables = Tables::new(Schema::current());
        put(&mut tables, StoreName::Components, r#"{"componentType":"sensors"}"#, 1);
        let restored = Tables::from_image(Schema::current(), tables.image());

        let range = IndexRange::exact("componentType", IndexValue::from("sensors"));
        assert_eq!(collect(&restored, StoreName::Components, Some(&range)).len(), 1);
        assert_eq!(restored.bytes(), tables.bytes());
    }
}
