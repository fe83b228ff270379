//! Record-level operations

use super::validate::{self, Prepared};
use super::{
    now_ms, record_from_fallback, record_from_stored, QueryFilter, SaveReceipt, StorageManager,
};
use crate::backend::{BackendFailure, BackendKind, FallbackStore, ScanControl, StoredRecord};
use crate::errors::{Result, StoreError};
use quotevault_core::{Quote, Record, RecordId, StoreName, FALLBACK_FLAG_FIELD};
use serde_json::Value;
use tracing::{debug, warn};

impl StorageManager {
    pub async fn save_quote(&self, quote: Value) -> Result<SaveReceipt> {
        self.save_quote_as(None, quote).await
    }

    /// Save over an existing quote
    pub async fn update_quote(&self, id: RecordId, quote: Value) -> Result<SaveReceipt> {
        self.save_quote_as(Some(id), quote).await
    }

    async fn save_quote_as(&self, id: Option<RecordId>, quote: Value) -> Result<SaveReceipt> {
        let prepared = validate::quote(quote, self.catalog(), now_ms(), self.max_payload_bytes())?;
        self.save_prepared(StoreName::Quotes, id, prepared)
            .await?
            .ok_or_else(|| StoreError::not_found("saved quote"))
    }

    pub async fn save_component(&self, component: Value) -> Result<SaveReceipt> {
        let prepared = validate::component(component, now_ms(), self.max_payload_bytes())?;
        self.save_prepared(StoreName::Components, None, prepared)
            .await?
            .ok_or_else(|| StoreError::not_found("saved component"))
    }

    /// `None` when history is not kept by the active backend
    pub async fn save_history(&self, entry: Value) -> Result<Option<SaveReceipt>> {
        let prepared = validate::history(entry, now_ms(), self.max_payload_bytes())?;
        self.save_prepared(StoreName::History, None, prepared).await
    }

    pub async fn set_setting(&self, key: &str, value: Value) -> Result<SaveReceipt> {
        let prepared = validate::setting(key, value, now_ms(), self.max_payload_bytes())?;
        self.save_prepared(StoreName::Settings, Some(RecordId::from(key)), prepared)
            .await?
            .ok_or_else(|| StoreError::not_found(format!("setting '{key}'")))
    }

    /// Enable or disable one component of a stored quote, applying the
    /// exclusion and dependency rules
    pub async fn set_component_enabled(
        &self,
        quote_id: &RecordId,
        component: &str,
        enabled: bool,
    ) -> Result<SaveReceipt> {
        if !self.catalog().all_components().contains(component) {
            return Err(StoreError::validation(
                "component",
                format!("unknown component '{component}'"),
            ));
        }
        let stored = self
            .get_record(StoreName::Quotes, quote_id)
            .await?
            .ok_or_else(|| StoreError::not_found(format!("quote {quote_id}")))?;
        let mut quote: Quote = serde_json::from_value(stored.payload.clone())
            .map_err(|e| StoreError::validation("quote", e.to_string()))?;

        let adjustments = quote.set_component_enabled(self.catalog(), component, enabled, now_ms());
        let mut payload = stored.payload;
        if let (Value::Object(map), Value::Object(updated)) = (&mut payload, serde_json::to_value(&quote)?) {
            map.extend(updated);
        }

        let mut receipt = self.save_quote_as(Some(quote_id.clone()), payload).await?;
        let mut all = adjustments;
        all.append(&mut receipt.adjustments);
        receipt.adjustments = all;
        Ok(receipt)
    }

    fn max_payload_bytes(&self) -> usize {
        self.config().max_fallback_record_bytes.saturating_mul(4)
    }

    async fn save_prepared(
        &self,
        store: StoreName,
        id: Option<RecordId>,
        prepared: Prepared,
    ) -> Result<Option<SaveReceipt>> {
        let Prepared {
            payload,
            defaults,
            adjustments,
        } = prepared;
        let saved = self.persist(store, id, payload).await?;
        Ok(saved.map(|(record, medium)| SaveReceipt {
            record,
            medium,
            adjustments,
            defaults,
        }))
    }

    /// Write to the active backend, recovering from quota exhaustion
    pub(super) async fn persist(
        &self,
        store: StoreName,
        id: Option<RecordId>,
        payload: Value,
    ) -> Result<Option<(Record, BackendKind)>> {
        match self.backend_kind() {
            BackendKind::Transactional => {}
            BackendKind::Fallback => {
                let entry = self
                    .execute_fallback("save", Some(store), |fallback| {
                        fallback.upsert(store, id, payload, now_ms())
                    })
                    .await?;
                return Ok(entry.map(|e| (record_from_fallback(e), BackendKind::Fallback)));
            }
            BackendKind::Unavailable => {
                return Err(StoreError::unavailable("no storage backend is usable"))
            }
        }

        let raw = serde_json::to_string(&payload)?;
        let result = self
            .execute("save", Some(store), |connection| {
                let (id, raw) = (id.clone(), raw.clone());
                async move { connection.put(store, id, raw).await }
            })
            .await;

        match result {
            Ok(row) => {
                debug!(store = %store, id = %row.id, "Saved record");
                let record = record_from_stored(&row).ok_or_else(|| StoreError::CorruptionDetected {
                    location: store.to_string(),
                    detail: format!("record {} unreadable right after save", row.id),
                    recovery_hint: crate::errors::RecoveryHint::VerifyIntegrity,
                })?;
                Ok(Some((record, BackendKind::Transactional)))
            }
            Err(StoreError::OperationFailed {
                failure: BackendFailure::QuotaExceeded { used, limit },
                ..
            }) => {
                warn!(store = %store, used, limit, "Storage quota exceeded");
                self.recover_from_quota(store, id, payload, raw).await
            }
            Err(err) => {
                if matches!(err, StoreError::OperationFailed { .. }) {
                    self.audit("write failure").await;
                }
                Err(err)
            }
        }
    }

    /// Last resort for a write the primary backend refused: the fallback
    /// medium, tagged so it can be told apart and migrated later
    pub(super) fn save_to_fallback(
        &self,
        store: StoreName,
        id: Option<RecordId>,
        mut payload: Value,
    ) -> std::result::Result<Option<(Record, BackendKind)>, BackendFailure> {
        if let Value::Object(map) = &mut payload {
            map.insert(FALLBACK_FLAG_FIELD.to_string(), Value::Bool(true));
        }
        let id = id.filter(|_| store == StoreName::Settings);
        let fallback = self.inner.fallback.lock();
        let entry = fallback.upsert(store, id, payload, now_ms())?;
        if let Some(entry) = &entry {
            warn!(store = %store, id = %entry.id, "Record written to fallback storage");
        }
        Ok(entry.map(|e| (record_from_fallback(e), BackendKind::Fallback)))
    }

    pub async fn get_quotes(&self, filter: QueryFilter) -> Result<Vec<Record>> {
        self.query(StoreName::Quotes, filter).await
    }

    pub async fn get_components(&self, filter: QueryFilter) -> Result<Vec<Record>> {
        self.query(StoreName::Components, filter).await
    }

    pub async fn get_history(&self, filter: QueryFilter) -> Result<Vec<Record>> {
        self.query(StoreName::History, filter).await
    }

    /// Newest-first records of `store` matching `filter`, including any held
    /// by the fallback medium
    pub async fn query(&self, store: StoreName, filter: QueryFilter) -> Result<Vec<Record>> {
        let fallback_rows = |fallback: &FallbackStore| -> std::result::Result<Vec<Record>, BackendFailure> {
            if !FallbackStore::supports(store) {
                return Ok(Vec::new());
            }
            let mut rows: Vec<Record> = fallback
                .list(store)?
                .into_iter()
                .map(record_from_fallback)
                .filter(|r| filter.matches(r))
                .collect();
            if let Some(limit) = filter.limit {
                rows.truncate(limit);
            }
            Ok(rows)
        };

        match self.backend_kind() {
            BackendKind::Transactional => {}
            BackendKind::Fallback => {
                let mut rows = self.execute_fallback("query", Some(store), fallback_rows).await?;
                rows.sort_by_key(|r| std::cmp::Reverse(r.timestamp_millis()));
                return Ok(rows);
            }
            BackendKind::Unavailable => {
                return Err(StoreError::unavailable("no storage backend is usable"))
            }
        }

        let range = filter.index_range(&self.inner.schema, store);
        let (mut rows, corrupt) = self
            .execute("query", Some(store), |connection| {
                let (range, filter) = (range.clone(), &filter);
                async move {
                    let mut rows = Vec::new();
                    let mut corrupt = 0usize;
                    connection
                        .scan(store, range, &mut |row: &StoredRecord| {
                            match record_from_stored(row) {
                                Some(record) if filter.matches(&record) => rows.push(record),
                                Some(_) => {}
                                None => corrupt += 1,
                            }
                            if filter.is_full(rows.len()) {
                                ScanControl::Stop
                            } else {
                                ScanControl::Continue
                            }
                        })
                        .await?;
                    Ok::<_, BackendFailure>((rows, corrupt))
                }
            })
            .await?;

        if corrupt > 0 {
            warn!(store = %store, corrupt, "Skipped unreadable records");
            self.audit("unreadable records").await;
        }

        let parked = fallback_rows(&self.inner.fallback.lock()).unwrap_or_else(|failure| {
            warn!(error = %failure, "Fallback medium unreadable; returning primary rows only");
            Vec::new()
        });
        if !parked.is_empty() {
            rows.extend(parked);
            rows.sort_by_key(|r| std::cmp::Reverse(r.timestamp_millis()));
            if let Some(limit) = filter.limit {
                rows.truncate(limit);
            }
        }
        Ok(rows)
    }

    pub async fn get_record(&self, store: StoreName, id: &RecordId) -> Result<Option<Record>> {
        let from_fallback = |fallback: &FallbackStore| {
            fallback
                .get(store, id)
                .map(|entry| entry.map(record_from_fallback))
        };
        match self.backend_kind() {
            BackendKind::Transactional => {}
            BackendKind::Fallback => {
                return self.execute_fallback("get", Some(store), from_fallback).await
            }
            BackendKind::Unavailable => {
                return Err(StoreError::unavailable("no storage backend is usable"))
            }
        }

        let row = self
            .execute("get", Some(store), |connection| {
                let id = id.clone();
                async move { connection.get(store, &id).await }
            })
            .await?;
        match row {
            Some(row) => match record_from_stored(&row) {
                Some(record) => Ok(Some(record)),
                None => {
                    self.audit("unreadable record").await;
                    Err(StoreError::CorruptionDetected {
                        location: store.to_string(),
                        detail: format!("record {id} is not valid JSON"),
                        recovery_hint: crate::errors::RecoveryHint::VerifyIntegrity,
                    })
                }
            },
            None => Ok(from_fallback(&self.inner.fallback.lock()).unwrap_or(None)),
        }
    }

    /// The stored value of a setting
    pub async fn get_setting(&self, key: &str) -> Result<Option<Value>> {
        let record = self.get_record(StoreName::Settings, &RecordId::from(key)).await?;
        Ok(record.and_then(|r| r.payload.get("value").cloned()))
    }

    /// Returns whether anything was removed
    pub async fn delete_record(&self, store: StoreName, id: &RecordId) -> Result<bool> {
        let from_fallback = |fallback: &FallbackStore| fallback.remove(store, id);
        match self.backend_kind() {
            BackendKind::Transactional => {}
            BackendKind::Fallback => {
                return self.execute_fallback("delete", Some(store), from_fallback).await
            }
            BackendKind::Unavailable => {
                return Err(StoreError::unavailable("no storage backend is usable"))
            }
        }

        let existed = self
            .execute("delete", Some(store), |connection| {
                let id = id.clone();
                async move {
                    let existed = connection.get(store, &id).await?.is_some();
                    if existed {
                        connection.delete(store, id).await?;
                    }
                    Ok::<_, BackendFailure>(existed)
                }
            })
            .await?;
        let parked = from_fallback(&self.inner.fallback.lock()).unwrap_or_else(|failure| {
            warn!(error = %failure, "Could not remove record from fallback medium");
            false
        });
        Ok(existed || parked)
    }
}
