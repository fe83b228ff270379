//! Query filters and the index each one is served from

use crate::backend::{IndexRange, Schema, TIMESTAMP_INDEX};
use quotevault_core::{IndexValue, Record, StoreName};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const SESSION_PATH: &[&str] = &["sessionId"];
const TYPE_PATH: &[&str] = &["type"];
const CUSTOMER_PATH: &[&str] = &["project", "customerName"];

/// Inclusive range of epoch milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from_ms: Option<i64>,
    pub to_ms: Option<i64>,
}

impl DateRange {
    pub fn contains(&self, millis: i64) -> bool {
        self.from_ms.map_or(true, |from| millis >= from) && self.to_ms.map_or(true, |to| millis <= to)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryFilter {
    pub limit: Option<usize>,
    /// Matches the `type` field of history entries
    pub kind: Option<String>,
    pub session_id: Option<String>,
    pub customer_name: Option<String>,
    pub date_range: Option<DateRange>,
}

impl QueryFilter {
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_customer(mut self, customer_name: impl Into<String>) -> Self {
        self.customer_name = Some(customer_name.into());
        self
    }

    pub fn with_date_range(mut self, range: DateRange) -> Self {
        self.date_range = Some(range);
        self
    }

    /// Text predicates as `(index name, payload path, expected value)`
    fn exact_fields(&self) -> Vec<(&'static str, &'static [&'static str], &str)> {
        let mut fields = Vec::new();
        if let Some(session) = &self.session_id {
            fields.push(("sessionId", SESSION_PATH, session.as_str()));
        }
        if let Some(kind) = &self.kind {
            fields.push(("type", TYPE_PATH, kind.as_str()));
        }
        if let Some(customer) = &self.customer_name {
            fields.push(("customerName", CUSTOMER_PATH, customer.as_str()));
        }
        fields
    }

    /// Range for the backend scan: the first exact predicate the store has an
    /// index for, otherwise the timestamp index bounded by the date range
    pub(crate) fn index_range(&self, schema: &Schema, store: StoreName) -> Option<IndexRange> {
        let indexed = |name: &str| {
            schema
                .store(store)
                .is_some_and(|s| s.index(name).is_some())
        };
        if let Some((index, _, value)) = self
            .exact_fields()
            .into_iter()
            .find(|(index, _, _)| indexed(index))
        {
            return Some(IndexRange::exact(index, IndexValue::from(value)));
        }
        self.date_range.map(|range| IndexRange {
            index: TIMESTAMP_INDEX.to_string(),
            lower: range.from_ms.map(IndexValue::Int),
            upper: range.to_ms.map(IndexValue::Int),
        })
    }

    /// Whether a record satisfies every predicate
    pub fn matches(&self, record: &Record) -> bool {
        let exact = self.exact_fields().into_iter().all(|(_, path, expected)| {
            let found = path
                .iter()
                .try_fold(&record.payload, |value, key| value.get(key));
            matches!(found, Some(Value::String(actual)) if actual == expected)
        });
        exact
            && self
                .date_range
                .map_or(true, |range| range.contains(record.timestamp_millis()))
    }

    pub fn is_full(&self, collected: usize) -> bool {
        self.limit.is_some_and(|limit| collected >= limit)
    }
}
