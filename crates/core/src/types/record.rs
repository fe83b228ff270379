//! Persisted record model

use crate::constants::TIMESTAMP_FIELD;
use crate::errors::{Error, Result};
use chrono::{DateTime, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A named, homogeneous collection of records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreName {
    Quotes,
    Components,
    History,
    Settings,
}

impl StoreName {
    /// Every store, in declaration order
    pub const ALL: [StoreName; 4] = [
        StoreName::Quotes,
        StoreName::Components,
        StoreName::History,
        StoreName::Settings,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            StoreName::Quotes => "quotes",
            StoreName::Components => "components",
            StoreName::History => "history",
            StoreName::Settings => "settings",
        }
    }

    /// Settings are keyed singletons; every other store gets backend-assigned ids
    pub const fn is_keyed(self) -> bool {
        matches!(self, StoreName::Settings)
    }
}

impl fmt::Display for StoreName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StoreName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "quotes" => Ok(StoreName::Quotes),
            "components" => Ok(StoreName::Components),
            "history" => Ok(StoreName::History),
            "settings" => Ok(StoreName::Settings),
            other => Err(Error::validation("store", format!("unknown store '{other}'"))),
        }
    }
}

/// Record identity: a backend sequence number, or a caller key for settings
///
/// Human-readable formats see a bare number or string. Binary formats get a
/// prefixed string (`s:17`, `k:theme`) since they cannot decode untagged data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordId {
    Seq(u64),
    Key(String),
}

impl Serialize for RecordId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            match self {
                RecordId::Seq(seq) => serializer.serialize_u64(*seq),
                RecordId::Key(key) => serializer.serialize_str(key),
            }
        } else {
            let tagged = match self {
                RecordId::Seq(seq) => format!("s:{seq}"),
                RecordId::Key(key) => format!("k:{key}"),
            };
            serializer.serialize_str(&tagged)
        }
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct IdVisitor {
            tagged: bool,
        }

        impl<'de> Visitor<'de> for IdVisitor {
            type Value = RecordId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a record sequence number or key")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<RecordId, E> {
                Ok(RecordId::Seq(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<RecordId, E> {
                u64::try_from(v)
                    .map(RecordId::Seq)
                    .map_err(|_| E::custom("negative record id"))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<RecordId, E> {
                if !self.tagged {
                    return Ok(RecordId::Key(v.to_string()));
                }
                match v.split_once(':') {
                    Some(("s", seq)) => seq.parse().map(RecordId::Seq).map_err(E::custom),
                    Some(("k", key)) => Ok(RecordId::Key(key.to_string())),
                    _ => Err(E::custom(format!("malformed record id '{v}'"))),
                }
            }
        }

        if deserializer.is_human_readable() {
            deserializer.deserialize_any(IdVisitor { tagged: false })
        } else {
            deserializer.deserialize_str(IdVisitor { tagged: true })
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Seq(seq) => write!(f, "{seq}"),
            RecordId::Key(key) => f.write_str(key),
        }
    }
}

impl From<u64> for RecordId {
    fn from(seq: u64) -> Self {
        RecordId::Seq(seq)
    }
}

impl From<&str> for RecordId {
    fn from(key: &str) -> Self {
        RecordId::Key(key.to_string())
    }
}

/// A scalar value extracted from a payload for a secondary index
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IndexValue {
    Int(i64),
    Text(String),
}

impl IndexValue {
    /// Extract an index value from a JSON scalar; containers and nulls are not indexable
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
                .map(IndexValue::Int),
            serde_json::Value::String(s) => Some(IndexValue::Text(s.clone())),
            serde_json::Value::Bool(b) => Some(IndexValue::Int(i64::from(*b))),
            _ => None,
        }
    }
}

impl From<&str> for IndexValue {
    fn from(s: &str) -> Self {
        IndexValue::Text(s.to_string())
    }
}

impl From<i64> for IndexValue {
    fn from(v: i64) -> Self {
        IndexValue::Int(v)
    }
}

/// A persisted entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: RecordId,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub schema_version: u32,
}

impl Record {
    /// Milliseconds used for newest-first ordering: the payload `timestamp`
    /// field when present, otherwise the creation time.
    pub fn timestamp_millis(&self) -> i64 {
        payload_timestamp(&self.payload).unwrap_or_else(|| self.created_at.timestamp_millis())
    }
}

/// Read the `timestamp` field of a payload as epoch milliseconds
pub fn payload_timestamp(payload: &serde_json::Value) -> Option<i64> {
    match payload.get(TIMESTAMP_FIELD)? {
        serde_json::Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.timestamp_millis()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn store_names_round_trip_through_strings() {
        for store in StoreName::ALL {
            assert_eq!(store.as_str().parse::<StoreName>().unwrap(), store);
        }
        assert!("invoices".parse::<StoreName>().is_err());
    }

    #[test]
    fn record_ids_serialize_untagged() {
        assert_eq!(serde_json::to_value(RecordId::Seq(7)).unwrap(), json!(7));
        assert_eq!(
            serde_json::to_value(RecordId::from("theme")).unwrap(),
            json!("theme")
        );
    }

    #[test]
    fn timestamp_prefers_payload_field() {
        let record = Record {
            id: RecordId::Seq(1),
            payload: json!({ "timestamp": 1_700_000_000_000_i64 }),
            created_at: Utc::now(),
            schema_version: 1,
        };
        assert_eq!(record.timestamp_millis(), 1_700_000_000_000);

        let record = Record {
            payload: json!({ "timestamp": "2024-01-01T00:00:00Z" }),
            ..record
        };
        assert_eq!(record.timestamp_millis(), 1_704_067_200_000);
    }

    #[test]
    fn index_values_reject_containers() {
        assert_eq!(IndexValue::from_json(&json!("a")), Some(IndexValue::from("a")));
        assert_eq!(IndexValue::from_json(&json!(3)), Some(IndexValue::Int(3)));
        assert_eq!(IndexValue::from_json(&json!({})), None);
        assert_eq!(IndexValue::from_json(&json!(null)), None);
    }
}
