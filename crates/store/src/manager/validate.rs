//! Write-path validation and normalisation
//!
//! Input is rejected before anything is persisted. Every default filled in or
//! rule applied is reported back so nothing changes silently.

use crate::errors::{Result, StoreError};
use quotevault_core::{Adjustment, ComponentCatalog, Quote, TIMESTAMP_FIELD};
use serde_json::{Map, Value};

/// A payload ready to persist, with what was changed on the way in
#[derive(Debug, Default)]
pub(crate) struct Prepared {
    pub(crate) payload: Value,
    pub(crate) defaults: Vec<String>,
    pub(crate) adjustments: Vec<Adjustment>,
}

fn object(field: &str, value: Value) -> Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::validation(
            field,
            format!("must be a JSON object, got {}", kind_of(&other)),
        )),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn required_text(map: &Map<String, Value>, field: &str) -> Result<()> {
    match map.get(field) {
        Some(Value::String(text)) if !text.trim().is_empty() => Ok(()),
        Some(Value::String(_)) => Err(StoreError::validation(field, "must not be empty")),
        Some(other) => Err(StoreError::validation(
            field,
            format!("must be a string, got {}", kind_of(other)),
        )),
        None => Err(StoreError::validation(field, "is required")),
    }
}

fn stamp(map: &mut Map<String, Value>, now_ms: i64, defaults: &mut Vec<String>) {
    let usable = match map.get(TIMESTAMP_FIELD) {
        Some(Value::Number(_)) => true,
        Some(Value::String(text)) => chrono::DateTime::parse_from_rfc3339(text).is_ok(),
        _ => false,
    };
    if !usable {
        map.insert(TIMESTAMP_FIELD.to_string(), Value::from(now_ms));
        defaults.push(format!("{TIMESTAMP_FIELD} set to {now_ms}"));
    }
}

fn check_size(payload: &Value, max_bytes: usize) -> Result<()> {
    let size = serde_json::to_vec(payload)?.len();
    if size > max_bytes {
        return Err(StoreError::validation(
            "payload",
            format!("{size} bytes exceeds the {max_bytes} byte limit"),
        ));
    }
    Ok(())
}

pub(crate) fn quote(
    value: Value,
    catalog: &ComponentCatalog,
    now_ms: i64,
    max_bytes: usize,
) -> Result<Prepared> {
    let mut map = object("quote", value)?;
    let mut quote: Quote = serde_json::from_value(Value::Object(map.clone()))
        .map_err(|e| StoreError::validation("quote", e.to_string()))?;

    let mut defaults = Vec::new();
    if quote.timestamps.created == 0 {
        quote.timestamps.created = now_ms;
        defaults.push(format!("timestamps.created set to {now_ms}"));
    }
    quote.timestamps.updated = now_ms;
    let adjustments = quote.enforce_invariants(catalog);

    if let Value::Object(normalized) = serde_json::to_value(&quote)? {
        map.extend(normalized);
    }
    map.insert(TIMESTAMP_FIELD.to_string(), Value::from(now_ms));

    let payload = Value::Object(map);
    check_size(&payload, max_bytes)?;
    Ok(Prepared {
        payload,
        defaults,
        adjustments,
    })
}

pub(crate) fn component(value: Value, now_ms: i64, max_bytes: usize) -> Result<Prepared> {
    let mut map = object("component", value)?;
    required_text(&map, "componentType")?;

    let mut defaults = Vec::new();
    match map.get("params") {
        None | Some(Value::Null) => {
            map.insert("params".to_string(), Value::Object(Map::new()));
            defaults.push("params set to {}".to_string());
        }
        Some(Value::Object(_)) => {}
        Some(other) => {
            return Err(StoreError::validation(
                "params",
                format!("must be an object, got {}", kind_of(other)),
            ))
        }
    }
    match map.get("enabled") {
        None | Some(Value::Null) => {
            map.insert("enabled".to_string(), Value::Bool(false));
            defaults.push("enabled set to false".to_string());
        }
        Some(Value::Bool(_)) => {}
        Some(other) => {
            return Err(StoreError::validation(
                "enabled",
                format!("must be a bool, got {}", kind_of(other)),
            ))
        }
    }
    stamp(&mut map, now_ms, &mut defaults);

    let payload = Value::Object(map);
    check_size(&payload, max_bytes)?;
    Ok(Prepared {
        payload,
        defaults,
        adjustments: Vec::new(),
    })
}

pub(crate) fn history(value: Value, now_ms: i64, max_bytes: usize) -> Result<Prepared> {
    let mut map = object("history entry", value)?;
    required_text(&map, "sessionId")?;

    let mut defaults = Vec::new();
    match map.get("type") {
        Some(Value::String(_)) => {}
        None | Some(Value::Null) => {
            map.insert("type".to_string(), Value::from("event"));
            defaults.push("type set to \"event\"".to_string());
        }
        Some(other) => {
            return Err(StoreError::validation(
                "type",
                format!("must be a string, got {}", kind_of(other)),
            ))
        }
    }
    stamp(&mut map, now_ms, &mut defaults);

    let payload = Value::Object(map);
    check_size(&payload, max_bytes)?;
    Ok(Prepared {
        payload,
        defaults,
        adjustments: Vec::new(),
    })
}

pub(crate) fn setting(key: &str, value: Value, now_ms: i64, max_bytes: usize) -> Result<Prepared> {
    if key.trim().is_empty() {
        return Err(StoreError::validation("key", "must not be empty"));
    }
    let mut map = Map::new();
    map.insert("key".to_string(), Value::from(key));
    map.insert("value".to_string(), value);
    map.insert(TIMESTAMP_FIELD.to_string(), Value::from(now_ms));

    let payload = Value::Object(map);
    check_size(&payload, max_bytes)?;
    Ok(Prepared {
        payload,
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const MAX: usize = 1024 * 1024;

    #[test]
    fn rejects_non_objects() {
        let catalog = ComponentCatalog::default();
        assert!(matches!(
            quote(json!([1, 2]), &catalog, 1, MAX),
            Err(StoreError::Validation { .. })
        ));
        assert!(component(json!("sensors"), 1, MAX).is_err());
    }

    #[test]
    fn quote_rules_are_reported() {
        let catalog = ComponentCatalog::default();
        let prepared = quote(
            json!({
                "project": { "customerName": "Acme", "projectName": "HQ", "region": "eu" },
                "components": {
                    "enhancedSupport": { "enabled": true, "params": {} }
                },
                "enabledComponents": ["enhancedSupport"],
                "notes": "keep me"
            }),
            &catalog,
            500,
            MAX,
        )
        .unwrap();

        assert_eq!(prepared.adjustments.len(), 1);
        assert_eq!(prepared.adjustments[0].component, "support");
        assert_eq!(prepared.payload["notes"], json!("keep me"));
        assert_eq!(prepared.payload["project"]["region"], json!("eu"));
        assert_eq!(prepared.payload["components"]["support"]["enabled"], json!(true));
        assert_eq!(prepared.payload["timestamps"]["created"], json!(500));
        assert_eq!(prepared.payload[TIMESTAMP_FIELD], json!(500));
    }

    #[test]
    fn scalar_params_are_rejected() {
        let catalog = ComponentCatalog::default();
        let result = quote(
            json!({ "components": { "sensors": { "enabled": true, "params": 4 } } }),
            &catalog,
            1,
            MAX,
        );
        assert!(matches!(result, Err(StoreError::Validation { .. })));
        assert!(component(json!({ "componentType": "sensors", "params": [] }), 1, MAX).is_err());
    }

    #[test]
    fn component_defaults_are_listed() {
        let prepared = component(json!({ "componentType": "sensors" }), 9, MAX).unwrap();
        assert_eq!(prepared.defaults.len(), 3);
        assert_eq!(
            prepared.payload,
            json!({ "componentType": "sensors", "params": {}, "enabled": false, "timestamp": 9 })
        );
    }

    #[test]
    fn history_needs_session() {
        assert!(history(json!({ "type": "login" }), 1, MAX).is_err());
        assert!(history(json!({ "sessionId": " " }), 1, MAX).is_err());
        let kept = history(json!({ "sessionId": "s1", "timestamp": 42 }), 1, MAX).unwrap();
        assert_eq!(kept.payload["timestamp"], json!(42));
        assert_eq!(kept.payload["type"], json!("event"));
    }

    #[test]
    fn oversized_payloads_are_rejected() {
        let big = "x".repeat(200);
        assert!(setting("notes", json!(big), 1, 100).is_err());
        assert!(setting("", json!(1), 1, MAX).is_err());
    }
}
