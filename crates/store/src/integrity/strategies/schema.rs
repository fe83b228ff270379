//! Required fields and collection shapes per store

use super::{fields, Findings, Fixes};
use crate::integrity::graph::{DataGraph, Node, Num};
use crate::integrity::snapshot::SnapshotRecord;
use indexmap::IndexMap;
use quotevault_core::{RecordId, StoreName};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Shape {
    Map,
    List,
    Text,
    Number,
    Bool,
}

impl Shape {
    fn is_container(self) -> bool {
        matches!(self, Shape::Map | Shape::List)
    }

    fn name(self) -> &'static str {
        match self {
            Shape::Map => "map",
            Shape::List => "list",
            Shape::Text => "text",
            Shape::Number => "number",
            Shape::Bool => "bool",
        }
    }

    pub(super) fn matches(self, node: &Node) -> bool {
        matches!(
            (self, node),
            (Shape::Map, Node::Map(_))
                | (Shape::List, Node::List(_))
                | (Shape::Text, Node::Text(_))
                | (Shape::Number, Node::Number(_))
                | (Shape::Bool, Node::Bool(_))
        )
    }
}

pub(super) type Rule = (&'static [&'static str], Shape);

const QUOTE_RULES: &[Rule] = &[
    (&["project"], Shape::Map),
    (&["project", "customerName"], Shape::Text),
    (&["project", "projectName"], Shape::Text),
    (&["components"], Shape::Map),
    (&["components", "*"], Shape::Map),
    (&["components", "*", "enabled"], Shape::Bool),
    (&["components", "*", "params"], Shape::Map),
    (&["enabledComponents"], Shape::List),
    (&["timestamps"], Shape::Map),
    (&["timestamps", "created"], Shape::Number),
    (&["timestamps", "updated"], Shape::Number),
];

const COMPONENT_RULES: &[Rule] = &[
    (&["componentType"], Shape::Text),
    (&["enabled"], Shape::Bool),
    (&["params"], Shape::Map),
];

const HISTORY_RULES: &[Rule] = &[
    (&["sessionId"], Shape::Text),
    (&["type"], Shape::Text),
    (&["timestamp"], Shape::Number),
];

const SETTING_RULES: &[Rule] = &[(&["key"], Shape::Text)];

/// Required fields of `store`, parents before children
pub(super) fn rules(store: StoreName) -> &'static [Rule] {
    match store {
        StoreName::Quotes => QUOTE_RULES,
        StoreName::Components => COMPONENT_RULES,
        StoreName::History => HISTORY_RULES,
        StoreName::Settings => SETTING_RULES,
    }
}

/// Documented default for a missing field
pub(super) fn default_node(shape: Shape, key: &str, id: &RecordId, created_at_ms: i64) -> Node {
    match (shape, key) {
        (Shape::Map, _) => Node::Map(IndexMap::new()),
        (Shape::List, _) => Node::List(Vec::new()),
        (Shape::Text, "key") => Node::Text(match id {
            RecordId::Key(key) => key.clone(),
            RecordId::Seq(seq) => seq.to_string(),
        }),
        (Shape::Text, "componentType" | "sessionId") => Node::Text("unknown".to_string()),
        (Shape::Text, "type") => Node::Text("event".to_string()),
        (Shape::Text, _) => Node::Text(String::new()),
        (Shape::Number, _) => Node::Number(Num::Int(created_at_ms)),
        (Shape::Bool, _) => Node::Bool(false),
    }
}

fn root_problem(graph: &DataGraph) -> Option<String> {
    match graph.node(graph.root()) {
        Node::Map(_) => None,
        other => Some(format!("payload must be a map, found {}", other.kind())),
    }
}

pub(super) fn detect(store: StoreName, record: &SnapshotRecord) -> Findings {
    let Some(graph) = record.graph() else {
        return Vec::new();
    };
    if let Some(problem) = root_problem(graph) {
        return vec![("$".to_string(), problem)];
    }

    let mut findings = Vec::new();
    for (pattern, shape) in rules(store) {
        for field in fields(graph, pattern) {
            match field.child.map(|c| graph.node(c)) {
                None | Some(Node::Null) => {
                    findings.push((field.path, "missing required field".to_string()))
                }
                Some(node) if shape.is_container() && !shape.matches(node) => findings.push((
                    field.path,
                    format!("expected {}, found {}", shape.name(), node.kind()),
                )),
                Some(_) => {}
            }
        }
    }
    findings
}

pub(super) fn repair(store: StoreName, record: &mut SnapshotRecord) -> Fixes {
    let (id, created_at_ms) = (record.id.clone(), record.created_at_ms);
    let Some(graph) = record.graph_mut() else {
        return Ok(Vec::new());
    };

    let mut fixes = Vec::new();
    if let Some(problem) = root_problem(graph) {
        let root = graph.add(Node::Map(IndexMap::new()));
        graph.set_root(root);
        fixes.push(format!("replaced payload with an empty map ({problem})"));
    }

    for (pattern, shape) in rules(store) {
        for field in fields(graph, pattern) {
            let replace = match field.child.map(|c| graph.node(c)) {
                None | Some(Node::Null) => Some("inserted default for missing"),
                Some(node) if shape.is_container() && !shape.matches(node) => {
                    Some("replaced wrongly shaped")
                }
                Some(_) => None,
            };
            if let Some(action) = replace {
                let node = graph.add(default_node(*shape, &field.key, &id, created_at_ms));
                graph.set(field.parent, &field.key, node);
                fixes.push(format!("{action} {}", field.path));
            }
        }
    }
    Ok(fixes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: serde_json::Value) -> SnapshotRecord {
        SnapshotRecord::from_value(RecordId::Seq(1), &value, 42)
    }

    #[test]
    fn fills_quote_defaults() {
        let mut quote = record(json!({ "project": { "customerName": "Acme" }, "components": 5 }));
        assert!(!detect(StoreName::Quotes, &quote).is_empty());

        repair(StoreName::Quotes, &mut quote).unwrap();
        assert!(detect(StoreName::Quotes, &quote).is_empty());
        assert_eq!(
            quote.to_value().unwrap(),
            json!({
                "project": { "customerName": "Acme", "projectName": "" },
                "components": {},
                "enabledComponents": [],
                "timestamps": { "created": 42, "updated": 42 }
            })
        );
    }

    #[test]
    fn component_entries_get_params_map() {
        let mut quote = record(json!({
            "project": { "customerName": "", "projectName": "" },
            "components": { "sensors": { "enabled": true, "params": [1, 2] } },
            "enabledComponents": ["sensors"],
            "timestamps": { "created": 1, "updated": 1 }
        }));
        let findings = detect(StoreName::Quotes, &quote);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].0, "components.sensors.params");

        repair(StoreName::Quotes, &mut quote).unwrap();
        assert_eq!(
            quote.to_value().unwrap()["components"]["sensors"]["params"],
            json!({})
        );
    }

    #[test]
    fn non_map_root_is_replaced() {
        let mut setting = SnapshotRecord::from_value(RecordId::from("theme"), &json!("dark"), 1);
        repair(StoreName::Settings, &mut setting).unwrap();
        assert_eq!(setting.to_value().unwrap(), json!({ "key": "theme" }));
    }

    #[test]
    fn scalar_type_mismatches_are_left_for_coercion() {
        let history = record(json!({ "sessionId": "s", "type": "t", "timestamp": "soon" }));
        assert!(detect(StoreName::History, &history).is_empty());
    }
}
