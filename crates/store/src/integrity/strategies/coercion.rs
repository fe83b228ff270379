//! Primitive type mismatches on known fields

use super::schema::{default_node, rules, Shape};
use super::{fields, Findings, Fixes};
use crate::integrity::graph::{DataGraph, Node, NodeId, Num};
use crate::integrity::snapshot::SnapshotRecord;
use quotevault_core::{ComponentCatalog, RecordId, StoreName};

/// Patterns leading to component parameter maps' entries
fn param_patterns(store: StoreName) -> &'static [&'static [&'static str]] {
    match store {
        StoreName::Quotes => &[&["components", "*", "params", "*"]],
        StoreName::Components => &[&["params", "*"]],
        StoreName::History | StoreName::Settings => &[],
    }
}

fn parse_number(text: &str) -> Option<Num> {
    match Num::parse(text.trim())? {
        Num::Float(f) if f.is_finite() => Some(Num::from(f)),
        Num::Float(_) => None,
        exact => Some(exact),
    }
}

fn parse_timestamp(text: &str) -> Option<Num> {
    parse_number(text).or_else(|| {
        chrono::DateTime::parse_from_rfc3339(text.trim())
            .ok()
            .map(|dt| Num::Int(dt.timestamp_millis()))
    })
}

/// The replacement for a node of the wrong primitive type, if one is needed
fn coerce_field(node: &Node, shape: Shape, fallback: Node) -> Option<Node> {
    if shape.matches(node) || matches!(node, Node::Null | Node::Undefined) {
        return None;
    }
    let coerced = match (shape, node) {
        (Shape::Text, Node::Number(n)) => Node::Text(n.to_string()),
        (Shape::Text, Node::Bool(b)) => Node::Text(b.to_string()),
        (Shape::Number, Node::Text(t)) => parse_timestamp(t).map(Node::Number).unwrap_or(fallback),
        (Shape::Bool, Node::Text(t)) => match t.trim().to_ascii_lowercase().as_str() {
            "true" => Node::Bool(true),
            _ => Node::Bool(false),
        },
        (Shape::Bool, Node::Number(n)) => Node::Bool(n.as_f64() != 0.0),
        (Shape::Map | Shape::List, _) => return None,
        _ => fallback,
    };
    Some(coerced)
}

fn coerce_param(node: &Node, min: f64) -> Option<Node> {
    match node {
        Node::Number(_) | Node::Undefined => None,
        Node::Text(t) => Some(Node::Number(parse_number(t).unwrap_or(Num::from(min)))),
        _ => Some(Node::Number(Num::from(min))),
    }
}

/// `(parent, key, path, replacement, found kind)`
type Step = (NodeId, String, String, Node, &'static str);

/// Every coercion the record needs
fn plan(
    store: StoreName,
    graph: &DataGraph,
    id: &RecordId,
    created_at_ms: i64,
    catalog: &ComponentCatalog,
) -> Vec<Step> {
    let mut plan = Vec::new();
    for (pattern, shape) in rules(store) {
        for field in fields(graph, pattern) {
            let Some(child) = field.child else { continue };
            let node = graph.node(child);
            let fallback = default_node(*shape, &field.key, id, created_at_ms);
            if let Some(replacement) = coerce_field(node, *shape, fallback) {
                plan.push((field.parent, field.key, field.path, replacement, node.kind()));
            }
        }
    }
    for pattern in param_patterns(store) {
        for field in fields(graph, pattern) {
            let (Some(child), Some(param)) = (field.child, catalog.numeric_param(&field.key))
            else {
                continue;
            };
            let node = graph.node(child);
            if let Some(replacement) = coerce_param(node, param.min) {
                plan.push((field.parent, field.key, field.path, replacement, node.kind()));
            }
        }
    }
    plan
}

pub(super) fn detect(store: StoreName, record: &SnapshotRecord, catalog: &ComponentCatalog) -> Findings {
    let Some(graph) = record.graph() else {
        return Vec::new();
    };
    plan(store, graph, &record.id, record.created_at_ms, catalog)
        .into_iter()
        .map(|(_, _, path, replacement, found)| {
            (path, format!("expected {}, found {found}", replacement.kind()))
        })
        .collect()
}

pub(super) fn repair(store: StoreName, record: &mut SnapshotRecord, catalog: &ComponentCatalog) -> Fixes {
    let (id, created_at_ms) = (record.id.clone(), record.created_at_ms);
    let Some(graph) = record.graph_mut() else {
        return Ok(Vec::new());
    };
    let steps = plan(store, graph, &id, created_at_ms, catalog);
    let mut fixes = Vec::with_capacity(steps.len());
    for (parent, key, path, replacement, found) in steps {
        let kind = replacement.kind();
        let node = graph.add(replacement);
        if !graph.set(parent, &key, node) {
            return Err(format!("{path} is no longer reachable"));
        }
        fixes.push(format!("coerced {path} from {found} to {kind}"));
    }
    Ok(fixes)
}
