//! NaN, infinities, `undefined` and unparsable payloads

use super::{Findings, Fixes};
use crate::integrity::graph::{DataGraph, Node, NodeId, WalkEvent};
use crate::integrity::snapshot::{Payload, SnapshotRecord};
use std::collections::BTreeSet;

fn describe(node: &Node) -> &'static str {
    match node {
        Node::Undefined => "undefined",
        Node::Number(n) if n.as_f64().is_nan() => "NaN",
        Node::Number(n) if n.as_f64() > 0.0 => "Infinity",
        _ => "-Infinity",
    }
}

/// Non-serializable leaves with their paths
fn bad_leaves(graph: &DataGraph) -> Vec<(NodeId, String)> {
    let mut leaves = Vec::new();
    graph.walk(|event| {
        if let WalkEvent::Leaf { id, path } = event {
            if graph.node(id).is_non_serializable() {
                leaves.push((id, path.to_string()));
            }
        }
    });
    leaves
}

pub(super) fn detect(record: &SnapshotRecord) -> Findings {
    match &record.payload {
        Payload::Unparsed(_) => vec![("$".to_string(), "payload is not valid JSON".to_string())],
        Payload::Graph(graph) => bad_leaves(graph)
            .into_iter()
            .map(|(id, path)| {
                let what = describe(graph.node(id));
                (path, format!("non-serializable value {what}"))
            })
            .collect(),
    }
}

pub(super) fn repair(record: &mut SnapshotRecord) -> Fixes {
    let mut fixes = Vec::new();

    if let Payload::Unparsed(raw) = &record.payload {
        let graph = DataGraph::parse_lenient(raw)
            .map_err(|e| format!("payload cannot be recovered: {e}"))?;
        record.payload = Payload::Graph(graph);
        fixes.push("re-parsed payload text leniently".to_string());
    }

    let Some(graph) = record.graph_mut() else {
        return Ok(fixes);
    };

    let leaves = bad_leaves(graph);
    if leaves.is_empty() {
        return Ok(fixes);
    }
    let bad: BTreeSet<NodeId> = leaves.iter().map(|(id, _)| *id).collect();

    if bad.contains(&graph.root()) {
        *graph.node_mut(graph.root()) = Node::Null;
        fixes.push("replaced non-serializable payload with null".to_string());
        return Ok(fixes);
    }

    for (id, path) in &leaves {
        fixes.push(format!("removed {} at {path}", describe(graph.node(*id))));
    }
    for id in &bad {
        *graph.node_mut(*id) = Node::Null;
    }

    // Null placeholders are dropped from their containers
    for parent in 0..graph.len() {
        match graph.node_mut(parent) {
            Node::Map(entries) => entries.retain(|_, child| !bad.contains(child)),
            Node::List(items) => items.retain(|child| !bad.contains(child)),
            _ => {}
        }
    }
    Ok(fixes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quotevault_core::RecordId;
    use serde_json::json;

    fn record_from(text: &str) -> SnapshotRecord {
        SnapshotRecord {
            id: RecordId::Seq(1),
            created_at_ms: 0,
            schema_version: 3,
            payload: Payload::Graph(DataGraph::parse_lenient(text).unwrap()),
        }
    }

    #[test]
    fn removes_nan_and_undefined() {
        let mut record = record_from(r#"{"sensors": NaN, "locations": undefined, "keep": 1}"#);
        assert_eq!(detect(&record).len(), 2);

        let fixes = repair(&mut record).unwrap();
        assert_eq!(fixes.len(), 2);
        assert_eq!(record.to_value().unwrap(), json!({ "keep": 1 }));
        assert!(detect(&record).is_empty());
    }

    #[test]
    fn cleans_inside_lists() {
        let mut record = record_from("[1, Infinity, 2, -Infinity]");
        repair(&mut record).unwrap();
        assert_eq!(record.to_value().unwrap(), json!([1, 2]));
    }

    #[test]
    fn recovers_text_with_nan_tokens() {
        let mut record = SnapshotRecord::from_raw(RecordId::Seq(1), r#"{"a": NaN}"#, 0, 3);
        assert!(matches!(record.payload, Payload::Unparsed(_)));

        repair(&mut record).unwrap();
        assert_eq!(record.to_value().unwrap(), json!({}));
    }

    #[test]
    fn unrecoverable_text_fails() {
        let mut record = SnapshotRecord::from_raw(RecordId::Seq(1), "{{{{", 0, 3);
        assert!(repair(&mut record).is_err());
    }
}
