//! Reference cycles

use super::{Findings, Fixes};
use crate::integrity::graph::{DataGraph, Edge, NodeId, WalkEvent};
use crate::integrity::snapshot::SnapshotRecord;
use std::cmp::Reverse;

fn back_edges(graph: &DataGraph) -> Vec<(NodeId, Edge, String)> {
    let mut edges = Vec::new();
    graph.walk(|event| {
        if let WalkEvent::BackEdge { parent, edge, path } = event {
            edges.push((parent, edge, path.to_string()));
        }
    });
    edges
}

pub(super) fn detect(record: &SnapshotRecord) -> Findings {
    let Some(graph) = record.graph() else {
        return Vec::new();
    };
    back_edges(graph)
        .into_iter()
        .map(|(_, _, path)| (path, "refers back to one of its own ancestors".to_string()))
        .collect()
}

pub(super) fn repair(record: &mut SnapshotRecord) -> Fixes {
    let id = record.id.clone();
    let Some(graph) = record.graph_mut() else {
        return Ok(Vec::new());
    };

    let mut fixes = Vec::new();
    // Each pass removes at least one edge, so the edge count bounds the loop
    for _ in 0..=graph.len() {
        let mut edges = back_edges(graph);
        if edges.is_empty() {
            return Ok(fixes);
        }
        edges.sort_by_key(|(parent, edge, _)| {
            let index = match edge {
                Edge::Index(i) => Reverse(*i),
                Edge::Key(_) => Reverse(0),
            };
            (*parent, index)
        });
        edges.dedup_by(|a, b| a.0 == b.0 && a.1 == b.1);
        for (parent, edge, path) in edges {
            if graph.remove_edge(parent, &edge) {
                tracing::warn!(record = %id, path = %path, "Removed circular reference");
                fixes.push(format!("removed circular reference at {path}"));
            }
        }
    }
    Err("circular references remain after repair".to_string())
}
