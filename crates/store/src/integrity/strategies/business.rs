//! Exclusion groups and component dependencies inside quotes

use super::{Findings, Fixes};
use crate::integrity::graph::{DataGraph, Node, Num};
use crate::integrity::snapshot::SnapshotRecord;
use indexmap::IndexMap;
use quotevault_core::{Adjustment, ComponentCatalog, ComponentRecord, Quote, StoreName};

/// The enable state of a stored quote, ignoring everything else
fn read_quote(graph: &DataGraph) -> Quote {
    let mut quote = Quote::default();
    if let Some(Node::Map(entries)) = graph.lookup(&["components"]).map(|id| graph.node(id)) {
        for (name, &child) in entries {
            if !matches!(graph.node(child), Node::Map(_)) {
                continue;
            }
            let enabled = matches!(
                graph.get(child, "enabled").map(|id| graph.node(id)),
                Some(Node::Bool(true))
            );
            let enabled_at = match graph.get(child, "enabledAt").map(|id| graph.node(id)) {
                Some(Node::Number(n)) => n.as_i64(),
                _ => None,
            };
            quote.components.insert(
                name.clone(),
                ComponentRecord {
                    enabled,
                    enabled_at,
                    ..Default::default()
                },
            );
        }
    }
    if let Some(Node::List(items)) = graph.lookup(&["enabledComponents"]).map(|id| graph.node(id)) {
        quote.enabled_components = items
            .iter()
            .filter_map(|&id| match graph.node(id) {
                Node::Text(name) => Some(name.clone()),
                _ => None,
            })
            .collect();
    }
    quote
}

fn evaluate(graph: &DataGraph, catalog: &ComponentCatalog) -> (Quote, Vec<Adjustment>, bool) {
    let stored = read_quote(graph);
    let mut fixed = stored.clone();
    let adjustments = fixed.enforce_invariants(catalog);
    let order_changed = fixed.enabled_components != stored.enabled_components;
    (fixed, adjustments, order_changed)
}

pub(super) fn detect(store: StoreName, record: &SnapshotRecord, catalog: &ComponentCatalog) -> Findings {
    let (StoreName::Quotes, Some(graph)) = (store, record.graph()) else {
        return Vec::new();
    };
    let (_, adjustments, order_changed) = evaluate(graph, catalog);
    let mut findings: Findings = adjustments
        .iter()
        .map(|adj| (format!("components.{}.enabled", adj.component), adj.to_string()))
        .collect();
    if order_changed && findings.is_empty() {
        findings.push((
            "enabledComponents".to_string(),
            "does not list exactly the enabled components".to_string(),
        ));
    }
    findings
}

pub(super) fn repair(store: StoreName, record: &mut SnapshotRecord, catalog: &ComponentCatalog) -> Fixes {
    let (StoreName::Quotes, Some(graph)) = (store, record.graph_mut()) else {
        return Ok(Vec::new());
    };
    let (fixed, adjustments, order_changed) = evaluate(graph, catalog);
    if adjustments.is_empty() && !order_changed {
        return Ok(Vec::new());
    }

    let root = graph.root();
    let components = match graph.get(root, "components") {
        Some(id) if matches!(graph.node(id), Node::Map(_)) => id,
        _ => {
            let id = graph.add(Node::Map(IndexMap::new()));
            if !graph.set(root, "components", id) {
                return Err("quote payload is not a map".to_string());
            }
            id
        }
    };

    for adjustment in &adjustments {
        let Some(state) = fixed.components.get(&adjustment.component) else {
            continue;
        };
        let entry = match graph.get(components, &adjustment.component) {
            Some(id) if matches!(graph.node(id), Node::Map(_)) => id,
            _ => {
                let params = graph.add(Node::Map(IndexMap::new()));
                let entry = graph.add(Node::Map(IndexMap::new()));
                graph.set(entry, "params", params);
                graph.set(components, &adjustment.component, entry);
                entry
            }
        };
        let enabled = graph.add(Node::Bool(state.enabled));
        graph.set(entry, "enabled", enabled);
        if let Some(at) = state.enabled_at {
            let at = graph.add(Node::Number(Num::Int(at)));
            graph.set(entry, "enabledAt", at);
        }
    }

    let items = fixed
        .enabled_components
        .iter()
        .map(|name| graph.add(Node::Text(name.clone())))
        .collect();
    let list = graph.add(Node::List(items));
    graph.set(root, "enabledComponents", list);

    let mut fixes: Vec<String> = adjustments.iter().map(ToString::to_string).collect();
    fixes.push("rebuilt enabledComponents".to_string());
    Ok(fixes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quotevault_core::RecordId;
    use serde_json::json;

    fn record(value: serde_json::Value) -> SnapshotRecord {
        SnapshotRecord::from_value(RecordId::Seq(1), &value, 0)
    }

    #[test]
    fn missing_requirement_is_enabled() {
        let catalog = ComponentCatalog::default();
        let mut quote = record(json!({
            "components": { "enhancedSupport": { "enabled": true, "params": {} } },
            "enabledComponents": ["enhancedSupport"]
        }));

        assert_eq!(detect(StoreName::Quotes, &quote, &catalog).len(), 1);
        repair(StoreName::Quotes, &mut quote, &catalog).unwrap();

        let value = quote.to_value().unwrap();
        assert_eq!(value["components"]["support"]["enabled"], json!(true));
        assert_eq!(value["components"]["support"]["params"], json!({}));
        assert_eq!(value["components"]["enhancedSupport"]["enabled"], json!(true));
        assert!(detect(StoreName::Quotes, &quote, &catalog).is_empty());
    }

    #[test]
    fn last_listed_group_member_wins() {
        let catalog = ComponentCatalog::default();
        let mut quote = record(json!({
            "components": {
                "naasStandard": { "enabled": true, "params": {} },
                "naasEnhanced": { "enabled": true, "params": {} }
            },
            "enabledComponents": ["naasEnhanced", "naasStandard"]
        }));

        repair(StoreName::Quotes, &mut quote, &catalog).unwrap();

        let value = quote.to_value().unwrap();
        assert_eq!(value["components"]["naasStandard"]["enabled"], json!(true));
        assert_eq!(value["components"]["naasEnhanced"]["enabled"], json!(false));
        assert_eq!(value["enabledComponents"], json!(["naasStandard"]));
    }

    #[test]
    fn other_stores_are_ignored() {
        let catalog = ComponentCatalog::default();
        let component = record(json!({ "componentType": "naasStandard", "enabled": true }));
        assert!(detect(StoreName::Components, &component, &catalog).is_empty());
    }
}
