//! The fixed, ordered set of corruption detectors and their repairs

mod business;
mod coercion;
mod cycles;
mod schema;
mod serialization;

use super::graph::{DataGraph, Node, NodeId};
use super::report::{AppliedFix, FailedRepair, Issue, Severity};
use super::snapshot::Snapshot;
use quotevault_core::ComponentCatalog;

/// A detector paired with its repair, in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepairStrategy {
    /// Non-serializable leaves and unparsable payloads
    Serialization,
    /// Missing required fields and wrongly shaped collections
    Schema,
    /// Wrong primitive types for known fields
    TypeCoercion,
    /// Exclusion groups and component dependencies
    BusinessRules,
    /// Reference cycles
    Cycles,
}

/// Fixes and per-record failures from one strategy
#[derive(Debug, Default)]
pub struct StrategyOutcome {
    pub fixes: Vec<AppliedFix>,
    pub failures: Vec<FailedRepair>,
}

impl RepairStrategy {
    pub const ALL: [RepairStrategy; 5] = [
        RepairStrategy::Serialization,
        RepairStrategy::Schema,
        RepairStrategy::TypeCoercion,
        RepairStrategy::BusinessRules,
        RepairStrategy::Cycles,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            RepairStrategy::Serialization => "serialization",
            RepairStrategy::Schema => "schema",
            RepairStrategy::TypeCoercion => "type_coercion",
            RepairStrategy::BusinessRules => "business_rules",
            RepairStrategy::Cycles => "cycles",
        }
    }

    pub const fn severity(self) -> Severity {
        match self {
            RepairStrategy::Serialization => Severity::Critical,
            RepairStrategy::Schema | RepairStrategy::Cycles => Severity::High,
            RepairStrategy::TypeCoercion | RepairStrategy::BusinessRules => Severity::Medium,
        }
    }

    pub fn detect(self, snapshot: &Snapshot, catalog: &ComponentCatalog) -> Vec<Issue> {
        let mut issues = Vec::new();
        for (store, record) in snapshot.iter() {
            let found = match self {
                RepairStrategy::Serialization => serialization::detect(record),
                RepairStrategy::Schema => schema::detect(store, record),
                RepairStrategy::TypeCoercion => coercion::detect(store, record, catalog),
                RepairStrategy::BusinessRules => business::detect(store, record, catalog),
                RepairStrategy::Cycles => cycles::detect(record),
            };
            issues.extend(found.into_iter().map(|(path, description)| Issue {
                store,
                record: record.id.clone(),
                path,
                description,
            }));
        }
        issues
    }

    /// Repair each record independently; a record whose repair fails is left
    /// exactly as it was
    pub fn repair(self, snapshot: &mut Snapshot, catalog: &ComponentCatalog) -> StrategyOutcome {
        let mut outcome = StrategyOutcome::default();
        for (store, record) in snapshot.iter_mut() {
            let mut working = record.clone();
            let result = match self {
                RepairStrategy::Serialization => serialization::repair(&mut working),
                RepairStrategy::Schema => schema::repair(store, &mut working),
                RepairStrategy::TypeCoercion => coercion::repair(store, &mut working, catalog),
                RepairStrategy::BusinessRules => business::repair(store, &mut working, catalog),
                RepairStrategy::Cycles => cycles::repair(&mut working),
            };
            match result {
                Ok(fixes) => {
                    if !fixes.is_empty() {
                        *record = working;
                    }
                    outcome
                        .fixes
                        .extend(fixes.into_iter().map(|description| AppliedFix {
                            strategy: self.name(),
                            store,
                            record: record.id.clone(),
                            description,
                        }));
                }
                Err(reason) => outcome.failures.push(FailedRepair {
                    strategy: self.name(),
                    store,
                    record: record.id.clone(),
                    reason,
                }),
            }
        }
        outcome
    }
}

/// Per-record detector result: `(path, description)` pairs
type Findings = Vec<(String, String)>;

/// Per-record repair result: descriptions of the fixes made
type Fixes = Result<Vec<String>, String>;

/// A field reached by a path pattern; `child` is `None` when absent
struct FieldRef {
    parent: NodeId,
    key: String,
    child: Option<NodeId>,
    path: String,
}

/// Resolve `pattern` (map keys, `*` for every key) from the root
fn fields(graph: &DataGraph, pattern: &[&str]) -> Vec<FieldRef> {
    let mut frontier = vec![(graph.root(), String::new())];
    let mut found = Vec::new();
    for (depth, segment) in pattern.iter().enumerate() {
        let last = depth + 1 == pattern.len();
        let mut next = Vec::new();
        for (node, prefix) in frontier {
            let Node::Map(entries) = graph.node(node) else {
                continue;
            };
            let keys: Vec<String> = if *segment == "*" {
                entries.keys().cloned().collect()
            } else {
                vec![segment.to_string()]
            };
            for key in keys {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                let child = entries.get(&key).copied();
                if last {
                    found.push(FieldRef {
                        parent: node,
                        key,
                        child,
                        path,
                    });
                } else if let Some(child) = child {
                    next.push((child, path));
                }
            }
        }
        frontier = next;
    }
    found
}
