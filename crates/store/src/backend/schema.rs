//! Declared stores and secondary indices

use quotevault_core::{IndexValue, StoreName, SCHEMA_VERSION};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Every store carries this index; it orders scans newest-first
pub const TIMESTAMP_INDEX: &str = "timestamp";

/// A secondary index over a scalar payload field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    /// Dotted path into the payload, e.g. `project.customerName`
    pub path: String,
}

impl IndexSpec {
    pub fn new(name: &str, path: &str) -> Self {
        Self {
            name: name.to_string(),
            path: path.to_string(),
        }
    }

    /// Read this index's value out of a payload
    pub fn extract(&self, payload: &Value) -> Option<IndexValue> {
        let mut node = payload;
        for key in self.path.split('.') {
            node = node.get(key)?;
        }
        IndexValue::from_json(node)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSchema {
    pub name: StoreName,
    pub indices: Vec<IndexSpec>,
}

impl StoreSchema {
    pub fn index(&self, name: &str) -> Option<&IndexSpec> {
        self.indices.iter().find(|i| i.name == name)
    }
}

/// Versioned layout of a transactional backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub version: u32,
    pub stores: Vec<StoreSchema>,
}

impl Schema {
    /// Layout this build expects
    pub fn current() -> Self {
        let ts = || IndexSpec::new(TIMESTAMP_INDEX, TIMESTAMP_INDEX);
        Self {
            version: SCHEMA_VERSION,
            stores: vec![
                StoreSchema {
                    name: StoreName::Quotes,
                    indices: vec![
                        ts(),
                        IndexSpec::new("customerName", "project.customerName"),
                        IndexSpec::new("projectName", "project.projectName"),
                    ],
                },
                StoreSchema {
                    name: StoreName::Components,
                    indices: vec![ts(), IndexSpec::new("componentType", "componentType")],
                },
                StoreSchema {
                    name: StoreName::History,
                    indices: vec![
                        ts(),
                        IndexSpec::new("sessionId", "sessionId"),
                        IndexSpec::new("type", "type"),
                    ],
                },
                StoreSchema {
                    name: StoreName::Settings,
                    indices: vec![ts()],
                },
            ],
        }
    }

    pub fn store(&self, name: StoreName) -> Option<&StoreSchema> {
        self.stores.iter().find(|s| s.name == name)
    }

    /// Merge `target` into this (older) schema: missing stores and indices are
    /// added, nothing is removed. Returns the stores that gained an index.
    pub fn upgrade_to(&mut self, target: &Schema) -> Vec<StoreName> {
        let mut touched = Vec::new();
        for wanted in &target.stores {
            match self.stores.iter_mut().find(|s| s.name == wanted.name) {
                Some(existing) => {
                    let mut gained = false;
                    for index in &wanted.indices {
                        if existing.index(&index.name).is_none() {
                            existing.indices.push(index.clone());
                            gained = true;
                        }
                    }
                    if gained {
                        touched.push(existing.name);
                    }
                }
                None => {
                    self.stores.push(wanted.clone());
                    touched.push(wanted.name);
                }
            }
        }
        self.version = self.version.max(target.version);
        touched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_nested_index_values() {
        let spec = IndexSpec::new("customerName", "project.customerName");
        let payload = json!({ "project": { "customerName": "Acme" } });
        assert_eq!(spec.extract(&payload), Some(IndexValue::from("Acme")));
        assert_eq!(spec.extract(&json!({ "project": 3 })), None);
    }

    #[test]
    fn upgrade_adds_without_removing() {
        let mut old = Schema {
            version: 1,
            stores: vec![StoreSchema {
                name: StoreName::Quotes,
                indices: vec![
                    IndexSpec::new(TIMESTAMP_INDEX, TIMESTAMP_INDEX),
                    IndexSpec::new("legacy", "legacy"),
                ],
            }],
        };

        let touched = old.upgrade_to(&Schema::current());

        assert_eq!(old.version, SCHEMA_VERSION);
        assert_eq!(old.stores.len(), 4);
        assert!(old.store(StoreName::Quotes).unwrap().index("legacy").is_some());
        assert!(old.store(StoreName::Quotes).unwrap().index("customerName").is_some());
        assert!(touched.contains(&StoreName::Quotes));
        assert!(touched.contains(&StoreName::History));
    }
}
