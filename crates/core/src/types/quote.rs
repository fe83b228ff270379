//! Quote payloads and the enable/disable rules applied to their components

use super::catalog::ComponentCatalog;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Customer-facing project details
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectInfo {
    #[serde(default)]
    pub customer_name: String,
    #[serde(default)]
    pub project_name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Configuration of a single component inside a quote
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentRecord {
    #[serde(default)]
    pub enabled: bool,
    /// Always a map, never a scalar or array
    #[serde(default)]
    pub params: Map<String, Value>,
    /// Epoch millis of the most recent enable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled_at: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Timestamps {
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub updated: i64,
}

/// A project quote: project info plus the configured components
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    #[serde(default)]
    pub project: ProjectInfo,
    #[serde(default)]
    pub components: BTreeMap<String, ComponentRecord>,
    /// Enabled component types in the order they were enabled
    #[serde(default)]
    pub enabled_components: Vec<String>,
    #[serde(default)]
    pub timestamps: Timestamps,
}

/// A change the rules made on top of what the caller asked for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum AdjustmentKind {
    DisabledByExclusion { group: String, winner: String },
    EnabledAsRequirement { required_by: String },
    DisabledWithRequirement { requirement: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Adjustment {
    pub component: String,
    #[serde(flatten)]
    pub kind: AdjustmentKind,
}

impl fmt::Display for Adjustment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            AdjustmentKind::DisabledByExclusion { group, winner } => write!(
                f,
                "disabled '{}': '{winner}' is enabled in exclusion group '{group}'",
                self.component
            ),
            AdjustmentKind::EnabledAsRequirement { required_by } => write!(
                f,
                "enabled '{}': required by '{required_by}'",
                self.component
            ),
            AdjustmentKind::DisabledWithRequirement { requirement } => write!(
                f,
                "disabled '{}': its requirement '{requirement}' was disabled",
                self.component
            ),
        }
    }
}

impl Quote {
    pub fn new(customer_name: impl Into<String>, project_name: impl Into<String>, now_ms: i64) -> Self {
        Self {
            project: ProjectInfo {
                customer_name: customer_name.into(),
                project_name: project_name.into(),
                extra: Map::new(),
            },
            components: BTreeMap::new(),
            enabled_components: Vec::new(),
            timestamps: Timestamps {
                created: now_ms,
                updated: now_ms,
            },
        }
    }

    pub fn is_enabled(&self, component: &str) -> bool {
        self.components.get(component).is_some_and(|c| c.enabled)
    }

    /// Enable or disable a component, applying the catalog's rules.
    ///
    /// Enabling a member of an exclusion group disables the other members
    /// (the newest enable wins) and force-enables everything the component
    /// requires. Disabling a component also disables whatever requires it.
    pub fn set_component_enabled(
        &mut self,
        catalog: &ComponentCatalog,
        component: &str,
        enabled: bool,
        now_ms: i64,
    ) -> Vec<Adjustment> {
        let mut adjustments = Vec::new();
        if enabled {
            let mut visited = HashSet::new();
            self.enable(catalog, component, None, now_ms, &mut visited, &mut adjustments);
        } else {
            self.disable(catalog, component, None, &mut adjustments);
        }
        self.timestamps.updated = now_ms;
        adjustments
    }

    fn enable(
        &mut self,
        catalog: &ComponentCatalog,
        component: &str,
        required_by: Option<&str>,
        now_ms: i64,
        visited: &mut HashSet<String>,
        adjustments: &mut Vec<Adjustment>,
    ) {
        if !visited.insert(component.to_string()) {
            return;
        }

        let record = self.components.entry(component.to_string()).or_default();
        let was_enabled = record.enabled;
        record.enabled = true;
        if !was_enabled || required_by.is_none() {
            record.enabled_at = Some(now_ms);
        }
        if let (Some(by), false) = (required_by, was_enabled) {
            adjustments.push(Adjustment {
                component: component.to_string(),
                kind: AdjustmentKind::EnabledAsRequirement {
                    required_by: by.to_string(),
                },
            });
        }
        if required_by.is_none() || !was_enabled {
            self.enabled_components.retain(|c| c != component);
            self.enabled_components.push(component.to_string());
        }

        let rivals: Vec<(String, String)> = catalog
            .groups_of(component)
            .flat_map(|group| {
                group
                    .members
                    .iter()
                    .filter(|m| m.as_str() != component)
                    .map(|m| (group.name.clone(), m.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();
        for (group, rival) in rivals {
            if self.is_enabled(&rival) {
                let kind = AdjustmentKind::DisabledByExclusion {
                    group,
                    winner: component.to_string(),
                };
                self.disable(catalog, &rival, Some(kind), adjustments);
            }
        }

        let requirements = catalog.requirements_of(component).to_vec();
        for requirement in requirements {
            self.enable(catalog, &requirement, Some(component), now_ms, visited, adjustments);
        }
    }

    fn disable(
        &mut self,
        catalog: &ComponentCatalog,
        component: &str,
        reason: Option<AdjustmentKind>,
        adjustments: &mut Vec<Adjustment>,
    ) {
        match self.components.get_mut(component) {
            Some(record) if record.enabled => record.enabled = false,
            _ => return,
        }
        self.enabled_components.retain(|c| c != component);
        if let Some(kind) = reason {
            adjustments.push(Adjustment {
                component: component.to_string(),
                kind,
            });
        }

        let dependants: Vec<String> = catalog
            .dependants_of(component)
            .into_iter()
            .map(str::to_string)
            .collect();
        for dependant in dependants {
            if self.is_enabled(&dependant) {
                let kind = AdjustmentKind::DisabledWithRequirement {
                    requirement: component.to_string(),
                };
                self.disable(catalog, &dependant, Some(kind), adjustments);
            }
        }
    }

    /// Repair an existing quote so the catalog's rules hold.
    ///
    /// Within each exclusion group only the most recently enabled member stays
    /// enabled; missing requirements of enabled components are force-enabled.
    /// Dependants are never disabled here.
    pub fn enforce_invariants(&mut self, catalog: &ComponentCatalog) -> Vec<Adjustment> {
        let mut adjustments = Vec::new();
        self.normalize_enabled_order(catalog);

        for group in &catalog.exclusion_groups {
            let enabled: Vec<&String> = group
                .members
                .iter()
                .filter(|m| self.is_enabled(m))
                .collect();
            if enabled.len() < 2 {
                continue;
            }
            let Some(winner) = enabled
                .iter()
                .max_by_key(|m| self.enable_rank(catalog, m))
                .map(|m| m.to_string())
            else {
                continue;
            };
            for loser in enabled.into_iter().filter(|m| **m != winner) {
                if let Some(record) = self.components.get_mut(loser.as_str()) {
                    record.enabled = false;
                }
                adjustments.push(Adjustment {
                    component: loser.clone(),
                    kind: AdjustmentKind::DisabledByExclusion {
                        group: group.name.clone(),
                        winner: winner.clone(),
                    },
                });
            }
        }

        let mut pending: Vec<String> = self
            .enabled_components
            .iter()
            .filter(|c| self.is_enabled(c))
            .cloned()
            .collect();
        while let Some(component) = pending.pop() {
            let enabled_at = self.components.get(&component).and_then(|c| c.enabled_at);
            for requirement in catalog.requirements_of(&component) {
                if self.is_enabled(requirement) {
                    continue;
                }
                let record = self.components.entry(requirement.clone()).or_default();
                record.enabled = true;
                record.enabled_at = enabled_at.or(record.enabled_at);
                adjustments.push(Adjustment {
                    component: requirement.clone(),
                    kind: AdjustmentKind::EnabledAsRequirement {
                        required_by: component.clone(),
                    },
                });
                pending.push(requirement.clone());
            }
        }

        self.normalize_enabled_order(catalog);
        adjustments
    }

    /// Make `enabled_components` list exactly the enabled components, keeping
    /// the recorded order and appending unlisted ones by enable time.
    fn normalize_enabled_order(&mut self, catalog: &ComponentCatalog) {
        let components = &self.components;
        self.enabled_components
            .retain(|c| components.get(c).is_some_and(|r| r.enabled));
        let mut seen = HashSet::new();
        self.enabled_components.retain(|c| seen.insert(c.clone()));

        let mut unlisted: Vec<(&String, &ComponentRecord)> = components
            .iter()
            .filter(|(name, record)| record.enabled && !seen.contains(*name))
            .collect();
        unlisted.sort_by_key(|(name, record)| (record.enabled_at, catalog.declaration_rank(name)));
        let unlisted: Vec<String> = unlisted.into_iter().map(|(name, _)| name.clone()).collect();
        self.enabled_components.extend(unlisted);
    }

    fn enable_rank(&self, catalog: &ComponentCatalog, component: &str) -> (Option<usize>, Option<i64>, usize) {
        (
            self.enabled_components.iter().position(|c| c == component),
            self.components.get(component).and_then(|c| c.enabled_at),
            catalog.declaration_rank(component),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn catalog() -> ComponentCatalog {
        ComponentCatalog::default()
    }

    #[test]
    fn later_enable_wins_in_exclusion_group() {
        let catalog = catalog();
        let mut quote = Quote::new("Acme", "HQ", 1);

        quote.set_component_enabled(&catalog, "naasStandard", true, 2);
        let adjustments = quote.set_component_enabled(&catalog, "naasEnhanced", true, 3);

        assert!(!quote.is_enabled("naasStandard"));
        assert!(quote.is_enabled("naasEnhanced"));
        assert_eq!(adjustments.len(), 1);
        assert_eq!(adjustments[0].component, "naasStandard");
        assert_eq!(quote.enabled_components, vec!["naasEnhanced"]);
    }

    #[test]
    fn enabling_dependant_force_enables_requirement() {
        let catalog = catalog();
        let mut quote = Quote::new("Acme", "HQ", 1);
        quote.components.insert("support".to_string(), ComponentRecord::default());

        let adjustments = quote.set_component_enabled(&catalog, "enhancedSupport", true, 2);

        assert!(quote.is_enabled("support"));
        assert!(quote.is_enabled("enhancedSupport"));
        assert_eq!(
            adjustments,
            vec![Adjustment {
                component: "support".to_string(),
                kind: AdjustmentKind::EnabledAsRequirement {
                    required_by: "enhancedSupport".to_string()
                },
            }]
        );
    }

    #[test]
    fn disabling_requirement_cascades_to_dependants() {
        let catalog = catalog();
        let mut quote = Quote::new("Acme", "HQ", 1);
        quote.set_component_enabled(&catalog, "enhancedSupport", true, 2);

        let adjustments = quote.set_component_enabled(&catalog, "support", false, 3);

        assert!(!quote.is_enabled("support"));
        assert!(!quote.is_enabled("enhancedSupport"));
        assert_eq!(adjustments.len(), 1);
    }

    #[test]
    fn enforce_keeps_last_listed_member() {
        let catalog = catalog();
        let mut quote = Quote::new("Acme", "HQ", 1);
        for name in ["dynamics1Year", "dynamics5Year", "dynamics3Year"] {
            quote.components.insert(
                name.to_string(),
                ComponentRecord {
                    enabled: true,
                    ..Default::default()
                },
            );
        }
        quote.enabled_components = vec![
            "dynamics5Year".to_string(),
            "dynamics1Year".to_string(),
            "dynamics3Year".to_string(),
        ];

        let adjustments = quote.enforce_invariants(&catalog);

        assert_eq!(adjustments.len(), 2);
        assert!(quote.is_enabled("dynamics3Year"));
        assert!(!quote.is_enabled("dynamics1Year"));
        assert!(!quote.is_enabled("dynamics5Year"));
    }

    #[test]
    fn enforce_falls_back_to_enable_time() {
        let catalog = catalog();
        let mut quote = Quote::new("Acme", "HQ", 1);
        quote.components.insert(
            "naasEnhanced".to_string(),
            ComponentRecord {
                enabled: true,
                enabled_at: Some(10),
                ..Default::default()
            },
        );
        quote.components.insert(
            "naasStandard".to_string(),
            ComponentRecord {
                enabled: true,
                enabled_at: Some(20),
                ..Default::default()
            },
        );

        quote.enforce_invariants(&catalog);

        assert!(quote.is_enabled("naasStandard"));
        assert!(!quote.is_enabled("naasEnhanced"));
    }

    #[test]
    fn enforce_is_idempotent() {
        let catalog = catalog();
        let mut quote = Quote::new("Acme", "HQ", 1);
        quote.components.insert(
            "enhancedSupport".to_string(),
            ComponentRecord {
                enabled: true,
                ..Default::default()
            },
        );

        assert_eq!(quote.enforce_invariants(&catalog).len(), 1);
        assert!(quote.enforce_invariants(&catalog).is_empty());
        assert!(quote.is_enabled("support"));
    }

    fn toggle_strategy() -> impl Strategy<Value = Vec<(usize, bool)>> {
        prop::collection::vec((0usize..10, any::<bool>()), 0..40)
    }

    proptest! {
        #[test]
        fn exclusion_groups_never_have_two_enabled(toggles in toggle_strategy()) {
            let catalog = catalog();
            let mut quote = Quote::new("Acme", "HQ", 0);
            for (step, (idx, enabled)) in toggles.into_iter().enumerate() {
                let component = catalog.components[idx].clone();
                quote.set_component_enabled(&catalog, &component, enabled, step as i64);
                for group in &catalog.exclusion_groups {
                    let enabled_count = group.members.iter().filter(|m| quote.is_enabled(m)).count();
                    prop_assert!(enabled_count <= 1);
                }
                for (dependant, requirements) in &catalog.dependencies {
                    if quote.is_enabled(dependant) {
                        for requirement in requirements {
                            prop_assert!(quote.is_enabled(requirement));
                        }
                    }
                }
            }
        }
    }
}
