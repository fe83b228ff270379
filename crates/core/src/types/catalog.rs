//! Business rules that constrain which components may be enabled together

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A group of component types of which at most one may be enabled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionGroup {
    pub name: String,
    pub members: Vec<String>,
}

impl ExclusionGroup {
    pub fn new(name: impl Into<String>, members: &[&str]) -> Self {
        Self {
            name: name.into(),
            members: members.iter().map(|m| m.to_string()).collect(),
        }
    }

    pub fn contains(&self, component: &str) -> bool {
        self.members.iter().any(|m| m == component)
    }
}

/// A component parameter with numeric semantics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericParam {
    pub name: String,
    /// Smallest valid value; also the substitute when a value cannot be parsed
    pub min: f64,
}

/// Declares the known component types and the rules between them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentCatalog {
    /// Known component types in declaration order
    pub components: Vec<String>,
    pub exclusion_groups: Vec<ExclusionGroup>,
    /// component -> components it requires
    pub dependencies: BTreeMap<String, Vec<String>>,
    pub numeric_params: Vec<NumericParam>,
}

impl Default for ComponentCatalog {
    fn default() -> Self {
        let components = [
            "naasStandard",
            "naasEnhanced",
            "dynamics1Year",
            "dynamics3Year",
            "dynamics5Year",
            "support",
            "enhancedSupport",
            "sensors",
            "locations",
            "onboarding",
        ];

        let mut dependencies = BTreeMap::new();
        dependencies.insert("enhancedSupport".to_string(), vec!["support".to_string()]);

        let numeric = [
            ("sensors", 0.0),
            ("locations", 1.0),
            ("quantity", 0.0),
            ("users", 1.0),
            ("years", 1.0),
            ("hours", 0.0),
            ("discount", 0.0),
        ];

        Self {
            components: components.iter().map(|c| c.to_string()).collect(),
            exclusion_groups: vec![
                ExclusionGroup::new("naas", &["naasStandard", "naasEnhanced"]),
                ExclusionGroup::new(
                    "dynamics",
                    &["dynamics1Year", "dynamics3Year", "dynamics5Year"],
                ),
            ],
            dependencies,
            numeric_params: numeric
                .iter()
                .map(|(name, min)| NumericParam {
                    name: name.to_string(),
                    min: *min,
                })
                .collect(),
        }
    }
}

impl ComponentCatalog {
    /// Groups that list `component` as a member
    pub fn groups_of<'a>(&'a self, component: &'a str) -> impl Iterator<Item = &'a ExclusionGroup> {
        self.exclusion_groups
            .iter()
            .filter(move |g| g.contains(component))
    }

    /// Direct requirements of `component`
    pub fn requirements_of(&self, component: &str) -> &[String] {
        self.dependencies
            .get(component)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Components that directly require `component`
    pub fn dependants_of(&self, component: &str) -> Vec<&str> {
        self.dependencies
            .iter()
            .filter(|(_, reqs)| reqs.iter().any(|r| r == component))
            .map(|(dep, _)| dep.as_str())
            .collect()
    }

    pub fn numeric_param(&self, name: &str) -> Option<&NumericParam> {
        self.numeric_params.iter().find(|p| p.name == name)
    }

    /// Position in declaration order; unknown components sort after known ones
    pub fn declaration_rank(&self, component: &str) -> usize {
        self.components
            .iter()
            .position(|c| c == component)
            .unwrap_or(self.components.len())
    }

    /// Every component mentioned anywhere in the catalog
    pub fn all_components(&self) -> BTreeSet<&str> {
        let mut all: BTreeSet<&str> = self.components.iter().map(String::as_str).collect();
        for group in &self.exclusion_groups {
            all.extend(group.members.iter().map(String::as_str));
        }
        for (dep, reqs) in &self.dependencies {
            all.insert(dep.as_str());
            all.extend(reqs.iter().map(String::as_str));
        }
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_catalog_declares_expected_groups() {
        let catalog = ComponentCatalog::default();
        let naas: Vec<_> = catalog.groups_of("naasEnhanced").map(|g| g.name.as_str()).collect();
        assert_eq!(naas, vec!["naas"]);
        assert_eq!(catalog.groups_of("support").count(), 0);
    }

    #[test]
    fn dependency_lookups_work_both_ways() {
        let catalog = ComponentCatalog::default();
        assert_eq!(catalog.requirements_of("enhancedSupport"), ["support".to_string()]);
        assert_eq!(catalog.dependants_of("support"), vec!["enhancedSupport"]);
        assert!(catalog.requirements_of("support").is_empty());
    }

    #[test]
    fn unknown_components_rank_last() {
        let catalog = ComponentCatalog::default();
        assert!(catalog.declaration_rank("naasStandard") < catalog.declaration_rank("support"));
        assert_eq!(catalog.declaration_rank("mystery"), catalog.components.len());
    }
}
