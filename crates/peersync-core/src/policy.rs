//! Conflict policy table

use std::collections::BTreeMap;

use crate::config::SyncConfig;
use crate::models::ResolutionStrategy;

/// Built-in strategies per resource type.
///
/// `role` is kept manual alongside `knowledge`; callers can override any
/// entry through [`SyncConfig::conflict_policies`].
const BUILTIN_POLICIES: [(&str, ResolutionStrategy); 4] = [
    ("knowledge", ResolutionStrategy::Manual),
    ("member", ResolutionStrategy::Lww),
    ("role", ResolutionStrategy::Manual),
    ("project", ResolutionStrategy::Lww),
];

/// Resolution strategy lookup keyed by resource type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictPolicy {
    table: BTreeMap<String, ResolutionStrategy>,
    fallback: ResolutionStrategy,
}

impl Default for ConflictPolicy {
    fn default() -> Self {
        Self {
            table: BUILTIN_POLICIES
                .iter()
                .map(|&(resource_type, strategy)| (resource_type.to_string(), strategy))
                .collect(),
            fallback: ResolutionStrategy::Manual,
        }
    }
}

impl ConflictPolicy {
    /// Built-in table with the config's overrides and fallback applied
    #[must_use]
    pub fn from_config(config: &SyncConfig) -> Self {
        let mut policy = Self::default();
        policy.fallback = config.default_strategy;
        for (resource_type, strategy) in &config.conflict_policies {
            policy.table.insert(resource_type.clone(), *strategy);
        }
        policy
    }

    /// Strategy for `resource_type`
    #[must_use]
    pub fn strategy_for(&self, resource_type: &str) -> ResolutionStrategy {
        self.table
            .get(resource_type)
            .copied()
            .unwrap_or(self.fallback)
    }

    /// Resource types with an explicit entry
    pub fn resource_types(&self) -> impl Iterator<Item = &str> {
        self.table.keys().map(String::as_str)
    }
}
