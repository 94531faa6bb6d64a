//! Rules: global predicates gating dependency resolution.

use serde::{Deserialize, Serialize};

use crate::object::Metadata;

/// What a matching rule does to a dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleEffect {
    /// Resolution proceeds.
    Allow,
    /// Dependency is rejected and the rejection is logged as a warning.
    Deny,
    /// Dependency is rejected silently.
    Ignore,
}

/// A rule: predicate plus effect. Rules are evaluated in `(namespace,
/// name)` order against a dependency's seed labels; the first match
/// decides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub metadata: Metadata,
    pub criteria: String,
    pub effect: RuleEffect,
}
