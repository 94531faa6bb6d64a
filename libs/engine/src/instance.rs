//! Component keys and instances.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use verge_lang::ParamValue;

/// One step of a key's traversal path.
///
/// The first segment of every path records the contract traversal and its
/// allocation key; descending into a nested service component appends a
/// segment named after the component with an empty allocation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PathSegment {
    pub name: String,
    pub allocation: String,
}

impl PathSegment {
    pub fn contract(name: impl Into<String>, allocation: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            allocation: allocation.into(),
        }
    }

    pub fn component(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            allocation: String::new(),
        }
    }

    fn render(&self) -> String {
        if self.allocation.is_empty() {
            self.name.clone()
        } else {
            format!("{}={}", self.name, self.allocation)
        }
    }
}

/// Globally unique, order-significant identity of one component instance.
///
/// Reusing a key across revisions means "same instance". The derived
/// ordering sorts a parent strictly before all of its descendants, which
/// the planner relies on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ComponentKey {
    /// Namespace of the context's target service.
    pub namespace: String,
    /// Root service of the resolved context.
    pub service: String,
    /// Context-resolution path.
    pub path: Vec<PathSegment>,
    /// Component name within the service the path leads to.
    pub component: String,
}

impl ComponentKey {
    pub fn new(
        namespace: impl Into<String>,
        service: impl Into<String>,
        path: Vec<PathSegment>,
        component: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            service: service.into(),
            path,
            component: component.into(),
        }
    }

    /// The flattened identity: `[namespace, service, segments…, component]`.
    /// A key is an ancestor of another iff its lineage is a proper prefix.
    pub fn lineage(&self) -> Vec<String> {
        let mut lineage = Vec::with_capacity(self.path.len() + 3);
        lineage.push(self.namespace.clone());
        lineage.push(self.service.clone());
        lineage.extend(self.path.iter().map(PathSegment::render));
        lineage.push(self.component.clone());
        lineage
    }

    pub fn is_ancestor_of(&self, other: &ComponentKey) -> bool {
        let mine = self.lineage();
        let theirs = other.lineage();
        mine.len() < theirs.len() && theirs[..mine.len()] == mine[..]
    }

    /// Keys with no ancestor relation in either direction; such instances
    /// may be acted on concurrently.
    pub fn independent_of(&self, other: &ComponentKey) -> bool {
        self != other && !self.is_ancestor_of(other) && !other.is_ancestor_of(self)
    }
}

impl fmt::Display for ComponentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.lineage().join("#"))
    }
}

/// One deployed (or to-be-deployed) component instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentInstance {
    pub key: ComponentKey,
    /// Global ids (`namespace/id`) of the dependencies that caused this
    /// instance. Never empty in a desired state.
    pub caused_by: BTreeSet<String>,
    pub code_params: ParamValue,
    pub discovery_params: ParamValue,
    /// Stamped by the executor on create; preserved across updates.
    pub created_at: Option<DateTime<Utc>>,
    /// Stamped by the executor on create and every update.
    pub updated_at: Option<DateTime<Utc>>,
}

impl ComponentInstance {
    pub fn new(key: ComponentKey) -> Self {
        Self {
            key,
            caused_by: BTreeSet::new(),
            code_params: ParamValue::empty(),
            discovery_params: ParamValue::empty(),
            created_at: None,
            updated_at: None,
        }
    }
}
