//! Object identity: the `(namespace, kind, name)` triple and locators.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Reserved namespace for cluster objects.
pub const SYSTEM_NAMESPACE: &str = "system";

/// Namespace assigned to objects that don't declare one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// The kind of a policy object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Service,
    Contract,
    Cluster,
    Rule,
    Dependency,
}

impl Kind {
    /// Stable lowercase name, used in locators and error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Service => "service",
            Kind::Contract => "contract",
            Kind::Cluster => "cluster",
            Kind::Rule => "rule",
            Kind::Dependency => "dependency",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity shared by every policy object.
///
/// The `(namespace, name)` pair is immutable for the lifetime of the object;
/// `generation` increases every time the object is replaced in the policy.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub generation: u64,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

impl Metadata {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            generation: 0,
        }
    }
}

impl fmt::Display for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Split a locator into `(namespace, name)`.
///
/// A locator is either a bare `name`, resolved in `current_ns`, or an
/// explicit `namespace/name`.
pub fn split_locator<'a>(locator: &'a str, current_ns: &'a str) -> (&'a str, &'a str) {
    match locator.split_once('/') {
        Some((ns, name)) => (ns, name),
        None => (current_ns, locator),
    }
}
