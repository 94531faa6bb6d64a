//! # verge-lang
//!
//! The policy language for the verge orchestrator.
//!
//! This crate defines everything a policy is made of:
//!
//! - **Objects**: services, contracts, clusters, rules, and dependencies,
//!   each identified by a `(namespace, kind, name)` triple plus a generation.
//! - **Labels**: string-to-string label sets and the ordered transformations
//!   (`set` / `remove` / `add_if_absent`) applied to them.
//! - **Templates**: `${key}` interpolation of label values into strings and
//!   parameter trees.
//! - **Predicates**: boolean expressions over labels used by contract
//!   contexts and rules.
//! - **Policy graph**: the namespaced, versioned store of objects with
//!   deterministic (lexicographic) iteration.
//! - **PolicyView**: the ACL-enforcing capability wrapper used at the API
//!   boundary. The reconciliation engine always receives an already-vetted
//!   [`Policy`].

mod cluster;
mod contract;
mod dependency;
mod error;
mod expression;
mod labels;
mod object;
mod params;
mod policy;
mod rule;
mod service;
mod template;
mod view;

pub use cluster::Cluster;
pub use contract::{Contract, ContractContext};
pub use dependency::{load_dependencies_from_dir, Dependency, DependencyDecl};
pub use error::LangError;
pub use expression::Predicate;
pub use labels::{LabelOps, LabelSet};
pub use object::{split_locator, Kind, Metadata, DEFAULT_NAMESPACE, SYSTEM_NAMESPACE};
pub use params::ParamValue;
pub use policy::{Policy, PolicyObject};
pub use rule::{Rule, RuleEffect};
pub use service::{Code, Component, Service};
pub use template::Template;
pub use view::{AclGrant, AclResolver, PolicyView, Privilege, StaticAclResolver, User};
