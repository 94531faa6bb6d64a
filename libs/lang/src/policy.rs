//! The policy graph: a namespaced, versioned snapshot of policy objects.
//!
//! Objects are grouped per-namespace, per-kind, in `BTreeMap`s keyed by
//! name, so every enumeration is lexicographic and resolution is
//! deterministic. Cross-references between objects are locators resolved
//! lazily by lookup; the graph never stores a pointer that could form an
//! in-memory cycle.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::cluster::Cluster;
use crate::contract::Contract;
use crate::dependency::Dependency;
use crate::error::LangError;
use crate::object::{split_locator, Kind, Metadata, SYSTEM_NAMESPACE};
use crate::rule::Rule;
use crate::service::Service;

/// Any policy object, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PolicyObject {
    Service(Service),
    Contract(Contract),
    Cluster(Cluster),
    Rule(Rule),
    Dependency(Dependency),
}

impl PolicyObject {
    pub fn kind(&self) -> Kind {
        match self {
            PolicyObject::Service(_) => Kind::Service,
            PolicyObject::Contract(_) => Kind::Contract,
            PolicyObject::Cluster(_) => Kind::Cluster,
            PolicyObject::Rule(_) => Kind::Rule,
            PolicyObject::Dependency(_) => Kind::Dependency,
        }
    }

    pub fn metadata(&self) -> &Metadata {
        match self {
            PolicyObject::Service(o) => &o.metadata,
            PolicyObject::Contract(o) => &o.metadata,
            PolicyObject::Cluster(o) => &o.metadata,
            PolicyObject::Rule(o) => &o.metadata,
            PolicyObject::Dependency(o) => &o.metadata,
        }
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        match self {
            PolicyObject::Service(o) => &mut o.metadata,
            PolicyObject::Contract(o) => &mut o.metadata,
            PolicyObject::Cluster(o) => &mut o.metadata,
            PolicyObject::Rule(o) => &mut o.metadata,
            PolicyObject::Dependency(o) => &mut o.metadata,
        }
    }
}

/// The in-memory policy snapshot. Immutable after publish: the engine
/// only ever reads it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    namespaces: BTreeMap<String, BTreeMap<Kind, BTreeMap<String, PolicyObject>>>,
}

impl Policy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an object, replacing any prior `(namespace, kind, name)`
    /// entry and bumping the generation.
    pub fn add_object(&mut self, mut obj: PolicyObject) {
        let kind = obj.kind();
        let namespace = obj.metadata().namespace.clone();
        let name = obj.metadata().name.clone();
        let slot = self
            .namespaces
            .entry(namespace)
            .or_default()
            .entry(kind)
            .or_default();
        let generation = slot
            .get(&name)
            .map(|prev| prev.metadata().generation + 1)
            .unwrap_or(1);
        obj.metadata_mut().generation = generation;
        slot.insert(name, obj);
    }

    /// Look up an object by kind and locator. Cluster locators always
    /// resolve in the `system` namespace.
    pub fn get_object(
        &self,
        kind: Kind,
        locator: &str,
        current_ns: &str,
    ) -> Result<&PolicyObject, LangError> {
        let current_ns = if kind == Kind::Cluster {
            SYSTEM_NAMESPACE
        } else {
            current_ns
        };
        let (namespace, name) = split_locator(locator, current_ns);
        self.namespaces
            .get(namespace)
            .and_then(|kinds| kinds.get(&kind))
            .and_then(|objects| objects.get(name))
            .ok_or_else(|| LangError::NotFound {
                kind,
                locator: locator.to_string(),
                namespace: namespace.to_string(),
            })
    }

    pub fn get_service(&self, locator: &str, current_ns: &str) -> Result<&Service, LangError> {
        match self.get_object(Kind::Service, locator, current_ns)? {
            PolicyObject::Service(service) => Ok(service),
            _ => unreachable!("service slot holds non-service object"),
        }
    }

    pub fn get_contract(&self, locator: &str, current_ns: &str) -> Result<&Contract, LangError> {
        match self.get_object(Kind::Contract, locator, current_ns)? {
            PolicyObject::Contract(contract) => Ok(contract),
            _ => unreachable!("contract slot holds non-contract object"),
        }
    }

    pub fn get_cluster(&self, name: &str) -> Result<&Cluster, LangError> {
        match self.get_object(Kind::Cluster, name, SYSTEM_NAMESPACE)? {
            PolicyObject::Cluster(cluster) => Ok(cluster),
            _ => unreachable!("cluster slot holds non-cluster object"),
        }
    }

    fn iter_kind(&self, kind: Kind) -> impl Iterator<Item = &PolicyObject> {
        self.namespaces
            .values()
            .filter_map(move |kinds| kinds.get(&kind))
            .flat_map(|objects| objects.values())
    }

    /// All rules, in `(namespace, name)` order.
    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.iter_kind(Kind::Rule).map(|obj| match obj {
            PolicyObject::Rule(rule) => rule,
            _ => unreachable!("rule slot holds non-rule object"),
        })
    }

    /// All dependencies, in `(namespace, id)` order.
    pub fn dependencies(&self) -> impl Iterator<Item = &Dependency> {
        self.iter_kind(Kind::Dependency).map(|obj| match obj {
            PolicyObject::Dependency(dependency) => dependency,
            _ => unreachable!("dependency slot holds non-dependency object"),
        })
    }

    /// All services, in `(namespace, name)` order.
    pub fn services(&self) -> impl Iterator<Item = &Service> {
        self.iter_kind(Kind::Service).map(|obj| match obj {
            PolicyObject::Service(service) => service,
            _ => unreachable!("service slot holds non-service object"),
        })
    }

    /// Derived index: enabled dependencies grouped by the `ns/name` of the
    /// contract they request. Never persisted; the by-id map is the only
    /// stored form.
    pub fn dependencies_by_contract(&self) -> BTreeMap<String, Vec<&Dependency>> {
        let mut index: BTreeMap<String, Vec<&Dependency>> = BTreeMap::new();
        for dependency in self.dependencies().filter(|d| d.enabled) {
            let (ns, name) = split_locator(&dependency.contract, &dependency.metadata.namespace);
            index.entry(format!("{ns}/{name}")).or_default().push(dependency);
        }
        index
    }

    pub fn is_empty(&self) -> bool {
        self.namespaces
            .values()
            .all(|kinds| kinds.values().all(BTreeMap::is_empty))
    }
}
