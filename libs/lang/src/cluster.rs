//! Clusters: named deployment targets living in the `system` namespace.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::object::Metadata;

/// A back-end cluster a driver deploys onto.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub metadata: Metadata,
    /// Cluster type, e.g. `kubernetes`.
    #[serde(rename = "type")]
    pub cluster_type: String,
    /// Connection parameters, opaque to the engine.
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

impl Cluster {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}
