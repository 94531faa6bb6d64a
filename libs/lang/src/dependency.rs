//! Dependencies: a consumer's declared intent to use a contract.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::LangError;
use crate::labels::LabelSet;
use crate::object::{Kind, Metadata, DEFAULT_NAMESPACE};

/// A dependency, keyed by id (`metadata.name`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dependency {
    pub metadata: Metadata,
    pub enabled: bool,
    pub user_id: String,
    /// Contract locator, resolved in the dependency's namespace.
    pub contract: String,
    #[serde(default)]
    pub labels: LabelSet,
}

impl Dependency {
    pub fn id(&self) -> &str {
        &self.metadata.name
    }

    /// Globally unique id, `namespace/id`.
    pub fn global_id(&self) -> String {
        format!("{}/{}", self.metadata.namespace, self.metadata.name)
    }
}

/// On-disk dependency declaration record. Unknown fields are rejected;
/// `enabled` defaults to true.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DependencyDecl {
    pub id: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub namespace: Option<String>,
    pub user_id: String,
    pub contract: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

fn default_enabled() -> bool {
    true
}

impl DependencyDecl {
    pub fn into_dependency(self) -> Result<Dependency, LangError> {
        if self.id.is_empty() {
            return Err(LangError::InvalidObject {
                kind: Kind::Dependency,
                name: String::new(),
                reason: "empty dependency id".to_string(),
            });
        }
        let namespace = self
            .namespace
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
        Ok(Dependency {
            metadata: Metadata::new(namespace, self.id),
            enabled: self.enabled,
            user_id: self.user_id,
            contract: self.contract,
            labels: LabelSet::from(self.labels),
        })
    }
}

/// Load all dependency declarations from `*.yaml` / `*.yml` files in a
/// directory. Files are read in sorted name order so loading is
/// deterministic; each file holds a YAML list of records.
pub fn load_dependencies_from_dir(dir: &Path) -> Result<Vec<Dependency>, LangError> {
    let read_dir = std::fs::read_dir(dir).map_err(|source| LangError::Io {
        path: dir.display().to_string(),
        source,
    })?;

    let mut files = Vec::new();
    for entry in read_dir {
        let entry = entry.map_err(|source| LangError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        let path = entry.path();
        let is_yaml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext == "yaml" || ext == "yml");
        if is_yaml {
            files.push(path);
        }
    }
    files.sort();

    let mut dependencies = Vec::new();
    for path in files {
        let contents = std::fs::read_to_string(&path).map_err(|source| LangError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let decls: Vec<DependencyDecl> =
            serde_yaml::from_str(&contents).map_err(|err| LangError::Parse {
                path: path.display().to_string(),
                reason: err.to_string(),
            })?;
        for decl in decls {
            dependencies.push(decl.into_dependency()?);
        }
    }
    Ok(dependencies)
}
