//! Policy and dependency declaration loading.
//!
//! Policy files are YAML lists of tagged objects (`kind: service`, ...).
//! Dependency declarations use the record format (`id`, `user_id`,
//! `contract`, `labels`, optional `enabled`) and may live in a separate
//! directory. Files load in sorted name order so the resulting policy is
//! deterministic; a loading failure skips the tick, not the process.

use std::path::Path;

use anyhow::{Context, Result};

use verge_lang::{load_dependencies_from_dir, Policy, PolicyObject};

use crate::config::Config;

pub fn load_policy(config: &Config) -> Result<Policy> {
    let mut policy = Policy::new();
    load_policy_objects(&config.policy_dir, &mut policy)?;

    if let Some(dir) = &config.dependencies_dir {
        let dependencies = load_dependencies_from_dir(dir)
            .with_context(|| format!("loading dependencies from {}", dir.display()))?;
        for dependency in dependencies {
            policy.add_object(PolicyObject::Dependency(dependency));
        }
    }
    Ok(policy)
}

fn load_policy_objects(dir: &Path, policy: &mut Policy) -> Result<()> {
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("reading policy dir {}", dir.display()))?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry
            .with_context(|| format!("reading policy dir {}", dir.display()))?
            .path();
        let is_yaml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext == "yaml" || ext == "yml");
        if is_yaml {
            files.push(path);
        }
    }
    files.sort();

    for path in files {
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let objects: Vec<PolicyObject> = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing {}", path.display()))?;
        for obj in objects {
            policy.add_object(obj);
        }
    }
    Ok(())
}
