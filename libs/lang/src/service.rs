//! Services: templates producing trees of component instances.

use serde::{Deserialize, Serialize};

use crate::error::LangError;
use crate::labels::LabelOps;
use crate::object::{Kind, Metadata};
use crate::params::ParamValue;

/// A service is an ordered list of components. Component order is
/// significant: it is the declared order used by the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub metadata: Metadata,
    #[serde(default)]
    pub components: Vec<Component>,
}

/// One node of a service: either a deployable code block or a reference to
/// a nested service, never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Component {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<Code>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovery: Option<ParamValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<LabelOps>,
}

/// A deployable code block. `kind` selects the deployment driver;
/// `params` is a parameter tree whose string leaves are label templates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Code {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<ParamValue>,
}

impl Service {
    pub fn component(&self, name: &str) -> Option<&Component> {
        self.components.iter().find(|c| c.name == name)
    }

    /// Structural validation: unique component names, exactly one of
    /// `code` / `service` per component.
    pub fn validate(&self) -> Result<(), LangError> {
        let mut seen = std::collections::BTreeSet::new();
        for component in &self.components {
            if !seen.insert(component.name.as_str()) {
                return Err(self.invalid(format!(
                    "duplicate component name '{}'",
                    component.name
                )));
            }
            match (&component.code, &component.service) {
                (Some(_), Some(_)) => {
                    return Err(self.invalid(format!(
                        "component '{}' declares both code and a nested service",
                        component.name
                    )));
                }
                (None, None) => {
                    return Err(self.invalid(format!(
                        "component '{}' declares neither code nor a nested service",
                        component.name
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn invalid(&self, reason: String) -> LangError {
        LangError::InvalidObject {
            kind: Kind::Service,
            name: self.metadata.name.clone(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_code_and_service_on_one_component() {
        let service: Service = serde_yaml::from_str(
            r#"
metadata: {namespace: default, name: web}
components:
  - name: srv
    code: {kind: mock}
    service: other
"#,
        )
        .unwrap();
        assert!(matches!(
            service.validate(),
            Err(LangError::InvalidObject { .. })
        ));
    }

    #[test]
    fn validate_rejects_duplicate_component_names() {
        let service: Service = serde_yaml::from_str(
            r#"
metadata: {namespace: default, name: web}
components:
  - name: srv
    code: {kind: mock}
  - name: srv
    code: {kind: mock}
"#,
        )
        .unwrap();
        assert!(matches!(
            service.validate(),
            Err(LangError::InvalidObject { .. })
        ));
    }

    #[test]
    fn component_lookup_by_name() {
        let service: Service = serde_yaml::from_str(
            r#"
metadata: {namespace: default, name: web}
components:
  - name: srv
    code:
      kind: mock
      params:
        cluster: "${cluster}"
"#,
        )
        .unwrap();
        service.validate().unwrap();
        assert!(service.component("srv").is_some());
        assert!(service.component("db").is_none());
    }
}
