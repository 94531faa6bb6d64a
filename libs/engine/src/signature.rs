//! Instance signatures for change detection.

use std::collections::BTreeMap;
use std::fmt;

use sha2::{Digest, Sha256};

use verge_lang::ParamValue;

use crate::instance::ComponentInstance;

/// Hash over everything that makes an instance "the same": code params,
/// discovery params, and the causing dependency set. Timestamps are
/// deliberately excluded. Computed from canonical JSON so the result is
/// byte-stable across runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature(String);

impl Signature {
    pub fn of(instance: &ComponentInstance) -> Self {
        let mut canonical = BTreeMap::new();
        canonical.insert(
            "caused_by".to_string(),
            ParamValue::List(
                instance
                    .caused_by
                    .iter()
                    .map(|id| ParamValue::String(id.clone()))
                    .collect(),
            ),
        );
        canonical.insert("code".to_string(), instance.code_params.clone());
        canonical.insert("discovery".to_string(), instance.discovery_params.clone());

        let mut hasher = Sha256::new();
        hasher.update(ParamValue::Map(canonical).canonical_json().as_bytes());
        let digest = hasher.finalize();
        Self(format!("sha256:{}", hex::encode(&digest[..16])))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::{ComponentKey, PathSegment};

    fn instance(image: &str, deps: &[&str]) -> ComponentInstance {
        let key = ComponentKey::new(
            "default",
            "web",
            vec![PathSegment::contract("web-contract", "")],
            "srv",
        );
        let mut inst = ComponentInstance::new(key);
        inst.caused_by = deps.iter().map(|d| d.to_string()).collect();
        inst.code_params = ParamValue::Map(
            [("image".to_string(), ParamValue::from(image))]
                .into_iter()
                .collect(),
        );
        inst
    }

    #[test]
    fn equal_content_means_equal_signature() {
        let a = instance("web:dev", &["default/d1"]);
        let mut b = instance("web:dev", &["default/d1"]);
        b.created_at = Some(chrono::Utc::now());
        // Timestamps don't participate.
        assert_eq!(Signature::of(&a), Signature::of(&b));
    }

    #[test]
    fn param_change_changes_signature() {
        let a = instance("web:dev", &["default/d1"]);
        let b = instance("web:prod", &["default/d1"]);
        assert_ne!(Signature::of(&a), Signature::of(&b));
    }

    #[test]
    fn causing_set_participates() {
        let a = instance("web:dev", &["default/d1"]);
        let b = instance("web:dev", &["default/d1", "default/d2"]);
        assert_ne!(Signature::of(&a), Signature::of(&b));
    }
}
