//! Label sets and label transformations.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::LangError;
use crate::template::Template;

/// An unordered string-to-string label mapping.
///
/// Backed by a `BTreeMap` so iteration is always lexicographic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelSet(BTreeMap<String, String>);

impl LabelSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) {
        self.0.remove(key);
    }

    /// Builder-style insertion.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, String)> for LabelSet {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<BTreeMap<String, String>> for LabelSet {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

/// An ordered triple of label transformations.
///
/// Applied in declaration order: `set`, then `remove`, then
/// `add_if_absent`. Values are templates evaluated against the *input*
/// label set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LabelOps {
    #[serde(default)]
    pub set: BTreeMap<String, String>,
    #[serde(default)]
    pub remove: Vec<String>,
    #[serde(default)]
    pub add_if_absent: BTreeMap<String, String>,
}

impl LabelOps {
    /// Apply the transformation, producing a new label set.
    ///
    /// A template evaluation error fails the whole transformation.
    pub fn apply(&self, labels: &LabelSet) -> Result<LabelSet, LangError> {
        let mut out = labels.clone();
        for (key, template) in &self.set {
            out.set(key.clone(), Template::new(template).evaluate(labels)?);
        }
        for key in &self.remove {
            out.remove(key);
        }
        for (key, template) in &self.add_if_absent {
            if !out.contains(key) {
                out.set(key.clone(), Template::new(template).evaluate(labels)?);
            }
        }
        Ok(out)
    }
}
