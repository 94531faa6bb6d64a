//! Parameter trees: the values carried by component code and discovery
//! blocks.
//!
//! A tree is strings, numbers, booleans, lists, and string-keyed maps.
//! In policy declarations every string leaf is a template over the label
//! set in effect at resolution time. The canonical JSON rendering (sorted
//! keys, no whitespace) is the basis for instance signatures.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::LangError;
use crate::labels::LabelSet;
use crate::template::Template;

/// A node in a parameter tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    List(Vec<ParamValue>),
    Map(BTreeMap<String, ParamValue>),
}

impl Default for ParamValue {
    fn default() -> Self {
        ParamValue::Map(BTreeMap::new())
    }
}

impl ParamValue {
    /// An empty map, the zero value for code and discovery params.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Map member lookup; `None` for non-maps and missing keys.
    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        match self {
            ParamValue::Map(map) => map.get(key),
            _ => None,
        }
    }

    pub fn is_empty_map(&self) -> bool {
        matches!(self, ParamValue::Map(map) if map.is_empty())
    }

    /// Expand every string leaf as a template over `labels`.
    pub fn eval_templates(&self, labels: &LabelSet) -> Result<ParamValue, LangError> {
        Ok(match self {
            ParamValue::Bool(b) => ParamValue::Bool(*b),
            ParamValue::Number(n) => ParamValue::Number(n.clone()),
            ParamValue::String(s) => ParamValue::String(Template::new(s).evaluate(labels)?),
            ParamValue::List(items) => ParamValue::List(
                items
                    .iter()
                    .map(|item| item.eval_templates(labels))
                    .collect::<Result<_, _>>()?,
            ),
            ParamValue::Map(map) => ParamValue::Map(
                map.iter()
                    .map(|(k, v)| Ok((k.clone(), v.eval_templates(labels)?)))
                    .collect::<Result<_, LangError>>()?,
            ),
        })
    }

    /// Canonical JSON: sorted keys, no whitespace. Stable across runs, used
    /// for signature comparison.
    pub fn canonical_json(&self) -> String {
        let mut out = String::new();
        self.write_canonical(&mut out);
        out
    }

    fn write_canonical(&self, out: &mut String) {
        match self {
            ParamValue::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            ParamValue::Number(n) => out.push_str(&n.to_string()),
            ParamValue::String(s) => {
                out.push('"');
                out.push_str(&escape_json_string(s));
                out.push('"');
            }
            ParamValue::List(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    item.write_canonical(out);
                }
                out.push(']');
            }
            ParamValue::Map(map) => {
                out.push('{');
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push('"');
                    out.push_str(&escape_json_string(key));
                    out.push_str("\":");
                    value.write_canonical(out);
                }
                out.push('}');
            }
        }
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::String(s.to_string())
    }
}

impl From<i64> for ParamValue {
    fn from(n: i64) -> Self {
        ParamValue::Number(n.into())
    }
}

fn escape_json_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> ParamValue {
        let yaml = r#"
cluster: "${cluster}"
image: "web:${env}"
replicas: 3
debug: false
args: ["--env", "${env}"]
"#;
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn yaml_roundtrip_preserves_shape() {
        let value = tree();
        assert!(matches!(value.get("replicas"), Some(ParamValue::Number(_))));
        assert!(matches!(value.get("debug"), Some(ParamValue::Bool(false))));
        assert!(matches!(value.get("args"), Some(ParamValue::List(_))));
    }

    #[test]
    fn templates_expand_in_every_string_leaf() {
        let labels = LabelSet::new().with("env", "prod").with("cluster", "c1");
        let out = tree().eval_templates(&labels).unwrap();
        assert_eq!(out.get("cluster").and_then(ParamValue::as_str), Some("c1"));
        assert_eq!(
            out.get("image").and_then(ParamValue::as_str),
            Some("web:prod")
        );
        match out.get("args") {
            Some(ParamValue::List(items)) => {
                assert_eq!(items[1].as_str(), Some("prod"));
            }
            other => panic!("unexpected args: {other:?}"),
        }
    }

    #[test]
    fn canonical_json_sorts_keys_and_is_stable() {
        let labels = LabelSet::new().with("env", "dev").with("cluster", "c1");
        let a = tree().eval_templates(&labels).unwrap();
        let b = tree().eval_templates(&labels).unwrap();
        assert_eq!(a.canonical_json(), b.canonical_json());
        assert_eq!(
            a.canonical_json(),
            r#"{"args":["--env","dev"],"cluster":"c1","debug":false,"image":"web:dev","replicas":3}"#
        );
    }

    #[test]
    fn strings_are_escaped() {
        let v = ParamValue::String("a\"b\\c\nd".to_string());
        assert_eq!(v.canonical_json(), r#""a\"b\\c\nd""#);
    }
}
