//! Contracts: discriminated unions of contexts over labels.

use serde::{Deserialize, Serialize};

use crate::labels::LabelOps;
use crate::object::Metadata;

/// A contract is an ordered list of contexts. Resolution picks the first
/// context whose criteria matches the dependency's labels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    pub metadata: Metadata,
    #[serde(default)]
    pub contexts: Vec<ContractContext>,
}

/// One branch of a contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContractContext {
    pub name: String,
    /// Predicate over labels; absent means "always matches".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criteria: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<LabelOps>,
    /// Allocation key template, evaluated after the context's label ops.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocation: Option<String>,
    /// Target service locator.
    pub service: String,
}
