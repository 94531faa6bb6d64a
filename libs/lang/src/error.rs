//! Error types for the policy language.

use thiserror::Error;

use crate::object::Kind;

/// Errors raised by policy lookup, label evaluation, and the policy view.
#[derive(Debug, Error)]
pub enum LangError {
    /// Lookup miss in the policy graph. May be recoverable by a later
    /// revision; never retried within one.
    #[error("{kind} '{locator}' not found (resolved in namespace '{namespace}')")]
    NotFound {
        kind: Kind,
        locator: String,
        namespace: String,
    },

    /// ACL denial from the policy view. Surfaced verbatim to the caller.
    #[error("user '{user}' doesn't have permission to {operation} object '{namespace}/{kind}/{name}'")]
    AccessDenied {
        user: String,
        operation: &'static str,
        namespace: String,
        kind: Kind,
        name: String,
    },

    /// A template failed to evaluate. Syntax only: unknown keys expand to
    /// the empty string instead of failing.
    #[error("template '{template}' failed to evaluate: {reason}")]
    TemplateEval { template: String, reason: String },

    /// A predicate expression failed to parse.
    #[error("expression '{expression}' failed to parse: {reason}")]
    ExpressionParse { expression: String, reason: String },

    /// A predicate expression failed to evaluate. Unknown identifiers are
    /// an error, not `false`.
    #[error("expression '{expression}' failed to evaluate: {reason}")]
    ExpressionEval { expression: String, reason: String },

    /// A structurally invalid object (empty id, duplicate component, ...).
    #[error("invalid {kind} object '{name}': {reason}")]
    InvalidObject {
        kind: Kind,
        name: String,
        reason: String,
    },

    /// Declaration file could not be read.
    #[error("failed to read '{path}'")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Declaration file could not be parsed.
    #[error("failed to parse '{path}': {reason}")]
    Parse { path: String, reason: String },
}
