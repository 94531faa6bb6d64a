//! Engine error types.

use thiserror::Error;

use verge_lang::LangError;

use crate::store::StoreError;

/// Errors surfacing from a revision.
///
/// Template, expression, lookup, and cycle failures are caught per
/// dependency inside the resolver; everything else halts the revision and
/// is retried by the next one.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Lang(#[from] LangError),

    /// A dependency resolution re-entered a `(service, context)` pair
    /// already on its resolution path.
    #[error("cycle detected while resolving dependency '{dependency}': service '{service}' re-entered via context '{context}'")]
    CycleDetected {
        dependency: String,
        service: String,
        context: String,
    },

    /// Structural problem that prevents producing any safe output.
    /// Fatal for the whole revision.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A driver call failed. The revision halts after this action.
    #[error("{action} failed for component '{key}': {reason}")]
    Driver {
        action: &'static str,
        key: String,
        reason: String,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("no deploy driver registered for code kind '{kind}'")]
    DriverNotRegistered { kind: String },
}
