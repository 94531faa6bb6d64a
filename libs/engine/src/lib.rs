//! # verge-engine
//!
//! The reconciliation engine: on each revision it resolves the policy
//! into a desired component-instance map, diffs it against the persisted
//! actual state, and executes a minimal ordered action sequence through
//! pluggable deployment drivers.
//!
//! Data flow:
//!
//! ```text
//! Policy + Dependencies → resolve → DesiredState
//!                                      │
//!                      ActualState ──► plan ──► ordered Actions
//!                                                   │
//!                               apply ──► Drivers + StateStore mutations
//! ```
//!
//! # Invariants
//!
//! - Resolution and planning are pure and deterministic: keyed maps are
//!   `BTreeMap`s and template evaluation has no side effects.
//! - A component key reused across revisions means "same instance";
//!   `created_at` survives every update.
//! - If an instance is in the desired state, so is every ancestor on its
//!   key path.
//! - The executor stops at the first error; committed work stays and the
//!   next revision re-diffs.

mod apply;
mod clock;
mod driver;
mod error;
mod instance;
mod plan;
mod resolve;
mod revision;
mod signature;
mod state;
mod store;

pub use apply::{ApplyContext, ApplyStats, Executor};
pub use clock::{Clock, FixedClock, SystemClock};
pub use driver::{DeployDriver, DriverCall, DriverError, DriverRegistry, MockDriver, NoopDriver};
pub use error::EngineError;
pub use instance::{ComponentInstance, ComponentKey, PathSegment};
pub use plan::{plan, Action};
pub use resolve::{resolve, ResolutionEntry, ResolutionLog, ResolutionOutcome};
pub use revision::{RevisionDriver, RevisionSummary};
pub use signature::Signature;
pub use state::{ActualState, DesiredState};
pub use store::{RevisionId, SavedRevision, SqliteStore, StateStore, StoreError};
