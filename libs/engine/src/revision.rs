//! Revision driver: one Resolve + Plan + Apply pass over a policy
//! snapshot.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, instrument};

use verge_eventlog::EventLog;
use verge_lang::Policy;

use crate::apply::{ApplyContext, ApplyStats, Executor};
use crate::clock::{Clock, SystemClock};
use crate::driver::DriverRegistry;
use crate::error::EngineError;
use crate::plan::plan;
use crate::resolve::{resolve, ResolutionLog};
use crate::store::{RevisionId, StateStore};

/// What one revision did.
#[derive(Debug)]
pub struct RevisionSummary {
    pub revision: RevisionId,
    pub actions: usize,
    pub stats: ApplyStats,
    pub resolution: ResolutionLog,
}

/// Runs revisions. Single-writer: callers must not run two revisions
/// concurrently against the same store.
pub struct RevisionDriver {
    store: Arc<dyn StateStore>,
    drivers: Arc<DriverRegistry>,
    event_log: EventLog,
    clock: Arc<dyn Clock>,
    executor: Executor,
}

impl RevisionDriver {
    pub fn new(
        store: Arc<dyn StateStore>,
        drivers: Arc<DriverRegistry>,
        event_log: EventLog,
    ) -> Self {
        Self {
            store,
            drivers,
            event_log,
            clock: Arc::new(SystemClock),
            executor: Executor::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_executor(mut self, executor: Executor) -> Self {
        self.executor = executor;
        self
    }

    /// Run one revision against a policy snapshot.
    ///
    /// The revision (policy + desired state) is persisted before any
    /// action runs, so a later revision can always locate the policy that
    /// created what is in the actual state.
    #[instrument(skip_all)]
    pub async fn run(
        &self,
        policy: &Policy,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<RevisionSummary, EngineError> {
        let mut actual = self.store.load_actual()?;
        let prior = self.store.last_revision()?;
        let (actual_policy, derived_from) = match prior {
            Some(saved) => (saved.policy, saved.id),
            None => (Policy::new(), RevisionId::default()),
        };

        let (desired, resolution) = resolve(policy, &self.event_log)?;
        let revision = self
            .store
            .save_revision(policy, &desired, self.clock.now())?;
        let actions = plan(&desired, &actual, derived_from);

        let mut ctx = ApplyContext {
            desired_policy: policy,
            actual_policy: &actual_policy,
            desired: &desired,
            actual: &mut actual,
            store: self.store.as_ref(),
            drivers: &self.drivers,
            event_log: &self.event_log,
            clock: self.clock.as_ref(),
        };
        let stats = self.executor.apply(&actions, &mut ctx, cancel).await?;

        info!(
            revision = %revision,
            actions = actions.len(),
            created = stats.created,
            updated = stats.updated,
            deleted = stats.deleted,
            unchanged = stats.unchanged,
            cancelled = stats.cancelled,
            "Revision complete"
        );
        Ok(RevisionSummary {
            revision,
            actions: actions.len(),
            stats,
            resolution,
        })
    }
}
