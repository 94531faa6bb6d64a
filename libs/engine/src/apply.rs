//! Action execution: invoking drivers and committing actual-state
//! mutations.
//!
//! The executor walks the planner's action list and, per action, invokes
//! the deployment driver (unless the instance is a service-level node)
//! and then commits the mutation to the state store and the in-memory
//! actual state. The first error halts the revision; completed work stays
//! committed and the next revision re-diffs and catches up.
//!
//! Sequential execution is the default. With `parallelism > 1`, actions
//! whose keys have no ancestor relation run concurrently under a worker
//! pool; an action never dispatches before every earlier related action
//! has finished. Driver calls are the only blocking operations and are
//! bounded by a per-action deadline and the cancellation signal.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::debug;

use verge_eventlog::EventLog;
use verge_lang::{Cluster, Component, ParamValue, Policy};

use crate::clock::Clock;
use crate::driver::{DeployDriver, DriverRegistry};
use crate::error::EngineError;
use crate::instance::{ComponentInstance, ComponentKey};
use crate::plan::Action;
use crate::state::{ActualState, DesiredState};
use crate::store::StateStore;

/// Everything one revision's actions need, bundled. The policy snapshots
/// and desired state are immutable; the actual state is mutated solely
/// through the store's single-writer API by this executor.
pub struct ApplyContext<'a> {
    pub desired_policy: &'a Policy,
    /// Policy snapshot of the revision that produced the current actual
    /// state; deletes locate component specs and clusters here.
    pub actual_policy: &'a Policy,
    pub desired: &'a DesiredState,
    pub actual: &'a mut ActualState,
    pub store: &'a dyn StateStore,
    pub drivers: &'a DriverRegistry,
    pub event_log: &'a EventLog,
    pub clock: &'a dyn Clock,
}

/// Counts of what one apply pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyStats {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
    /// True when cancellation stopped dispatch before the last action.
    pub cancelled: bool,
}

/// Executes planned actions.
#[derive(Debug, Clone, Copy)]
pub struct Executor {
    /// Deadline for a single driver call.
    pub action_timeout: Duration,
    /// Worker-pool width; 1 means strictly sequential.
    pub parallelism: usize,
}

impl Default for Executor {
    fn default() -> Self {
        Self {
            action_timeout: Duration::from_secs(300),
            parallelism: 1,
        }
    }
}

impl Executor {
    pub fn sequential() -> Self {
        Self::default()
    }

    pub fn parallel(parallelism: usize) -> Self {
        Self {
            parallelism: parallelism.max(1),
            ..Self::default()
        }
    }

    /// Apply the actions in plan order.
    ///
    /// On cancellation, no further actions dispatch; in-flight actions
    /// finish and their state commits persist. The stats report
    /// `cancelled` in that case and the next revision catches up.
    pub async fn apply(
        &self,
        actions: &[Action],
        ctx: &mut ApplyContext<'_>,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<ApplyStats, EngineError> {
        if self.parallelism <= 1 {
            self.apply_sequential(actions, ctx, cancel).await
        } else {
            self.apply_parallel(actions, ctx, cancel).await
        }
    }

    async fn apply_sequential(
        &self,
        actions: &[Action],
        ctx: &mut ApplyContext<'_>,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<ApplyStats, EngineError> {
        let mut stats = ApplyStats::default();
        for action in actions {
            if is_cancelled(&cancel) {
                stats.cancelled = true;
                break;
            }
            if let Action::Noop { key } = action {
                debug!(key = %key, "component unchanged");
                stats.unchanged += 1;
                continue;
            }
            let prepared = self.prepare(action, ctx)?;
            if let Some(op) = prepared.driver_op {
                run_driver_op(op, action.kind(), action.key(), self.action_timeout, ctx.event_log)
                    .await?;
            }
            self.commit(action, prepared.instance, ctx, &mut stats)?;
        }
        Ok(stats)
    }

    async fn apply_parallel(
        &self,
        actions: &[Action],
        ctx: &mut ApplyContext<'_>,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<ApplyStats, EngineError> {
        let total = actions.len();
        let mut stats = ApplyStats::default();
        let mut dispatched = vec![false; total];
        let mut done = vec![false; total];
        let mut pending_commit: Vec<Option<ComponentInstance>> = (0..total).map(|_| None).collect();
        let mut first_error: Option<EngineError> = None;
        let mut join_set: JoinSet<(usize, Result<(), EngineError>)> = JoinSet::new();
        let semaphore = Arc::new(Semaphore::new(self.parallelism));

        loop {
            if first_error.is_none() && !is_cancelled(&cancel) {
                for index in 0..total {
                    if dispatched[index] {
                        continue;
                    }
                    // Plan order is the contract: an action waits for every
                    // earlier action whose key is related to its own.
                    let ready = (0..index).all(|earlier| {
                        done[earlier]
                            || actions[earlier].key().independent_of(actions[index].key())
                    });
                    if !ready {
                        continue;
                    }
                    if let Action::Noop { key } = &actions[index] {
                        debug!(key = %key, "component unchanged");
                        dispatched[index] = true;
                        done[index] = true;
                        stats.unchanged += 1;
                        continue;
                    }
                    let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                        break;
                    };
                    let prepared = match self.prepare(&actions[index], ctx) {
                        Ok(prepared) => prepared,
                        Err(err) => {
                            first_error = Some(err);
                            break;
                        }
                    };
                    dispatched[index] = true;
                    pending_commit[index] = Some(prepared.instance);

                    let kind = actions[index].kind();
                    let key = actions[index].key().clone();
                    let timeout = self.action_timeout;
                    let event_log = ctx.event_log.clone();
                    let driver_op = prepared.driver_op;
                    join_set.spawn(async move {
                        let _permit = permit;
                        let result = match driver_op {
                            None => Ok(()),
                            Some(op) => {
                                run_driver_op(op, kind, &key, timeout, &event_log).await
                            }
                        };
                        (index, result)
                    });
                }
            }

            let Some(joined) = join_set.join_next().await else {
                if first_error.is_some() || is_cancelled(&cancel) {
                    break;
                }
                if done.iter().all(|d| *d) {
                    break;
                }
                // Not done, nothing in flight: the next dispatch round
                // makes progress (a related predecessor just finished).
                continue;
            };
            let (index, result) = joined
                .map_err(|err| EngineError::Configuration(format!("executor task failed: {err}")))?;
            match result {
                Ok(()) => {
                    let instance = pending_commit[index].take().ok_or_else(|| {
                        EngineError::Configuration("executor lost a prepared instance".to_string())
                    })?;
                    match self.commit(&actions[index], instance, ctx, &mut stats) {
                        Ok(()) => done[index] = true,
                        Err(err) => {
                            if first_error.is_none() {
                                first_error = Some(err);
                            }
                        }
                    }
                }
                Err(err) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }

        if let Some(err) = first_error {
            return Err(err);
        }
        if is_cancelled(&cancel) && !done.iter().all(|d| *d) {
            stats.cancelled = true;
        }
        Ok(stats)
    }

    /// Pure lookups for one action: the instance record to commit and,
    /// for code components, the driver invocation payload.
    fn prepare(
        &self,
        action: &Action,
        ctx: &ApplyContext<'_>,
    ) -> Result<Prepared, EngineError> {
        match action {
            Action::Noop { .. } => Err(EngineError::Configuration(
                "noop actions are not prepared".to_string(),
            )),
            Action::Create { key } => {
                let instance = ctx
                    .desired
                    .get(key)
                    .cloned()
                    .ok_or_else(|| missing_desired(key))?;
                let driver_op =
                    self.deploy_op(ctx, ctx.desired_policy, &instance, "Deploying new component instance")?;
                Ok(Prepared { instance, driver_op })
            }
            Action::Update { key } => {
                let mut instance = ctx
                    .desired
                    .get(key)
                    .cloned()
                    .ok_or_else(|| missing_desired(key))?;
                let prior = ctx.actual.get(key).ok_or_else(|| {
                    EngineError::Configuration(format!(
                        "update action without prior actual instance '{key}'"
                    ))
                })?;
                // created_at survives every update.
                instance.created_at = prior.created_at;
                let driver_op = self.deploy_op(
                    ctx,
                    ctx.desired_policy,
                    &instance,
                    "Updating a running component instance",
                )?;
                Ok(Prepared { instance, driver_op })
            }
            Action::Delete { key, .. } => {
                let instance = ctx.actual.get(key).cloned().ok_or_else(|| {
                    EngineError::Configuration(format!(
                        "delete action without actual instance '{key}'"
                    ))
                })?;
                // The actual policy is the snapshot that created the
                // instance; drivers may need that original definition.
                let driver_op = self.deploy_op(
                    ctx,
                    ctx.actual_policy,
                    &instance,
                    "Destructing a running component instance",
                )?;
                Ok(Prepared { instance, driver_op })
            }
        }
    }

    fn deploy_op(
        &self,
        ctx: &ApplyContext<'_>,
        policy: &Policy,
        instance: &ComponentInstance,
        message: &str,
    ) -> Result<Option<DriverOp>, EngineError> {
        let key = &instance.key;
        let component = locate_component(policy, key)?;
        let Some(code) = &component.code else {
            // Service-level node: no driver involved.
            return Ok(None);
        };

        let cluster_name = instance
            .code_params
            .get("cluster")
            .and_then(ParamValue::as_str)
            .ok_or_else(|| {
                EngineError::Configuration(format!(
                    "no cluster specified in code params for component instance '{key}'"
                ))
            })?;
        let cluster = policy.get_cluster(cluster_name)?.clone();
        let driver = ctx.drivers.get(&code.kind)?;

        ctx.event_log
            .scope()
            .field("componentKey", key.to_string())
            .field("component", &component.name)
            .field("cluster", cluster.name())
            .info(&format!("{message}: {key}"));

        Ok(Some(DriverOp {
            driver,
            cluster,
            params: instance.code_params.clone(),
        }))
    }

    fn commit(
        &self,
        action: &Action,
        mut instance: ComponentInstance,
        ctx: &mut ApplyContext<'_>,
        stats: &mut ApplyStats,
    ) -> Result<(), EngineError> {
        let key = action.key();
        let result = match action {
            Action::Create { .. } => {
                let now = ctx.clock.now();
                instance.created_at = Some(now);
                instance.updated_at = Some(now);
                ctx.store.create(&instance).map(|()| {
                    ctx.actual.insert(instance);
                    stats.created += 1;
                })
            }
            Action::Update { .. } => {
                instance.updated_at = Some(ctx.clock.now());
                ctx.store.update(&instance).map(|()| {
                    ctx.actual.insert(instance);
                    stats.updated += 1;
                })
            }
            Action::Delete { .. } => ctx.store.delete(key).map(|()| {
                ctx.actual.remove(key);
                stats.deleted += 1;
            }),
            Action::Noop { .. } => Ok(()),
        };
        result.map_err(|err| {
            ctx.event_log
                .scope()
                .field("componentKey", key.to_string())
                .field("action", action.kind())
                .error(&format!("state store failure: {err}"));
            EngineError::Store(err)
        })
    }
}

struct Prepared {
    instance: ComponentInstance,
    driver_op: Option<DriverOp>,
}

struct DriverOp {
    driver: Arc<dyn DeployDriver>,
    cluster: Cluster,
    params: ParamValue,
}

async fn run_driver_op(
    op: DriverOp,
    kind: &'static str,
    key: &ComponentKey,
    deadline: Duration,
    event_log: &EventLog,
) -> Result<(), EngineError> {
    let key_str = key.to_string();
    let call = async {
        match kind {
            "create" => op.driver.create(&op.cluster, &key_str, &op.params, event_log).await,
            "update" => op.driver.update(&op.cluster, &key_str, &op.params, event_log).await,
            _ => op.driver.destroy(&op.cluster, &key_str, &op.params, event_log).await,
        }
    };
    let result = match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(crate::driver::DriverError::new(format!(
            "deadline of {deadline:?} exceeded"
        ))),
    };
    result.map_err(|err| {
        event_log.log_error(&err);
        EngineError::Driver {
            action: kind,
            key: key_str,
            reason: err.to_string(),
        }
    })
}

fn missing_desired(key: &ComponentKey) -> EngineError {
    EngineError::Configuration(format!("action references unknown desired instance '{key}'"))
}

/// Walk a key's path through the policy to the component it names.
///
/// The key's root `(namespace, service)` anchors the walk; every path
/// segment after the contract follows a nested-service component edge.
fn locate_component<'a>(
    policy: &'a Policy,
    key: &ComponentKey,
) -> Result<&'a Component, EngineError> {
    if key.path.is_empty() {
        return Err(EngineError::Configuration(format!(
            "component key '{key}' has an empty path"
        )));
    }
    let mut service = policy.get_service(&key.service, &key.namespace)?;
    for segment in &key.path[1..] {
        let component = service.component(&segment.name).ok_or_else(|| {
            EngineError::Configuration(format!(
                "component key '{key}' names unknown component '{}' in service '{}'",
                segment.name, service.metadata
            ))
        })?;
        let target = component.service.as_ref().ok_or_else(|| {
            EngineError::Configuration(format!(
                "component key '{key}' descends through non-service component '{}'",
                segment.name
            ))
        })?;
        service = policy.get_service(target, &service.metadata.namespace)?;
    }
    service.component(&key.component).ok_or_else(|| {
        EngineError::Configuration(format!(
            "component key '{key}' names unknown component '{}' in service '{}'",
            key.component, service.metadata
        ))
    })
}

fn is_cancelled(cancel: &Option<watch::Receiver<bool>>) -> bool {
    cancel.as_ref().is_some_and(|rx| *rx.borrow())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::driver::MockDriver;
    use crate::plan::plan;
    use crate::resolve::resolve;
    use crate::store::{RevisionId, SqliteStore};
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use verge_lang::PolicyObject;

    fn policy_from_yaml(yaml: &str) -> Policy {
        let objects: Vec<PolicyObject> = serde_yaml::from_str(yaml).unwrap();
        let mut policy = Policy::new();
        for obj in objects {
            policy.add_object(obj);
        }
        policy
    }

    fn web_policy(env: &str) -> Policy {
        policy_from_yaml(&format!(
            r#"
- kind: cluster
  metadata: {{namespace: system, name: c1}}
  type: mock
- kind: service
  metadata: {{namespace: default, name: web}}
  components:
    - name: srv
      code:
        kind: mock
        params:
          cluster: c1
          image: "web:${{env}}"
- kind: contract
  metadata: {{namespace: default, name: web-contract}}
  contexts:
    - name: main
      service: web
- kind: dependency
  metadata: {{namespace: default, name: d1}}
  enabled: true
  user_id: alice
  contract: web-contract
  labels: {{env: {env}}}
"#
        ))
    }

    struct Harness {
        policy: Policy,
        store: SqliteStore,
        drivers: DriverRegistry,
        driver: Arc<MockDriver>,
        event_log: EventLog,
        clock: FixedClock,
    }

    impl Harness {
        fn new(policy: Policy, driver: MockDriver) -> Self {
            let driver = Arc::new(driver);
            let mut drivers = DriverRegistry::new();
            drivers.register("mock", driver.clone());
            Self {
                policy,
                store: SqliteStore::open_in_memory().unwrap(),
                drivers,
                driver,
                event_log: EventLog::new(),
                clock: FixedClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()),
            }
        }

        async fn run_revision(&self, executor: &Executor) -> Result<ApplyStats, EngineError> {
            self.run_revision_cancellable(executor, None).await
        }

        async fn run_revision_cancellable(
            &self,
            executor: &Executor,
            cancel: Option<watch::Receiver<bool>>,
        ) -> Result<ApplyStats, EngineError> {
            let mut actual = self.store.load_actual()?;
            let (desired, _) = resolve(&self.policy, &self.event_log)?;
            let actions = plan(&desired, &actual, RevisionId(1));
            let mut ctx = ApplyContext {
                desired_policy: &self.policy,
                actual_policy: &self.policy,
                desired: &desired,
                actual: &mut actual,
                store: &self.store,
                drivers: &self.drivers,
                event_log: &self.event_log,
                clock: &self.clock,
            };
            executor.apply(&actions, &mut ctx, cancel).await
        }
    }

    #[tokio::test]
    async fn create_stamps_equal_timestamps_and_calls_driver() {
        let harness = Harness::new(web_policy("dev"), MockDriver::new());
        let stats = harness.run_revision(&Executor::sequential()).await.unwrap();
        assert_eq!(stats.created, 1);

        let actual = harness.store.load_actual().unwrap();
        let instance = actual.instances().values().next().unwrap();
        assert_eq!(instance.created_at, instance.updated_at);
        assert!(instance.created_at.is_some());

        let calls = harness.driver.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].op, "create");
        assert_eq!(calls[0].cluster, "c1");
    }

    #[tokio::test]
    async fn reapply_of_converged_state_is_a_noop() {
        let harness = Harness::new(web_policy("dev"), MockDriver::new());
        harness.run_revision(&Executor::sequential()).await.unwrap();
        let stats = harness.run_revision(&Executor::sequential()).await.unwrap();
        assert_eq!(stats.created, 0);
        assert_eq!(stats.updated, 0);
        assert_eq!(stats.deleted, 0);
        assert_eq!(stats.unchanged, 1);
        // Only the original create hit the driver.
        assert_eq!(harness.driver.calls().len(), 1);
    }

    #[tokio::test]
    async fn update_preserves_created_at_and_advances_updated_at() {
        let mut harness = Harness::new(web_policy("dev"), MockDriver::new());
        harness.run_revision(&Executor::sequential()).await.unwrap();
        let before = harness.store.load_actual().unwrap();
        let created_at = before.instances().values().next().unwrap().created_at;

        harness.clock.advance(ChronoDuration::minutes(10));
        harness.policy = web_policy("prod");
        let stats = harness.run_revision(&Executor::sequential()).await.unwrap();
        assert_eq!(stats.updated, 1);

        let after = harness.store.load_actual().unwrap();
        let instance = after.instances().values().next().unwrap();
        assert_eq!(instance.created_at, created_at);
        assert!(instance.updated_at > created_at);
        assert_eq!(
            instance.code_params.get("image").and_then(ParamValue::as_str),
            Some("web:prod")
        );
    }

    #[tokio::test]
    async fn driver_failure_halts_and_keeps_partial_work() {
        let policy = policy_from_yaml(
            r#"
- kind: cluster
  metadata: {namespace: system, name: c1}
  type: mock
- kind: service
  metadata: {namespace: default, name: alpha}
  components:
    - name: srv
      code:
        kind: mock
        params: {cluster: c1}
- kind: service
  metadata: {namespace: default, name: beta}
  components:
    - name: srv
      code:
        kind: mock
        params: {cluster: c1}
- kind: contract
  metadata: {namespace: default, name: alpha-contract}
  contexts:
    - name: main
      service: alpha
- kind: contract
  metadata: {namespace: default, name: beta-contract}
  contexts:
    - name: main
      service: beta
- kind: dependency
  metadata: {namespace: default, name: d1}
  enabled: true
  user_id: alice
  contract: alpha-contract
  labels: {}
- kind: dependency
  metadata: {namespace: default, name: d2}
  enabled: true
  user_id: bob
  contract: beta-contract
  labels: {}
"#,
        );
        let harness = Harness::new(policy, MockDriver::failing_on("beta"));
        let err = harness
            .run_revision(&Executor::sequential())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Driver { action: "create", .. }));

        // The first create committed; the failing one did not.
        let actual = harness.store.load_actual().unwrap();
        assert_eq!(actual.len(), 1);
        assert!(actual
            .instances()
            .keys()
            .all(|key| key.service == "alpha"));
    }

    #[tokio::test]
    async fn cancellation_stops_dispatch_before_the_first_action() {
        let harness = Harness::new(web_policy("dev"), MockDriver::new());
        let (tx, rx) = watch::channel(true);
        let stats = harness
            .run_revision_cancellable(&Executor::sequential(), Some(rx))
            .await
            .unwrap();
        drop(tx);
        assert!(stats.cancelled);
        assert_eq!(stats.created, 0);
        assert!(harness.store.load_actual().unwrap().is_empty());
    }

    #[tokio::test]
    async fn parallel_apply_converges_independent_instances() {
        let policy = policy_from_yaml(
            r#"
- kind: cluster
  metadata: {namespace: system, name: c1}
  type: mock
- kind: service
  metadata: {namespace: default, name: web}
  components:
    - name: api
      code:
        kind: mock
        params: {cluster: c1}
    - name: worker
      code:
        kind: mock
        params: {cluster: c1}
    - name: cache
      code:
        kind: mock
        params: {cluster: c1}
- kind: contract
  metadata: {namespace: default, name: web-contract}
  contexts:
    - name: main
      service: web
- kind: dependency
  metadata: {namespace: default, name: d1}
  enabled: true
  user_id: alice
  contract: web-contract
  labels: {}
"#,
        );
        let harness = Harness::new(policy, MockDriver::new());
        let stats = harness.run_revision(&Executor::parallel(4)).await.unwrap();
        assert_eq!(stats.created, 3);
        assert_eq!(harness.store.load_actual().unwrap().len(), 3);
        assert_eq!(harness.driver.calls().len(), 3);
    }

    #[tokio::test]
    async fn parallel_apply_respects_parent_before_child() {
        let policy = policy_from_yaml(
            r#"
- kind: cluster
  metadata: {namespace: system, name: c1}
  type: mock
- kind: service
  metadata: {namespace: default, name: app}
  components:
    - name: storage
      service: db
- kind: service
  metadata: {namespace: default, name: db}
  components:
    - name: postgres
      code:
        kind: mock
        params: {cluster: c1}
- kind: contract
  metadata: {namespace: default, name: app-contract}
  contexts:
    - name: main
      service: app
- kind: dependency
  metadata: {namespace: default, name: d1}
  enabled: true
  user_id: alice
  contract: app-contract
  labels: {}
"#,
        );
        let harness = Harness::new(policy, MockDriver::new());
        let stats = harness.run_revision(&Executor::parallel(4)).await.unwrap();
        assert_eq!(stats.created, 2);

        let actual = harness.store.load_actual().unwrap();
        assert_eq!(actual.len(), 2);
        // The parent service-level node committed no later than its child:
        // with both present, created_at ordering suffices under FixedClock.
        assert!(actual
            .instances()
            .values()
            .all(|instance| instance.created_at.is_some()));
    }
}
