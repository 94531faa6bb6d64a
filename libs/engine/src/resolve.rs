//! Dependency resolution: walking the policy graph into a desired state.
//!
//! Each enabled dependency is processed in `(namespace, id)` order and in
//! isolation: a missing contract, predicate error, template error, or
//! cycle rejects that dependency (recorded in the resolution log) without
//! touching the others. Structural policy errors abort the whole
//! resolution.
//!
//! Resolution is pure: same policy in, byte-identical desired state out.

use verge_eventlog::EventLog;
use verge_lang::{
    Dependency, LabelSet, LangError, ParamValue, Policy, Predicate, RuleEffect, Service, Template,
};

use crate::error::EngineError;
use crate::instance::{ComponentInstance, ComponentKey, PathSegment};
use crate::state::DesiredState;

/// Per-dependency outcome of one resolution pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionOutcome {
    Resolved { context: String, instances: usize },
    Rejected { reason: String },
}

/// One resolution log entry, keyed by the dependency's global id.
#[derive(Debug, Clone)]
pub struct ResolutionEntry {
    pub dependency: String,
    pub outcome: ResolutionOutcome,
}

/// The resolution log returned alongside the desired state.
#[derive(Debug, Default)]
pub struct ResolutionLog {
    entries: Vec<ResolutionEntry>,
}

impl ResolutionLog {
    pub fn entries(&self) -> &[ResolutionEntry] {
        &self.entries
    }

    /// Outcome for a dependency global id (`namespace/id`).
    pub fn outcome(&self, dependency: &str) -> Option<&ResolutionOutcome> {
        self.entries
            .iter()
            .find(|entry| entry.dependency == dependency)
            .map(|entry| &entry.outcome)
    }

    pub fn resolved_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, ResolutionOutcome::Resolved { .. }))
            .count()
    }

    pub fn rejected_count(&self) -> usize {
        self.entries.len() - self.resolved_count()
    }

    fn record(&mut self, dependency: String, outcome: ResolutionOutcome) {
        self.entries.push(ResolutionEntry { dependency, outcome });
    }
}

/// Resolve the policy into a desired state.
pub fn resolve(
    policy: &Policy,
    event_log: &EventLog,
) -> Result<(DesiredState, ResolutionLog), EngineError> {
    let mut desired = DesiredState::new();
    let mut log = ResolutionLog::default();

    for dependency in policy.dependencies().filter(|d| d.enabled) {
        let global_id = dependency.global_id();
        let resolution = match resolve_dependency(policy, dependency) {
            Ok(resolution) => resolution,
            Err(err) if is_dependency_error(&err) => Resolution::Rejected {
                reason: err.to_string(),
                silent: false,
            },
            Err(err) => return Err(err),
        };

        match resolution {
            Resolution::Rejected { reason, silent } => {
                if silent {
                    event_log
                        .scope()
                        .field("dependency", &global_id)
                        .debug("dependency ignored");
                } else {
                    event_log
                        .scope()
                        .field("dependency", &global_id)
                        .field("reason", &reason)
                        .warn("dependency rejected");
                }
                log.record(global_id, ResolutionOutcome::Rejected { reason });
            }
            Resolution::Resolved { context, instances } => {
                match merge(&mut desired, &global_id, instances) {
                    Ok(count) => {
                        event_log
                            .scope()
                            .field("dependency", &global_id)
                            .field("context", &context)
                            .debug("dependency resolved");
                        log.record(
                            global_id,
                            ResolutionOutcome::Resolved {
                                context,
                                instances: count,
                            },
                        );
                    }
                    Err(reason) => {
                        event_log
                            .scope()
                            .field("dependency", &global_id)
                            .field("reason", &reason)
                            .warn("dependency rejected");
                        log.record(global_id, ResolutionOutcome::Rejected { reason });
                    }
                }
            }
        }
    }

    Ok((desired, log))
}

/// Errors that reject one dependency instead of failing the revision.
fn is_dependency_error(err: &EngineError) -> bool {
    match err {
        EngineError::CycleDetected { .. } => true,
        EngineError::Lang(lang) => matches!(
            lang,
            LangError::NotFound { .. }
                | LangError::TemplateEval { .. }
                | LangError::ExpressionParse { .. }
                | LangError::ExpressionEval { .. }
        ),
        _ => false,
    }
}

enum Resolution {
    Resolved {
        context: String,
        instances: Vec<PendingInstance>,
    },
    Rejected {
        reason: String,
        silent: bool,
    },
}

struct PendingInstance {
    key: ComponentKey,
    code_params: ParamValue,
    discovery_params: ParamValue,
}

fn resolve_dependency(
    policy: &Policy,
    dependency: &Dependency,
) -> Result<Resolution, EngineError> {
    let mut labels = dependency.labels.clone();
    labels.set("consumer", dependency.user_id.clone());

    // Rules gate the dependency before any contract traversal. First
    // matching rule decides.
    for rule in policy.rules() {
        let predicate = Predicate::parse(&rule.criteria)?;
        if predicate.evaluate(&labels)? {
            match rule.effect {
                RuleEffect::Allow => break,
                RuleEffect::Deny => {
                    return Ok(Resolution::Rejected {
                        reason: format!("denied by rule '{}'", rule.metadata),
                        silent: false,
                    })
                }
                RuleEffect::Ignore => {
                    return Ok(Resolution::Rejected {
                        reason: format!("ignored by rule '{}'", rule.metadata),
                        silent: true,
                    })
                }
            }
        }
    }

    let contract = policy.get_contract(&dependency.contract, &dependency.metadata.namespace)?;

    // First context whose predicate matches wins.
    let mut selected = None;
    for context in &contract.contexts {
        let matches = match &context.criteria {
            None => true,
            Some(criteria) => Predicate::parse(criteria)?.evaluate(&labels)?,
        };
        if matches {
            selected = Some(context);
            break;
        }
    }
    let Some(context) = selected else {
        return Ok(Resolution::Rejected {
            reason: format!("no matching context in contract '{}'", contract.metadata),
            silent: false,
        });
    };

    let labels = match &context.labels {
        Some(ops) => ops.apply(&labels)?,
        None => labels,
    };
    let allocation = match &context.allocation {
        Some(template) => Template::new(template).evaluate(&labels)?,
        None => String::new(),
    };

    let service = policy.get_service(&context.service, &contract.metadata.namespace)?;

    let mut walker = Walker {
        policy,
        dependency,
        context: &context.name,
        root_namespace: service.metadata.namespace.clone(),
        root_service: service.metadata.name.clone(),
        stack: vec![format!("{}", service.metadata)],
        pending: Vec::new(),
    };
    let path = vec![PathSegment::contract(
        contract.metadata.name.clone(),
        allocation,
    )];
    walker.walk(service, &path, &labels)?;

    Ok(Resolution::Resolved {
        context: context.name.clone(),
        instances: walker.pending,
    })
}

struct Walker<'a> {
    policy: &'a Policy,
    dependency: &'a Dependency,
    context: &'a str,
    root_namespace: String,
    root_service: String,
    stack: Vec<String>,
    pending: Vec<PendingInstance>,
}

impl Walker<'_> {
    /// Depth-first, declaration-order walk of a service's components.
    fn walk(
        &mut self,
        service: &Service,
        path: &[PathSegment],
        labels: &LabelSet,
    ) -> Result<(), EngineError> {
        service.validate()?;

        for component in &service.components {
            let labels = match &component.labels {
                Some(ops) => ops.apply(labels)?,
                None => labels.clone(),
            };
            let key = ComponentKey::new(
                self.root_namespace.clone(),
                self.root_service.clone(),
                path.to_vec(),
                component.name.clone(),
            );
            let discovery_params = match &component.discovery {
                Some(tree) => tree.eval_templates(&labels)?,
                None => ParamValue::empty(),
            };

            if let Some(code) = &component.code {
                let code_params = match &code.params {
                    Some(tree) => tree.eval_templates(&labels)?,
                    None => ParamValue::empty(),
                };
                self.pending.push(PendingInstance {
                    key,
                    code_params,
                    discovery_params,
                });
            } else if let Some(target) = &component.service {
                // Service-level node: no code, no driver call at apply time.
                self.pending.push(PendingInstance {
                    key,
                    code_params: ParamValue::empty(),
                    discovery_params,
                });

                let target_service = self
                    .policy
                    .get_service(target, &service.metadata.namespace)?;
                let target_id = format!("{}", target_service.metadata);
                if self.stack.iter().any(|entry| entry == &target_id) {
                    return Err(EngineError::CycleDetected {
                        dependency: self.dependency.global_id(),
                        service: target_id,
                        context: self.context.to_string(),
                    });
                }

                let mut child_path = path.to_vec();
                child_path.push(PathSegment::component(component.name.clone()));
                self.stack.push(target_id);
                self.walk(target_service, &child_path, &labels)?;
                self.stack.pop();
            }
        }
        Ok(())
    }
}

/// Two-pass merge of one dependency's instances into the desired state:
/// first check every shared key for parameter conflicts, then commit.
/// Returns the number of instances the dependency produced, or the
/// conflict reason.
fn merge(
    desired: &mut DesiredState,
    global_id: &str,
    instances: Vec<PendingInstance>,
) -> Result<usize, String> {
    for pending in &instances {
        if let Some(existing) = desired.get(&pending.key) {
            if existing.code_params != pending.code_params
                || existing.discovery_params != pending.discovery_params
            {
                return Err(format!(
                    "conflicting parameters for shared instance '{}'",
                    pending.key
                ));
            }
        }
    }

    let count = instances.len();
    for pending in instances {
        if let Some(existing) = desired.get_mut(&pending.key) {
            existing.caused_by.insert(global_id.to_string());
        } else {
            let mut instance = ComponentInstance::new(pending.key);
            instance.caused_by.insert(global_id.to_string());
            instance.code_params = pending.code_params;
            instance.discovery_params = pending.discovery_params;
            desired.insert(instance);
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use verge_lang::PolicyObject;

    fn policy_from_yaml(yaml: &str) -> Policy {
        let objects: Vec<PolicyObject> = serde_yaml::from_str(yaml).unwrap();
        let mut policy = Policy::new();
        for obj in objects {
            policy.add_object(obj);
        }
        policy
    }

    fn base_policy() -> Policy {
        policy_from_yaml(
            r#"
- kind: cluster
  metadata: {namespace: system, name: c1}
  type: mock
- kind: service
  metadata: {namespace: default, name: web}
  components:
    - name: srv
      code:
        kind: mock
        params:
          cluster: c1
          image: "web:${env}"
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
  labels: {env: dev}
"#,
        )
    }

    #[test]
    fn single_dependency_resolves_to_one_instance() {
        let (desired, log) = resolve(&base_policy(), &EventLog::new()).unwrap();
        assert_eq!(desired.len(), 1);
        assert_eq!(log.resolved_count(), 1);

        let key = ComponentKey::new(
            "default",
            "web",
            vec![PathSegment::contract("web-contract", "")],
            "srv",
        );
        let instance = desired.get(&key).expect("instance at expected key");
        assert_eq!(
            instance.code_params.get("image").and_then(ParamValue::as_str),
            Some("web:dev")
        );
        assert_eq!(instance.caused_by.len(), 1);
        assert!(instance.caused_by.contains("default/d1"));
        assert!(instance.created_at.is_none());
    }

    #[test]
    fn resolution_is_deterministic() {
        let policy = base_policy();
        let (a, _) = resolve(&policy, &EventLog::new()).unwrap();
        let (b, _) = resolve(&policy, &EventLog::new()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.keys_ordered(), b.keys_ordered());
    }

    #[test]
    fn consumer_label_is_seeded_from_user_id() {
        let mut policy = base_policy();
        policy.add_object(
            serde_yaml::from_str(
                r#"
kind: contract
metadata: {namespace: default, name: web-contract}
contexts:
  - name: alice-only
    criteria: "consumer == 'alice'"
    service: web
"#,
            )
            .unwrap(),
        );
        let (_, log) = resolve(&policy, &EventLog::new()).unwrap();
        assert_eq!(
            log.outcome("default/d1"),
            Some(&ResolutionOutcome::Resolved {
                context: "alice-only".to_string(),
                instances: 1
            })
        );
    }

    #[test]
    fn no_matching_context_rejects_the_dependency() {
        let mut policy = base_policy();
        policy.add_object(
            serde_yaml::from_str(
                r#"
kind: contract
metadata: {namespace: default, name: web-contract}
contexts:
  - name: prod-only
    criteria: "env == 'prod'"
    service: web
"#,
            )
            .unwrap(),
        );
        let (desired, log) = resolve(&policy, &EventLog::new()).unwrap();
        assert!(desired.is_empty());
        assert!(matches!(
            log.outcome("default/d1"),
            Some(ResolutionOutcome::Rejected { .. })
        ));
    }

    #[test]
    fn missing_contract_rejects_only_that_dependency() {
        let mut policy = base_policy();
        policy.add_object(
            serde_yaml::from_str(
                r#"
kind: dependency
metadata: {namespace: default, name: d2}
enabled: true
user_id: bob
contract: nonexistent
labels: {}
"#,
            )
            .unwrap(),
        );
        let (desired, log) = resolve(&policy, &EventLog::new()).unwrap();
        assert_eq!(desired.len(), 1);
        assert_eq!(log.resolved_count(), 1);
        assert_eq!(log.rejected_count(), 1);
    }

    #[test]
    fn disabled_dependencies_are_skipped() {
        let mut policy = base_policy();
        policy.add_object(
            serde_yaml::from_str(
                r#"
kind: dependency
metadata: {namespace: default, name: d1}
enabled: false
user_id: alice
contract: web-contract
labels: {env: dev}
"#,
            )
            .unwrap(),
        );
        let (desired, log) = resolve(&policy, &EventLog::new()).unwrap();
        assert!(desired.is_empty());
        assert!(log.entries().is_empty());
    }

    #[test]
    fn nested_services_produce_parent_and_children() {
        let policy = policy_from_yaml(
            r#"
- kind: cluster
  metadata: {namespace: system, name: c1}
  type: mock
- kind: service
  metadata: {namespace: default, name: app}
  components:
    - name: frontend
      code:
        kind: mock
        params: {cluster: c1}
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
        let (desired, _) = resolve(&policy, &EventLog::new()).unwrap();
        assert_eq!(desired.len(), 3);

        let parent = ComponentKey::new(
            "default",
            "app",
            vec![PathSegment::contract("app-contract", "")],
            "storage",
        );
        let child = ComponentKey::new(
            "default",
            "app",
            vec![
                PathSegment::contract("app-contract", ""),
                PathSegment::component("storage"),
            ],
            "postgres",
        );
        assert!(desired.contains(&parent));
        assert!(desired.contains(&child));
        assert!(parent.is_ancestor_of(&child));

        // Emission order is parent-first, declared order.
        let order = desired.keys_ordered();
        assert_eq!(order[0].component, "frontend");
        assert_eq!(order[1], parent);
        assert_eq!(order[2], child);

        // Service-level node carries no code params.
        assert!(desired.get(&parent).unwrap().code_params.is_empty_map());
    }

    #[test]
    fn cycle_rejects_dependency_but_not_others() {
        let mut policy = base_policy();
        for obj in serde_yaml::from_str::<Vec<PolicyObject>>(
            r#"
- kind: service
  metadata: {namespace: default, name: loop}
  components:
    - name: inner
      service: loop
- kind: contract
  metadata: {namespace: default, name: loop-contract}
  contexts:
    - name: main
      service: loop
- kind: dependency
  metadata: {namespace: default, name: d2}
  enabled: true
  user_id: mallory
  contract: loop-contract
  labels: {}
"#,
        )
        .unwrap()
        {
            policy.add_object(obj);
        }

        let (desired, log) = resolve(&policy, &EventLog::new()).unwrap();
        assert_eq!(desired.len(), 1);
        match log.outcome("default/d2") {
            Some(ResolutionOutcome::Rejected { reason }) => {
                assert!(reason.contains("cycle"), "reason: {reason}");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        // Every desired instance still traces back to the healthy dependency.
        for instance in desired.instances().values() {
            assert!(instance.caused_by.contains("default/d1"));
        }
    }

    #[test]
    fn deny_rule_rejects_matching_dependencies() {
        let mut policy = base_policy();
        policy.add_object(
            serde_yaml::from_str(
                r#"
kind: rule
metadata: {namespace: default, name: no-dev}
criteria: "env == 'dev'"
effect: deny
"#,
            )
            .unwrap(),
        );
        let (desired, log) = resolve(&policy, &EventLog::new()).unwrap();
        assert!(desired.is_empty());
        match log.outcome("default/d1") {
            Some(ResolutionOutcome::Rejected { reason }) => {
                assert!(reason.contains("no-dev"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn allow_rule_short_circuits_later_rules() {
        let mut policy = base_policy();
        policy.add_object(
            serde_yaml::from_str(
                r#"
kind: rule
metadata: {namespace: default, name: a-allow-dev}
criteria: "env == 'dev'"
effect: allow
"#,
            )
            .unwrap(),
        );
        policy.add_object(
            serde_yaml::from_str(
                r#"
kind: rule
metadata: {namespace: default, name: b-deny-all}
criteria: "true"
effect: deny
"#,
            )
            .unwrap(),
        );
        let (desired, _) = resolve(&policy, &EventLog::new()).unwrap();
        assert_eq!(desired.len(), 1);
    }

    #[test]
    fn allocation_key_lands_in_the_path() {
        let mut policy = base_policy();
        policy.add_object(
            serde_yaml::from_str(
                r#"
kind: contract
metadata: {namespace: default, name: web-contract}
contexts:
  - name: per-consumer
    allocation: "${consumer}"
    service: web
"#,
            )
            .unwrap(),
        );
        let (desired, _) = resolve(&policy, &EventLog::new()).unwrap();
        let key = ComponentKey::new(
            "default",
            "web",
            vec![PathSegment::contract("web-contract", "alice")],
            "srv",
        );
        assert!(desired.contains(&key));
    }

    #[test]
    fn shared_instance_accumulates_causing_dependencies() {
        let mut policy = base_policy();
        policy.add_object(
            serde_yaml::from_str(
                r#"
kind: dependency
metadata: {namespace: default, name: d2}
enabled: true
user_id: bob
contract: web-contract
labels: {env: dev}
"#,
            )
            .unwrap(),
        );
        let (desired, _) = resolve(&policy, &EventLog::new()).unwrap();
        assert_eq!(desired.len(), 1);
        let instance = desired.instances().values().next().unwrap();
        assert!(instance.caused_by.contains("default/d1"));
        assert!(instance.caused_by.contains("default/d2"));
    }

    #[test]
    fn conflicting_shared_instance_rejects_the_later_dependency() {
        let mut policy = base_policy();
        // Different env → different code params on the same key.
        policy.add_object(
            serde_yaml::from_str(
                r#"
kind: dependency
metadata: {namespace: default, name: d2}
enabled: true
user_id: bob
contract: web-contract
labels: {env: prod}
"#,
            )
            .unwrap(),
        );
        let (desired, log) = resolve(&policy, &EventLog::new()).unwrap();
        assert_eq!(desired.len(), 1);
        assert!(matches!(
            log.outcome("default/d2"),
            Some(ResolutionOutcome::Rejected { .. })
        ));
        let instance = desired.instances().values().next().unwrap();
        assert_eq!(
            instance.code_params.get("image").and_then(ParamValue::as_str),
            Some("web:dev")
        );
    }
}
