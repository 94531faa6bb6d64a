//! Planning: diffing desired against actual state into an ordered action
//! list.

use serde::{Deserialize, Serialize};

use crate::instance::ComponentKey;
use crate::signature::Signature;
use crate::state::{ActualState, DesiredState};
use crate::store::RevisionId;

/// One reconciliation step. The tagged variant replaces any action-class
/// hierarchy: a dispatch table in the executor keys off the tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    Create {
        key: ComponentKey,
    },
    Update {
        key: ComponentKey,
    },
    Delete {
        key: ComponentKey,
        /// The revision whose policy snapshot created the instance being
        /// deleted; drivers may need that original definition.
        derived_from: RevisionId,
    },
    /// Signatures matched; emitted for observability only.
    Noop {
        key: ComponentKey,
    },
}

impl Action {
    pub fn key(&self) -> &ComponentKey {
        match self {
            Action::Create { key }
            | Action::Update { key }
            | Action::Delete { key, .. }
            | Action::Noop { key } => key,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Action::Create { .. } => "create",
            Action::Update { .. } => "update",
            Action::Delete { .. } => "delete",
            Action::Noop { .. } => "noop",
        }
    }

    /// Noop actions change nothing and never contend with anything.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Action::Noop { .. })
    }
}

/// Diff `actual` against `desired`, producing the totally ordered action
/// sequence that reconciles one into the other.
///
/// Creates, updates, and noops come first, in the resolver's emission
/// order (parents before children, components in declared order). All
/// deletes follow, children before parents (reverse key order). The
/// output order is the execution contract: the executor may only reorder
/// actions whose keys have no ancestor relation.
pub fn plan(desired: &DesiredState, actual: &ActualState, derived_from: RevisionId) -> Vec<Action> {
    let mut actions = Vec::new();

    for key in desired.keys_ordered() {
        let Some(want) = desired.get(key) else {
            continue;
        };
        match actual.get(key) {
            None => actions.push(Action::Create { key: key.clone() }),
            Some(have) => {
                if Signature::of(want) != Signature::of(have) {
                    actions.push(Action::Update { key: key.clone() });
                } else {
                    actions.push(Action::Noop { key: key.clone() });
                }
            }
        }
    }

    // BTreeMap iteration is ascending and parents sort before children, so
    // the reverse walk yields children first.
    for key in actual.instances().keys().rev() {
        if !desired.contains(key) {
            actions.push(Action::Delete {
                key: key.clone(),
                derived_from,
            });
        }
    }

    actions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::{ComponentInstance, PathSegment};
    use verge_lang::ParamValue;

    fn key(segments: &[&str], component: &str) -> ComponentKey {
        let mut path = vec![PathSegment::contract(segments[0], "")];
        for segment in &segments[1..] {
            path.push(PathSegment::component(*segment));
        }
        ComponentKey::new("default", "web", path, component)
    }

    fn instance(key: ComponentKey, image: &str) -> ComponentInstance {
        let mut inst = ComponentInstance::new(key);
        inst.caused_by.insert("default/d1".to_string());
        inst.code_params = ParamValue::Map(
            [("image".to_string(), ParamValue::from(image))]
                .into_iter()
                .collect(),
        );
        inst
    }

    fn desired_of(instances: Vec<ComponentInstance>) -> DesiredState {
        let mut desired = DesiredState::new();
        for inst in instances {
            desired.insert(inst);
        }
        desired
    }

    #[test]
    fn fresh_desired_state_is_all_creates_in_order() {
        let parent = key(&["c"], "storage");
        let child = key(&["c", "storage"], "postgres");
        let desired = desired_of(vec![
            instance(parent.clone(), "a"),
            instance(child.clone(), "b"),
        ]);

        let actions = plan(&desired, &ActualState::new(), RevisionId(1));
        assert_eq!(
            actions,
            vec![
                Action::Create { key: parent },
                Action::Create { key: child }
            ]
        );
    }

    #[test]
    fn identical_states_plan_to_noops_only() {
        let desired = desired_of(vec![instance(key(&["c"], "srv"), "a")]);
        let actual: ActualState = desired.instances().values().cloned().collect();

        let actions = plan(&desired, &actual, RevisionId(1));
        assert_eq!(actions.len(), 1);
        assert!(matches!(actions[0], Action::Noop { .. }));
        assert!(actions.iter().all(|a| !a.is_mutation()));
    }

    #[test]
    fn signature_change_plans_an_update() {
        let k = key(&["c"], "srv");
        let desired = desired_of(vec![instance(k.clone(), "web:prod")]);
        let actual: ActualState = [instance(k.clone(), "web:dev")].into_iter().collect();

        let actions = plan(&desired, &actual, RevisionId(1));
        assert_eq!(actions, vec![Action::Update { key: k }]);
    }

    #[test]
    fn vanished_keys_plan_deletes_children_first() {
        let parent = key(&["c"], "storage");
        let child = key(&["c", "storage"], "postgres");
        let actual: ActualState = [
            instance(parent.clone(), "a"),
            instance(child.clone(), "b"),
        ]
        .into_iter()
        .collect();

        let actions = plan(&DesiredState::new(), &actual, RevisionId(7));
        assert_eq!(
            actions,
            vec![
                Action::Delete {
                    key: child,
                    derived_from: RevisionId(7)
                },
                Action::Delete {
                    key: parent,
                    derived_from: RevisionId(7)
                },
            ]
        );
    }

    #[test]
    fn deletes_come_after_creates_and_updates() {
        let kept = key(&["c"], "api");
        let gone = key(&["c"], "db");
        let desired = desired_of(vec![instance(kept.clone(), "a")]);
        let actual: ActualState = [instance(gone.clone(), "b")].into_iter().collect();

        let actions = plan(&desired, &actual, RevisionId(2));
        assert_eq!(actions[0], Action::Create { key: kept });
        assert!(matches!(actions[1], Action::Delete { .. }));
    }

    #[test]
    fn planning_is_deterministic() {
        let desired = desired_of(vec![
            instance(key(&["c"], "a"), "x"),
            instance(key(&["c"], "b"), "y"),
        ]);
        let actual: ActualState = [instance(key(&["c"], "z"), "w")].into_iter().collect();

        let first = plan(&desired, &actual, RevisionId(3));
        let second = plan(&desired, &actual, RevisionId(3));
        assert_eq!(first, second);
    }
}
