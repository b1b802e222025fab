//! Planner - diffs the graph against the last-applied state
//!
//! Every declared node gets a forward entry (create, update or no-op) in
//! topological order, followed by deletes for records that are no longer
//! declared, ordered so a record is deleted before anything it depended on.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{DanglingReason, NodeError};
use crate::graph::{Graph, ResourceNode, topological_order};
use crate::state::{StateRecord, StateSnapshot};
use crate::types::{Action, Input, OutputRef, Urn, Value};

/// Planned value of one input property
#[derive(Debug, Clone, PartialEq)]
pub enum Planned {
    /// The property is removed
    Absent,
    Known(Value),
    /// Output of a node that has not run yet
    Computed,
}

impl Planned {
    /// Whether this planned value differs from `old`
    fn differs_from(&self, old: Option<&Value>) -> bool {
        match self {
            Self::Absent => old.is_some(),
            Self::Known(value) => old != Some(value),
            Self::Computed => true,
        }
    }
}

/// Old and planned value of one property
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub old: Option<Value>,
    pub new: Planned,
}

/// Per-property changes of a plan entry
pub type Diff = BTreeMap<String, Change>;

/// One planned operation
#[derive(Debug, Clone, PartialEq)]
pub struct PlanEntry {
    pub urn: Urn,
    pub type_name: String,
    pub action: Action,
    pub diff: Diff,
    /// Entries that must complete successfully before this one starts
    pub waits_on: BTreeSet<Urn>,
}

impl PlanEntry {
    /// Whether the update is tentative and may turn into a no-op at run time
    pub fn is_tentative(&self) -> bool {
        self.action == Action::Update
            && self.diff.values().all(|c| c.new == Planned::Computed)
    }
}

/// Ordered plan for one apply
#[derive(Debug, Clone, Default)]
pub struct Plan {
    entries: Vec<PlanEntry>,
    invalid: BTreeMap<Urn, NodeError>,
}

impl Plan {
    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries
    }

    pub fn get(&self, urn: &Urn) -> Option<&PlanEntry> {
        self.entries.iter().find(|e| &e.urn == urn)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries that will fail without running, with their error
    pub fn invalid(&self) -> &BTreeMap<Urn, NodeError> {
        &self.invalid
    }

    pub fn error_for(&self, urn: &Urn) -> Option<&NodeError> {
        self.invalid.get(urn)
    }

    /// Whether any entry changes remote state
    pub fn has_changes(&self) -> bool {
        self.entries.iter().any(|e| e.action.is_change())
    }

    /// Number of entries per action
    pub fn count(&self, action: Action) -> usize {
        self.entries.iter().filter(|e| e.action == action).count()
    }
}

/// Compute the plan for `graph` against the `prior` snapshot
pub fn plan(graph: &Graph, prior: &StateSnapshot) -> Plan {
    let mut result = Plan::default();
    let mut actions: BTreeMap<&Urn, Action> = BTreeMap::new();

    for urn in graph.order() {
        let Some(node) = graph.node(urn) else {
            continue;
        };

        if let Some(target) = graph.external_dependencies(urn).next() {
            let reason = if prior.contains(target) {
                DanglingReason::BeingDeleted
            } else {
                DanglingReason::Unknown
            };
            result.invalid.insert(
                urn.clone(),
                NodeError::DanglingReference {
                    target: target.clone(),
                    reason,
                },
            );
        }

        let entry = forward_entry(graph, node, prior, &actions);
        log::trace!("Planned {} for {}", entry.action, entry.urn);
        actions.insert(urn, entry.action);
        result.entries.push(entry);
    }

    result.entries.extend(delete_entries(graph, prior));

    log::debug!(
        "Plan: {} create, {} update, {} delete, {} no-op, {} invalid",
        result.count(Action::Create),
        result.count(Action::Update),
        result.count(Action::Delete),
        result.count(Action::NoOp),
        result.invalid.len()
    );
    result
}

fn forward_entry(
    graph: &Graph,
    node: &ResourceNode,
    prior: &StateSnapshot,
    actions: &BTreeMap<&Urn, Action>,
) -> PlanEntry {
    let planned: BTreeMap<&String, Planned> = node
        .inputs
        .iter()
        .map(|(key, input)| (key, planned_value(input, graph, prior, actions)))
        .collect();

    let (action, diff) = match prior.get(&node.urn) {
        None => {
            let diff = planned
                .into_iter()
                .map(|(key, new)| (key.clone(), Change { old: None, new }))
                .collect();
            (Action::Create, diff)
        }
        Some(record) => {
            let diff = input_diff(record, planned);
            let action = if diff.is_empty() {
                Action::NoOp
            } else {
                Action::Update
            };
            (action, diff)
        }
    };

    PlanEntry {
        urn: node.urn.clone(),
        type_name: node.type_name.clone(),
        action,
        diff,
        waits_on: node
            .dependencies
            .iter()
            .filter(|dep| graph.contains(dep))
            .cloned()
            .collect(),
    }
}

/// Changed properties between the applied inputs and the planned ones
fn input_diff(record: &StateRecord, mut planned: BTreeMap<&String, Planned>) -> Diff {
    let keys: BTreeSet<&String> = record.inputs.keys().chain(planned.keys().copied()).collect();
    keys.into_iter()
        .filter_map(|key| {
            let old = record.inputs.get(key);
            let new = planned.remove(key).unwrap_or(Planned::Absent);
            new.differs_from(old).then(|| {
                (
                    key.clone(),
                    Change {
                        old: old.cloned(),
                        new,
                    },
                )
            })
        })
        .collect()
}

/// Value of an input as far as it is known before anything runs.
///
/// A reference is known only when its owner is declared, stays unchanged and
/// already published the property in a previous apply.
fn planned_value(
    input: &Input,
    graph: &Graph,
    prior: &StateSnapshot,
    actions: &BTreeMap<&Urn, Action>,
) -> Planned {
    match input {
        Input::Literal(value) => Planned::Known(value.clone()),
        Input::Ref(OutputRef { owner, property }) => {
            let unchanged = graph.contains(owner) && actions.get(owner) == Some(&Action::NoOp);
            prior
                .get(owner)
                .filter(|_| unchanged)
                .and_then(|record| record.outputs.get(property))
                .map_or(Planned::Computed, |value| Planned::Known(value.clone()))
        }
    }
}

/// Delete entries for records no longer declared.
///
/// A delete waits on deleted records that depended on it, and on declared
/// nodes whose applied record still depended on it, so references are
/// dropped before their target goes away.
fn delete_entries(graph: &Graph, prior: &StateSnapshot) -> Vec<PlanEntry> {
    let doomed: BTreeMap<&Urn, &StateRecord> = prior
        .records()
        .filter(|record| !graph.contains(&record.urn))
        .map(|record| (&record.urn, record))
        .collect();
    if doomed.is_empty() {
        return Vec::new();
    }

    // Ordering edges: each doomed record -> doomed records that depended on it
    let mut dependents: BTreeMap<Urn, BTreeSet<Urn>> =
        doomed.keys().map(|urn| ((*urn).clone(), BTreeSet::new())).collect();
    for record in doomed.values() {
        for dep in &record.dependencies {
            if let Some(waiting) = dependents.get_mut(dep) {
                waiting.insert(record.urn.clone());
            }
        }
    }

    let order = match topological_order(&dependents) {
        Ok(order) => order,
        Err(cycle) => {
            log::warn!(
                "Recorded dependencies form a cycle, deleting {} records without ordering",
                cycle.len()
            );
            dependents.values_mut().for_each(BTreeSet::clear);
            doomed.keys().map(|urn| (*urn).clone()).collect()
        }
    };

    order
        .into_iter()
        .filter_map(|urn| {
            let record = doomed.get(&urn)?;
            let mut waits_on = dependents.remove(&urn).unwrap_or_default();
            waits_on.extend(
                graph
                    .nodes()
                    .filter(|node| {
                        prior
                            .get(&node.urn)
                            .is_some_and(|r| r.dependencies.contains(&urn))
                    })
                    .map(|node| node.urn.clone()),
            );
            let diff = record
                .inputs
                .iter()
                .map(|(key, value)| {
                    (
                        key.clone(),
                        Change {
                            old: Some(value.clone()),
                            new: Planned::Absent,
                        },
                    )
                })
                .collect();

            Some(PlanEntry {
                urn,
                type_name: record.type_name.clone(),
                action: Action::Delete,
                diff,
                waits_on,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DeclarationContext;
    use crate::types::PropertyMap;
    use serde_json::json;

    const NS: &str = "kubernetes:core/v1:Namespace";
    const DEPLOY: &str = "kubernetes:apps/v1:Deployment";

    fn urn(type_name: &str, name: &str) -> Urn {
        Urn::new("dev", type_name, name)
    }

    fn record(
        urn: &Urn,
        inputs: PropertyMap,
        outputs: PropertyMap,
        dependencies: &[&Urn],
    ) -> StateRecord {
        StateRecord {
            urn: urn.clone(),
            type_name: urn.type_name().to_string(),
            id: format!("id-{}", urn.name()),
            inputs,
            outputs,
            dependencies: dependencies.iter().map(|u| (*u).clone()).collect(),
        }
    }

    /// ns + deployment referencing ns.name
    fn nginx_graph(ns_name: &str) -> Graph {
        let mut ctx = DeclarationContext::new("dev");
        let ns = ctx
            .resource(NS, "nginx-ns")
            .input("name", ns_name)
            .declare()
            .unwrap();
        ctx.resource(DEPLOY, "nginx")
            .input_ref("namespace", ns.output("name"))
            .input("image", "nginx:latest")
            .declare()
            .unwrap();
        Graph::from_context(ctx).unwrap()
    }

    fn nginx_state(ns_name: &str) -> StateSnapshot {
        let ns = urn(NS, "nginx-ns");
        let deploy = urn(DEPLOY, "nginx");
        let mut snapshot = StateSnapshot::default();
        snapshot.insert(record(
            &ns,
            PropertyMap::from([("name".into(), json!(ns_name))]),
            PropertyMap::from([("name".into(), json!(ns_name))]),
            &[],
        ));
        snapshot.insert(record(
            &deploy,
            PropertyMap::from([
                ("namespace".into(), json!(ns_name)),
                ("image".into(), json!("nginx:latest")),
            ]),
            PropertyMap::from([("name".into(), json!("nginx"))]),
            &[&ns],
        ));
        snapshot
    }

    #[test]
    fn test_empty_state_creates_everything_in_order() {
        let plan = plan(&nginx_graph("nginx-ns"), &StateSnapshot::default());

        let actions: Vec<_> = plan.entries().iter().map(|e| (e.urn.name(), e.action)).collect();
        assert_eq!(
            actions,
            vec![("nginx-ns", Action::Create), ("nginx", Action::Create)]
        );
        let deploy = &plan.entries()[1];
        assert_eq!(deploy.diff["namespace"].new, Planned::Computed);
        assert_eq!(
            deploy.diff["image"].new,
            Planned::Known(json!("nginx:latest"))
        );
        assert!(deploy.waits_on.contains(&urn(NS, "nginx-ns")));
    }

    #[test]
    fn test_unchanged_state_is_all_noop() {
        let plan = plan(&nginx_graph("nginx-ns"), &nginx_state("nginx-ns"));
        assert!(!plan.has_changes());
        assert_eq!(plan.count(Action::NoOp), 2);
        assert!(plan.entries().iter().all(|e| e.diff.is_empty()));
    }

    #[test]
    fn test_changed_owner_makes_reference_computed() {
        let plan = plan(&nginx_graph("web"), &nginx_state("nginx-ns"));

        let ns = plan.get(&urn(NS, "nginx-ns")).unwrap();
        assert_eq!(ns.action, Action::Update);
        assert_eq!(ns.diff["name"].old, Some(json!("nginx-ns")));
        assert_eq!(ns.diff["name"].new, Planned::Known(json!("web")));

        let deploy = plan.get(&urn(DEPLOY, "nginx")).unwrap();
        assert_eq!(deploy.action, Action::Update);
        assert!(deploy.is_tentative());
        assert_eq!(deploy.diff.len(), 1);
    }

    #[test]
    fn test_removed_input_is_a_change() {
        let mut ctx = DeclarationContext::new("dev");
        ctx.resource(NS, "nginx-ns").declare().unwrap();
        let graph = Graph::from_context(ctx).unwrap();

        let plan = plan(&graph, &nginx_state("nginx-ns"));
        let ns = plan.get(&urn(NS, "nginx-ns")).unwrap();
        assert_eq!(ns.action, Action::Update);
        assert_eq!(ns.diff["name"].new, Planned::Absent);
    }

    #[test]
    fn test_deletes_follow_forward_entries_dependents_first() {
        let plan = plan(&Graph::empty(), &nginx_state("nginx-ns"));

        let order: Vec<_> = plan.entries().iter().map(|e| e.urn.name()).collect();
        assert_eq!(order, vec!["nginx", "nginx-ns"]);
        assert!(plan.entries().iter().all(|e| e.action == Action::Delete));

        let ns = plan.get(&urn(NS, "nginx-ns")).unwrap();
        assert_eq!(
            ns.waits_on,
            BTreeSet::from([urn(DEPLOY, "nginx")])
        );
        assert_eq!(ns.diff["name"].new, Planned::Absent);
    }

    #[test]
    fn test_delete_waits_on_former_dependent_still_declared() {
        // deployment now uses a literal namespace, the old ns is dropped
        let mut ctx = DeclarationContext::new("dev");
        ctx.resource(DEPLOY, "nginx")
            .input("namespace", "default")
            .input("image", "nginx:latest")
            .declare()
            .unwrap();
        let graph = Graph::from_context(ctx).unwrap();

        let plan = plan(&graph, &nginx_state("nginx-ns"));
        assert!(plan.invalid().is_empty());
        assert_eq!(plan.get(&urn(DEPLOY, "nginx")).unwrap().action, Action::Update);

        let ns = plan.get(&urn(NS, "nginx-ns")).unwrap();
        assert_eq!(ns.action, Action::Delete);
        assert!(ns.waits_on.contains(&urn(DEPLOY, "nginx")));
        assert_eq!(plan.entries().last().unwrap().urn, urn(NS, "nginx-ns"));
    }

    #[test]
    fn test_reference_to_deleted_node_is_dangling() {
        let ns = urn(NS, "nginx-ns");
        let mut ctx = DeclarationContext::new("dev");
        ctx.resource(DEPLOY, "nginx")
            .input_ref("namespace", OutputRef::new(ns.clone(), "name"))
            .input("image", "nginx:latest")
            .declare()
            .unwrap();
        let graph = Graph::from_context(ctx).unwrap();

        let plan = plan(&graph, &nginx_state("nginx-ns"));
        assert_eq!(
            plan.error_for(&urn(DEPLOY, "nginx")),
            Some(&NodeError::DanglingReference {
                target: ns.clone(),
                reason: DanglingReason::BeingDeleted,
            })
        );
        assert_eq!(plan.get(&ns).unwrap().action, Action::Delete);
    }

    #[test]
    fn test_unknown_explicit_dependency_is_dangling() {
        let ghost = urn(NS, "ghost");
        let mut ctx = DeclarationContext::new("dev");
        ctx.resource(NS, "a")
            .depends_on_urn(ghost.clone())
            .declare()
            .unwrap();
        let graph = Graph::from_context(ctx).unwrap();

        let plan = plan(&graph, &StateSnapshot::default());
        assert_eq!(
            plan.error_for(&urn(NS, "a")),
            Some(&NodeError::DanglingReference {
                target: ghost,
                reason: DanglingReason::Unknown,
            })
        );
        assert_eq!(plan.len(), 1);
    }
}
