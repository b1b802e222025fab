//! Dependency graph builder
//!
//! Turns declarations into a DAG. An edge `A -> B` exists when A references
//! an output owned by B, or declares an explicit dependency on B. Ordering
//! uses Kahn's algorithm over an ordered ready set, so ties always break by
//! ascending URN and identical declarations give identical graphs.

use std::collections::{BTreeMap, BTreeSet};

use crate::context::{Declaration, DeclarationContext};
use crate::error::{Error, Result};
use crate::output::OutputTable;
use crate::types::{Input, OutputRef, Urn};

/// A declared unit of desired state, frozen once the graph is built
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceNode {
    pub urn: Urn,
    pub type_name: String,
    pub name: String,
    pub inputs: BTreeMap<String, Input>,
    /// Explicit dependencies plus owners of every referenced output
    pub dependencies: BTreeSet<Urn>,
}

impl ResourceNode {
    fn from_declaration(declaration: Declaration) -> Self {
        let mut dependencies = declaration.depends_on;
        dependencies.extend(
            declaration
                .inputs
                .values()
                .filter_map(Input::output_ref)
                .map(|r| r.owner.clone()),
        );

        Self {
            urn: declaration.urn,
            type_name: declaration.type_name,
            name: declaration.name,
            inputs: declaration.inputs,
            dependencies,
        }
    }

    /// Output references among the inputs
    pub fn references(&self) -> impl Iterator<Item = &OutputRef> {
        self.inputs.values().filter_map(Input::output_ref)
    }
}

/// Frozen dependency graph for one apply
#[derive(Debug, Default)]
pub struct Graph {
    nodes: BTreeMap<Urn, ResourceNode>,
    order: Vec<Urn>,
    dependents: BTreeMap<Urn, BTreeSet<Urn>>,
    outputs: OutputTable,
    exports: BTreeMap<String, OutputRef>,
}

impl Graph {
    /// An empty graph; applying it deletes everything in state
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a graph from everything declared in a context
    pub fn from_context(ctx: DeclarationContext<'_>) -> Result<Self> {
        let (declarations, exports) = ctx.into_parts();
        let mut builder = GraphBuilder::new();
        for declaration in declarations {
            builder.add(declaration);
        }
        for (name, output) in exports {
            builder.export(name, output);
        }
        builder.build()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, urn: &Urn) -> bool {
        self.nodes.contains_key(urn)
    }

    pub fn node(&self, urn: &Urn) -> Option<&ResourceNode> {
        self.nodes.get(urn)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ResourceNode> {
        self.nodes.values()
    }

    /// Topological order, dependencies first, ties by ascending URN
    pub fn order(&self) -> &[Urn] {
        &self.order
    }

    /// Nodes in the graph that depend directly on `urn`
    pub fn dependents(&self, urn: &Urn) -> impl Iterator<Item = &Urn> {
        self.dependents.get(urn).into_iter().flatten()
    }

    /// Edge set as (dependent, dependency) pairs within the graph
    pub fn edges(&self) -> BTreeSet<(Urn, Urn)> {
        self.nodes
            .values()
            .flat_map(|node| {
                node.dependencies
                    .iter()
                    .filter(|dep| self.nodes.contains_key(*dep))
                    .map(|dep| (node.urn.clone(), dep.clone()))
            })
            .collect()
    }

    /// Dependencies of `urn` that are not declared in this graph
    pub fn external_dependencies<'a>(&'a self, urn: &Urn) -> impl Iterator<Item = &'a Urn> + 'a {
        self.nodes
            .get(urn)
            .into_iter()
            .flat_map(|node| node.dependencies.iter())
            .filter(|dep| !self.nodes.contains_key(*dep))
    }

    pub fn outputs(&self) -> &OutputTable {
        &self.outputs
    }

    pub fn exports(&self) -> &BTreeMap<String, OutputRef> {
        &self.exports
    }
}

/// Assembles declarations into a [`Graph`]
#[derive(Debug, Default)]
pub struct GraphBuilder {
    declarations: Vec<Declaration>,
    exports: BTreeMap<String, OutputRef>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, declaration: Declaration) -> &mut Self {
        self.declarations.push(declaration);
        self
    }

    pub fn export(&mut self, name: impl Into<String>, output: OutputRef) -> &mut Self {
        self.exports.insert(name.into(), output);
        self
    }

    /// Freeze the declarations into a DAG
    pub fn build(self) -> Result<Graph> {
        let mut nodes = BTreeMap::new();
        for declaration in self.declarations {
            let node = ResourceNode::from_declaration(declaration);
            if nodes.contains_key(&node.urn) {
                return Err(Error::DuplicateResource(node.urn));
            }
            nodes.insert(node.urn.clone(), node);
        }

        let internal: BTreeMap<Urn, BTreeSet<Urn>> = nodes
            .values()
            .map(|node| {
                let deps = node
                    .dependencies
                    .iter()
                    .filter(|dep| nodes.contains_key(*dep))
                    .cloned()
                    .collect();
                (node.urn.clone(), deps)
            })
            .collect();

        let order = topological_order(&internal).map_err(|urns| Error::Cycle { urns })?;

        let mut dependents: BTreeMap<Urn, BTreeSet<Urn>> = BTreeMap::new();
        for (urn, deps) in &internal {
            for dep in deps {
                dependents.entry(dep.clone()).or_default().insert(urn.clone());
            }
        }

        let mut outputs = OutputTable::new();
        for node in nodes.values() {
            for reference in node.references() {
                outputs.register(reference);
            }
        }
        for reference in self.exports.values() {
            outputs.register(reference);
        }

        log::debug!(
            "Built graph with {} nodes and {} edges",
            nodes.len(),
            dependents.values().map(BTreeSet::len).sum::<usize>()
        );

        Ok(Graph {
            nodes,
            order,
            dependents,
            outputs,
            exports: self.exports,
        })
    }
}

/// Kahn's algorithm over `deps` (node -> its dependencies, all keys).
///
/// Returns dependencies-first order with ties broken by ascending URN, or the
/// URNs taking part in a cycle.
pub(crate) fn topological_order(
    deps: &BTreeMap<Urn, BTreeSet<Urn>>,
) -> std::result::Result<Vec<Urn>, Vec<Urn>> {
    let mut remaining: BTreeMap<&Urn, usize> = deps
        .iter()
        .map(|(urn, d)| (urn, d.iter().filter(|x| deps.contains_key(*x)).count()))
        .collect();
    let mut dependents: BTreeMap<&Urn, Vec<&Urn>> = BTreeMap::new();
    for (urn, d) in deps {
        for dep in d.iter().filter(|x| deps.contains_key(*x)) {
            dependents.entry(dep).or_default().push(urn);
        }
    }

    let mut ready: BTreeSet<&Urn> = remaining
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(urn, _)| *urn)
        .collect();
    let mut order = Vec::with_capacity(deps.len());

    while let Some(urn) = ready.pop_first() {
        remaining.remove(urn);
        order.push(urn.clone());
        for dependent in dependents.get(urn).into_iter().flatten() {
            if let Some(count) = remaining.get_mut(dependent) {
                *count -= 1;
                if *count == 0 {
                    ready.insert(dependent);
                }
            }
        }
    }

    if remaining.is_empty() {
        return Ok(order);
    }

    Err(cycle_members(deps, remaining.into_keys().collect()))
}

/// Narrow the nodes Kahn could not order down to the ones on a cycle by
/// peeling off nodes that nothing left depends on.
fn cycle_members(deps: &BTreeMap<Urn, BTreeSet<Urn>>, mut left: BTreeSet<&Urn>) -> Vec<Urn> {
    loop {
        let peel: Vec<&Urn> = left
            .iter()
            .copied()
            .filter(|urn| {
                !left
                    .iter()
                    .any(|other| deps.get(*other).is_some_and(|d| d.contains(*urn)))
            })
            .collect();
        if peel.is_empty() {
            break;
        }
        for urn in peel {
            left.remove(urn);
        }
    }
    left.into_iter().cloned().collect()
}
