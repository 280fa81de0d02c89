//! Task graph assembly and ordering.
//!
//! A [`Registry`] is turned into a [`Dag`] once per run. Building the graph is
//! where the structural invariants are checked: every dependency has to be a
//! registered task, and no task may depend on itself, directly or through
//! other tasks. When the checks pass, the execution order is computed once and
//! kept for the duration of the run.
//!
//! ## Ordering
//!
//! Any topological order would do, but runs have to be reproducible. Among the
//! tasks which are ready to run at a given moment, the one that was registered
//! first is always picked, so the order only depends on the registry.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use petgraph::Direction;
use petgraph::Graph;
use petgraph::graph::NodeIndex;

use crate::registry::Registry;
use crate::{GraphError, Task, TaskId};

/// A validated task graph with a fixed execution order.
///
/// Edges point from a dependency to the task that depends on it.
#[derive(Debug)]
pub struct Dag {
    pub(crate) graph: Graph<Task, ()>,
    pub(crate) order: Vec<NodeIndex>,
}

impl Dag {
    pub fn new(registry: Registry) -> Result<Self, GraphError> {
        let entries = registry.into_entries();
        let mut graph: Graph<Task, ()> = Graph::with_capacity(entries.len(), entries.len());
        let mut lookup = HashMap::with_capacity(entries.len());

        for entry in &entries {
            let index = graph.add_node(entry.task.clone());
            lookup.insert(entry.task.id().clone(), index);
        }

        for entry in &entries {
            let target = lookup[entry.task.id()];

            for dependency in &entry.dependencies {
                let source = lookup.get(dependency).copied().ok_or_else(|| {
                    GraphError::MissingDependency {
                        task: entry.task.id().clone(),
                        dependency: dependency.clone(),
                    }
                })?;

                graph.add_edge(source, target, ());
            }
        }

        // We run toposort primarily to detect any cycles in the graph.
        petgraph::algo::toposort(&graph, None)
            .map_err(|cycle| GraphError::Cycle(graph[cycle.node_id()].id().clone()))?;

        let order = stable_order(&graph);

        Ok(Self { graph, order })
    }

    /// Task ids in the order they will be executed.
    pub fn order(&self) -> Vec<TaskId> {
        self.order
            .iter()
            .map(|&index| self.graph[index].id().clone())
            .collect()
    }

    /// Direct dependencies of `task`, or `None` when there is no such task.
    pub fn dependencies(&self, task: &str) -> Option<Vec<TaskId>> {
        let index = self
            .graph
            .node_indices()
            .find(|&index| self.graph[index].id() == task)?;

        let mut dependencies: Vec<_> = self
            .graph
            .neighbors_directed(index, Direction::Incoming)
            .collect();

        dependencies.sort();

        Some(
            dependencies
                .into_iter()
                .map(|index| self.graph[index].id().clone())
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }
}

/// Kahn's algorithm, always taking the ready node with the lowest index. Node
/// indices follow registration order. The graph must be acyclic.
fn stable_order(graph: &Graph<Task, ()>) -> Vec<NodeIndex> {
    let mut pending: HashMap<NodeIndex, usize> = graph
        .node_indices()
        .map(|index| {
            let count = graph.neighbors_directed(index, Direction::Incoming).count();
            (index, count)
        })
        .collect();

    let mut ready: BinaryHeap<Reverse<NodeIndex>> = pending
        .iter()
        .filter(|&(_, &count)| count == 0)
        .map(|(&index, _)| Reverse(index))
        .collect();

    let mut order = Vec::with_capacity(graph.node_count());

    while let Some(Reverse(index)) = ready.pop() {
        order.push(index);

        // Parallel edges are counted once per edge on both sides.
        for dependent in graph.neighbors_directed(index, Direction::Outgoing) {
            if let Some(count) = pending.get_mut(&dependent) {
                *count -= 1;
                if *count == 0 {
                    ready.push(Reverse(dependent));
                }
            }
        }
    }

    order
}

impl std::fmt::Display for Dag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "graph LR")?;

        for &index in &self.order {
            let name = self.graph[index].id().as_str().replace('"', "\\\"");
            writeln!(f, "    {}[\"{}\"]", index.index(), name)?;
        }

        for edge in self.graph.raw_edges() {
            writeln!(
                f,
                "    {} --> {}",
                edge.source().index(),
                edge.target().index()
            )?;
        }

        Ok(())
    }
}
