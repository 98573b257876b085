//! The dependency DAG inferred from a deployment.

use std::fmt;

use indexmap::IndexMap;
use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};

use gantry_core::ResourceKey;

use crate::deployment::Deployment;
use crate::error::ConstructionError;

/// Why an edge exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    /// The dependent embeds one of the dependency's outputs.
    Inferred,
    /// The spec named the dependency with `depends_on`.
    Declared,
}

impl fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inferred => f.write_str("inferred"),
            Self::Declared => f.write_str("declared"),
        }
    }
}

/// A validated DAG over a deployment's nodes.
///
/// Edges point from dependency to dependent. At most one edge exists per
/// ordered pair; when a dependency is both embedded and declared, the
/// inferred edge wins since it is recorded first.
#[derive(Debug)]
pub struct DependencyGraph {
    graph: DiGraph<ResourceKey, DependencyKind>,
    indices: IndexMap<ResourceKey, NodeIndex>,
    order: Vec<ResourceKey>,
}

impl DependencyGraph {
    /// Builds and validates the graph for a deployment.
    ///
    /// Errors on self-dependencies, references to keys outside the
    /// deployment, and cycles. A deployment that passes here is executable.
    pub fn from_deployment(deployment: &Deployment) -> Result<Self, ConstructionError> {
        let mut graph = DiGraph::new();
        let mut indices = IndexMap::with_capacity(deployment.len());
        let mut entries = Vec::with_capacity(deployment.len());
        for node in deployment.nodes() {
            let index = graph.add_node(node.key().clone());
            indices.insert(node.key().clone(), index);
            entries.push((index, node));
        }

        for (to, node) in entries {
            for origin in node.input_origins() {
                Self::add_edge(&mut graph, &indices, node.key(), &origin, to, DependencyKind::Inferred)?;
            }
            for dependency in node.depends_on() {
                Self::add_edge(&mut graph, &indices, node.key(), dependency, to, DependencyKind::Declared)?;
            }
        }

        let order = match toposort(&graph, None) {
            Ok(sorted) => sorted.into_iter().map(|ix| graph[ix].clone()).collect(),
            Err(cycle) => {
                return Err(ConstructionError::CycleDetected {
                    resource: graph[cycle.node_id()].clone(),
                });
            }
        };

        Ok(Self {
            graph,
            indices,
            order,
        })
    }

    fn add_edge(
        graph: &mut DiGraph<ResourceKey, DependencyKind>,
        indices: &IndexMap<ResourceKey, NodeIndex>,
        resource: &ResourceKey,
        dependency: &ResourceKey,
        to: NodeIndex,
        kind: DependencyKind,
    ) -> Result<(), ConstructionError> {
        if dependency == resource {
            return Err(ConstructionError::SelfDependency {
                resource: resource.clone(),
            });
        }
        let from = indices.get(dependency).copied().ok_or_else(|| {
            ConstructionError::UnknownDependency {
                resource: resource.clone(),
                dependency: dependency.clone(),
            }
        })?;
        if graph.find_edge(from, to).is_none() {
            graph.add_edge(from, to, kind);
        }
        Ok(())
    }

    /// Keys in a valid creation order.
    #[must_use]
    pub fn topological_order(&self) -> &[ResourceKey] {
        &self.order
    }

    /// Groups keys into waves, where wave `n` depends only on earlier waves.
    ///
    /// Purely presentational; execution is readiness-driven, not
    /// wave-barriered. Within a wave, keys keep declaration order.
    #[must_use]
    pub fn creation_waves(&self) -> Vec<Vec<ResourceKey>> {
        let mut indegree: IndexMap<NodeIndex, usize> = self
            .indices
            .values()
            .map(|&ix| {
                let incoming = self
                    .graph
                    .neighbors_directed(ix, Direction::Incoming)
                    .count();
                (ix, incoming)
            })
            .collect();

        let mut waves = Vec::new();
        loop {
            let ready: Vec<NodeIndex> = indegree
                .iter()
                .filter(|&(_, &degree)| degree == 0)
                .map(|(&ix, _)| ix)
                .collect();
            if ready.is_empty() {
                break;
            }
            for &ix in &ready {
                indegree.shift_remove(&ix);
                for successor in self.graph.neighbors_directed(ix, Direction::Outgoing) {
                    if let Some(degree) = indegree.get_mut(&successor) {
                        *degree = degree.saturating_sub(1);
                    }
                }
            }
            waves.push(ready.into_iter().map(|ix| self.graph[ix].clone()).collect());
        }
        waves
    }

    /// Direct dependencies of `key`, sorted.
    #[must_use]
    pub fn predecessors(&self, key: &ResourceKey) -> Vec<ResourceKey> {
        self.neighbors(key, Direction::Incoming)
    }

    /// Direct dependents of `key`, sorted.
    #[must_use]
    pub fn successors(&self, key: &ResourceKey) -> Vec<ResourceKey> {
        self.neighbors(key, Direction::Outgoing)
    }

    fn neighbors(&self, key: &ResourceKey, direction: Direction) -> Vec<ResourceKey> {
        let Some(&index) = self.indices.get(key) else {
            return Vec::new();
        };
        let mut keys: Vec<ResourceKey> = self
            .graph
            .neighbors_directed(index, direction)
            .map(|ix| self.graph[ix].clone())
            .collect();
        keys.sort_unstable();
        keys
    }

    /// Every edge as `(dependency, dependent, kind)`, sorted.
    #[must_use]
    pub fn edges(&self) -> Vec<(ResourceKey, ResourceKey, DependencyKind)> {
        let mut edges: Vec<_> = self
            .graph
            .edge_indices()
            .filter_map(|edge| {
                let (from, to) = self.graph.edge_endpoints(edge)?;
                Some((self.graph[from].clone(), self.graph[to].clone(), self.graph[edge]))
            })
            .collect();
        edges.sort_unstable();
        edges
    }

    /// Number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of collapsed edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Whether the graph knows this key.
    #[must_use]
    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.indices.contains_key(key)
    }
}
