//! A validated set of nodes, ready for graph analysis and execution.

use indexmap::IndexMap;

use gantry_core::ResourceKey;

use crate::builder::DeploymentBuilder;
use crate::node::Node;

/// An immutable, validated deployment.
///
/// Produced by [`DeploymentBuilder::build`]. Node order is declaration order;
/// the execution order is decided by the dependency graph, not by this map.
#[derive(Debug)]
pub struct Deployment {
    name: String,
    nodes: IndexMap<ResourceKey, Node>,
}

impl Deployment {
    pub(crate) fn new(name: String, nodes: IndexMap<ResourceKey, Node>) -> Self {
        Self { name, nodes }
    }

    /// Starts building a deployment with the given name.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> DeploymentBuilder {
        DeploymentBuilder::new(name)
    }

    /// The deployment's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of nodes, fan-out groups counted as one.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when the deployment holds no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether a node with this key exists.
    #[must_use]
    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.nodes.contains_key(key)
    }

    /// Looks up a node by key.
    #[must_use]
    pub fn get(&self, key: &ResourceKey) -> Option<&Node> {
        self.nodes.get(key)
    }

    /// Iterates nodes in declaration order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Iterates keys in declaration order.
    pub fn keys(&self) -> impl Iterator<Item = &ResourceKey> {
        self.nodes.keys()
    }

    /// Consumes the deployment, yielding its nodes in declaration order.
    #[must_use]
    pub fn into_nodes(self) -> IndexMap<ResourceKey, Node> {
        self.nodes
    }
}
