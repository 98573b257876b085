//! Assembles specs into a validated [`Deployment`].

use indexmap::IndexMap;
use indexmap::map::Entry;

use gantry_core::ResourceKey;

use crate::deployment::Deployment;
use crate::error::ConstructionError;
use crate::graph::DependencyGraph;
use crate::handle::{CommandHandle, FanOutHandle, ResourceHandle};
use crate::node::{CommandSpec, FanOutSpec, Node, ResourceSpec};

/// Collects specs and validates them into a [`Deployment`].
///
/// Adding a spec never fails, so wiring code stays linear; problems are
/// collected and the first one is reported by [`build`](Self::build).
#[derive(Debug)]
pub struct DeploymentBuilder {
    name: String,
    nodes: IndexMap<ResourceKey, Node>,
    errors: Vec<ConstructionError>,
}

impl DeploymentBuilder {
    /// Starts an empty deployment with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: IndexMap::new(),
            errors: Vec::new(),
        }
    }

    /// Adds a resource and returns a handle to its declared ports.
    pub fn add_resource(&mut self, spec: ResourceSpec) -> ResourceHandle {
        let node = spec.into_node();
        let handle = ResourceHandle::new(&node);
        self.insert(Node::Resource(node));
        handle
    }

    /// Adds a command step and returns a handle to its stdout.
    pub fn add_command(&mut self, spec: CommandSpec) -> CommandHandle {
        let (node, stdout) = spec.into_node();
        let handle = CommandHandle::new(&node, stdout);
        self.insert(Node::Command(node));
        handle
    }

    /// Adds a fan-out group and returns a handle to its `created` port.
    pub fn add_fan_out(&mut self, spec: FanOutSpec) -> FanOutHandle {
        let (node, created) = spec.into_node();
        let handle = FanOutHandle::new(node.key.clone(), created);
        self.insert(Node::FanOut(node));
        handle
    }

    fn insert(&mut self, node: Node) {
        match self.nodes.entry(node.key().clone()) {
            Entry::Occupied(entry) => {
                self.errors.push(ConstructionError::DuplicateResource {
                    key: entry.key().clone(),
                });
            }
            Entry::Vacant(slot) => {
                slot.insert(node);
            }
        }
    }

    /// Validates everything added so far.
    ///
    /// The first problem wins: an empty name, a duplicate key, then the
    /// structural checks of [`DependencyGraph::from_deployment`] (unknown
    /// references, self-loops and cycles). Nothing has touched a provider at
    /// this point.
    pub fn build(self) -> Result<Deployment, ConstructionError> {
        if self.name.trim().is_empty() {
            return Err(ConstructionError::EmptyName);
        }
        if let Some(error) = self.errors.into_iter().next() {
            return Err(error);
        }
        if self.nodes.is_empty() {
            return Err(ConstructionError::EmptyDeployment);
        }
        let deployment = Deployment::new(self.name, self.nodes);
        DependencyGraph::from_deployment(&deployment)?;
        Ok(deployment)
    }
}
