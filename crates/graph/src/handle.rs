//! Handles returned when specs are added to a builder.
//!
//! Handles are the wiring surface: they hand out clones of a node's ports so
//! later specs can embed them. They carry no execution state.

use std::collections::BTreeMap;

use gantry_core::ResourceKey;

use crate::error::ConstructionError;
use crate::node::{CommandNode, Input, ResourceNode};

/// Grants access to a declared resource's ports.
#[derive(Debug, Clone)]
pub struct ResourceHandle {
    key: ResourceKey,
    outputs: BTreeMap<String, Input>,
}

impl ResourceHandle {
    pub(crate) fn new(node: &ResourceNode) -> Self {
        Self {
            key: node.key.clone(),
            outputs: node.ports.outputs().clone(),
        }
    }

    /// The resource's identity.
    #[must_use]
    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    /// A clone of the named port.
    ///
    /// Asking for an undeclared port is a construction error; the typo
    /// surfaces while the graph is being built, not mid-run.
    pub fn output(&self, name: &str) -> Result<Input, ConstructionError> {
        self.outputs
            .get(name)
            .cloned()
            .ok_or_else(|| ConstructionError::UnknownPort {
                resource: self.key.clone(),
                port: name.to_owned(),
            })
    }
}

/// Grants access to a command step's stdout port.
#[derive(Debug, Clone)]
pub struct CommandHandle {
    key: ResourceKey,
    stdout: Input,
}

impl CommandHandle {
    pub(crate) fn new(node: &CommandNode, stdout: Input) -> Self {
        Self {
            key: node.key.clone(),
            stdout,
        }
    }

    /// The step's identity.
    #[must_use]
    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    /// The step's captured standard output, trailing newline included.
    #[must_use]
    pub fn stdout(&self) -> Input {
        self.stdout.clone()
    }
}

/// Grants access to a fan-out group's `created` port.
#[derive(Debug, Clone)]
pub struct FanOutHandle {
    key: ResourceKey,
    created: Input,
}

impl FanOutHandle {
    pub(crate) fn new(key: ResourceKey, created: Input) -> Self {
        Self { key, created }
    }

    /// The group's identity.
    #[must_use]
    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    /// Resolves to the keys of all created children, in first-seen element
    /// order, once every child exists.
    #[must_use]
    pub fn created(&self) -> Input {
        self.created.clone()
    }
}
