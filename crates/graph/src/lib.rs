#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Gantry Graph
//!
//! Declarative specs and the dependency graph inferred from them.
//!
//! A deployment is assembled once, up front, through [`DeploymentBuilder`]:
//!
//! - [`ResourceSpec`]: one infrastructure object with [`Input`]s and
//!   declared output ports
//! - [`CommandSpec`]: an external command step exposing its stdout as a port
//! - [`FanOutSpec`]: a group that creates one child per element of a
//!   resolved collection
//!
//! Adding a spec returns a handle ([`ResourceHandle`], [`CommandHandle`],
//! [`FanOutHandle`]) whose ports can be embedded into later specs; each
//! embedded output implicitly defines a dependency edge. [`build`]
//! validates the whole graph: duplicates, unknown references, self-loops and
//! cycles are [`ConstructionError`]s raised before any resource is touched.
//!
//! [`DependencyGraph`] exposes the resulting DAG: topological order, creation
//! waves, and per-node neighbours.
//!
//! [`build`]: DeploymentBuilder::build

pub mod builder;
pub mod deployment;
pub mod error;
pub mod graph;
pub mod handle;
pub mod node;
pub mod state;

pub use builder::DeploymentBuilder;
pub use deployment::Deployment;
pub use error::ConstructionError;
pub use graph::{DependencyGraph, DependencyKind};
pub use handle::{CommandHandle, FanOutHandle, ResourceHandle};
pub use node::{
    CREATED_PORT, CommandNode, CommandSpec, Export, FanOutNode, FanOutSpec, Input, Node, Ports,
    ResourceNode, ResourceSpec, STDOUT_PORT, literal,
};
pub use state::NodeState;
