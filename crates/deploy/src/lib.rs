#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Gantry Deploy
//!
//! The blueprint of one target environment:
//!
//! - [`DeployConfig`]: every name and knob, serde-typed with `dev` defaults
//! - [`assemble`]: declares the resources, command steps and fan-out wiring
//!   as one [`Deployment`](gantry_graph::Deployment) for the engine to run
//! - [`connection_string`]: the exact connection string the application and
//!   the migration step receive
//!
//! The crate declares; it never talks to a provider itself.

pub mod blueprint;
pub mod config;
pub mod connection;
pub mod error;

pub use blueprint::assemble;
pub use config::{
    ArtifactConfig, DeployConfig, MigrationConfig, OperatorConfig, SigningConfig, SqlConfig,
    WebConfig,
};
pub use connection::connection_string;
pub use error::BlueprintError;
