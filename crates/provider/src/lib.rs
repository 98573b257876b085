#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Gantry Provider
//!
//! The boundary between the engine and the world:
//!
//! - [`Provider`]: creates infrastructure objects from resolved inputs
//! - [`CommandRunner`]: executes external command steps
//! - [`SimProvider`] / [`SimRunner`]: deterministic in-memory backends for
//!   rehearsals and tests
//! - [`ProcessRunner`]: runs real commands through `tokio::process`
//!
//! Providers only ever see fully resolved values; nothing in this crate knows
//! about deferred outputs or the dependency graph.

pub mod command;
pub mod context;
pub mod error;
pub mod provider;
pub mod sim;

pub use command::{CommandOutcome, CommandRequest, CommandRunner, ProcessRunner};
pub use context::ProviderContext;
pub use error::{CommandError, ProviderError};
pub use provider::{CreateRequest, CreatedResource, Provider};
pub use sim::{SIM_OUTBOUND_IPS, SimCommand, SimCreation, SimProvider, SimRunner};
