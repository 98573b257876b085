#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Gantry Engine
//!
//! Executes a validated deployment: one task per node, scheduled purely by
//! the readiness of each node's inputs.
//!
//! - [`Engine`]: owns the provider, the command runner and the run budget
//! - [`RunBudget`]: concurrency cap and timeouts
//! - [`RunReport`]: the terminal state of every node, secrets redacted
//!
//! There is no wave barrier and no retry: a node runs as soon as everything
//! it embeds has resolved, a failed node fails its ports, and every
//! transitive dependent is skipped while unrelated branches keep going.

pub mod budget;
pub mod engine;
pub mod error;
pub mod report;

pub use budget::RunBudget;
pub use engine::Engine;
pub use error::EngineError;
pub use report::{NodeKind, NodeReport, RunFailure, RunReport, RunStatus, SkipCause};
