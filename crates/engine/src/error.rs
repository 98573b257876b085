//! Errors that prevent a run from starting.
//!
//! Failures *during* a run never surface here; they are contained per node
//! and land in the [`RunReport`](crate::RunReport).

use gantry_core::ResourceKey;
use gantry_graph::ConstructionError;

/// Why the engine refused to start.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The deployment failed structural validation.
    #[error(transparent)]
    Construction(#[from] ConstructionError),
    /// The deployment was already executed once.
    ///
    /// Ports are single-assignment, so a second run would find every write
    /// half already taken.
    #[error("deployment was already executed; ports of `{resource}` are spent")]
    AlreadyExecuted {
        /// First node found without resolvers.
        resource: ResourceKey,
    },
}
