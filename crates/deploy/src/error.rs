//! Blueprint assembly errors.

use gantry_core::IdentityError;
use gantry_graph::ConstructionError;
use gantry_secrets::SecretsError;

/// Errors raised while assembling the deployment blueprint.
///
/// All of these surface before the engine runs anything, so a bad
/// configuration never creates half an environment.
#[derive(Debug, thiserror::Error)]
pub enum BlueprintError {
    /// A configured name is not a valid resource name.
    #[error(transparent)]
    Identity(#[from] IdentityError),
    /// The declared graph was rejected (duplicate key, unknown dependency, cycle).
    #[error(transparent)]
    Construction(#[from] ConstructionError),
    /// Generating or signing a secret failed.
    #[error(transparent)]
    Secrets(#[from] SecretsError),
}
