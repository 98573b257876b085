//! Failures at the provider boundary.

use gantry_core::ResourceKey;

/// A resource creation failure reported by a provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// The provider has no recipe for this resource type.
    #[error("provider does not support resource type `{rtype}`")]
    UnsupportedType {
        /// The unhandled type.
        rtype: String,
    },
    /// A resolved input was missing or had the wrong shape.
    #[error("invalid input `{input}` for `{resource}`: {reason}")]
    InvalidInput {
        /// The resource being created.
        resource: ResourceKey,
        /// The offending input name.
        input: String,
        /// What was wrong with it.
        reason: String,
    },
    /// The creation call itself failed.
    #[error("creating `{resource}` failed: {reason}")]
    CreateFailed {
        /// The resource that could not be created.
        resource: ResourceKey,
        /// The backend's failure rendering.
        reason: String,
    },
}

/// A command step failure.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// The program could not be started at all.
    #[error("failed to spawn `{program}`")]
    Spawn {
        /// The program that would not start.
        program: String,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },
    /// The program ran and exited unsuccessfully.
    #[error("`{program}` exited with {}: {stderr}", exit_text(.code))]
    NonZero {
        /// The failing program.
        program: String,
        /// Exit code; `None` when the process was killed by a signal.
        code: Option<i32>,
        /// A tail of the captured standard error.
        stderr: String,
    },
}

fn exit_text(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "a signal".to_owned(),
    }
}
