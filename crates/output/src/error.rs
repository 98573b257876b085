//! Failure states an output can resolve to.

use gantry_core::ResourceKey;

/// Why an output failed to produce a value.
///
/// Output errors are `Clone` because a failed output is observed by every
/// downstream awaiter, each of which receives its own copy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OutputError {
    /// The resource backing this output failed to create.
    #[error("resource `{resource}` failed: {message}")]
    Provider {
        /// The failing resource.
        resource: ResourceKey,
        /// Provider error rendering.
        message: String,
    },
    /// The command step backing this output failed.
    #[error("command `{resource}` failed: {message}")]
    Command {
        /// The failing command step.
        resource: ResourceKey,
        /// Runner error rendering.
        message: String,
    },
    /// A `map`/`try_map` transform returned an error or panicked.
    #[error("transform failed: {message}")]
    Transform {
        /// The transform's error rendering or panic payload.
        message: String,
    },
    /// An upstream resource failed, so the node owning this output was never
    /// attempted. Carries the root failing key through arbitrarily long
    /// dependency chains.
    #[error("skipped: upstream resource `{resource}` failed")]
    Skipped {
        /// The root cause of the skip.
        resource: ResourceKey,
    },
    /// The run was cancelled before the owning node was attempted.
    #[error("cancelled before `{resource}` was attempted")]
    Cancelled {
        /// The node that was never dispatched.
        resource: ResourceKey,
    },
    /// The resolver for this port was dropped without resolving it.
    ///
    /// Surfacing this instead of hanging means a scheduler defect fails the
    /// run loudly rather than deadlocking awaiters.
    #[error("output port of `{resource}` was dropped unresolved")]
    Dropped {
        /// The port's owning node.
        resource: ResourceKey,
    },
}

impl OutputError {
    /// Builds a transform error from any displayable value.
    pub fn transform(message: impl Into<String>) -> Self {
        Self::Transform {
            message: message.into(),
        }
    }

    /// The error a dependent's ports should fail with when this error was
    /// observed while awaiting an input.
    ///
    /// Direct failures (`Provider`, `Command`) become `Skipped` carrying the
    /// failing key; everything else already names its root cause and
    /// propagates unchanged.
    #[must_use]
    pub fn propagated(&self) -> Self {
        match self {
            Self::Provider { resource, .. } | Self::Command { resource, .. } => Self::Skipped {
                resource: resource.clone(),
            },
            other => other.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> ResourceKey {
        s.parse().unwrap()
    }

    #[test]
    fn provider_failure_propagates_as_skip() {
        let err = OutputError::Provider {
            resource: key("azure:sql:Server::db"),
            message: "quota exceeded".into(),
        };
        assert_eq!(
            err.propagated(),
            OutputError::Skipped {
                resource: key("azure:sql:Server::db"),
            }
        );
    }

    #[test]
    fn skip_keeps_root_cause_across_levels() {
        let root = OutputError::Skipped {
            resource: key("azure:sql:Server::db"),
        };
        // Two more levels of propagation still name the original key.
        assert_eq!(root.propagated().propagated(), root);
    }

    #[test]
    fn transform_propagates_unchanged() {
        let err = OutputError::transform("bad split");
        assert_eq!(err.propagated(), err);
    }
}
