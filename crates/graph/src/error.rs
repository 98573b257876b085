//! Construction-time validation failures.

use gantry_core::ResourceKey;

/// A defect in the declared graph, detected before any resource is touched.
///
/// Construction errors are always fatal to the run: a graph that fails
/// validation is never partially executed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConstructionError {
    /// The deployment name was empty or whitespace.
    #[error("deployment name must not be empty")]
    EmptyName,
    /// Nothing was declared.
    #[error("deployment contains no resources")]
    EmptyDeployment,
    /// Two specs share a key.
    #[error("duplicate resource key `{key}`")]
    DuplicateResource {
        /// The colliding key.
        key: ResourceKey,
    },
    /// A spec references a resource that is not part of this deployment,
    /// either through `depends_on` or through an embedded output imported
    /// from elsewhere.
    #[error("resource `{resource}` depends on unknown resource `{dependency}`")]
    UnknownDependency {
        /// The referencing spec.
        resource: ResourceKey,
        /// The missing referent.
        dependency: ResourceKey,
    },
    /// A spec depends on itself.
    #[error("resource `{resource}` depends on itself")]
    SelfDependency {
        /// The offending spec.
        resource: ResourceKey,
    },
    /// A handle was asked for a port the spec never declared.
    #[error("resource `{resource}` has no output port `{port}`")]
    UnknownPort {
        /// The queried resource.
        resource: ResourceKey,
        /// The unknown port name.
        port: String,
    },
    /// The declared dependencies form a cycle.
    #[error("dependency cycle detected involving `{resource}`")]
    CycleDetected {
        /// One member of the cycle.
        resource: ResourceKey,
    },
}
