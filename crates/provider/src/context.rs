//! Ambient facts shared by every creation in a run.

/// Where resources are being created.
///
/// Passed by reference to every [`Provider::create`](crate::Provider::create)
/// call; the context never changes within a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderContext {
    /// Deployment environment label, e.g. `dev` or `prod`.
    pub environment: String,
    /// Target region, e.g. `westeurope`.
    pub location: String,
}

impl ProviderContext {
    /// Creates a context for one run.
    #[must_use]
    pub fn new(environment: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            location: location.into(),
        }
    }
}
