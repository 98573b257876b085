//! Concurrency and time limits for one run.

use std::time::Duration;

/// How much a run may consume.
///
/// The concurrency cap bounds in-flight provider calls and commands, not
/// waiting tasks; waiting on inputs costs nothing. Timeouts turn a wedged
/// backend into an ordinary node failure instead of a hung run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunBudget {
    /// Maximum concurrent creations and commands.
    pub max_concurrent: usize,
    /// Default per-node timeout; specs can override it individually.
    pub node_timeout: Duration,
    /// Wall-clock ceiling for the whole run. When it expires the run is
    /// cancelled: in-flight work finishes, nothing new is dispatched.
    pub run_timeout: Duration,
}

impl Default for RunBudget {
    fn default() -> Self {
        Self {
            max_concurrent: 8,
            node_timeout: Duration::from_secs(300),
            run_timeout: Duration::from_secs(600),
        }
    }
}

impl RunBudget {
    /// Overrides the concurrency cap; a cap of zero is treated as one.
    #[must_use]
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    /// Overrides the default per-node timeout.
    #[must_use]
    pub fn with_node_timeout(mut self, timeout: Duration) -> Self {
        self.node_timeout = timeout;
        self
    }

    /// Overrides the run ceiling.
    #[must_use]
    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = timeout;
        self
    }
}
