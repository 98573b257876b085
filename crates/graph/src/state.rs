//! Per-node lifecycle states.

use serde::{Deserialize, Serialize};

/// Where a single node stands within a run.
///
/// Every node ends in exactly one of the terminal states; a failed run still
/// drives every node to a terminal state before the engine returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    /// Waiting for its dependencies.
    Pending,
    /// Inputs resolved; the provider or command is executing.
    Running,
    /// Created (or executed) successfully.
    Created,
    /// Its own provider call, command, or transform failed.
    Failed,
    /// Never attempted because something upstream failed or the run was
    /// cancelled.
    Skipped,
}

impl NodeState {
    /// Returns `true` once the node can no longer change state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Created | Self::Failed | Self::Skipped)
    }

    /// Returns `true` if the node finished successfully.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Created)
    }
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Created => write!(f, "created"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}
