//! The terminal record of a run.
//!
//! Reports are built from redacted previews captured while the run executes;
//! secret port values never reach this module in the clear.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gantry_core::{ResourceKey, RunId};
use gantry_graph::NodeState;

/// How the run as a whole ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every node was created.
    Completed,
    /// At least one node failed; unrelated branches still completed.
    Failed,
    /// The run was cancelled; nothing failed, but some nodes were never
    /// attempted.
    Cancelled,
}

impl RunStatus {
    /// Returns `true` only for a fully successful run.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Why a node was skipped rather than attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipCause {
    /// A resource this node depends on failed.
    DependencyFailed,
    /// A transform wired into this node's inputs failed or panicked.
    TransformFailed,
    /// The run was cancelled before this node was dispatched.
    Cancelled,
    /// An upstream port was dropped unresolved, which surfaces a scheduler
    /// defect loudly instead of hanging.
    PortDropped,
}

impl fmt::Display for SkipCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DependencyFailed => write!(f, "dependency_failed"),
            Self::TransformFailed => write!(f, "transform_failed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::PortDropped => write!(f, "port_dropped"),
        }
    }
}

/// What kind of node a report entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// A declared infrastructure object.
    Resource,
    /// An external command step.
    Command,
    /// A fan-out group.
    FanOut,
    /// A child created by a fan-out group at run time.
    FanOutChild,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resource => write!(f, "resource"),
            Self::Command => write!(f, "command"),
            Self::FanOut => write!(f, "fan_out"),
            Self::FanOutChild => write!(f, "fan_out_child"),
        }
    }
}

/// The terminal state of one node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeReport {
    /// The node's identity.
    pub key: ResourceKey,
    /// What kind of node it was.
    pub kind: NodeKind,
    /// Its terminal state.
    pub state: NodeState,
    /// Dispatch stamp: strictly increasing across the run in the order nodes
    /// started creating. `None` for nodes that never dispatched and for
    /// fan-out groups, which dispatch children instead of themselves.
    pub create_seq: Option<u64>,
    /// Wall time spent from dispatch to terminal state.
    pub elapsed_ms: Option<u64>,
    /// Rendering of the failure, for failed and skipped nodes.
    pub error: Option<String>,
    /// Why the node was skipped, when it was.
    pub skip_cause: Option<SkipCause>,
    /// Redacted previews of the node's output ports. Secret ports appear as
    /// `[secret]`.
    pub outputs: BTreeMap<String, String>,
}

/// The root cause selected for a failed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunFailure {
    /// The earliest node whose own work failed.
    pub resource: ResourceKey,
    /// Rendering of its failure.
    pub error: String,
}

/// Everything a run produced, one entry per node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Unique id of this run.
    pub run_id: RunId,
    /// The deployment's name.
    pub deployment: String,
    /// Terminal status of the run.
    pub status: RunStatus,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the last node reached a terminal state.
    pub finished_at: DateTime<Utc>,
    /// Per-node records, keyed by resource key.
    pub nodes: BTreeMap<ResourceKey, NodeReport>,
    /// Root cause, present when the status is `Failed`.
    pub failure: Option<RunFailure>,
}

impl RunReport {
    /// Returns `true` only for a fully successful run.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Number of nodes in the given terminal state.
    #[must_use]
    pub fn count(&self, state: NodeState) -> usize {
        self.nodes.values().filter(|n| n.state == state).count()
    }

    /// Looks up one node's record.
    #[must_use]
    pub fn node(&self, key: &ResourceKey) -> Option<&NodeReport> {
        self.nodes.get(key)
    }

    /// Node records in narrative order: dispatched nodes by their dispatch
    /// stamp, then never-dispatched nodes by key.
    #[must_use]
    pub fn ordered(&self) -> Vec<&NodeReport> {
        let mut nodes: Vec<&NodeReport> = self.nodes.values().collect();
        nodes.sort_by(|a, b| {
            let sa = a.create_seq.unwrap_or(u64::MAX);
            let sb = b.create_seq.unwrap_or(u64::MAX);
            sa.cmp(&sb).then_with(|| a.key.cmp(&b.key))
        });
        nodes
    }

    /// Renders the report as terminal-friendly text.
    #[must_use]
    pub fn render(&self) -> String {
        let elapsed = self
            .finished_at
            .signed_duration_since(self.started_at)
            .num_milliseconds()
            .max(0);
        let mut out = format!(
            "run {}: deployment `{}` {} in {}\n",
            self.run_id.short(),
            self.deployment,
            self.status,
            format_elapsed(elapsed.unsigned_abs()),
        );
        out.push_str(&format!(
            "  created {}, failed {}, skipped {}\n\n",
            self.count(NodeState::Created),
            self.count(NodeState::Failed),
            self.count(NodeState::Skipped),
        ));

        let key_width = self
            .nodes
            .keys()
            .map(|k| k.to_string().len())
            .max()
            .unwrap_or(0);
        for node in self.ordered() {
            let seq = node
                .create_seq
                .map_or_else(|| "-".to_owned(), |s| s.to_string());
            out.push_str(&format!(
                "  {:<8} {:>4}  {:<key_width$}  {}\n",
                node.state.to_string(),
                seq,
                node.key.to_string(),
                node_detail(node),
            ));
        }

        if let Some(failure) = &self.failure {
            out.push_str(&format!(
                "\n  root cause: `{}` - {}\n",
                failure.resource, failure.error
            ));
        }
        out
    }
}

fn node_detail(node: &NodeReport) -> String {
    match node.state {
        NodeState::Created => {
            if node.outputs.is_empty() {
                String::new()
            } else {
                node.outputs
                    .iter()
                    .map(|(name, value)| format!("{name}={value}"))
                    .collect::<Vec<_>>()
                    .join(", ")
            }
        }
        _ => node.error.clone().unwrap_or_default(),
    }
}

fn format_elapsed(ms: u64) -> String {
    if ms < 1_000 {
        format!("{ms}ms")
    } else {
        format!("{}.{:02}s", ms / 1_000, ms % 1_000 / 10)
    }
}
