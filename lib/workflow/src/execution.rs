//! Execution state vocabulary.
//!
//! These are the values the traversal engine exposes and records:
//! - `NodeState` / `ExecutionPhase`: per-instance and overall state
//! - `InstanceKey`: a dispatchable unit (array sub-instances carry an index)
//! - `NodeOutcome` / `NodeFailure`: what a finished instance produced
//! - `ExecutionEvent`: accepted transitions, replayable in order

use crate::literal::{Literal, LiteralMap};
use crate::node::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The state of a single node or array sub-instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    /// Waiting for upstream nodes.
    Pending,
    /// Inputs are available; waiting to be dispatched.
    Ready,
    Running,
    Succeeded,
    Failed,
    /// Will never run (branch not taken, upstream skipped, run stopped).
    Skipped,
}

impl NodeState {
    /// Returns true if this is a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        })
    }
}

/// The overall state of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPhase {
    Running,
    /// A node failed; the on-failure policy is winding the run down.
    Failing,
    Succeeded,
    Failed,
    Aborted,
}

impl ExecutionPhase {
    /// Returns true if this is a terminal phase.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Aborted)
    }
}

impl fmt::Display for ExecutionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Running => "running",
            Self::Failing => "failing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        })
    }
}

/// Names a dispatchable unit: a node, or one sub-instance of an array node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceKey {
    pub node_id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
}

impl InstanceKey {
    /// Key of a whole node.
    #[must_use]
    pub fn node(node_id: impl Into<NodeId>) -> Self {
        Self {
            node_id: node_id.into(),
            index: None,
        }
    }

    /// Key of sub-instance `index` of an array node.
    #[must_use]
    pub fn indexed(node_id: impl Into<NodeId>, index: usize) -> Self {
        Self {
            node_id: node_id.into(),
            index: Some(index),
        }
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(index) => write!(f, "{}[{index}]", self.node_id),
            None => write!(f, "{}", self.node_id),
        }
    }
}

/// The result reported for a running instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum NodeOutcome {
    Succeeded { outputs: LiteralMap },
    Failed { message: String },
}

impl NodeOutcome {
    /// A success with the given outputs.
    #[must_use]
    pub fn success(outputs: LiteralMap) -> Self {
        Self::Succeeded { outputs }
    }

    /// A failure with the given message.
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

/// Why a node ended up Failed.
///
/// This is runtime data kept on the node, not an error returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeFailure {
    /// The runner reported a failure.
    Reported { message: String },
    /// A branch with no matching case and an error default.
    Embedded { failed_node_id: NodeId, message: String },
    /// An array node can no longer reach its success threshold.
    ThresholdUnreachable {
        successes: usize,
        failures: usize,
        required: usize,
        total: usize,
    },
    /// Inputs could not be materialized.
    InputResolution { reason: String },
    /// A branch condition could not be evaluated.
    Condition { reason: String },
    /// An approval gate was rejected.
    Rejected { signal_id: String },
}

impl fmt::Display for NodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reported { message } => f.write_str(message),
            Self::Embedded {
                failed_node_id,
                message,
            } => write!(f, "{failed_node_id}: {message}"),
            Self::ThresholdUnreachable {
                successes,
                failures,
                required,
                total,
            } => write!(
                f,
                "{successes} of {total} sub-instances succeeded and {failures} failed; {required} required"
            ),
            Self::InputResolution { reason } => write!(f, "cannot resolve inputs: {reason}"),
            Self::Condition { reason } => write!(f, "cannot evaluate condition: {reason}"),
            Self::Rejected { signal_id } => write!(f, "approval '{signal_id}' was rejected"),
        }
    }
}

/// A state change surfaced by `poll`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDelta {
    pub key: InstanceKey,
    pub state: NodeState,
}

/// Whether a skipped upstream satisfies its downstream nodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipPolicy {
    /// A skipped upstream skips the node.
    #[default]
    Propagate,
    /// A skipped upstream counts as done; its outputs read as `Literal::None`.
    TreatAsSatisfied,
}

/// An accepted transition, recorded so an execution can be replayed.
///
/// Only caller-driven transitions are recorded; everything else follows
/// deterministically from them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    NodeDispatched {
        key: InstanceKey,
    },
    NodeCompleted {
        key: InstanceKey,
        outcome: NodeOutcome,
    },
    SignalDelivered {
        signal_id: String,
        value: Option<Literal>,
    },
    /// A sleep gate's deadline passed.
    SleepElapsed {
        node_id: NodeId,
    },
    Aborted {
        reason: String,
    },
}
