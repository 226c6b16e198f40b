//! Error types for the workflow crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `Violation`: a single structural or semantic defect of a template
//! - `TemplateError`: template acceptance failures (aggregates violations)
//! - `TraversalError`: rejected transitions on a running execution

use crate::execution::{ExecutionPhase, InstanceKey, NodeState};
use crate::literal::LiteralType;
use crate::node::NodeId;
use std::fmt;

/// The category of a [`Violation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ViolationKind {
    InvalidNode,
    DuplicateNodeId,
    UnresolvedBinding,
    UndeclaredDependency,
    IncompatibleBinding,
    CycleDetected,
    UnreachableNode,
    BranchNonExhaustive,
    ArrayNodeMisconfigured,
    GateNodeMisconfigured,
    FailureNodeNotIsolated,
}

/// A structural or semantic defect found while building a template.
///
/// Violations are collected, never short-circuited: a template with several
/// defects reports all of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// A node is malformed on its own (empty id, zero or several targets).
    InvalidNode { node_id: NodeId, reason: String },
    /// Two nodes share an id, or a node uses a reserved id.
    DuplicateNodeId { node_id: NodeId },
    /// A reference points at something that does not exist.
    UnresolvedBinding {
        node_id: NodeId,
        reference: String,
        reason: String,
    },
    /// A binding consumes a node that is not listed as an upstream.
    UndeclaredDependency { node_id: NodeId, upstream: NodeId },
    /// A bound value's type cannot be cast to the declared input type.
    IncompatibleBinding {
        node_id: NodeId,
        var: String,
        expected: LiteralType,
        found: LiteralType,
    },
    /// The dependency graph has a cycle; `path` starts and ends on the same node.
    CycleDetected { path: Vec<NodeId> },
    /// The node cannot be reached from the start node.
    UnreachableNode { node_id: NodeId },
    /// A branch lacks a default, has no cases, or has overlapping static cases.
    BranchNonExhaustive { node_id: NodeId, reason: String },
    ArrayNodeMisconfigured { node_id: NodeId, reason: String },
    GateNodeMisconfigured { node_id: NodeId, reason: String },
    /// The failure node is entangled with the normal graph.
    FailureNodeNotIsolated { node_id: NodeId, reason: String },
}

impl Violation {
    /// Returns the category of this violation.
    #[must_use]
    pub fn kind(&self) -> ViolationKind {
        match self {
            Self::InvalidNode { .. } => ViolationKind::InvalidNode,
            Self::DuplicateNodeId { .. } => ViolationKind::DuplicateNodeId,
            Self::UnresolvedBinding { .. } => ViolationKind::UnresolvedBinding,
            Self::UndeclaredDependency { .. } => ViolationKind::UndeclaredDependency,
            Self::IncompatibleBinding { .. } => ViolationKind::IncompatibleBinding,
            Self::CycleDetected { .. } => ViolationKind::CycleDetected,
            Self::UnreachableNode { .. } => ViolationKind::UnreachableNode,
            Self::BranchNonExhaustive { .. } => ViolationKind::BranchNonExhaustive,
            Self::ArrayNodeMisconfigured { .. } => ViolationKind::ArrayNodeMisconfigured,
            Self::GateNodeMisconfigured { .. } => ViolationKind::GateNodeMisconfigured,
            Self::FailureNodeNotIsolated { .. } => ViolationKind::FailureNodeNotIsolated,
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidNode { node_id, reason } => {
                write!(f, "invalid node '{node_id}': {reason}")
            }
            Self::DuplicateNodeId { node_id } => {
                write!(f, "duplicate or reserved node id '{node_id}'")
            }
            Self::UnresolvedBinding {
                node_id,
                reference,
                reason,
            } => {
                write!(f, "node '{node_id}' references {reference}: {reason}")
            }
            Self::UndeclaredDependency { node_id, upstream } => {
                write!(
                    f,
                    "node '{node_id}' consumes outputs of '{upstream}' without declaring it upstream"
                )
            }
            Self::IncompatibleBinding {
                node_id,
                var,
                expected,
                found,
            } => {
                write!(
                    f,
                    "input '{var}' of node '{node_id}' expects {expected} but is bound to {found}"
                )
            }
            Self::CycleDetected { path } => {
                f.write_str("cycle detected: ")?;
                for (i, id) in path.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" -> ")?;
                    }
                    write!(f, "{id}")?;
                }
                Ok(())
            }
            Self::UnreachableNode { node_id } => {
                write!(f, "node '{node_id}' is unreachable from the start node")
            }
            Self::BranchNonExhaustive { node_id, reason } => {
                write!(f, "branch '{node_id}' is not exhaustive: {reason}")
            }
            Self::ArrayNodeMisconfigured { node_id, reason } => {
                write!(f, "array node '{node_id}' is misconfigured: {reason}")
            }
            Self::GateNodeMisconfigured { node_id, reason } => {
                write!(f, "gate node '{node_id}' is misconfigured: {reason}")
            }
            Self::FailureNodeNotIsolated { node_id, reason } => {
                write!(f, "failure node '{node_id}' is not isolated: {reason}")
            }
        }
    }
}

impl std::error::Error for Violation {}

/// Violations collected while lowering a record.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Violations(pub Vec<Violation>);

impl Violations {
    /// Returns the kinds of the collected violations, in order.
    #[must_use]
    pub fn kinds(&self) -> Vec<ViolationKind> {
        self.0.iter().map(Violation::kind).collect()
    }
}

impl fmt::Display for Violations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{v}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Violations {}

impl From<Violation> for Violations {
    fn from(violation: Violation) -> Self {
        Self(vec![violation])
    }
}

/// Errors from template acceptance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    /// The template violates one or more invariants.
    Invalid { violations: Vec<Violation> },
    /// The portable form could not be decoded.
    Decode { reason: String },
}

impl TemplateError {
    /// Returns the violations, empty for decode errors.
    #[must_use]
    pub fn violations(&self) -> &[Violation] {
        match self {
            Self::Invalid { violations } => violations,
            Self::Decode { .. } => &[],
        }
    }
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid { violations } => {
                write!(f, "template rejected with {} violation(s)", violations.len())?;
                for v in violations {
                    write!(f, "\n  - {v}")?;
                }
                Ok(())
            }
            Self::Decode { reason } => write!(f, "failed to decode template: {reason}"),
        }
    }
}

impl std::error::Error for TemplateError {}

/// Errors from driving an execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraversalError {
    /// No such node or array sub-instance.
    UnknownInstance { key: InstanceKey },
    /// The instance is not in a state that allows the transition.
    InvalidTransition {
        key: InstanceKey,
        from: NodeState,
        to: NodeState,
    },
    /// The instance already finished; its outcome is kept.
    AlreadyTerminal { key: InstanceKey, state: NodeState },
    /// No gate waits on the signal.
    UnknownSignal { signal_id: String },
    /// A signal value does not conform to the gate's declared type.
    SignalTypeMismatch {
        signal_id: String,
        expected: LiteralType,
        found: String,
    },
    /// A workflow input is missing or does not conform to its type.
    MissingInput { var: String, reason: String },
    /// The array node has no free admission slot.
    CapacityExhausted { node_id: NodeId },
    /// The execution reached a final phase.
    ExecutionFinished { phase: ExecutionPhase },
}

impl fmt::Display for TraversalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownInstance { key } => write!(f, "unknown instance {key}"),
            Self::InvalidTransition { key, from, to } => {
                write!(f, "invalid transition for {key}: {from} -> {to}")
            }
            Self::AlreadyTerminal { key, state } => {
                write!(f, "instance {key} is already {state}")
            }
            Self::UnknownSignal { signal_id } => write!(f, "no gate waits on signal '{signal_id}'"),
            Self::SignalTypeMismatch {
                signal_id,
                expected,
                found,
            } => write!(f, "signal '{signal_id}' expects {expected} but got {found}"),
            Self::MissingInput { var, reason } => {
                write!(f, "workflow input '{var}': {reason}")
            }
            Self::CapacityExhausted { node_id } => {
                write!(f, "array node '{node_id}' has no free capacity")
            }
            Self::ExecutionFinished { phase } => write!(f, "execution already {phase}"),
        }
    }
}

impl std::error::Error for TraversalError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn violation_kind_and_display() {
        let v = Violation::CycleDetected {
            path: vec![NodeId::from("a"), NodeId::from("b"), NodeId::from("a")],
        };
        assert_eq!(v.kind(), ViolationKind::CycleDetected);
        assert_eq!(v.to_string(), "cycle detected: a -> b -> a");
    }

    #[test]
    fn template_error_lists_violations() {
        let err = TemplateError::Invalid {
            violations: vec![
                Violation::DuplicateNodeId {
                    node_id: NodeId::from("n1"),
                },
                Violation::UnreachableNode {
                    node_id: NodeId::from("n2"),
                },
            ],
        };
        let text = err.to_string();
        assert!(text.contains("2 violation(s)"));
        assert!(text.contains("'n1'"));
        assert!(text.contains("'n2'"));
        assert_eq!(err.violations().len(), 2);
    }

    #[test]
    fn violations_join() {
        let vs = Violations(vec![
            Violation::InvalidNode {
                node_id: NodeId::from("x"),
                reason: "no target".to_string(),
            },
            Violation::GateNodeMisconfigured {
                node_id: NodeId::from("g"),
                reason: "two conditions".to_string(),
            },
        ]);
        assert_eq!(
            vs.kinds(),
            vec![ViolationKind::InvalidNode, ViolationKind::GateNodeMisconfigured]
        );
        assert!(vs.to_string().contains("; "));
    }

    #[test]
    fn traversal_error_display() {
        let err = TraversalError::AlreadyTerminal {
            key: InstanceKey::indexed("arr", 3),
            state: NodeState::Succeeded,
        };
        assert_eq!(err.to_string(), "instance arr[3] is already succeeded");
    }
}
