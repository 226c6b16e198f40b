//! Template validation.
//!
//! Validation runs every check and collects every violation; nothing is
//! short-circuited and nothing is repaired. A template is accepted only
//! when the list comes back empty.

use crate::binding::Binding;
use crate::error::Violation;
use crate::graph::{DependencyKind, WorkflowGraph};
use crate::interface::{InterfaceProvider, TypedInterface};
use crate::node::{Node, NodeId, NodeTarget};
use crate::resolver::{BindingResolver, ResolvedBindings};
use crate::target::GateNode;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Everything the validator looks at.
#[derive(Clone, Copy)]
pub struct ValidationInput<'a> {
    pub nodes: &'a [Node],
    pub interface: &'a TypedInterface,
    pub outputs: &'a [Binding],
    pub failure_node: Option<&'a Node>,
    pub provider: &'a dyn InterfaceProvider,
    /// Ids of records that could not be turned into nodes. They still
    /// count for uniqueness, and references to them are not reported again.
    pub rejected: &'a [NodeId],
}

/// The artifacts of a successful validation.
#[derive(Debug, Clone)]
pub struct Validated {
    pub graph: WorkflowGraph,
    pub bindings: ResolvedBindings,
}

/// Checks structural and semantic invariants of a template.
pub struct GraphValidator;

impl GraphValidator {
    /// Validates the input, returning the dependency graph and resolved
    /// bindings.
    ///
    /// # Errors
    ///
    /// Returns every violation found, in check order.
    pub fn validate(input: &ValidationInput<'_>) -> Result<Validated, Vec<Violation>> {
        let mut violations = Vec::new();

        check_unique_ids(input.nodes, input.rejected, &mut violations);

        let resolution = BindingResolver::new(input.nodes, input.interface, input.provider)
            .with_outputs(input.outputs)
            .with_failure_node(input.failure_node)
            .with_rejected(input.rejected)
            .resolve();
        violations.extend(resolution.violations);

        let mut top_level: HashMap<&NodeId, &Node> = HashMap::new();
        let mut everyone: HashMap<&NodeId, &Node> = HashMap::new();
        for node in input.nodes {
            top_level.entry(node.id()).or_insert(node);
            for d in node.descendants() {
                everyone.entry(d.id()).or_insert(d);
            }
        }

        let mut graph = WorkflowGraph::new();
        for node in input.nodes {
            if !node.id().is_reserved() {
                graph.add_node(node.id().clone());
            }
        }

        let failure_id = input.failure_node.map(Node::id);
        for owner in input.nodes {
            for node in owner.descendants() {
                for upstream in node.upstream_node_ids() {
                    if upstream.is_end() {
                        violations.push(Violation::UnresolvedBinding {
                            node_id: node.id().clone(),
                            reference: format!("upstream '{upstream}'"),
                            reason: "the end node has no successors".to_string(),
                        });
                    } else if upstream.is_start() || top_level.contains_key(upstream) {
                        graph.add_edge(upstream, owner.id(), DependencyKind::Explicit);
                    } else if input.rejected.contains(upstream) {
                        continue;
                    } else if failure_id == Some(upstream) {
                        violations.push(Violation::FailureNodeNotIsolated {
                            node_id: upstream.clone(),
                            reason: format!("node '{}' lists it as upstream", node.id()),
                        });
                    } else {
                        violations.push(Violation::UnresolvedBinding {
                            node_id: node.id().clone(),
                            reference: format!("upstream '{upstream}'"),
                            reason: "no such node".to_string(),
                        });
                    }
                }
            }
        }

        let mut undeclared = HashSet::new();
        for edge in &resolution.edges {
            graph.add_edge(&edge.from, &edge.to, DependencyKind::Data);
            if edge.to.is_end() {
                continue;
            }
            let declared = |id: &NodeId| {
                everyone
                    .get(id)
                    .is_some_and(|n| n.upstream_node_ids().contains(&edge.from))
            };
            if !declared(&edge.to)
                && !declared(&edge.consumer)
                && undeclared.insert((edge.consumer.clone(), edge.from.clone()))
            {
                violations.push(Violation::UndeclaredDependency {
                    node_id: edge.consumer.clone(),
                    upstream: edge.from.clone(),
                });
            }
        }

        graph.attach_frame();

        let cycles = graph.find_cycles();
        let mut tainted = HashSet::new();
        for path in &cycles {
            for id in path {
                tainted.extend(graph.reachable_from(id));
            }
        }
        violations.extend(
            cycles
                .into_iter()
                .map(|path| Violation::CycleDetected { path }),
        );

        let reachable = graph.reachable_from_start();
        let mut reported = HashSet::new();
        for node in input.nodes {
            let id = node.id();
            if id.is_reserved() || reachable.contains(id) || tainted.contains(id) {
                continue;
            }
            if reported.insert(id) {
                violations.push(Violation::UnreachableNode { node_id: id.clone() });
            }
        }

        let mut signals: HashMap<&str, &NodeId> = HashMap::new();
        for node in input.nodes.iter().chain(input.failure_node) {
            for d in node.descendants() {
                check_node(d, &mut signals, &mut violations);
            }
        }

        if let Some(failure) = input.failure_node {
            check_failure_isolation(failure, &everyone, &resolution.failure_edges, &mut violations);
        }

        debug!(
            nodes = input.nodes.len(),
            violations = violations.len(),
            "validated template"
        );
        if violations.is_empty() {
            Ok(Validated {
                graph,
                bindings: resolution.bindings,
            })
        } else {
            Err(violations)
        }
    }
}

fn check_unique_ids(nodes: &[Node], rejected: &[NodeId], violations: &mut Vec<Violation>) {
    let mut seen = HashSet::new();
    let mut reported = HashSet::new();
    let ids = rejected
        .iter()
        .chain(nodes.iter().flat_map(Node::descendants).map(Node::id));
    for id in ids {
        let duplicate = id.is_reserved() || !seen.insert(id);
        if duplicate && reported.insert(id) {
            violations.push(Violation::DuplicateNodeId { node_id: id.clone() });
        }
    }
}

/// Per-node structural checks for branch, array and gate targets.
fn check_node<'a>(node: &'a Node, signals: &mut HashMap<&'a str, &'a NodeId>, violations: &mut Vec<Violation>) {
    match node.target() {
        NodeTarget::Branch(branch) => {
            let blocks: Vec<_> = branch.if_else.blocks().collect();
            if blocks.is_empty() {
                violations.push(Violation::BranchNonExhaustive {
                    node_id: node.id().clone(),
                    reason: "no if blocks".to_string(),
                });
            }
            let always: Vec<&NodeId> = blocks
                .iter()
                .filter(|b| b.condition.static_value() == Some(true))
                .map(|b| b.then_node.id())
                .collect();
            if always.len() > 1 {
                let names: Vec<&str> = always.iter().map(|id| id.as_str()).collect();
                violations.push(Violation::BranchNonExhaustive {
                    node_id: node.id().clone(),
                    reason: format!("cases {} overlap: all are always true", names.join(", ")),
                });
            }
        }
        NodeTarget::Array(array) => {
            if let Some(reason) = array.misconfiguration() {
                violations.push(Violation::ArrayNodeMisconfigured {
                    node_id: node.id().clone(),
                    reason,
                });
            }
        }
        NodeTarget::Gate(gate) => {
            let problem = match gate {
                GateNode::Approve(c) if c.signal_id.is_empty() => Some("signal_id is empty"),
                GateNode::Signal(c) if c.signal_id.is_empty() => Some("signal_id is empty"),
                GateNode::Signal(c) if c.output_variable_name.is_empty() => {
                    Some("output_variable_name is empty")
                }
                _ => None,
            };
            if let Some(reason) = problem {
                violations.push(Violation::GateNodeMisconfigured {
                    node_id: node.id().clone(),
                    reason: reason.to_string(),
                });
            }
            if let Some(signal_id) = gate.signal_id().filter(|s| !s.is_empty())
                && let Some(other) = signals.insert(signal_id, node.id())
            {
                violations.push(Violation::GateNodeMisconfigured {
                    node_id: node.id().clone(),
                    reason: format!("signal '{signal_id}' is already awaited by gate '{other}'"),
                });
            }
        }
        NodeTarget::Task(_) | NodeTarget::Workflow(_) => {}
    }
}

fn check_failure_isolation(
    failure: &Node,
    normal: &HashMap<&NodeId, &Node>,
    failure_edges: &[crate::resolver::DependencyEdge],
    violations: &mut Vec<Violation>,
) {
    let isolated = |reason: String| Violation::FailureNodeNotIsolated {
        node_id: failure.id().clone(),
        reason,
    };

    for node in failure.descendants() {
        if normal.contains_key(node.id()) || node.id().is_reserved() {
            violations.push(isolated(format!("id '{}' clashes with a normal node", node.id())));
        }
        for upstream in node.upstream_node_ids() {
            if upstream.is_start() {
                continue;
            }
            if normal.contains_key(upstream) {
                violations.push(isolated(format!("it declares '{upstream}' as upstream")));
            } else {
                violations.push(Violation::UnresolvedBinding {
                    node_id: node.id().clone(),
                    reference: format!("upstream '{upstream}'"),
                    reason: "no such node".to_string(),
                });
            }
        }
    }

    let mut seen = HashSet::new();
    for edge in failure_edges {
        if seen.insert(&edge.from) {
            violations.push(isolated(format!("it consumes outputs of '{}'", edge.from)));
        }
    }
}
