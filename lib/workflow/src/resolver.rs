//! Binding resolution.
//!
//! The resolver turns every binding of every node (embedded nodes included)
//! into a [`Source`], records the data dependencies implied by promises, and
//! checks the references and types it can see statically. Dependencies of an
//! embedded node are attributed to its top-level owner, since only top-level
//! nodes take part in the workflow graph.

use crate::binding::{Binding, BindingData, OutputReference};
use crate::error::Violation;
use crate::interface::{InterfaceProvider, TypedInterface};
use crate::literal::{Literal, LiteralType};
use crate::node::{Node, NodeId, NodeTarget};
use crate::target::{GateNode, WorkflowNode};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Where a bound input value comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    WorkflowInput { var: String },
    Literal(Literal),
    /// An output of a top-level node; `var` is the node's own name, not an alias.
    NodeOutput { node_id: NodeId, var: String },
    Collection(Vec<Source>),
    Map(BTreeMap<String, Source>),
}

impl Source {
    /// Upstream nodes this source reads from.
    #[must_use]
    pub fn node_dependencies(&self) -> Vec<&NodeId> {
        match self {
            Self::WorkflowInput { .. } | Self::Literal(_) => Vec::new(),
            Self::NodeOutput { node_id, .. } => vec![node_id],
            Self::Collection(items) => items.iter().flat_map(Source::node_dependencies).collect(),
            Self::Map(entries) => entries.values().flat_map(Source::node_dependencies).collect(),
        }
    }
}

/// A data dependency created by a promise.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DependencyEdge {
    /// The producing top-level node.
    pub from: NodeId,
    /// The top-level node (or `end-node`) that must wait for `from`.
    pub to: NodeId,
    /// The node whose binding holds the promise; differs from `to` for
    /// embedded nodes.
    pub consumer: NodeId,
}

/// Resolved inputs per node and the resolved workflow outputs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedBindings {
    inputs: HashMap<NodeId, BTreeMap<String, Source>>,
    outputs: BTreeMap<String, Source>,
}

impl ResolvedBindings {
    /// Resolved inputs of a node, keyed by input variable.
    #[must_use]
    pub fn for_node(&self, node_id: &NodeId) -> Option<&BTreeMap<String, Source>> {
        self.inputs.get(node_id)
    }

    /// Resolved workflow outputs, keyed by output variable.
    #[must_use]
    pub fn outputs(&self) -> &BTreeMap<String, Source> {
        &self.outputs
    }
}

/// Result of a resolution pass.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub bindings: ResolvedBindings,
    /// Dependencies between normal nodes, and from normal nodes to `end-node`.
    pub edges: Vec<DependencyEdge>,
    /// Dependencies of the failure node.
    pub failure_edges: Vec<DependencyEdge>,
    pub violations: Vec<Violation>,
}

/// Output types of a node, when statically known.
pub(crate) fn known_outputs(
    node: &Node,
    provider: &dyn InterfaceProvider,
) -> Option<BTreeMap<String, LiteralType>> {
    match node.target() {
        NodeTarget::Task(_) | NodeTarget::Workflow(_) => {
            interface_of(node, provider).map(|i| i.outputs.into_iter().map(|(k, v)| (k, v.ty)).collect())
        }
        NodeTarget::Gate(GateNode::Signal(signal)) => Some(BTreeMap::from([(
            signal.output_variable_name.clone(),
            signal.ty.clone(),
        )])),
        NodeTarget::Gate(GateNode::Approve(_) | GateNode::Sleep(_)) => Some(BTreeMap::new()),
        NodeTarget::Array(array) => known_outputs(array.node(), provider).map(|outputs| {
            outputs
                .into_iter()
                .map(|(k, ty)| (k, LiteralType::collection_of(ty)))
                .collect()
        }),
        NodeTarget::Branch(_) => None,
    }
}

/// Input types a node declares, when statically known.
fn known_inputs(node: &Node, provider: &dyn InterfaceProvider) -> Option<BTreeMap<String, LiteralType>> {
    match node.target() {
        NodeTarget::Task(_) | NodeTarget::Workflow(_) => {
            interface_of(node, provider).map(|i| i.inputs.into_iter().map(|(k, v)| (k, v.ty)).collect())
        }
        NodeTarget::Array(array) => known_inputs(array.node(), provider),
        NodeTarget::Branch(_) | NodeTarget::Gate(_) => None,
    }
}

fn interface_of(node: &Node, provider: &dyn InterfaceProvider) -> Option<TypedInterface> {
    match node.target() {
        NodeTarget::Task(task) => provider.task_interface(&task.reference_id),
        NodeTarget::Workflow(WorkflowNode::LaunchPlan(id)) => provider.launch_plan_interface(id),
        NodeTarget::Workflow(WorkflowNode::SubWorkflow(id)) => provider.workflow_interface(id),
        NodeTarget::Branch(_) | NodeTarget::Gate(_) | NodeTarget::Array(_) => None,
    }
}

/// Resolves the bindings of a template's nodes, failure node and outputs.
pub struct BindingResolver<'a> {
    nodes: &'a [Node],
    interface: &'a TypedInterface,
    outputs: &'a [Binding],
    failure_node: Option<&'a Node>,
    provider: &'a dyn InterfaceProvider,
    rejected: &'a [NodeId],
}

/// Lookup tables shared by one resolution pass.
struct Scope<'a> {
    top_level: HashMap<&'a NodeId, &'a Node>,
    outputs: HashMap<&'a NodeId, Option<BTreeMap<String, LiteralType>>>,
}

/// Who holds a binding, and who its dependencies are attributed to.
struct Consumer<'a> {
    node_id: &'a NodeId,
    owner: &'a NodeId,
    failure: bool,
}

impl<'a> BindingResolver<'a> {
    /// Creates a resolver for the given nodes.
    #[must_use]
    pub fn new(
        nodes: &'a [Node],
        interface: &'a TypedInterface,
        provider: &'a dyn InterfaceProvider,
    ) -> Self {
        Self {
            nodes,
            interface,
            outputs: &[],
            failure_node: None,
            provider,
            rejected: &[],
        }
    }

    /// Sets the workflow output bindings.
    #[must_use]
    pub fn with_outputs(mut self, outputs: &'a [Binding]) -> Self {
        self.outputs = outputs;
        self
    }

    /// Sets the failure node.
    #[must_use]
    pub fn with_failure_node(mut self, failure_node: Option<&'a Node>) -> Self {
        self.failure_node = failure_node;
        self
    }

    /// Sets the ids of records that were dropped before resolution.
    /// References to them resolve to nothing without a violation.
    #[must_use]
    pub fn with_rejected(mut self, rejected: &'a [NodeId]) -> Self {
        self.rejected = rejected;
        self
    }

    /// Runs the resolution pass. Violations are collected, never fatal here.
    #[must_use]
    pub fn resolve(&self) -> Resolution {
        let mut top_level = HashMap::new();
        for node in self.nodes {
            top_level.entry(node.id()).or_insert(node);
        }
        let outputs = top_level
            .iter()
            .map(|(id, node)| (*id, known_outputs(node, self.provider)))
            .collect();
        let scope = Scope { top_level, outputs };

        let mut resolution = Resolution::default();
        for owner in self.nodes {
            self.check_aliases(owner, &scope, &mut resolution);
            for node in owner.descendants() {
                let consumer = Consumer {
                    node_id: node.id(),
                    owner: owner.id(),
                    failure: false,
                };
                self.resolve_node(node, &consumer, &scope, &mut resolution);
            }
        }

        if let Some(failure) = self.failure_node {
            for node in failure.descendants() {
                let consumer = Consumer {
                    node_id: node.id(),
                    owner: failure.id(),
                    failure: true,
                };
                self.resolve_node(node, &consumer, &scope, &mut resolution);
            }
        }

        let end = NodeId::end();
        let consumer = Consumer {
            node_id: &end,
            owner: &end,
            failure: false,
        };
        for binding in self.outputs {
            let expected = match self.interface.output_type(&binding.var) {
                Some(ty) => ty.clone(),
                None => {
                    resolution.violations.push(Violation::UnresolvedBinding {
                        node_id: end.clone(),
                        reference: format!("output '{}'", binding.var),
                        reason: "the workflow interface declares no such output".to_string(),
                    });
                    continue;
                }
            };
            if let Some(source) = self.resolve_typed(
                &binding.var,
                &binding.binding,
                &expected,
                false,
                &consumer,
                &scope,
                &mut resolution,
            ) {
                resolution.bindings.outputs.insert(binding.var.clone(), source);
            }
        }

        debug!(
            edges = resolution.edges.len(),
            violations = resolution.violations.len(),
            "resolved bindings"
        );
        resolution
    }

    fn resolve_node(&self, node: &Node, consumer: &Consumer<'_>, scope: &Scope<'_>, resolution: &mut Resolution) {
        let declared = known_inputs(node, self.provider);
        let fan_out = matches!(node.target(), NodeTarget::Array(_));
        let mut resolved = BTreeMap::new();

        for binding in node.inputs() {
            let source = match &declared {
                Some(inputs) => match inputs.get(&binding.var) {
                    Some(expected) => self.resolve_typed(
                        &binding.var,
                        &binding.binding,
                        expected,
                        fan_out,
                        consumer,
                        scope,
                        resolution,
                    ),
                    None => {
                        resolution.violations.push(Violation::UnresolvedBinding {
                            node_id: node.id().clone(),
                            reference: format!("input '{}'", binding.var),
                            reason: "the target declares no such input".to_string(),
                        });
                        continue;
                    }
                },
                None => self
                    .resolve_data(&binding.binding, consumer, scope, resolution)
                    .map(|(source, _)| source),
            };
            if let Some(source) = source {
                resolved.insert(binding.var.clone(), source);
            }
        }

        if let NodeTarget::Branch(branch) = node.target() {
            for block in branch.if_else.blocks() {
                for var in block.condition.vars() {
                    if !node.inputs().iter().any(|b| b.var == var) {
                        resolution.violations.push(Violation::UnresolvedBinding {
                            node_id: node.id().clone(),
                            reference: format!("input '{var}'"),
                            reason: "a branch condition reads an input the branch does not bind".to_string(),
                        });
                    }
                }
            }
        }

        resolution.bindings.inputs.insert(node.id().clone(), resolved);
    }

    fn resolve_typed(
        &self,
        var: &str,
        data: &BindingData,
        expected: &LiteralType,
        fan_out: bool,
        consumer: &Consumer<'_>,
        scope: &Scope<'_>,
        resolution: &mut Resolution,
    ) -> Option<Source> {
        let (source, found) = self.resolve_data(data, consumer, scope, resolution)?;
        let compatible = match data {
            BindingData::Scalar(literal) => conforms(literal, expected, fan_out),
            _ => found.as_ref().is_none_or(|found| castable(found, expected, fan_out)),
        };
        if !compatible {
            let found = match data {
                BindingData::Scalar(literal) => literal.literal_type(),
                _ => found.unwrap_or(LiteralType::None),
            };
            resolution.violations.push(Violation::IncompatibleBinding {
                node_id: consumer.node_id.clone(),
                var: var.to_string(),
                expected: expected.clone(),
                found,
            });
            return None;
        }
        Some(source)
    }

    /// Resolves binding data to a source and, when known, its type.
    fn resolve_data(
        &self,
        data: &BindingData,
        consumer: &Consumer<'_>,
        scope: &Scope<'_>,
        resolution: &mut Resolution,
    ) -> Option<(Source, Option<LiteralType>)> {
        match data {
            BindingData::Scalar(literal) => Some((Source::Literal(literal.clone()), Some(literal.literal_type()))),
            BindingData::Promise(reference) => self.resolve_promise(reference, consumer, scope, resolution),
            BindingData::Collection(items) => {
                let mut sources = Vec::with_capacity(items.len());
                let mut types = Vec::with_capacity(items.len());
                for item in items {
                    let (source, ty) = self.resolve_data(item, consumer, scope, resolution)?;
                    sources.push(source);
                    types.push(ty);
                }
                let ty = common_type(types).map(LiteralType::collection_of);
                Some((Source::Collection(sources), ty))
            }
            BindingData::Map(entries) => {
                let mut sources = BTreeMap::new();
                let mut types = Vec::with_capacity(entries.len());
                for (key, item) in entries {
                    let (source, ty) = self.resolve_data(item, consumer, scope, resolution)?;
                    sources.insert(key.clone(), source);
                    types.push(ty);
                }
                let ty = common_type(types).map(LiteralType::map_of);
                Some((Source::Map(sources), ty))
            }
        }
    }

    fn resolve_promise(
        &self,
        reference: &OutputReference,
        consumer: &Consumer<'_>,
        scope: &Scope<'_>,
        resolution: &mut Resolution,
    ) -> Option<(Source, Option<LiteralType>)> {
        if reference.is_workflow_input() {
            let Some(ty) = self.interface.input_type(&reference.var) else {
                resolution.violations.push(Violation::UnresolvedBinding {
                    node_id: consumer.node_id.clone(),
                    reference: reference.to_string(),
                    reason: "the workflow interface declares no such input".to_string(),
                });
                return None;
            };
            let source = Source::WorkflowInput {
                var: reference.var.clone(),
            };
            return Some((source, Some(ty.clone())));
        }

        let Some(producer) = scope.top_level.get(&reference.node_id) else {
            if self.rejected.contains(&reference.node_id) {
                return None;
            }
            let violation = match self.failure_node {
                Some(failure) if failure.id() == &reference.node_id => Violation::FailureNodeNotIsolated {
                    node_id: failure.id().clone(),
                    reason: format!("node '{}' consumes its outputs", consumer.node_id),
                },
                _ => Violation::UnresolvedBinding {
                    node_id: consumer.node_id.clone(),
                    reference: reference.to_string(),
                    reason: "no such node".to_string(),
                },
            };
            resolution.violations.push(violation);
            return None;
        };

        let edge = DependencyEdge {
            from: reference.node_id.clone(),
            to: consumer.owner.clone(),
            consumer: consumer.node_id.clone(),
        };
        if consumer.failure {
            resolution.failure_edges.push(edge);
        } else {
            resolution.edges.push(edge);
        }

        let var = producer.unalias(&reference.var).to_string();
        let ty = match scope.outputs.get(&reference.node_id) {
            Some(Some(outputs)) => match outputs.get(&var) {
                Some(ty) => Some(ty.clone()),
                None => {
                    resolution.violations.push(Violation::UnresolvedBinding {
                        node_id: consumer.node_id.clone(),
                        reference: reference.to_string(),
                        reason: format!("node '{}' declares no output '{var}'", reference.node_id),
                    });
                    return None;
                }
            },
            _ => None,
        };
        let source = Source::NodeOutput {
            node_id: reference.node_id.clone(),
            var,
        };
        Some((source, ty))
    }

    fn check_aliases(&self, node: &Node, scope: &Scope<'_>, resolution: &mut Resolution) {
        let Some(Some(outputs)) = scope.outputs.get(node.id()) else {
            return;
        };
        for alias in node.output_aliases() {
            if !outputs.contains_key(&alias.var) {
                resolution.violations.push(Violation::UnresolvedBinding {
                    node_id: node.id().clone(),
                    reference: format!("alias '{}' -> '{}'", alias.var, alias.alias),
                    reason: "the node declares no such output".to_string(),
                });
            }
        }
    }
}

/// Array inputs accept either a collection (split per instance) or a
/// single value (broadcast to every instance).
fn castable(found: &LiteralType, expected: &LiteralType, fan_out: bool) -> bool {
    found.is_castable_to(expected)
        || (fan_out && found.is_castable_to(&LiteralType::collection_of(expected.clone())))
}

fn conforms(literal: &Literal, expected: &LiteralType, fan_out: bool) -> bool {
    literal.conforms_to(expected)
        || (fan_out && literal.conforms_to(&LiteralType::collection_of(expected.clone())))
}

/// The shared element type, when every element's type is known and equal.
fn common_type(types: Vec<Option<LiteralType>>) -> Option<LiteralType> {
    let mut types = types.into_iter();
    let first = types.next()??;
    types.all(|ty| ty.as_ref() == Some(&first)).then_some(first)
}
