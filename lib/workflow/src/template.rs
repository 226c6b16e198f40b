//! Workflow templates.
//!
//! A template is the accepted, immutable form of a workflow definition:
//! nodes, interface, outputs and an optional failure node, together with
//! the dependency graph and resolved bindings computed while validating
//! it. A template that exists has passed validation.

use crate::binding::Binding;
use crate::error::{TemplateError, Violation};
use crate::graph::WorkflowGraph;
use crate::interface::{InterfaceProvider, TypedInterface};
use crate::literal::LiteralMap;
use crate::node::{Node, NodeId};
use crate::record::{NodeRecord, WorkflowTemplateRecord, lower_node};
use crate::resolver::ResolvedBindings;
use crate::validator::{GraphValidator, ValidationInput};
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use skein_core::Identifier;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// What happens to the rest of the workflow when a node fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OnFailurePolicy {
    /// Stop scheduling and skip everything not yet running.
    #[default]
    FailImmediately,
    /// Let every node that can still run finish first. Approve and signal
    /// gates do not hold the run open; they stay waiting until the run
    /// ends Failed, then close as Skipped.
    FailAfterExecutableNodesComplete,
}

/// Coarse scheduling priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityOfServiceTier {
    #[default]
    Undefined,
    High,
    Medium,
    Low,
}

/// Explicit scheduling requirements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QualityOfServiceSpec {
    /// How long the execution may wait in a queue before it must start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queueing_budget: Option<Duration>,
}

/// Scheduling hints for the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityOfService {
    Tier(QualityOfServiceTier),
    Spec(QualityOfServiceSpec),
}

/// Workflow-wide settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_of_service: Option<QualityOfService>,
    #[serde(default)]
    pub on_failure: OnFailurePolicy,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl WorkflowMetadata {
    /// Sets the failure policy.
    #[must_use]
    pub fn with_on_failure(mut self, policy: OnFailurePolicy) -> Self {
        self.on_failure = policy;
        self
    }

    /// Sets the quality of service.
    #[must_use]
    pub fn with_quality_of_service(mut self, qos: QualityOfService) -> Self {
        self.quality_of_service = Some(qos);
        self
    }

    /// Adds a tag.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// Defaults applied to nodes that leave the corresponding field unset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowMetadataDefaults {
    #[serde(default)]
    pub interruptible: bool,
}

/// A validated workflow.
#[derive(Debug, Clone)]
pub struct WorkflowTemplate {
    id: Identifier,
    metadata: WorkflowMetadata,
    interface: TypedInterface,
    nodes: Vec<Node>,
    outputs: Vec<Binding>,
    failure_node: Option<Node>,
    metadata_defaults: WorkflowMetadataDefaults,
    graph: WorkflowGraph,
    bindings: ResolvedBindings,
    index: HashMap<NodeId, usize>,
}

impl WorkflowTemplate {
    /// Starts building a template from typed parts.
    #[must_use]
    pub fn builder(id: Identifier) -> WorkflowTemplateBuilder {
        WorkflowTemplateBuilder {
            id,
            metadata: WorkflowMetadata::default(),
            interface: TypedInterface::default(),
            nodes: Vec::new(),
            outputs: Vec::new(),
            failure_node: None,
            metadata_defaults: WorkflowMetadataDefaults::default(),
        }
    }

    /// Compiles a portable record into a template.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::Invalid`] with every violation found.
    /// Records that cannot be lowered into typed nodes are reported and left
    /// out; the rest of the template is still validated, and references to
    /// the dropped ids are not reported a second time.
    #[instrument(skip(record, provider), fields(template = %record.id))]
    pub fn compile(
        record: WorkflowTemplateRecord,
        provider: &dyn InterfaceProvider,
    ) -> Result<Self, Report<TemplateError>> {
        let mut violations = Vec::new();
        let mut rejected = Vec::new();
        let mut lower = |node: NodeRecord, violations: &mut Vec<Violation>| {
            let id = NodeId::from(node.id.as_str());
            let lowered = lower_node(node, violations);
            if lowered.is_none() && !id.as_str().is_empty() {
                rejected.push(id);
            }
            lowered
        };
        let nodes: Vec<Node> = record
            .nodes
            .into_iter()
            .filter_map(|n| lower(n, &mut violations))
            .collect();
        let failure_node = record.failure_node.and_then(|n| lower(n, &mut violations));
        if !violations.is_empty() {
            warn!(violations = violations.len(), "template record failed to lower");
        }

        let builder = WorkflowTemplateBuilder {
            id: record.id,
            metadata: record.metadata,
            interface: record.interface,
            nodes,
            outputs: record.outputs,
            failure_node,
            metadata_defaults: record.metadata_defaults,
        };
        match builder.assemble(provider, &rejected) {
            Ok(template) if violations.is_empty() => Ok(template),
            Ok(_) => Err(TemplateError::Invalid { violations }.into()),
            Err(more) => {
                violations.extend(more);
                warn!(violations = violations.len(), "template rejected");
                Err(TemplateError::Invalid { violations }.into())
            }
        }
    }

    /// Decodes a JSON record and compiles it.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::Decode`] for malformed JSON, otherwise as
    /// [`WorkflowTemplate::compile`].
    pub fn from_json(bytes: &[u8], provider: &dyn InterfaceProvider) -> Result<Self, Report<TemplateError>> {
        let record: WorkflowTemplateRecord =
            serde_json::from_slice(bytes).map_err(|e| TemplateError::Decode { reason: e.to_string() })?;
        Self::compile(record, provider)
    }

    /// Returns the portable form.
    #[must_use]
    pub fn to_record(&self) -> WorkflowTemplateRecord {
        WorkflowTemplateRecord {
            id: self.id.clone(),
            metadata: self.metadata.clone(),
            interface: self.interface.clone(),
            nodes: self.nodes.iter().cloned().map(NodeRecord::from).collect(),
            outputs: self.outputs.clone(),
            failure_node: self.failure_node.clone().map(NodeRecord::from),
            metadata_defaults: self.metadata_defaults,
        }
    }

    #[must_use]
    pub fn id(&self) -> &Identifier {
        &self.id
    }

    #[must_use]
    pub fn metadata(&self) -> &WorkflowMetadata {
        &self.metadata
    }

    #[must_use]
    pub fn interface(&self) -> &TypedInterface {
        &self.interface
    }

    /// Top-level nodes in declaration order.
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    #[must_use]
    pub fn outputs(&self) -> &[Binding] {
        &self.outputs
    }

    #[must_use]
    pub fn failure_node(&self) -> Option<&Node> {
        self.failure_node.as_ref()
    }

    #[must_use]
    pub fn metadata_defaults(&self) -> WorkflowMetadataDefaults {
        self.metadata_defaults
    }

    /// The dependency graph over top-level nodes.
    #[must_use]
    pub fn graph(&self) -> &WorkflowGraph {
        &self.graph
    }

    /// Resolved bindings of every node and of the workflow outputs.
    #[must_use]
    pub fn bindings(&self) -> &ResolvedBindings {
        &self.bindings
    }

    /// Looks a node up by id: top-level nodes, the failure node, then
    /// embedded nodes.
    #[must_use]
    pub fn node(&self, node_id: &NodeId) -> Option<&Node> {
        if let Some(&i) = self.index.get(node_id) {
            return self.nodes.get(i);
        }
        if let Some(failure) = &self.failure_node
            && failure.id() == node_id
        {
            return Some(failure);
        }
        self.nodes
            .iter()
            .chain(self.failure_node.as_ref())
            .flat_map(Node::descendants)
            .find(|n| n.id() == node_id)
    }

    /// Returns true for top-level nodes.
    #[must_use]
    pub fn is_top_level(&self, node_id: &NodeId) -> bool {
        self.index.contains_key(node_id)
    }

    /// Top-level node ids grouped into batches that may run together.
    #[must_use]
    pub fn execution_order(&self) -> Vec<Vec<NodeId>> {
        // Validation rejects cycles, so batches always exist.
        self.graph.topological_batches().unwrap_or_default()
    }
}

/// Assembles a template from typed parts.
#[derive(Debug, Clone)]
pub struct WorkflowTemplateBuilder {
    id: Identifier,
    metadata: WorkflowMetadata,
    interface: TypedInterface,
    nodes: Vec<Node>,
    outputs: Vec<Binding>,
    failure_node: Option<Node>,
    metadata_defaults: WorkflowMetadataDefaults,
}

impl WorkflowTemplateBuilder {
    #[must_use]
    pub fn with_metadata(mut self, metadata: WorkflowMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    #[must_use]
    pub fn with_interface(mut self, interface: TypedInterface) -> Self {
        self.interface = interface;
        self
    }

    #[must_use]
    pub fn with_node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    #[must_use]
    pub fn with_output(mut self, binding: Binding) -> Self {
        self.outputs.push(binding);
        self
    }

    #[must_use]
    pub fn with_failure_node(mut self, node: Node) -> Self {
        self.failure_node = Some(node);
        self
    }

    #[must_use]
    pub fn with_metadata_defaults(mut self, defaults: WorkflowMetadataDefaults) -> Self {
        self.metadata_defaults = defaults;
        self
    }

    /// Applies metadata defaults, resolves bindings and validates.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::Invalid`] with every violation found.
    #[instrument(skip(self, provider), fields(template = %self.id, nodes = self.nodes.len()))]
    pub fn build(self, provider: &dyn InterfaceProvider) -> Result<WorkflowTemplate, Report<TemplateError>> {
        self.assemble(provider, &[]).map_err(|violations| {
            warn!(violations = violations.len(), "template rejected");
            TemplateError::Invalid { violations }.into()
        })
    }

    fn assemble(
        mut self,
        provider: &dyn InterfaceProvider,
        rejected: &[NodeId],
    ) -> Result<WorkflowTemplate, Vec<Violation>> {
        let interruptible = self.metadata_defaults.interruptible;
        for node in self.nodes.iter_mut().chain(self.failure_node.as_mut()) {
            node.apply_interruptible_default(interruptible);
        }

        let validated = GraphValidator::validate(&ValidationInput {
            nodes: &self.nodes,
            interface: &self.interface,
            outputs: &self.outputs,
            failure_node: self.failure_node.as_ref(),
            provider,
            rejected,
        })?;

        let index = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id().clone(), i))
            .collect();
        debug!("template accepted");
        Ok(WorkflowTemplate {
            id: self.id,
            metadata: self.metadata,
            interface: self.interface,
            nodes: self.nodes,
            outputs: self.outputs,
            failure_node: self.failure_node,
            metadata_defaults: self.metadata_defaults,
            graph: validated.graph,
            bindings: validated.bindings,
            index,
        })
    }
}

/// A launchable binding of a workflow with some inputs fixed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchPlanTemplate {
    pub id: Identifier,
    pub interface: TypedInterface,
    #[serde(default)]
    pub fixed_inputs: LiteralMap,
}

impl LaunchPlanTemplate {
    /// Creates a launch plan exposing the whole interface of a workflow.
    #[must_use]
    pub fn for_workflow(id: Identifier, workflow: &WorkflowTemplate) -> Self {
        Self {
            id,
            interface: workflow.interface().clone(),
            fixed_inputs: LiteralMap::new(),
        }
    }

    /// Fixes an input to a value; callers can no longer bind it.
    #[must_use]
    pub fn with_fixed_input(mut self, var: impl Into<String>, value: impl Into<crate::literal::Literal>) -> Self {
        self.fixed_inputs.insert(var.into(), value.into());
        self
    }

    /// The interface callers see: fixed inputs removed.
    #[must_use]
    pub fn effective_interface(&self) -> TypedInterface {
        let mut interface = self.interface.clone();
        interface
            .inputs
            .retain(|name, _| !self.fixed_inputs.contains_key(name));
        interface
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ViolationKind;
    use crate::interface::{NoInterfaces, StaticInterfaces};
    use crate::literal::LiteralType;
    use crate::node::NodeMetadata;
    use crate::record::GateNodeRecord;
    use crate::target::{ApproveCondition, TaskNode, WorkflowNode};

    fn square_id() -> Identifier {
        Identifier::task("p", "d", "square", "v1")
    }

    fn provider() -> StaticInterfaces {
        StaticInterfaces::new().with_task(
            square_id(),
            TypedInterface::new()
                .with_input("x", LiteralType::Integer)
                .with_output("o0", LiteralType::Integer),
        )
    }

    fn square(id: &str) -> Node {
        Node::new(id, TaskNode::new(square_id())).expect("valid node")
    }

    fn chain() -> WorkflowTemplateBuilder {
        WorkflowTemplate::builder(Identifier::workflow("p", "d", "chain", "v1"))
            .with_interface(
                TypedInterface::new()
                    .with_input("a", LiteralType::Integer)
                    .with_output("result", LiteralType::Integer),
            )
            .with_node(square("n1").with_input(Binding::workflow_input("x", "a")))
            .with_node(
                square("n2")
                    .with_upstream("n1")
                    .with_input(Binding::promise("x", "n1", "o0")),
            )
            .with_output(Binding::promise("result", "n2", "o0"))
    }

    #[test]
    fn builder_accepts_valid_chain() {
        let template = chain().build(&provider()).expect("valid");
        assert_eq!(template.nodes().len(), 2);
        assert_eq!(
            template.execution_order(),
            vec![vec![NodeId::from("n1")], vec![NodeId::from("n2")]]
        );
        assert!(template.is_top_level(&NodeId::from("n2")));
        assert!(template.node(&NodeId::from("n1")).is_some());
    }

    #[test]
    fn violations_are_aggregated_into_report() {
        let err = chain()
            .with_node(square("n1"))
            .with_node(square("n3").with_upstream("ghost"))
            .build(&provider())
            .unwrap_err();
        let kinds: Vec<ViolationKind> = err.current_context().violations().iter().map(Violation::kind).collect();
        assert!(kinds.contains(&ViolationKind::DuplicateNodeId));
        assert!(kinds.contains(&ViolationKind::UnresolvedBinding));
    }

    #[test]
    fn interruptible_default_reaches_every_node() {
        let template = chain()
            .with_metadata_defaults(WorkflowMetadataDefaults { interruptible: true })
            .with_node(
                square("n3")
                    .with_metadata(NodeMetadata::default().with_interruptible(false))
                    .with_input(Binding::literal("x", 1i64)),
            )
            .build(&provider())
            .expect("valid");
        let flags: Vec<Option<bool>> = template
            .nodes()
            .iter()
            .map(|n| n.metadata().interruptible)
            .collect();
        assert_eq!(flags, vec![Some(true), Some(true), Some(false)]);
    }

    #[test]
    fn record_json_roundtrip() {
        let template = chain().build(&provider()).expect("valid");
        let record = template.to_record();
        let bytes = serde_json::to_vec(&record).expect("serialize");
        let again = WorkflowTemplate::from_json(&bytes, &provider()).expect("compiles");
        assert_eq!(again.to_record(), record);
    }

    #[test]
    fn malformed_json_is_a_decode_error() {
        let err = WorkflowTemplate::from_json(b"{not json", &NoInterfaces).unwrap_err();
        assert!(matches!(err.current_context(), TemplateError::Decode { .. }));
    }

    #[test]
    fn record_lowering_failures_are_reported() {
        let mut record = chain().build(&provider()).expect("valid").to_record();
        record.nodes[0].task_node = None;
        let err = WorkflowTemplate::compile(record, &provider()).unwrap_err();
        let kinds: Vec<ViolationKind> = err.current_context().violations().iter().map(Violation::kind).collect();
        assert_eq!(kinds, vec![ViolationKind::InvalidNode]);
    }

    #[test]
    fn lowering_failures_do_not_hide_other_violations() {
        let mut record = chain().build(&provider()).expect("valid").to_record();
        let mut both = record.nodes[0].clone();
        both.id = "both".to_string();
        both.gate_node = Some(GateNodeRecord {
            approve: Some(ApproveCondition {
                signal_id: "go".to_string(),
            }),
            ..GateNodeRecord::default()
        });
        let mut dup = record.nodes[0].clone();
        dup.id = "dup".to_string();
        dup.inputs = vec![Binding::literal("x", 1i64)];
        record.nodes.push(both);
        record.nodes.push(dup.clone());
        record.nodes.push(dup);

        let err = WorkflowTemplate::compile(record, &provider()).unwrap_err();
        let kinds: Vec<ViolationKind> = err.current_context().violations().iter().map(Violation::kind).collect();
        assert_eq!(kinds, vec![ViolationKind::InvalidNode, ViolationKind::DuplicateNodeId]);
    }

    #[test]
    fn dropped_record_id_still_clashes() {
        let mut record = chain().build(&provider()).expect("valid").to_record();
        let mut broken = record.nodes[1].clone();
        broken.task_node = None;
        broken.id = "n1".to_string();
        record.nodes.push(broken);

        let err = WorkflowTemplate::compile(record, &provider()).unwrap_err();
        let kinds: Vec<ViolationKind> = err.current_context().violations().iter().map(Violation::kind).collect();
        assert_eq!(kinds, vec![ViolationKind::InvalidNode, ViolationKind::DuplicateNodeId]);
    }

    #[test]
    fn long_chain_builds() {
        let mut builder = WorkflowTemplate::builder(Identifier::workflow("p", "d", "long", "v1"))
            .with_node(square("n0").with_input(Binding::literal("x", 0i64)));
        for i in 1..10_000 {
            let prev = format!("n{}", i - 1);
            builder = builder.with_node(
                square(&format!("n{i}"))
                    .with_upstream(prev.as_str())
                    .with_input(Binding::promise("x", prev.as_str(), "o0")),
            );
        }
        let template = builder.build(&provider()).expect("valid");
        assert_eq!(template.nodes().len(), 10_000);
        assert_eq!(template.execution_order().len(), 10_000);
    }

    #[test]
    fn on_failure_defaults_to_fail_immediately() {
        let json = serde_json::json!({
            "id": {
                "resource_type": "workflow",
                "project": "p",
                "domain": "d",
                "name": "w",
                "version": "v1"
            }
        });
        let record: WorkflowTemplateRecord = serde_json::from_value(json).expect("decode");
        assert_eq!(record.metadata.on_failure, OnFailurePolicy::FailImmediately);
        assert!(!record.metadata_defaults.interruptible);
    }

    #[test]
    fn launch_plan_hides_fixed_inputs() {
        let workflow = chain().build(&provider()).expect("valid");
        let lp_id = Identifier::launch_plan("p", "d", "chain-lp", "v1");
        let lp = LaunchPlanTemplate::for_workflow(lp_id.clone(), &workflow).with_fixed_input("a", 3i64);
        assert!(lp.effective_interface().inputs.is_empty());

        let provider = provider().with_launch_plan(lp_id.clone(), lp.effective_interface());
        let template = WorkflowTemplate::builder(Identifier::workflow("p", "d", "outer", "v1"))
            .with_node(Node::new("launch", WorkflowNode::LaunchPlan(lp_id)).expect("valid"))
            .build(&provider)
            .expect("valid");
        assert_eq!(template.nodes().len(), 1);
    }
}
