//! Workflow nodes.
//!
//! Nodes are the building blocks of a workflow graph. Each node has:
//! - An id, unique within the owning template (embedded nodes included)
//! - Execution metadata (timeouts, retries, caching flags)
//! - Input bindings and explicit upstream dependencies
//! - Output aliases
//! - Exactly one target: task, sub-workflow, branch, gate or array

use crate::binding::Binding;
use crate::branch::BranchNode;
use crate::error::Violation;
use crate::record::NodeRecord;
use crate::target::{ArrayNode, GateNode, TaskNode, WorkflowNode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Id of the synthetic node every graph starts from.
pub const START_NODE_ID: &str = "start-node";

/// Id of the synthetic node collecting the workflow outputs.
pub const END_NODE_ID: &str = "end-node";

/// Identifier of a node within a workflow template.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Creates a node id. Emptiness is checked when the node is built.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The synthetic start node.
    #[must_use]
    pub fn start() -> Self {
        Self(START_NODE_ID.to_string())
    }

    /// The synthetic end node.
    #[must_use]
    pub fn end() -> Self {
        Self(END_NODE_ID.to_string())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true for the synthetic start node.
    #[must_use]
    pub fn is_start(&self) -> bool {
        self.0 == START_NODE_ID
    }

    /// Returns true for the synthetic end node.
    #[must_use]
    pub fn is_end(&self) -> bool {
        self.0 == END_NODE_ID
    }

    /// Returns true for either synthetic id.
    #[must_use]
    pub fn is_reserved(&self) -> bool {
        self.is_start() || self.is_end()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&NodeId> for NodeId {
    fn from(id: &NodeId) -> Self {
        id.clone()
    }
}

/// Retry policy for a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryStrategy {
    /// Number of retries after the first attempt.
    pub retries: u32,
}

/// Execution metadata for a node.
///
/// The boolean flags are tri-state: `None` means "not set here", in which
/// case the template's metadata defaults apply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMetadata {
    /// Human-readable name.
    #[serde(default)]
    pub name: String,
    /// Overall timeout for the node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    /// Retry policy.
    #[serde(default)]
    pub retries: RetryStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interruptible: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cacheable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_version: Option<String>,
    /// Whether identical cached executions must be serialized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_serializable: Option<bool>,
}

impl NodeMetadata {
    /// Creates metadata with a name and nothing else set.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Sets the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the retry count.
    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = RetryStrategy { retries };
        self
    }

    /// Sets the interruptible flag.
    #[must_use]
    pub fn with_interruptible(mut self, interruptible: bool) -> Self {
        self.interruptible = Some(interruptible);
        self
    }

    /// Marks the node cacheable under the given version.
    #[must_use]
    pub fn with_cache(mut self, version: impl Into<String>) -> Self {
        self.cacheable = Some(true);
        self.cache_version = Some(version.into());
        self
    }
}

/// Renames an output variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alias {
    /// The node's own output variable.
    pub var: String,
    /// The externally visible name.
    pub alias: String,
}

impl Alias {
    /// Creates a new alias.
    #[must_use]
    pub fn new(var: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            var: var.into(),
            alias: alias.into(),
        }
    }
}

/// The kind of a node's target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Task,
    Workflow,
    Branch,
    Gate,
    Array,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Task => "task",
            Self::Workflow => "workflow",
            Self::Branch => "branch",
            Self::Gate => "gate",
            Self::Array => "array",
        };
        f.write_str(name)
    }
}

/// What a node executes.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeTarget {
    /// Runs a registered task.
    Task(TaskNode),
    /// Runs a launch plan or an embedded sub-workflow.
    Workflow(WorkflowNode),
    /// Selects one of several embedded nodes at runtime.
    Branch(BranchNode),
    /// Waits for an approval, a signal, or a timer.
    Gate(GateNode),
    /// Fans one embedded node out over collection inputs.
    Array(ArrayNode),
}

impl NodeTarget {
    /// Returns the kind of this target.
    #[must_use]
    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Task(_) => NodeKind::Task,
            Self::Workflow(_) => NodeKind::Workflow,
            Self::Branch(_) => NodeKind::Branch,
            Self::Gate(_) => NodeKind::Gate,
            Self::Array(_) => NodeKind::Array,
        }
    }
}

impl From<TaskNode> for NodeTarget {
    fn from(task: TaskNode) -> Self {
        Self::Task(task)
    }
}

impl From<WorkflowNode> for NodeTarget {
    fn from(workflow: WorkflowNode) -> Self {
        Self::Workflow(workflow)
    }
}

impl From<BranchNode> for NodeTarget {
    fn from(branch: BranchNode) -> Self {
        Self::Branch(branch)
    }
}

impl From<GateNode> for NodeTarget {
    fn from(gate: GateNode) -> Self {
        Self::Gate(gate)
    }
}

impl From<ArrayNode> for NodeTarget {
    fn from(array: ArrayNode) -> Self {
        Self::Array(array)
    }
}

/// A workflow node.
///
/// Serializes through [`NodeRecord`], the portable form where every target
/// is an optional field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "NodeRecord", into = "NodeRecord")]
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) metadata: NodeMetadata,
    pub(crate) inputs: Vec<Binding>,
    pub(crate) upstream_node_ids: Vec<NodeId>,
    pub(crate) output_aliases: Vec<Alias>,
    pub(crate) target: NodeTarget,
}

impl Node {
    /// Creates a node with the given target.
    ///
    /// # Errors
    ///
    /// Returns [`Violation::InvalidNode`] if the id is empty.
    pub fn new(id: impl Into<NodeId>, target: impl Into<NodeTarget>) -> Result<Self, Violation> {
        let id = id.into();
        if id.as_str().is_empty() {
            return Err(Violation::InvalidNode {
                node_id: id,
                reason: "node id must not be empty".to_string(),
            });
        }
        Ok(Self {
            id,
            metadata: NodeMetadata::default(),
            inputs: Vec::new(),
            upstream_node_ids: Vec::new(),
            output_aliases: Vec::new(),
            target: target.into(),
        })
    }

    /// Sets the metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: NodeMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Adds an input binding.
    #[must_use]
    pub fn with_input(mut self, binding: Binding) -> Self {
        self.inputs.push(binding);
        self
    }

    /// Adds an explicit upstream dependency.
    #[must_use]
    pub fn with_upstream(mut self, node_id: impl Into<NodeId>) -> Self {
        self.upstream_node_ids.push(node_id.into());
        self
    }

    /// Adds an output alias.
    #[must_use]
    pub fn with_alias(mut self, alias: Alias) -> Self {
        self.output_aliases.push(alias);
        self
    }

    /// Returns the node id.
    #[must_use]
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    /// Returns the execution metadata.
    #[must_use]
    pub fn metadata(&self) -> &NodeMetadata {
        &self.metadata
    }

    /// Returns the input bindings in declaration order.
    #[must_use]
    pub fn inputs(&self) -> &[Binding] {
        &self.inputs
    }

    /// Returns the explicit upstream dependencies.
    #[must_use]
    pub fn upstream_node_ids(&self) -> &[NodeId] {
        &self.upstream_node_ids
    }

    /// Returns the output aliases.
    #[must_use]
    pub fn output_aliases(&self) -> &[Alias] {
        &self.output_aliases
    }

    /// Returns the target.
    #[must_use]
    pub fn target(&self) -> &NodeTarget {
        &self.target
    }

    /// Returns the kind of the target.
    #[must_use]
    pub fn kind(&self) -> NodeKind {
        self.target.kind()
    }

    /// Maps an externally visible output name back to the node's own
    /// variable, honouring aliases.
    #[must_use]
    pub fn unalias<'a>(&'a self, name: &'a str) -> &'a str {
        self.output_aliases
            .iter()
            .find(|a| a.alias == name)
            .map_or(name, |a| a.var.as_str())
    }

    /// Returns the nodes embedded directly in this node's target.
    #[must_use]
    pub fn embedded_nodes(&self) -> Vec<&Node> {
        match &self.target {
            NodeTarget::Branch(branch) => branch.if_else.candidates().collect(),
            NodeTarget::Array(array) => vec![array.node()],
            NodeTarget::Task(_) | NodeTarget::Workflow(_) | NodeTarget::Gate(_) => Vec::new(),
        }
    }

    /// Returns this node followed by every node embedded in it, depth first.
    #[must_use]
    pub fn descendants(&self) -> Vec<&Node> {
        let mut out = vec![self];
        for child in self.embedded_nodes() {
            out.extend(child.descendants());
        }
        out
    }

    /// Fills unset interruptible flags, recursively, from the given default.
    pub(crate) fn apply_interruptible_default(&mut self, interruptible: bool) {
        if self.metadata.interruptible.is_none() {
            self.metadata.interruptible = Some(interruptible);
        }
        match &mut self.target {
            NodeTarget::Branch(branch) => {
                for child in branch.if_else.candidates_mut() {
                    child.apply_interruptible_default(interruptible);
                }
            }
            NodeTarget::Array(array) => array.node_mut().apply_interruptible_default(interruptible),
            NodeTarget::Task(_) | NodeTarget::Workflow(_) | NodeTarget::Gate(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::GateNode;
    use skein_core::Identifier;

    fn task(id: &str) -> Node {
        Node::new(id, TaskNode::new(Identifier::task("p", "d", "t", "v1"))).expect("valid node")
    }

    #[test]
    fn reserved_ids() {
        assert!(NodeId::start().is_start());
        assert!(NodeId::end().is_end());
        assert!(NodeId::from("start-node").is_reserved());
        assert!(!NodeId::from("n1").is_reserved());
    }

    #[test]
    fn empty_id_is_invalid() {
        let err = Node::new("", GateNode::sleep(Duration::from_secs(1))).unwrap_err();
        assert!(matches!(err, Violation::InvalidNode { .. }));
    }

    #[test]
    fn builder_and_accessors() {
        let node = task("n1")
            .with_metadata(NodeMetadata::named("square").with_retries(2))
            .with_input(Binding::workflow_input("x", "a"))
            .with_upstream("n0")
            .with_alias(Alias::new("o0", "squared"));

        assert_eq!(node.id().as_str(), "n1");
        assert_eq!(node.kind(), NodeKind::Task);
        assert_eq!(node.inputs().len(), 1);
        assert_eq!(node.upstream_node_ids(), &[NodeId::from("n0")]);
        assert_eq!(node.metadata().retries.retries, 2);
        assert_eq!(node.unalias("squared"), "o0");
        assert_eq!(node.unalias("o0"), "o0");
    }

    #[test]
    fn interruptible_default_only_fills_unset() {
        let mut set = task("a").with_metadata(NodeMetadata::default().with_interruptible(false));
        set.apply_interruptible_default(true);
        assert_eq!(set.metadata().interruptible, Some(false));

        let mut unset = task("b");
        unset.apply_interruptible_default(true);
        assert_eq!(unset.metadata().interruptible, Some(true));
    }

    #[test]
    fn node_serde_roundtrip() {
        let node = task("n1").with_input(Binding::literal("x", 3i64));
        let json = serde_json::to_string(&node).expect("serialize");
        let parsed: Node = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(node, parsed);
    }
}
