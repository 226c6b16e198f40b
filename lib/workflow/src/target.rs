//! Node target payloads: tasks, sub-workflows, gates and arrays.
//!
//! Branch targets live in [`crate::branch`] because they carry the
//! condition language.

use crate::literal::LiteralType;
use crate::node::{Node, NodeKind};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use skein_core::Identifier;
use std::time::Duration;

/// Well-known compute resource names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceName {
    #[default]
    Unknown,
    Cpu,
    Gpu,
    Memory,
    Storage,
    EphemeralStorage,
}

/// A single resource quantity, e.g. `cpu = "500m"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceEntry {
    pub name: ResourceName,
    pub value: String,
}

/// Resource requests and limits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    #[serde(default)]
    pub requests: Vec<ResourceEntry>,
    #[serde(default)]
    pub limits: Vec<ResourceEntry>,
}

/// Accelerator selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuAccelerator {
    /// Device model, e.g. "nvidia-tesla-a100".
    pub device: String,
    /// Partition size for partitionable devices.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_size: Option<String>,
}

/// Resources outside the cpu/memory/storage set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendedResources {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_accelerator: Option<GpuAccelerator>,
}

/// Per-node overrides of the task's registered execution settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskNodeOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Resources>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended_resources: Option<ExtendedResources>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_image: Option<String>,
    /// Opaque pod template handed to the runtime untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_template: Option<JsonValue>,
}

/// Runs a registered task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskNode {
    /// The task to run.
    pub reference_id: Identifier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overrides: Option<TaskNodeOverrides>,
}

impl TaskNode {
    /// Creates a task node without overrides.
    #[must_use]
    pub fn new(reference_id: Identifier) -> Self {
        Self {
            reference_id,
            overrides: None,
        }
    }

    /// Sets the overrides.
    #[must_use]
    pub fn with_overrides(mut self, overrides: TaskNodeOverrides) -> Self {
        self.overrides = Some(overrides);
        self
    }
}

/// Runs another workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowNode {
    /// Launches the workflow behind a launch plan as a separate execution.
    LaunchPlan(Identifier),
    /// Runs a workflow inline, as part of this execution.
    SubWorkflow(Identifier),
}

impl WorkflowNode {
    /// Returns the referenced identifier.
    #[must_use]
    pub fn reference(&self) -> &Identifier {
        match self {
            Self::LaunchPlan(id) | Self::SubWorkflow(id) => id,
        }
    }
}

/// Blocks until an external approval arrives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveCondition {
    pub signal_id: String,
}

/// Blocks until a typed value is delivered, then exposes it as an output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalCondition {
    pub signal_id: String,
    /// Type the delivered value must conform to.
    #[serde(rename = "type")]
    pub ty: LiteralType,
    /// Output variable receiving the value.
    pub output_variable_name: String,
}

/// Blocks for a fixed duration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SleepCondition {
    pub duration: Duration,
}

/// A node that suspends execution pending an external event or timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateNode {
    Approve(ApproveCondition),
    Signal(SignalCondition),
    Sleep(SleepCondition),
}

impl GateNode {
    /// An approval gate.
    #[must_use]
    pub fn approve(signal_id: impl Into<String>) -> Self {
        Self::Approve(ApproveCondition {
            signal_id: signal_id.into(),
        })
    }

    /// A signal gate.
    #[must_use]
    pub fn signal(
        signal_id: impl Into<String>,
        ty: LiteralType,
        output_variable_name: impl Into<String>,
    ) -> Self {
        Self::Signal(SignalCondition {
            signal_id: signal_id.into(),
            ty,
            output_variable_name: output_variable_name.into(),
        })
    }

    /// A sleep gate.
    #[must_use]
    pub fn sleep(duration: Duration) -> Self {
        Self::Sleep(SleepCondition { duration })
    }

    /// Returns the signal id this gate waits on, if any.
    #[must_use]
    pub fn signal_id(&self) -> Option<&str> {
        match self {
            Self::Approve(c) => Some(&c.signal_id),
            Self::Signal(c) => Some(&c.signal_id),
            Self::Sleep(_) => None,
        }
    }
}

/// How many sub-instances must succeed for the array to succeed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuccessCriteria {
    /// Absolute count.
    MinSuccesses(u32),
    /// Fraction of the fan-out size, in `[0, 1]`.
    MinSuccessRatio(f32),
}

/// How much per-instance state the engine retains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionMode {
    #[default]
    MinimalState,
    FullState,
}

/// How inputs are delivered to sub-instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataMode {
    #[default]
    SingleInputFile,
    IndividualInputFiles,
}

/// Fans a single embedded node out over its collection inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayNode {
    node: Box<Node>,
    parallelism: Option<u32>,
    success_criteria: Option<SuccessCriteria>,
    execution_mode: ExecutionMode,
    data_mode: DataMode,
    is_original_sub_node_interface: Option<bool>,
}

impl ArrayNode {
    /// Wraps the node to fan out. All instances must succeed unless a
    /// success criterion is set.
    #[must_use]
    pub fn new(node: Node) -> Self {
        Self {
            node: Box::new(node),
            parallelism: None,
            success_criteria: None,
            execution_mode: ExecutionMode::default(),
            data_mode: DataMode::default(),
            is_original_sub_node_interface: None,
        }
    }

    /// Caps concurrently running sub-instances; 0 means unbounded.
    #[must_use]
    pub fn with_parallelism(mut self, parallelism: u32) -> Self {
        self.parallelism = Some(parallelism);
        self
    }

    /// Requires an absolute number of successes.
    #[must_use]
    pub fn with_min_successes(mut self, count: u32) -> Self {
        self.success_criteria = Some(SuccessCriteria::MinSuccesses(count));
        self
    }

    /// Requires a fraction of sub-instances to succeed.
    #[must_use]
    pub fn with_min_success_ratio(mut self, ratio: f32) -> Self {
        self.success_criteria = Some(SuccessCriteria::MinSuccessRatio(ratio));
        self
    }

    /// Sets the execution mode.
    #[must_use]
    pub fn with_execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = mode;
        self
    }

    /// Sets the data mode.
    #[must_use]
    pub fn with_data_mode(mut self, mode: DataMode) -> Self {
        self.data_mode = mode;
        self
    }

    /// Marks whether the inner node keeps its original (non-collection) interface.
    #[must_use]
    pub fn with_original_sub_node_interface(mut self, original: bool) -> Self {
        self.is_original_sub_node_interface = Some(original);
        self
    }

    pub(crate) fn from_parts(
        node: Node,
        parallelism: Option<u32>,
        success_criteria: Option<SuccessCriteria>,
        execution_mode: ExecutionMode,
        data_mode: DataMode,
        is_original_sub_node_interface: Option<bool>,
    ) -> Self {
        Self {
            node: Box::new(node),
            parallelism,
            success_criteria,
            execution_mode,
            data_mode,
            is_original_sub_node_interface,
        }
    }

    /// The embedded node.
    #[must_use]
    pub fn node(&self) -> &Node {
        &self.node
    }

    pub(crate) fn node_mut(&mut self) -> &mut Node {
        &mut self.node
    }

    /// Declared parallelism cap (0 = unbounded), if set.
    #[must_use]
    pub fn parallelism(&self) -> Option<u32> {
        self.parallelism
    }

    /// Declared success criterion, if set.
    #[must_use]
    pub fn success_criteria(&self) -> Option<SuccessCriteria> {
        self.success_criteria
    }

    #[must_use]
    pub fn execution_mode(&self) -> ExecutionMode {
        self.execution_mode
    }

    #[must_use]
    pub fn data_mode(&self) -> DataMode {
        self.data_mode
    }

    #[must_use]
    pub fn is_original_sub_node_interface(&self) -> Option<bool> {
        self.is_original_sub_node_interface
    }

    /// Number of successes needed out of `fan_out` sub-instances.
    #[must_use]
    pub fn required_successes(&self, fan_out: usize) -> usize {
        match self.success_criteria {
            Some(SuccessCriteria::MinSuccesses(count)) => count as usize,
            Some(SuccessCriteria::MinSuccessRatio(ratio)) => {
                // f32 ratios like 0.6 widen to 0.6000000238. That error is
                // relative, so the slack has to scale with the product.
                let exact = f64::from(ratio) * fan_out as f64;
                let slack = exact * f64::from(f32::EPSILON);
                (exact - slack).ceil().max(0.0) as usize
            }
            None => fan_out,
        }
    }

    /// Checks the configuration, returning a reason when it is unusable.
    pub(crate) fn misconfiguration(&self) -> Option<String> {
        if let Some(SuccessCriteria::MinSuccessRatio(ratio)) = self.success_criteria
            && !(0.0..=1.0).contains(&ratio)
        {
            return Some(format!("min_success_ratio {ratio} is outside [0, 1]"));
        }
        match self.node.kind() {
            NodeKind::Task | NodeKind::Workflow => None,
            other => Some(format!(
                "embedded node '{}' is a {other} node; arrays fan out task or workflow nodes",
                self.node.id()
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inner() -> Node {
        Node::new("inner", TaskNode::new(Identifier::task("p", "d", "t", "v1"))).expect("valid")
    }

    #[test]
    fn required_successes_by_criterion() {
        assert_eq!(ArrayNode::new(inner()).required_successes(10), 10);
        assert_eq!(ArrayNode::new(inner()).with_min_successes(6).required_successes(10), 6);
        assert_eq!(ArrayNode::new(inner()).with_min_success_ratio(0.5).required_successes(10), 5);
        assert_eq!(ArrayNode::new(inner()).with_min_success_ratio(0.6).required_successes(10), 6);
        assert_eq!(ArrayNode::new(inner()).with_min_success_ratio(0.55).required_successes(10), 6);
        assert_eq!(ArrayNode::new(inner()).with_min_success_ratio(0.0).required_successes(10), 0);
    }

    #[test]
    fn ratio_rounding_holds_for_large_fan_out() {
        let ratio = |r: f32, n: usize| ArrayNode::new(inner()).with_min_success_ratio(r).required_successes(n);
        assert_eq!(ratio(0.6, 100), 60);
        assert_eq!(ratio(0.3, 100), 30);
        assert_eq!(ratio(0.7, 100), 70);
        assert_eq!(ratio(0.605, 100), 61);
        assert_eq!(ratio(0.6, 1000), 600);
        assert_eq!(ratio(0.3, 100_000), 30_000);
        assert_eq!(ratio(1.0, 100_000), 100_000);
    }

    #[test]
    fn ratio_out_of_range_is_misconfigured() {
        let array = ArrayNode::new(inner()).with_min_success_ratio(1.5);
        assert!(array.misconfiguration().is_some());

        let nan = ArrayNode::new(inner()).with_min_success_ratio(f32::NAN);
        assert!(nan.misconfiguration().is_some());

        assert!(ArrayNode::new(inner()).with_min_success_ratio(1.0).misconfiguration().is_none());
    }

    #[test]
    fn array_of_gate_is_misconfigured() {
        let gate = Node::new("g", GateNode::approve("ok")).expect("valid");
        let reason = ArrayNode::new(gate).misconfiguration().expect("misconfigured");
        assert!(reason.contains("gate"));
    }

    #[test]
    fn gate_signal_ids() {
        assert_eq!(GateNode::approve("a").signal_id(), Some("a"));
        assert_eq!(GateNode::sleep(Duration::from_secs(5)).signal_id(), None);
    }

    #[test]
    fn execution_mode_serde_shape() {
        let json = serde_json::to_value(ExecutionMode::FullState).expect("serialize");
        assert_eq!(json, serde_json::json!("FULL_STATE"));
    }
}
