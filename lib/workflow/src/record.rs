//! Portable record forms.
//!
//! Records mirror the wire schema: every one-of is a set of optional
//! fields, so a record can describe states the typed model cannot (no
//! target, two targets, a branch with both an else node and an error).
//! Lowering a record into the typed model reports those as violations;
//! raising a typed value back into a record is infallible.

use crate::binding::Binding;
use crate::branch::{BooleanExpression, BranchDefault, BranchNode, ErrorSpec, IfBlock, IfElseBlock};
use crate::error::{Violation, Violations};
use crate::interface::TypedInterface;
use crate::node::{Alias, Node, NodeId, NodeMetadata, NodeTarget};
use crate::target::{
    ApproveCondition, ArrayNode, DataMode, ExecutionMode, GateNode, SignalCondition, SleepCondition,
    SuccessCriteria, TaskNode, WorkflowNode,
};
use crate::template::{WorkflowMetadata, WorkflowMetadataDefaults};
use serde::{Deserialize, Serialize};
use skein_core::Identifier;

/// Portable form of a workflow node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: String,
    #[serde(default)]
    pub metadata: NodeMetadata,
    #[serde(default)]
    pub inputs: Vec<Binding>,
    #[serde(default)]
    pub upstream_node_ids: Vec<NodeId>,
    #[serde(default)]
    pub output_aliases: Vec<Alias>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_node: Option<TaskNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_node: Option<WorkflowNodeRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_node: Option<BranchNodeRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate_node: Option<GateNodeRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub array_node: Option<ArrayNodeRecord>,
}

/// Portable form of a workflow node reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowNodeRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launchplan_ref: Option<Identifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_workflow_ref: Option<Identifier>,
}

/// Portable form of a guarded candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IfBlockRecord {
    pub condition: BooleanExpression,
    pub then_node: Box<NodeRecord>,
}

/// Portable form of a branch's condition blocks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IfElseBlockRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case: Option<IfBlockRecord>,
    #[serde(default)]
    pub other: Vec<IfBlockRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub else_node: Option<Box<NodeRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BranchNodeRecord {
    pub if_else: IfElseBlockRecord,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateNodeRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approve: Option<ApproveCondition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<SignalCondition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep: Option<SleepCondition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayNodeRecord {
    pub node: Box<NodeRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallelism: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_successes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_success_ratio: Option<f32>,
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    #[serde(default)]
    pub data_mode: DataMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_original_sub_node_interface: Option<bool>,
}

/// Portable form of a workflow template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTemplateRecord {
    pub id: Identifier,
    #[serde(default)]
    pub metadata: WorkflowMetadata,
    #[serde(default)]
    pub interface: TypedInterface,
    #[serde(default)]
    pub nodes: Vec<NodeRecord>,
    #[serde(default)]
    pub outputs: Vec<Binding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_node: Option<NodeRecord>,
    #[serde(default)]
    pub metadata_defaults: WorkflowMetadataDefaults,
}

impl TryFrom<NodeRecord> for Node {
    type Error = Violations;

    fn try_from(record: NodeRecord) -> Result<Self, Self::Error> {
        let mut violations = Vec::new();
        match lower_node(record, &mut violations) {
            Some(node) if violations.is_empty() => Ok(node),
            _ => Err(Violations(violations)),
        }
    }
}

/// Lowers a record, pushing every defect found in it or its embedded nodes.
pub(crate) fn lower_node(record: NodeRecord, violations: &mut Vec<Violation>) -> Option<Node> {
    let before = violations.len();
    let id = NodeId::new(record.id);
    if id.as_str().is_empty() {
        violations.push(Violation::InvalidNode {
            node_id: id.clone(),
            reason: "node id must not be empty".to_string(),
        });
    }

    let set = [
        record.task_node.is_some(),
        record.workflow_node.is_some(),
        record.branch_node.is_some(),
        record.gate_node.is_some(),
        record.array_node.is_some(),
    ]
    .into_iter()
    .filter(|set| *set)
    .count();
    if set != 1 {
        violations.push(Violation::InvalidNode {
            node_id: id,
            reason: format!("exactly one target must be set, found {set}"),
        });
        return None;
    }

    let target = if let Some(task) = record.task_node {
        Some(NodeTarget::Task(task))
    } else if let Some(workflow) = record.workflow_node {
        lower_workflow(&id, workflow, violations).map(NodeTarget::Workflow)
    } else if let Some(branch) = record.branch_node {
        lower_branch(&id, branch, violations).map(NodeTarget::Branch)
    } else if let Some(gate) = record.gate_node {
        lower_gate(&id, gate, violations).map(NodeTarget::Gate)
    } else if let Some(array) = record.array_node {
        lower_array(&id, array, violations).map(NodeTarget::Array)
    } else {
        None
    };

    let target = target?;
    if violations.len() > before {
        return None;
    }
    Some(Node {
        id,
        metadata: record.metadata,
        inputs: record.inputs,
        upstream_node_ids: record.upstream_node_ids,
        output_aliases: record.output_aliases,
        target,
    })
}

fn lower_workflow(
    id: &NodeId,
    record: WorkflowNodeRecord,
    violations: &mut Vec<Violation>,
) -> Option<WorkflowNode> {
    match (record.launchplan_ref, record.sub_workflow_ref) {
        (Some(lp), None) => Some(WorkflowNode::LaunchPlan(lp)),
        (None, Some(sub)) => Some(WorkflowNode::SubWorkflow(sub)),
        (lp, sub) => {
            let reason = if lp.is_some() && sub.is_some() {
                "both launchplan_ref and sub_workflow_ref are set"
            } else {
                "one of launchplan_ref or sub_workflow_ref must be set"
            };
            violations.push(Violation::InvalidNode {
                node_id: id.clone(),
                reason: reason.to_string(),
            });
            None
        }
    }
}

fn lower_branch(
    id: &NodeId,
    record: BranchNodeRecord,
    violations: &mut Vec<Violation>,
) -> Option<BranchNode> {
    let block = record.if_else;
    let mut complete = true;
    let mut lower_block = |b: IfBlockRecord, violations: &mut Vec<Violation>| {
        let then_node = lower_node(*b.then_node, violations);
        if then_node.is_none() {
            complete = false;
        }
        then_node.map(|n| IfBlock::new(b.condition, n))
    };

    if block.case.is_none() && block.other.is_empty() {
        violations.push(Violation::BranchNonExhaustive {
            node_id: id.clone(),
            reason: "no if blocks".to_string(),
        });
    }
    let case: Vec<IfBlock> = block
        .case
        .into_iter()
        .filter_map(|b| lower_block(b, violations))
        .collect();
    let other: Vec<IfBlock> = block
        .other
        .into_iter()
        .filter_map(|b| lower_block(b, violations))
        .collect();

    let default = match (block.else_node, block.error) {
        (Some(node), None) => lower_node(*node, violations).map(|n| BranchDefault::ElseNode(Box::new(n))),
        (None, Some(error)) => Some(BranchDefault::Error(error)),
        (else_node, _) => {
            let reason = if else_node.is_some() {
                "both else_node and error are set"
            } else {
                "neither else_node nor error is set"
            };
            violations.push(Violation::BranchNonExhaustive {
                node_id: id.clone(),
                reason: reason.to_string(),
            });
            None
        }
    };

    let default = default?;
    complete.then_some(BranchNode {
        if_else: IfElseBlock {
            case,
            other,
            default,
        },
    })
}

fn lower_gate(id: &NodeId, record: GateNodeRecord, violations: &mut Vec<Violation>) -> Option<GateNode> {
    match (record.approve, record.signal, record.sleep) {
        (Some(approve), None, None) => Some(GateNode::Approve(approve)),
        (None, Some(signal), None) => Some(GateNode::Signal(signal)),
        (None, None, Some(sleep)) => Some(GateNode::Sleep(sleep)),
        (approve, signal, sleep) => {
            let count = [approve.is_some(), signal.is_some(), sleep.is_some()]
                .into_iter()
                .filter(|set| *set)
                .count();
            violations.push(Violation::GateNodeMisconfigured {
                node_id: id.clone(),
                reason: format!("exactly one condition must be set, found {count}"),
            });
            None
        }
    }
}

fn lower_array(id: &NodeId, record: ArrayNodeRecord, violations: &mut Vec<Violation>) -> Option<ArrayNode> {
    let before = violations.len();
    let criteria = match (record.min_successes, record.min_success_ratio) {
        (Some(_), Some(_)) => {
            violations.push(Violation::ArrayNodeMisconfigured {
                node_id: id.clone(),
                reason: "both min_successes and min_success_ratio are set".to_string(),
            });
            None
        }
        (Some(count), None) => Some(SuccessCriteria::MinSuccesses(count)),
        (None, Some(ratio)) => {
            if !(0.0..=1.0).contains(&ratio) {
                violations.push(Violation::ArrayNodeMisconfigured {
                    node_id: id.clone(),
                    reason: format!("min_success_ratio {ratio} is outside [0, 1]"),
                });
            }
            Some(SuccessCriteria::MinSuccessRatio(ratio))
        }
        (None, None) => None,
    };

    let node = lower_node(*record.node, violations)?;
    (violations.len() == before).then(|| {
        ArrayNode::from_parts(
            node,
            record.parallelism,
            criteria,
            record.execution_mode,
            record.data_mode,
            record.is_original_sub_node_interface,
        )
    })
}

impl From<Node> for NodeRecord {
    fn from(node: Node) -> Self {
        let mut record = NodeRecord {
            id: node.id.as_str().to_string(),
            metadata: node.metadata,
            inputs: node.inputs,
            upstream_node_ids: node.upstream_node_ids,
            output_aliases: node.output_aliases,
            ..NodeRecord::default()
        };
        match node.target {
            NodeTarget::Task(task) => record.task_node = Some(task),
            NodeTarget::Workflow(workflow) => {
                record.workflow_node = Some(match workflow {
                    WorkflowNode::LaunchPlan(id) => WorkflowNodeRecord {
                        launchplan_ref: Some(id),
                        sub_workflow_ref: None,
                    },
                    WorkflowNode::SubWorkflow(id) => WorkflowNodeRecord {
                        launchplan_ref: None,
                        sub_workflow_ref: Some(id),
                    },
                });
            }
            NodeTarget::Branch(branch) => record.branch_node = Some(raise_branch(branch)),
            NodeTarget::Gate(gate) => {
                let mut gate_record = GateNodeRecord::default();
                match gate {
                    GateNode::Approve(c) => gate_record.approve = Some(c),
                    GateNode::Signal(c) => gate_record.signal = Some(c),
                    GateNode::Sleep(c) => gate_record.sleep = Some(c),
                }
                record.gate_node = Some(gate_record);
            }
            NodeTarget::Array(array) => {
                let (min_successes, min_success_ratio) = match array.success_criteria() {
                    Some(SuccessCriteria::MinSuccesses(count)) => (Some(count), None),
                    Some(SuccessCriteria::MinSuccessRatio(ratio)) => (None, Some(ratio)),
                    None => (None, None),
                };
                record.array_node = Some(ArrayNodeRecord {
                    parallelism: array.parallelism(),
                    min_successes,
                    min_success_ratio,
                    execution_mode: array.execution_mode(),
                    data_mode: array.data_mode(),
                    is_original_sub_node_interface: array.is_original_sub_node_interface(),
                    node: Box::new(array.node().clone().into()),
                });
            }
        }
        record
    }
}

fn raise_block(block: IfBlock) -> IfBlockRecord {
    IfBlockRecord {
        condition: block.condition,
        then_node: Box::new((*block.then_node).into()),
    }
}

fn raise_branch(branch: BranchNode) -> BranchNodeRecord {
    let IfElseBlock {
        case,
        other,
        default,
    } = branch.if_else;
    // The portable form holds a single leading case; extra cases keep their
    // order at the front of `other`.
    let mut blocks = case.into_iter().chain(other).map(raise_block);
    let case = blocks.next();
    let other = blocks.collect();
    let (else_node, error) = match default {
        BranchDefault::ElseNode(node) => (Some(Box::new((*node).into())), None),
        BranchDefault::Error(error) => (None, Some(error)),
    };
    BranchNodeRecord {
        if_else: IfElseBlockRecord {
            case,
            other,
            else_node,
            error,
        },
    }
}
