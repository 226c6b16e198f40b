//! Workflow engine for skein.
//!
//! This crate provides the workflow graph IR and the engine that runs it:
//!
//! - **Template Model**: Typed nodes (task, sub-workflow, branch, gate, array) wired by bindings
//! - **Compilation**: Binding resolution, dependency graph and structural validation
//! - **Traversal**: Event-driven state machine deciding which nodes are ready to run
//! - **Shared Access**: Async single-writer wrapper that publishes accepted events

pub mod binding;
pub mod branch;
pub mod config;
pub mod envelope;
pub mod error;
pub mod execution;
pub mod graph;
pub mod interface;
pub mod literal;
pub mod node;
pub mod record;
pub mod resolver;
pub mod shared;
pub mod target;
pub mod template;
pub mod traversal;
pub mod validator;

pub use binding::{Binding, BindingData, OutputReference};
pub use branch::{BooleanExpression, BranchNode, IfBlock, IfElseBlock};
pub use config::EngineConfig;
pub use envelope::{Envelope, RawEnvelope};
pub use error::{TemplateError, TraversalError, Violation, ViolationKind, Violations};
pub use execution::{
    ExecutionEvent, ExecutionPhase, InstanceKey, NodeFailure, NodeOutcome, NodeState, SkipPolicy, StateDelta,
};
pub use graph::WorkflowGraph;
pub use interface::{InterfaceProvider, NoInterfaces, StaticInterfaces, TypedInterface};
pub use literal::{Literal, LiteralMap, LiteralType};
pub use node::{END_NODE_ID, Node, NodeId, NodeTarget, START_NODE_ID};
pub use record::WorkflowTemplateRecord;
pub use shared::{EventRecord, EventSink, SharedError, SharedExecution, SinkError};
pub use target::{ArrayNode, GateNode, TaskNode, WorkflowNode};
pub use template::{LaunchPlanTemplate, OnFailurePolicy, WorkflowTemplate, WorkflowTemplateBuilder};
pub use traversal::{ArrayProgress, Clock, Execution, ManualClock, SystemClock};
pub use validator::GraphValidator;
