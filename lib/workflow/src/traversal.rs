//! The traversal engine.
//!
//! An [`Execution`] drives one run of a [`WorkflowTemplate`]. It never runs
//! anything itself: callers poll for Ready instances, dispatch them to
//! whatever executes tasks, and apply the reported outcomes. Branches, array
//! fan-out, gates and the on-failure policy are resolved inside the engine
//! as a consequence of those calls.
//!
//! Every accepted caller-driven transition is recorded as an
//! [`ExecutionEvent`]. Replaying the recorded events against the same
//! template and inputs rebuilds the same state.

use crate::branch::{BranchDefault, BranchNode};
use crate::config::EngineConfig;
use crate::error::TraversalError;
use crate::execution::{
    ExecutionEvent, ExecutionPhase, InstanceKey, NodeFailure, NodeOutcome, NodeState, SkipPolicy,
    StateDelta,
};
use crate::interface::TypedInterface;
use crate::literal::{Literal, LiteralMap, LiteralType};
use crate::node::{Node, NodeId, NodeTarget};
use crate::resolver::Source;
use crate::target::{ArrayNode, ExecutionMode, GateNode};
use crate::template::{OnFailurePolicy, WorkflowTemplate};
use chrono::{DateTime, TimeDelta, Utc};
use rootcause::Report;
use skein_core::ExecutionId;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Source of the current time for sleep gates.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// The wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Creates a clock stopped at `start`.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now = deadline_after(*now, by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn deadline_after(now: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(duration)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Counters of an expanded array node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayProgress {
    pub total: usize,
    pub required: usize,
    pub successes: usize,
    pub failures: usize,
    /// Sub-instances currently Ready or Running.
    pub active: usize,
}

#[derive(Debug)]
struct NodeRun {
    state: NodeState,
    inputs: Option<LiteralMap>,
    outputs: Option<LiteralMap>,
    failure: Option<NodeFailure>,
    /// The branch this node is a candidate of.
    parent: Option<NodeId>,
    progress: Progress,
}

#[derive(Debug)]
enum Progress {
    /// Tasks and workflows, run by the caller.
    Dispatchable,
    Gate {
        token: Option<CancellationToken>,
        deadline: Option<DateTime<Utc>>,
    },
    Branch {
        selected: Option<NodeId>,
    },
    /// Expanded on activation.
    Array(Option<ArrayRun>),
}

#[derive(Debug)]
struct ArrayRun {
    /// Zero means unbounded.
    parallelism: usize,
    required: usize,
    states: Vec<NodeState>,
    inputs: Vec<LiteralMap>,
    outputs: Vec<Option<LiteralMap>>,
    /// Kept only in full-state mode.
    outcomes: Option<Vec<Option<NodeOutcome>>>,
    successes: usize,
    failures: usize,
}

impl ArrayRun {
    fn total(&self) -> usize {
        self.states.len()
    }

    fn active(&self) -> usize {
        self.states
            .iter()
            .filter(|s| matches!(s, NodeState::Ready | NodeState::Running))
            .count()
    }

    fn running(&self) -> usize {
        self.states.iter().filter(|s| **s == NodeState::Running).count()
    }

    fn capacity(&self) -> usize {
        if self.parallelism == 0 {
            usize::MAX
        } else {
            self.parallelism.saturating_sub(self.active())
        }
    }

    /// `Some(true)` once the threshold is met, `Some(false)` once it can no
    /// longer be met.
    fn verdict(&self) -> Option<bool> {
        if self.successes >= self.required {
            return Some(true);
        }
        let total = self.total();
        if self.required > total || self.failures > total - self.required {
            return Some(false);
        }
        None
    }

    /// Promotes Pending sub-instances to Ready, in index order, while
    /// capacity allows.
    fn admit(&mut self) -> Vec<usize> {
        let mut free = self.capacity();
        let mut admitted = Vec::new();
        for (index, state) in self.states.iter_mut().enumerate() {
            if free == 0 {
                break;
            }
            if *state == NodeState::Pending {
                *state = NodeState::Ready;
                admitted.push(index);
                free -= 1;
            }
        }
        admitted
    }

    fn skip_unstarted(&mut self) -> Vec<usize> {
        let mut skipped = Vec::new();
        for (index, state) in self.states.iter_mut().enumerate() {
            if matches!(state, NodeState::Pending | NodeState::Ready) {
                *state = NodeState::Skipped;
                skipped.push(index);
            }
        }
        skipped
    }

    /// Records a sub-instance outcome. Counters only move while the array
    /// itself is still open.
    fn record(&mut self, index: usize, outcome: NodeOutcome, count: bool) {
        let succeeded = matches!(outcome, NodeOutcome::Succeeded { .. });
        if let Some(state) = self.states.get_mut(index) {
            *state = if succeeded {
                NodeState::Succeeded
            } else {
                NodeState::Failed
            };
        }
        if count {
            if succeeded {
                self.successes += 1;
            } else {
                self.failures += 1;
            }
        }
        if let NodeOutcome::Succeeded { outputs } = &outcome
            && let Some(slot) = self.outputs.get_mut(index)
        {
            *slot = Some(outputs.clone());
        }
        match &mut self.outcomes {
            Some(outcomes) => {
                if let Some(slot) = outcomes.get_mut(index) {
                    *slot = Some(outcome);
                }
            }
            None => {
                if let Some(inputs) = self.inputs.get_mut(index) {
                    inputs.clear();
                }
            }
        }
    }

    /// One collection per output variable, `Literal::None` where an
    /// instance produced nothing.
    fn collect_outputs(&self) -> LiteralMap {
        let vars: BTreeSet<&String> = self.outputs.iter().flatten().flat_map(|o| o.keys()).collect();
        vars.into_iter()
            .map(|var| {
                let values = self
                    .outputs
                    .iter()
                    .map(|o| o.as_ref().and_then(|o| o.get(var)).cloned().unwrap_or(Literal::None))
                    .collect();
                (var.clone(), Literal::Collection(values))
            })
            .collect()
    }

    fn threshold_failure(&self) -> NodeFailure {
        NodeFailure::ThresholdUnreachable {
            successes: self.successes,
            failures: self.failures,
            required: self.required,
            total: self.total(),
        }
    }

    fn progress(&self) -> ArrayProgress {
        ArrayProgress {
            total: self.total(),
            required: self.required,
            successes: self.successes,
            failures: self.failures,
            active: self.active(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Readiness {
    Wait,
    Activate,
    Skip,
}

/// Decides what a Pending node does given its upstream states.
fn readiness(upstream: &[NodeState], policy: SkipPolicy) -> Readiness {
    if upstream.iter().any(|s| !s.is_terminal()) {
        return Readiness::Wait;
    }
    if upstream.contains(&NodeState::Failed) {
        return Readiness::Skip;
    }
    if policy == SkipPolicy::Propagate && upstream.contains(&NodeState::Skipped) {
        return Readiness::Skip;
    }
    Readiness::Activate
}

/// One run of a workflow template.
#[derive(Debug)]
pub struct Execution {
    id: ExecutionId,
    template: Arc<WorkflowTemplate>,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    inputs: LiteralMap,
    phase: ExecutionPhase,
    runs: HashMap<NodeId, NodeRun>,
    /// Every registered node, in template order.
    order: Vec<NodeId>,
    /// Signal id to the gate waiting on it.
    gates: HashMap<String, NodeId>,
    buffered: HashMap<String, Option<Literal>>,
    deltas: Vec<StateDelta>,
    history: Vec<ExecutionEvent>,
    outputs: Option<LiteralMap>,
    failure: Option<NodeFailure>,
    failure_node_activated: bool,
    cancel: CancellationToken,
}

impl Execution {
    /// Starts an execution: checks the workflow inputs against the
    /// interface and computes the first Ready set.
    ///
    /// # Errors
    ///
    /// Returns [`TraversalError::MissingInput`] if a required input is
    /// absent, an input does not conform to its type, or an input is not
    /// declared.
    pub fn start(
        template: Arc<WorkflowTemplate>,
        inputs: LiteralMap,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, Report<TraversalError>> {
        Self::begin(ExecutionId::new(), template, inputs, config, clock)
    }

    /// Rebuilds an execution by re-applying recorded events in order.
    ///
    /// # Errors
    ///
    /// Returns the first error a recorded event produces; a history recorded
    /// by an execution of the same template and inputs never errors.
    pub fn replay(
        id: ExecutionId,
        template: Arc<WorkflowTemplate>,
        inputs: LiteralMap,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        events: impl IntoIterator<Item = ExecutionEvent>,
    ) -> Result<Self, Report<TraversalError>> {
        let mut execution = Self::begin(id, template, inputs, config, clock)?;
        for event in events {
            execution.replay_event(event)?;
        }
        debug!(
            execution_id = %execution.id,
            events = execution.history.len(),
            "execution replayed"
        );
        Ok(execution)
    }

    #[instrument(skip(template, inputs, config, clock), fields(workflow = %template.id()))]
    fn begin(
        id: ExecutionId,
        template: Arc<WorkflowTemplate>,
        inputs: LiteralMap,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, Report<TraversalError>> {
        check_inputs(template.interface(), &inputs)?;

        let mut runs = HashMap::new();
        let mut order = Vec::new();
        let mut gates = HashMap::new();
        for node in template.nodes().iter().chain(template.failure_node()) {
            register(node, None, &mut runs, &mut order, &mut gates);
        }

        let mut execution = Self {
            id,
            template,
            config,
            clock,
            inputs,
            phase: ExecutionPhase::Running,
            runs,
            order,
            gates,
            buffered: HashMap::new(),
            deltas: Vec::new(),
            history: Vec::new(),
            outputs: None,
            failure: None,
            failure_node_activated: false,
            cancel: CancellationToken::new(),
        };
        execution.advance();
        info!(execution_id = %execution.id, "execution started");
        Ok(execution)
    }

    /// Returns the execution id.
    #[must_use]
    pub fn id(&self) -> ExecutionId {
        self.id
    }

    #[must_use]
    pub fn template(&self) -> &Arc<WorkflowTemplate> {
        &self.template
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The clock sleep gates are measured against.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Returns the overall phase.
    #[must_use]
    pub fn phase(&self) -> ExecutionPhase {
        self.phase
    }

    /// The workflow inputs the execution was started with.
    #[must_use]
    pub fn workflow_inputs(&self) -> &LiteralMap {
        &self.inputs
    }

    /// Workflow outputs, once the execution succeeded.
    #[must_use]
    pub fn outputs(&self) -> Option<&LiteralMap> {
        self.outputs.as_ref()
    }

    /// The failure that moved the execution out of `Running`, if any.
    #[must_use]
    pub fn failure(&self) -> Option<&NodeFailure> {
        self.failure.as_ref()
    }

    /// Accepted transitions so far, oldest first. Empty when history
    /// recording is disabled.
    #[must_use]
    pub fn history(&self) -> &[ExecutionEvent] {
        &self.history
    }

    /// Returns the state of a node or array sub-instance.
    #[must_use]
    pub fn state(&self, key: &InstanceKey) -> Option<NodeState> {
        let run = self.runs.get(&key.node_id)?;
        match key.index {
            None => Some(run.state),
            Some(index) => match &run.progress {
                Progress::Array(Some(array)) => array.states.get(index).copied(),
                _ => None,
            },
        }
    }

    /// Returns the state of a node.
    #[must_use]
    pub fn node_state(&self, node_id: &NodeId) -> Option<NodeState> {
        self.runs.get(node_id).map(|run| run.state)
    }

    /// Outputs of a Succeeded node.
    #[must_use]
    pub fn node_outputs(&self, node_id: &NodeId) -> Option<&LiteralMap> {
        self.runs.get(node_id).and_then(|run| run.outputs.as_ref())
    }

    /// Why a node Failed.
    #[must_use]
    pub fn node_failure(&self, node_id: &NodeId) -> Option<&NodeFailure> {
        self.runs.get(node_id).and_then(|run| run.failure.as_ref())
    }

    /// The candidate a branch selected, once resolved.
    #[must_use]
    pub fn selected_candidate(&self, node_id: &NodeId) -> Option<&NodeId> {
        match &self.runs.get(node_id)?.progress {
            Progress::Branch { selected } => selected.as_ref(),
            _ => None,
        }
    }

    /// Counters of an expanded array node.
    #[must_use]
    pub fn array_progress(&self, node_id: &NodeId) -> Option<ArrayProgress> {
        match &self.runs.get(node_id)?.progress {
            Progress::Array(Some(array)) => Some(array.progress()),
            _ => None,
        }
    }

    /// The outcome of a finished array sub-instance. Only retained in
    /// full-state mode.
    #[must_use]
    pub fn instance_outcome(&self, key: &InstanceKey) -> Option<&NodeOutcome> {
        let index = key.index?;
        match &self.runs.get(&key.node_id)?.progress {
            Progress::Array(Some(array)) => array.outcomes.as_ref()?.get(index)?.as_ref(),
            _ => None,
        }
    }

    /// Token cancelled when the wait of an open gate is abandoned.
    #[must_use]
    pub fn gate_token(&self, node_id: &NodeId) -> Option<CancellationToken> {
        match &self.runs.get(node_id)?.progress {
            Progress::Gate { token, .. } => token.clone(),
            _ => None,
        }
    }

    /// The earliest deadline among open sleep gates.
    #[must_use]
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.runs
            .values()
            .filter(|run| run.state == NodeState::Running)
            .filter_map(|run| match run.progress {
                Progress::Gate { deadline, .. } => deadline,
                _ => None,
            })
            .min()
    }

    /// Drains the Ready and Skipped transitions since the last poll.
    pub fn poll(&mut self) -> Vec<StateDelta> {
        std::mem::take(&mut self.deltas)
    }

    /// Free admission slots of an array node; `usize::MAX` when unbounded
    /// and zero before expansion.
    ///
    /// # Errors
    ///
    /// Returns [`TraversalError::UnknownInstance`] if the node is not an
    /// array node.
    pub fn available_capacity(&self, node_id: &NodeId) -> Result<usize, Report<TraversalError>> {
        match self.runs.get(node_id).map(|run| &run.progress) {
            Some(Progress::Array(Some(array))) => Ok(array.capacity()),
            Some(Progress::Array(None)) => Ok(0),
            _ => Err(TraversalError::UnknownInstance {
                key: InstanceKey::node(node_id),
            }
            .into()),
        }
    }

    /// Materialized inputs of a Ready or Running instance.
    ///
    /// # Errors
    ///
    /// Returns [`TraversalError::UnknownInstance`] for keys that do not name
    /// a dispatchable instance and [`TraversalError::InvalidTransition`] for
    /// instances that are not Ready or Running.
    pub fn inputs(&self, key: &InstanceKey) -> Result<LiteralMap, Report<TraversalError>> {
        let state = self.dispatchable_state(key, NodeState::Running)?;
        if !matches!(state, NodeState::Ready | NodeState::Running) {
            return Err(TraversalError::InvalidTransition {
                key: key.clone(),
                from: state,
                to: NodeState::Running,
            }
            .into());
        }
        let run = self.runs.get(&key.node_id);
        let inputs = match (key.index, run.map(|run| &run.progress)) {
            (Some(index), Some(Progress::Array(Some(array)))) => array.inputs.get(index).cloned(),
            (None, _) => run.and_then(|run| run.inputs.clone()),
            _ => None,
        };
        Ok(inputs.unwrap_or_default())
    }

    /// Marks a Ready instance Running.
    ///
    /// # Errors
    ///
    /// Returns an error if the execution finished, the instance is unknown,
    /// or it is not Ready.
    #[instrument(skip(self, key), fields(execution_id = %self.id, key = %key))]
    pub fn dispatch(&mut self, key: &InstanceKey) -> Result<(), Report<TraversalError>> {
        self.ensure_active()?;
        match self.dispatchable_state(key, NodeState::Running)? {
            NodeState::Ready => {}
            state if state.is_terminal() => {
                return Err(TraversalError::AlreadyTerminal {
                    key: key.clone(),
                    state,
                }
                .into());
            }
            from => {
                return Err(TraversalError::InvalidTransition {
                    key: key.clone(),
                    from,
                    to: NodeState::Running,
                }
                .into());
            }
        }

        let Some(run) = self.runs.get_mut(&key.node_id) else {
            return Err(TraversalError::UnknownInstance { key: key.clone() }.into());
        };
        match (key.index, &mut run.progress) {
            (Some(index), Progress::Array(Some(array))) => {
                if array.parallelism > 0 && array.running() >= array.parallelism {
                    return Err(TraversalError::CapacityExhausted {
                        node_id: key.node_id.clone(),
                    }
                    .into());
                }
                if let Some(state) = array.states.get_mut(index) {
                    *state = NodeState::Running;
                }
            }
            _ => run.state = NodeState::Running,
        }

        self.record(ExecutionEvent::NodeDispatched { key: key.clone() });
        debug!("instance dispatched");
        Ok(())
    }

    /// Applies the outcome of a Running instance and recomputes the Ready
    /// set.
    ///
    /// Outcomes for instances still Running after the execution reached a
    /// final phase are recorded but change nothing else.
    ///
    /// # Errors
    ///
    /// Returns [`TraversalError::AlreadyTerminal`] if the instance already
    /// finished; its first outcome is kept.
    #[instrument(skip(self, key, outcome), fields(execution_id = %self.id, key = %key))]
    pub fn apply(&mut self, key: &InstanceKey, outcome: NodeOutcome) -> Result<(), Report<TraversalError>> {
        let to = match outcome {
            NodeOutcome::Succeeded { .. } => NodeState::Succeeded,
            NodeOutcome::Failed { .. } => NodeState::Failed,
        };
        match self.dispatchable_state(key, to)? {
            NodeState::Running => {}
            state if state.is_terminal() => {
                return Err(TraversalError::AlreadyTerminal {
                    key: key.clone(),
                    state,
                }
                .into());
            }
            from => {
                return Err(TraversalError::InvalidTransition {
                    key: key.clone(),
                    from,
                    to,
                }
                .into());
            }
        }

        self.record(ExecutionEvent::NodeCompleted {
            key: key.clone(),
            outcome: outcome.clone(),
        });
        match key.index {
            Some(index) => self.complete_sub_instance(&key.node_id, index, outcome),
            None => {
                let result = match outcome {
                    NodeOutcome::Succeeded { outputs } => Ok(outputs),
                    NodeOutcome::Failed { message } => Err(NodeFailure::Reported { message }),
                };
                self.finish(&key.node_id, result);
            }
        }
        self.advance();
        Ok(())
    }

    /// Delivers a signal to the approve or signal gate waiting on it.
    ///
    /// Signals for gates that have not opened yet are buffered and consumed
    /// when the gate opens.
    ///
    /// # Errors
    ///
    /// Returns [`TraversalError::UnknownSignal`] if no gate waits on the
    /// signal, [`TraversalError::SignalTypeMismatch`] if the value does not
    /// fit the gate, and [`TraversalError::AlreadyTerminal`] if the gate
    /// already finished.
    #[instrument(skip(self, value), fields(execution_id = %self.id))]
    pub fn satisfy(&mut self, signal_id: &str, value: Option<Literal>) -> Result<(), Report<TraversalError>> {
        self.ensure_active()?;
        let unknown = || TraversalError::UnknownSignal {
            signal_id: signal_id.to_string(),
        };
        let node_id = self.gates.get(signal_id).cloned().ok_or_else(unknown)?;
        let template = Arc::clone(&self.template);
        let Some(NodeTarget::Gate(gate)) = template.node(&node_id).map(Node::target) else {
            return Err(unknown().into());
        };
        check_signal_value(signal_id, gate, value.as_ref())?;

        let state = self.node_state(&node_id).ok_or_else(unknown)?;
        if state.is_terminal() {
            return Err(TraversalError::AlreadyTerminal {
                key: InstanceKey::node(node_id),
                state,
            }
            .into());
        }

        self.record(ExecutionEvent::SignalDelivered {
            signal_id: signal_id.to_string(),
            value: value.clone(),
        });
        if state == NodeState::Running {
            self.resolve_gate(&node_id, gate, value);
            self.advance();
        } else {
            debug!(signal_id, node_id = %node_id, "signal buffered until the gate opens");
            self.buffered.insert(signal_id.to_string(), value);
        }
        Ok(())
    }

    /// Completes every open sleep gate whose deadline has passed. Returns
    /// the completed gates.
    pub fn tick(&mut self) -> Vec<NodeId> {
        if self.phase.is_terminal() {
            return Vec::new();
        }
        let now = self.clock.now();
        let due: Vec<NodeId> = self
            .order
            .iter()
            .filter(|id| {
                self.runs.get(*id).is_some_and(|run| {
                    run.state == NodeState::Running
                        && matches!(run.progress, Progress::Gate { deadline: Some(d), .. } if d <= now)
                })
            })
            .cloned()
            .collect();

        let mut elapsed = Vec::new();
        for node_id in due {
            if self.elapse(&node_id).is_ok() {
                elapsed.push(node_id);
            }
        }
        elapsed
    }

    /// Stops the execution: cancels gate waits, skips everything that is not
    /// Running, and moves to `Aborted`.
    ///
    /// # Errors
    ///
    /// Returns [`TraversalError::ExecutionFinished`] if the execution already
    /// reached a final phase.
    #[instrument(skip(self, reason), fields(execution_id = %self.id))]
    pub fn abort(&mut self, reason: impl Into<String>) -> Result<(), Report<TraversalError>> {
        self.ensure_active()?;
        let reason = reason.into();
        self.record(ExecutionEvent::Aborted {
            reason: reason.clone(),
        });
        self.phase = ExecutionPhase::Aborted;
        self.close_gates();
        for node_id in self.order.clone() {
            self.skip(&node_id);
            self.skip_array_instances(&node_id);
        }
        warn!(reason = %reason, "execution aborted");
        Ok(())
    }

    fn replay_event(&mut self, event: ExecutionEvent) -> Result<(), Report<TraversalError>> {
        match event {
            ExecutionEvent::NodeDispatched { key } => self.dispatch(&key),
            ExecutionEvent::NodeCompleted { key, outcome } => self.apply(&key, outcome),
            ExecutionEvent::SignalDelivered { signal_id, value } => self.satisfy(&signal_id, value),
            ExecutionEvent::SleepElapsed { node_id } => self.elapse(&node_id),
            ExecutionEvent::Aborted { reason } => self.abort(reason),
        }
    }

    fn elapse(&mut self, node_id: &NodeId) -> Result<(), Report<TraversalError>> {
        self.ensure_active()?;
        let key = InstanceKey::node(node_id);
        let Some(run) = self.runs.get(node_id) else {
            return Err(TraversalError::UnknownInstance { key }.into());
        };
        let is_sleep = matches!(run.progress, Progress::Gate { deadline: Some(_), .. });
        if run.state != NodeState::Running || !is_sleep {
            return Err(TraversalError::InvalidTransition {
                key,
                from: run.state,
                to: NodeState::Succeeded,
            }
            .into());
        }
        self.record(ExecutionEvent::SleepElapsed {
            node_id: node_id.clone(),
        });
        self.finish(node_id, Ok(LiteralMap::new()));
        self.advance();
        Ok(())
    }

    fn ensure_active(&self) -> Result<(), Report<TraversalError>> {
        if self.phase.is_terminal() {
            return Err(TraversalError::ExecutionFinished { phase: self.phase }.into());
        }
        Ok(())
    }

    fn record(&mut self, event: ExecutionEvent) {
        if self.config.record_history {
            self.history.push(event);
        }
    }

    fn push_delta(&mut self, key: InstanceKey, state: NodeState) {
        self.deltas.push(StateDelta { key, state });
    }

    /// State of a task, workflow, or array sub-instance.
    fn dispatchable_state(&self, key: &InstanceKey, to: NodeState) -> Result<NodeState, Report<TraversalError>> {
        let unknown = || TraversalError::UnknownInstance { key: key.clone() };
        let run = self.runs.get(&key.node_id).ok_or_else(unknown)?;
        match (key.index, &run.progress) {
            (None, Progress::Dispatchable) => Ok(run.state),
            (Some(index), Progress::Array(Some(array))) => {
                array.states.get(index).copied().ok_or_else(|| unknown().into())
            }
            (Some(_), _) => Err(unknown().into()),
            (None, _) => Err(TraversalError::InvalidTransition {
                key: key.clone(),
                from: run.state,
                to,
            }
            .into()),
        }
    }

    /// Activates or skips Pending top-level nodes until nothing changes,
    /// then settles the phase.
    fn advance(&mut self) {
        while self.phase == ExecutionPhase::Running {
            let template = Arc::clone(&self.template);
            let mut changed = false;
            for node in template.nodes() {
                if self.phase != ExecutionPhase::Running {
                    break;
                }
                let node_id = node.id();
                if self.node_state(node_id) != Some(NodeState::Pending) {
                    continue;
                }
                let upstream: Vec<NodeState> = template
                    .graph()
                    .upstream(node_id)
                    .into_iter()
                    .filter(|id| !id.is_start())
                    .filter_map(|id| self.node_state(id))
                    .collect();
                match readiness(&upstream, self.config.skip_policy) {
                    Readiness::Wait => {}
                    Readiness::Activate => {
                        self.activate(node_id);
                        changed = true;
                    }
                    Readiness::Skip => {
                        self.skip(node_id);
                        changed = true;
                    }
                }
            }
            if !changed {
                break;
            }
        }
        self.settle();
    }

    fn settle(&mut self) {
        match self.phase {
            ExecutionPhase::Running => {
                if self.top_level_all(|s| s.is_terminal()) {
                    self.succeed();
                }
            }
            ExecutionPhase::Failing => {
                let busy = self.template.nodes().iter().any(|node| {
                    self.node_state(node.id())
                        .is_some_and(|s| matches!(s, NodeState::Ready | NodeState::Running))
                        && !self.awaiting_signal(node.id())
                });
                if self.template.metadata().on_failure == OnFailurePolicy::FailAfterExecutableNodesComplete
                    && !busy
                {
                    self.skip_top_level(|s| s == NodeState::Pending);
                    self.activate_failure_node();
                }
                let failure_node_done = self
                    .template
                    .failure_node()
                    .is_none_or(|node| self.node_state(node.id()).is_some_and(|s| s.is_terminal()));
                if self.failure_node_activated && failure_node_done {
                    self.phase = ExecutionPhase::Failed;
                    self.close_gates();
                    warn!(execution_id = %self.id, "execution failed");
                }
            }
            ExecutionPhase::Succeeded | ExecutionPhase::Failed | ExecutionPhase::Aborted => {}
        }
    }

    fn succeed(&mut self) {
        let template = Arc::clone(&self.template);
        let outputs: Result<LiteralMap, NodeFailure> = template
            .bindings()
            .outputs()
            .iter()
            .map(|(var, source)| Ok((var.clone(), self.resolve_source(source)?)))
            .collect();
        match outputs {
            Ok(outputs) => {
                self.outputs = Some(outputs);
                self.phase = ExecutionPhase::Succeeded;
                info!(execution_id = %self.id, "execution succeeded");
            }
            Err(failure) => {
                warn!(execution_id = %self.id, %failure, "workflow outputs could not be resolved");
                self.failure = Some(failure);
                self.phase = ExecutionPhase::Failed;
                self.close_gates();
            }
        }
    }

    fn top_level_all(&self, predicate: impl Fn(NodeState) -> bool) -> bool {
        self.template
            .nodes()
            .iter()
            .all(|node| self.node_state(node.id()).is_some_and(&predicate))
    }

    /// True for a Running node that only a delivered signal can finish: an
    /// approve or signal gate, or a branch whose selected case is one.
    fn awaiting_signal(&self, node_id: &NodeId) -> bool {
        if self.node_state(node_id) != Some(NodeState::Running) {
            return false;
        }
        match self.template.node(node_id).map(Node::target) {
            Some(NodeTarget::Gate(gate)) => gate.signal_id().is_some(),
            Some(NodeTarget::Branch(_)) => self
                .selected_candidate(node_id)
                .is_some_and(|candidate| self.awaiting_signal(candidate)),
            _ => false,
        }
    }

    fn skip_top_level(&mut self, predicate: impl Fn(NodeState) -> bool) {
        let template = Arc::clone(&self.template);
        for node in template.nodes() {
            if self.node_state(node.id()).is_some_and(&predicate) {
                self.skip(node.id());
            }
        }
    }

    fn activate_failure_node(&mut self) {
        if self.failure_node_activated {
            return;
        }
        self.failure_node_activated = true;
        let template = Arc::clone(&self.template);
        if let Some(node) = template.failure_node() {
            info!(node_id = %node.id(), "activating failure node");
            self.activate(node.id());
        }
    }

    fn activate(&mut self, node_id: &NodeId) {
        let template = Arc::clone(&self.template);
        let Some(node) = template.node(node_id) else {
            return;
        };
        match node.target() {
            NodeTarget::Task(_) | NodeTarget::Workflow(_) => match self.materialize(node_id) {
                Ok(inputs) => {
                    if let Some(run) = self.runs.get_mut(node_id) {
                        run.inputs = Some(inputs);
                        run.state = NodeState::Ready;
                    }
                    self.push_delta(InstanceKey::node(node_id), NodeState::Ready);
                }
                Err(failure) => self.finish(node_id, Err(failure)),
            },
            NodeTarget::Gate(gate) => self.open_gate(node_id, gate),
            NodeTarget::Branch(branch) => self.select_branch(node_id, branch),
            NodeTarget::Array(array) => self.expand_array(node_id, array),
        }
    }

    fn open_gate(&mut self, node_id: &NodeId, gate: &GateNode) {
        let deadline = match gate {
            GateNode::Sleep(condition) => Some(deadline_after(self.clock.now(), condition.duration)),
            GateNode::Approve(_) | GateNode::Signal(_) => None,
        };
        if let Some(run) = self.runs.get_mut(node_id) {
            run.state = NodeState::Running;
            run.progress = Progress::Gate {
                token: Some(self.cancel.child_token()),
                deadline,
            };
        }
        debug!(node_id = %node_id, "gate opened");

        if let Some(signal_id) = gate.signal_id()
            && let Some(value) = self.buffered.remove(signal_id)
        {
            self.resolve_gate(node_id, gate, value);
        }
    }

    fn resolve_gate(&mut self, node_id: &NodeId, gate: &GateNode, value: Option<Literal>) {
        let result = match gate {
            GateNode::Approve(condition) => match value {
                Some(Literal::Boolean(false)) => Err(NodeFailure::Rejected {
                    signal_id: condition.signal_id.clone(),
                }),
                _ => Ok(LiteralMap::new()),
            },
            GateNode::Signal(condition) => Ok(LiteralMap::from([(
                condition.output_variable_name.clone(),
                value.unwrap_or(Literal::None),
            )])),
            GateNode::Sleep(_) => Ok(LiteralMap::new()),
        };
        self.finish(node_id, result);
    }

    /// Evaluates the blocks in order and activates the first match, or the
    /// else node.
    fn select_branch(&mut self, node_id: &NodeId, branch: &BranchNode) {
        let inputs = match self.materialize(node_id) {
            Ok(inputs) => inputs,
            Err(failure) => {
                self.skip_candidates(branch, None);
                self.finish(node_id, Err(failure));
                return;
            }
        };

        let mut selected = None;
        for block in branch.if_else.blocks() {
            match block.condition.evaluate(&inputs) {
                Ok(true) => {
                    selected = Some(block.then_node.id().clone());
                    break;
                }
                Ok(false) => {}
                Err(error) => {
                    self.skip_candidates(branch, None);
                    self.finish(
                        node_id,
                        Err(NodeFailure::Condition {
                            reason: error.to_string(),
                        }),
                    );
                    return;
                }
            }
        }

        let selected = match (selected, &branch.if_else.default) {
            (Some(selected), _) => selected,
            (None, BranchDefault::ElseNode(node)) => node.id().clone(),
            (None, BranchDefault::Error(error)) => {
                self.skip_candidates(branch, None);
                self.finish(
                    node_id,
                    Err(NodeFailure::Embedded {
                        failed_node_id: error.failed_node_id.clone(),
                        message: error.message.clone(),
                    }),
                );
                return;
            }
        };

        debug!(node_id = %node_id, selected = %selected, "branch resolved");
        if let Some(run) = self.runs.get_mut(node_id) {
            run.state = NodeState::Running;
            run.inputs = Some(inputs);
            run.progress = Progress::Branch {
                selected: Some(selected.clone()),
            };
        }
        self.skip_candidates(branch, Some(&selected));
        self.activate(&selected);
    }

    fn skip_candidates(&mut self, branch: &BranchNode, keep: Option<&NodeId>) {
        for candidate in branch.if_else.candidates() {
            if Some(candidate.id()) != keep {
                self.skip(candidate.id());
            }
        }
    }

    fn expand_array(&mut self, node_id: &NodeId, array: &ArrayNode) {
        let inputs = match self.fan_out(node_id, array) {
            Ok(inputs) => inputs,
            Err(failure) => {
                self.finish(node_id, Err(failure));
                return;
            }
        };
        let total = inputs.len();
        let run = ArrayRun {
            parallelism: array.parallelism().unwrap_or(self.config.default_parallelism) as usize,
            required: array.required_successes(total),
            states: vec![NodeState::Pending; total],
            inputs,
            outputs: vec![None; total],
            outcomes: (array.execution_mode() == ExecutionMode::FullState).then(|| vec![None; total]),
            successes: 0,
            failures: 0,
        };
        debug!(
            node_id = %node_id,
            total,
            required = run.required,
            parallelism = run.parallelism,
            "array node expanded"
        );
        if let Some(node_run) = self.runs.get_mut(node_id) {
            node_run.state = NodeState::Running;
            node_run.progress = Progress::Array(Some(run));
        }
        self.settle_array(node_id);
    }

    /// Per-instance inputs: element `i` of every collection input, scalars
    /// broadcast, over the inner node's own inputs.
    fn fan_out(&self, node_id: &NodeId, array: &ArrayNode) -> Result<Vec<LiteralMap>, NodeFailure> {
        let shared = self.materialize(array.node().id())?;
        let outer = self.materialize(node_id)?;

        let mut total: Option<usize> = None;
        for (var, value) in &outer {
            if let Some(len) = value.collection_len() {
                match total {
                    Some(expected) if expected != len => {
                        return Err(NodeFailure::InputResolution {
                            reason: format!(
                                "collection input '{var}' has {len} elements, expected {expected}"
                            ),
                        });
                    }
                    _ => total = Some(len),
                }
            }
        }
        let Some(total) = total else {
            return Err(NodeFailure::InputResolution {
                reason: "array node has no collection input to fan out over".to_string(),
            });
        };
        if total > self.config.max_fanout {
            return Err(NodeFailure::InputResolution {
                reason: format!(
                    "fan-out of {total} exceeds the limit of {}",
                    self.config.max_fanout
                ),
            });
        }

        Ok((0..total)
            .map(|index| {
                let mut inputs = shared.clone();
                for (var, value) in &outer {
                    let value = match value {
                        Literal::Collection(items) => items.get(index).cloned().unwrap_or(Literal::None),
                        other => other.clone(),
                    };
                    inputs.insert(var.clone(), value);
                }
                inputs
            })
            .collect())
    }

    /// Finishes the array once its threshold is decided, otherwise admits
    /// more sub-instances.
    fn settle_array(&mut self, node_id: &NodeId) {
        let Some(run) = self.runs.get_mut(node_id) else {
            return;
        };
        if run.state.is_terminal() {
            return;
        }
        let Progress::Array(Some(array)) = &mut run.progress else {
            return;
        };

        match array.verdict() {
            Some(succeeded) => {
                let skipped = array.skip_unstarted();
                let result = if succeeded {
                    Ok(array.collect_outputs())
                } else {
                    Err(array.threshold_failure())
                };
                for index in skipped {
                    self.push_delta(InstanceKey::indexed(node_id, index), NodeState::Skipped);
                }
                self.finish(node_id, result);
            }
            None => {
                let admitted = array.admit();
                for index in admitted {
                    self.push_delta(InstanceKey::indexed(node_id, index), NodeState::Ready);
                }
            }
        }
    }

    fn complete_sub_instance(&mut self, node_id: &NodeId, index: usize, outcome: NodeOutcome) {
        let Some(run) = self.runs.get_mut(node_id) else {
            return;
        };
        let open = !run.state.is_terminal();
        if let Progress::Array(Some(array)) = &mut run.progress {
            array.record(index, outcome, open);
        }
        if open {
            self.settle_array(node_id);
        }
    }

    /// Moves a node to its final state and propagates the result to its
    /// branch, or to the on-failure policy for top-level nodes.
    fn finish(&mut self, node_id: &NodeId, result: Result<LiteralMap, NodeFailure>) {
        let Some(run) = self.runs.get_mut(node_id) else {
            return;
        };
        if run.state.is_terminal() {
            return;
        }
        match &result {
            Ok(outputs) => {
                run.state = NodeState::Succeeded;
                run.outputs = Some(outputs.clone());
                debug!(node_id = %node_id, "node succeeded");
            }
            Err(failure) => {
                run.state = NodeState::Failed;
                run.failure = Some(failure.clone());
                warn!(node_id = %node_id, %failure, "node failed");
            }
        }

        if let Some(parent) = run.parent.clone() {
            self.finish(&parent, result);
            return;
        }
        if let Err(failure) = result
            && self.template.is_top_level(node_id)
        {
            self.on_node_failed(failure);
        }
    }

    fn on_node_failed(&mut self, failure: NodeFailure) {
        if self.phase != ExecutionPhase::Running {
            return;
        }
        self.phase = ExecutionPhase::Failing;
        self.failure = Some(failure);
        let policy = self.template.metadata().on_failure;
        info!(execution_id = %self.id, ?policy, "execution failing");
        if policy == OnFailurePolicy::FailImmediately {
            self.skip_top_level(|s| matches!(s, NodeState::Pending | NodeState::Ready));
            self.activate_failure_node();
        }
    }

    /// Skips a Pending or Ready node and everything embedded in it.
    fn skip(&mut self, node_id: &NodeId) {
        let Some(run) = self.runs.get_mut(node_id) else {
            return;
        };
        if !matches!(run.state, NodeState::Pending | NodeState::Ready) {
            return;
        }
        run.state = NodeState::Skipped;
        self.push_delta(InstanceKey::node(node_id), NodeState::Skipped);

        let template = Arc::clone(&self.template);
        if let Some(NodeTarget::Branch(branch)) = template.node(node_id).map(Node::target) {
            self.skip_candidates(branch, None);
        }
    }

    fn skip_array_instances(&mut self, node_id: &NodeId) {
        let Some(run) = self.runs.get_mut(node_id) else {
            return;
        };
        if let Progress::Array(Some(array)) = &mut run.progress {
            for index in array.skip_unstarted() {
                self.deltas.push(StateDelta {
                    key: InstanceKey::indexed(node_id, index),
                    state: NodeState::Skipped,
                });
            }
        }
    }

    /// Cancels every gate wait; open gates end Skipped.
    fn close_gates(&mut self) {
        self.cancel.cancel();
        for node_id in self.order.clone() {
            let Some(run) = self.runs.get_mut(&node_id) else {
                continue;
            };
            if run.state == NodeState::Running && matches!(run.progress, Progress::Gate { .. }) {
                run.state = NodeState::Skipped;
                self.push_delta(InstanceKey::node(node_id), NodeState::Skipped);
            }
        }
    }

    fn materialize(&self, node_id: &NodeId) -> Result<LiteralMap, NodeFailure> {
        let Some(sources) = self.template.bindings().for_node(node_id) else {
            return Ok(LiteralMap::new());
        };
        sources
            .iter()
            .map(|(var, source)| Ok((var.clone(), self.resolve_source(source)?)))
            .collect()
    }

    fn resolve_source(&self, source: &Source) -> Result<Literal, NodeFailure> {
        match source {
            Source::WorkflowInput { var } => Ok(self.inputs.get(var).cloned().unwrap_or(Literal::None)),
            Source::Literal(literal) => Ok(literal.clone()),
            Source::NodeOutput { node_id, var } => {
                let run = self.runs.get(node_id).ok_or_else(|| NodeFailure::InputResolution {
                    reason: format!("unknown node '{node_id}'"),
                })?;
                match run.state {
                    NodeState::Succeeded => run
                        .outputs
                        .as_ref()
                        .and_then(|outputs| outputs.get(var))
                        .cloned()
                        .ok_or_else(|| NodeFailure::InputResolution {
                            reason: format!("node '{node_id}' produced no output '{var}'"),
                        }),
                    NodeState::Skipped if self.config.skip_policy == SkipPolicy::TreatAsSatisfied => {
                        Ok(Literal::None)
                    }
                    state => Err(NodeFailure::InputResolution {
                        reason: format!("node '{node_id}' is {state}"),
                    }),
                }
            }
            Source::Collection(items) => items
                .iter()
                .map(|item| self.resolve_source(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Literal::Collection),
            Source::Map(entries) => entries
                .iter()
                .map(|(key, item)| Ok((key.clone(), self.resolve_source(item)?)))
                .collect::<Result<BTreeMap<_, _>, _>>()
                .map(Literal::Map),
        }
    }
}

fn register(
    node: &Node,
    parent: Option<&NodeId>,
    runs: &mut HashMap<NodeId, NodeRun>,
    order: &mut Vec<NodeId>,
    gates: &mut HashMap<String, NodeId>,
) {
    order.push(node.id().clone());
    let progress = match node.target() {
        NodeTarget::Task(_) | NodeTarget::Workflow(_) => Progress::Dispatchable,
        NodeTarget::Gate(gate) => {
            if let Some(signal_id) = gate.signal_id() {
                gates.insert(signal_id.to_string(), node.id().clone());
            }
            Progress::Gate {
                token: None,
                deadline: None,
            }
        }
        NodeTarget::Branch(branch) => {
            for candidate in branch.if_else.candidates() {
                register(candidate, Some(node.id()), runs, order, gates);
            }
            Progress::Branch { selected: None }
        }
        // The inner node runs as indexed sub-instances of the array.
        NodeTarget::Array(_) => Progress::Array(None),
    };
    runs.insert(
        node.id().clone(),
        NodeRun {
            state: NodeState::Pending,
            inputs: None,
            outputs: None,
            failure: None,
            parent: parent.cloned(),
            progress,
        },
    );
}

fn check_inputs(interface: &TypedInterface, inputs: &LiteralMap) -> Result<(), Report<TraversalError>> {
    for (var, variable) in &interface.inputs {
        match inputs.get(var) {
            Some(value) if !value.conforms_to(&variable.ty) => {
                return Err(TraversalError::MissingInput {
                    var: var.clone(),
                    reason: format!("expected {} but got {}", variable.ty, value.kind_name()),
                }
                .into());
            }
            Some(_) => {}
            None if Literal::None.conforms_to(&variable.ty) => {}
            None => {
                return Err(TraversalError::MissingInput {
                    var: var.clone(),
                    reason: "required input was not provided".to_string(),
                }
                .into());
            }
        }
    }
    if let Some(var) = inputs.keys().find(|var| !interface.inputs.contains_key(*var)) {
        return Err(TraversalError::MissingInput {
            var: var.clone(),
            reason: "not declared by the workflow interface".to_string(),
        }
        .into());
    }
    Ok(())
}

fn check_signal_value(
    signal_id: &str,
    gate: &GateNode,
    value: Option<&Literal>,
) -> Result<(), Report<TraversalError>> {
    let mismatch = |expected: LiteralType, found: &str| TraversalError::SignalTypeMismatch {
        signal_id: signal_id.to_string(),
        expected,
        found: found.to_string(),
    };
    match (gate, value) {
        (GateNode::Approve(_), None | Some(Literal::Boolean(_))) => Ok(()),
        (GateNode::Approve(_), Some(other)) => Err(mismatch(LiteralType::Boolean, other.kind_name()).into()),
        (GateNode::Signal(condition), Some(value)) if value.conforms_to(&condition.ty) => Ok(()),
        (GateNode::Signal(condition), Some(value)) => {
            Err(mismatch(condition.ty.clone(), value.kind_name()).into())
        }
        (GateNode::Signal(condition), None) if Literal::None.conforms_to(&condition.ty) => Ok(()),
        (GateNode::Signal(condition), None) => Err(mismatch(condition.ty.clone(), "nothing").into()),
        (GateNode::Sleep(_), _) => Err(TraversalError::UnknownSignal {
            signal_id: signal_id.to_string(),
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::{Binding, BindingData};
    use crate::branch::{BooleanExpression, ComparisonOperator, Operand};
    use crate::interface::NoInterfaces;
    use crate::target::TaskNode;
    use crate::template::WorkflowMetadata;
    use skein_core::Identifier;

    fn task(id: &str) -> Node {
        Node::new(id, TaskNode::new(Identifier::task("p", "d", "t", "v1"))).expect("valid node")
    }

    fn workflow(id: &str) -> crate::template::WorkflowTemplateBuilder {
        WorkflowTemplate::builder(Identifier::workflow("p", "d", id, "v1"))
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(DateTime::<Utc>::UNIX_EPOCH))
    }

    fn start(template: WorkflowTemplate, inputs: LiteralMap) -> Execution {
        start_with(template, inputs, EngineConfig::default())
    }

    fn start_with(template: WorkflowTemplate, inputs: LiteralMap, config: EngineConfig) -> Execution {
        Execution::start(Arc::new(template), inputs, config, clock()).expect("start")
    }

    fn key(id: &str) -> InstanceKey {
        InstanceKey::node(id)
    }

    fn state(execution: &Execution, id: &str) -> NodeState {
        execution.node_state(&NodeId::from(id)).expect("known node")
    }

    fn outputs(pairs: &[(&str, Literal)]) -> LiteralMap {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn run(execution: &mut Execution, key: &InstanceKey, outcome: NodeOutcome) {
        execution.dispatch(key).expect("dispatch");
        execution.apply(key, outcome).expect("apply");
    }

    fn ready(deltas: &[StateDelta]) -> Vec<String> {
        deltas
            .iter()
            .filter(|d| d.state == NodeState::Ready)
            .map(|d| d.key.to_string())
            .collect()
    }

    fn skipped(deltas: &[StateDelta]) -> Vec<String> {
        deltas
            .iter()
            .filter(|d| d.state == NodeState::Skipped)
            .map(|d| d.key.to_string())
            .collect()
    }

    fn chain() -> WorkflowTemplate {
        workflow("chain")
            .with_interface(
                TypedInterface::new()
                    .with_input("a", LiteralType::Integer)
                    .with_output("result", LiteralType::Integer),
            )
            .with_node(task("n1").with_input(Binding::workflow_input("x", "a")))
            .with_node(
                task("n2")
                    .with_upstream("n1")
                    .with_input(Binding::promise("x", "n1", "o0")),
            )
            .with_output(Binding::promise("result", "n2", "o0"))
            .build(&NoInterfaces)
            .expect("valid template")
    }

    #[test]
    fn readiness_rules() {
        use NodeState::*;
        assert_eq!(readiness(&[], SkipPolicy::Propagate), Readiness::Activate);
        assert_eq!(readiness(&[Succeeded, Running], SkipPolicy::Propagate), Readiness::Wait);
        assert_eq!(readiness(&[Succeeded, Skipped], SkipPolicy::Propagate), Readiness::Skip);
        assert_eq!(
            readiness(&[Succeeded, Skipped], SkipPolicy::TreatAsSatisfied),
            Readiness::Activate
        );
        assert_eq!(readiness(&[Failed], SkipPolicy::TreatAsSatisfied), Readiness::Skip);
    }

    #[test]
    fn linear_workflow_runs_to_completion() {
        let mut execution = start(chain(), outputs(&[("a", Literal::Integer(2))]));
        assert_eq!(ready(&execution.poll()), vec!["n1"]);
        assert_eq!(
            execution.inputs(&key("n1")).expect("inputs"),
            outputs(&[("x", Literal::Integer(2))])
        );
        assert_eq!(state(&execution, "n2"), NodeState::Pending);

        run(
            &mut execution,
            &key("n1"),
            NodeOutcome::success(outputs(&[("o0", Literal::Integer(4))])),
        );
        assert_eq!(ready(&execution.poll()), vec!["n2"]);
        assert_eq!(
            execution.inputs(&key("n2")).expect("inputs"),
            outputs(&[("x", Literal::Integer(4))])
        );

        run(
            &mut execution,
            &key("n2"),
            NodeOutcome::success(outputs(&[("o0", Literal::Integer(16))])),
        );
        assert_eq!(execution.phase(), ExecutionPhase::Succeeded);
        assert_eq!(
            execution.outputs(),
            Some(&outputs(&[("result", Literal::Integer(16))]))
        );
    }

    #[test]
    fn start_checks_workflow_inputs() {
        let template = Arc::new(chain());
        let missing = Execution::start(Arc::clone(&template), LiteralMap::new(), EngineConfig::default(), clock())
            .expect_err("missing input");
        assert!(matches!(
            missing.current_context(),
            TraversalError::MissingInput { var, .. } if var == "a"
        ));

        let mistyped = Execution::start(
            Arc::clone(&template),
            outputs(&[("a", Literal::from("two"))]),
            EngineConfig::default(),
            clock(),
        )
        .expect_err("mistyped input");
        assert!(matches!(mistyped.current_context(), TraversalError::MissingInput { .. }));

        let undeclared = Execution::start(
            template,
            outputs(&[("a", Literal::Integer(1)), ("b", Literal::Integer(1))]),
            EngineConfig::default(),
            clock(),
        )
        .expect_err("undeclared input");
        assert!(matches!(
            undeclared.current_context(),
            TraversalError::MissingInput { var, .. } if var == "b"
        ));
    }

    #[test]
    fn apply_requires_dispatch() {
        let mut execution = start(chain(), outputs(&[("a", Literal::Integer(2))]));
        let err = execution
            .apply(&key("n1"), NodeOutcome::success(LiteralMap::new()))
            .expect_err("not running");
        assert_eq!(
            err.current_context(),
            &TraversalError::InvalidTransition {
                key: key("n1"),
                from: NodeState::Ready,
                to: NodeState::Succeeded,
            }
        );

        let err = execution.dispatch(&key("n2")).expect_err("pending");
        assert!(matches!(
            err.current_context(),
            TraversalError::InvalidTransition { from: NodeState::Pending, .. }
        ));

        let err = execution.dispatch(&key("missing")).expect_err("unknown");
        assert!(matches!(err.current_context(), TraversalError::UnknownInstance { .. }));
    }

    #[test]
    fn apply_is_idempotent() {
        let mut execution = start(chain(), outputs(&[("a", Literal::Integer(2))]));
        let first = NodeOutcome::success(outputs(&[("o0", Literal::Integer(4))]));
        run(&mut execution, &key("n1"), first);
        let history_len = execution.history().len();

        let err = execution
            .apply(&key("n1"), NodeOutcome::failure("late failure"))
            .expect_err("already terminal");
        assert_eq!(
            err.current_context(),
            &TraversalError::AlreadyTerminal {
                key: key("n1"),
                state: NodeState::Succeeded,
            }
        );
        assert_eq!(state(&execution, "n1"), NodeState::Succeeded);
        assert_eq!(
            execution.node_outputs(&NodeId::from("n1")),
            Some(&outputs(&[("o0", Literal::Integer(4))]))
        );
        assert_eq!(execution.phase(), ExecutionPhase::Running);
        assert_eq!(execution.history().len(), history_len);
    }

    fn x_equals(value: i64) -> BooleanExpression {
        BooleanExpression::compare(
            ComparisonOperator::Eq,
            Operand::Var("x".to_string()),
            Operand::Primitive(Literal::Integer(value)),
        )
    }

    fn branching(default_else: bool) -> WorkflowTemplate {
        let builder = BranchNode::when(x_equals(1), task("c1"))
            .or_when(x_equals(2), task("c2"))
            .or_when(x_equals(3), task("c3"));
        let branch = if default_else {
            builder.otherwise(task("fallback"))
        } else {
            builder.otherwise_fail("b", "no case matched")
        };
        workflow("branching")
            .with_interface(
                TypedInterface::new()
                    .with_input("x", LiteralType::Integer)
                    .with_output("result", LiteralType::Integer),
            )
            .with_node(
                Node::new("b", branch)
                    .expect("valid node")
                    .with_input(Binding::workflow_input("x", "x")),
            )
            .with_node(
                task("after")
                    .with_upstream("b")
                    .with_input(Binding::promise("v", "b", "o0")),
            )
            .with_output(Binding::promise("result", "after", "o0"))
            .build(&NoInterfaces)
            .expect("valid template")
    }

    #[test]
    fn branch_selects_first_true_case() {
        let mut execution = start(branching(true), outputs(&[("x", Literal::Integer(2))]));
        let deltas = execution.poll();
        assert_eq!(ready(&deltas), vec!["c2"]);
        assert_eq!(skipped(&deltas), vec!["c1", "c3", "fallback"]);
        assert_eq!(state(&execution, "b"), NodeState::Running);
        assert_eq!(
            execution.selected_candidate(&NodeId::from("b")),
            Some(&NodeId::from("c2"))
        );

        run(
            &mut execution,
            &key("c2"),
            NodeOutcome::success(outputs(&[("o0", Literal::Integer(7))])),
        );
        assert_eq!(state(&execution, "b"), NodeState::Succeeded);
        assert_eq!(ready(&execution.poll()), vec!["after"]);
        assert_eq!(
            execution.inputs(&key("after")).expect("inputs"),
            outputs(&[("v", Literal::Integer(7))])
        );
    }

    #[test]
    fn branch_falls_back_to_else_node() {
        let mut execution = start(branching(true), outputs(&[("x", Literal::Integer(9))]));
        let deltas = execution.poll();
        assert_eq!(ready(&deltas), vec!["fallback"]);
        assert_eq!(skipped(&deltas), vec!["c1", "c2", "c3"]);
    }

    #[test]
    fn branch_without_match_fails_with_embedded_error() {
        let execution = start(branching(false), outputs(&[("x", Literal::Integer(9))]));
        assert_eq!(state(&execution, "b"), NodeState::Failed);
        assert_eq!(
            execution.node_failure(&NodeId::from("b")),
            Some(&NodeFailure::Embedded {
                failed_node_id: NodeId::from("b"),
                message: "no case matched".to_string(),
            })
        );
        assert_eq!(state(&execution, "after"), NodeState::Skipped);
        assert_eq!(execution.phase(), ExecutionPhase::Failed);
    }

    #[test]
    fn branch_child_failure_fails_branch() {
        let mut execution = start(branching(true), outputs(&[("x", Literal::Integer(1))]));
        run(&mut execution, &key("c1"), NodeOutcome::failure("boom"));
        assert_eq!(state(&execution, "b"), NodeState::Failed);
        assert_eq!(
            execution.failure(),
            Some(&NodeFailure::Reported {
                message: "boom".to_string()
            })
        );
        assert_eq!(execution.phase(), ExecutionPhase::Failed);
    }

    fn mapped(array: ArrayNode) -> WorkflowTemplate {
        workflow("mapped")
            .with_interface(
                TypedInterface::new()
                    .with_input("xs", LiteralType::collection_of(LiteralType::Integer))
                    .with_output("ys", LiteralType::collection_of(LiteralType::Integer)),
            )
            .with_node(
                Node::new("arr", array)
                    .expect("valid node")
                    .with_input(Binding::workflow_input("x", "xs"))
                    .with_input(Binding::literal("factor", Literal::Integer(3))),
            )
            .with_output(Binding::promise("ys", "arr", "y"))
            .build(&NoInterfaces)
            .expect("valid template")
    }

    fn ten() -> LiteralMap {
        outputs(&[(
            "xs",
            Literal::Collection((0..10).map(Literal::Integer).collect()),
        )])
    }

    fn dispatch_all(execution: &mut Execution) -> Vec<InstanceKey> {
        let keys: Vec<InstanceKey> = execution
            .poll()
            .into_iter()
            .filter(|d| d.state == NodeState::Ready)
            .map(|d| d.key)
            .collect();
        for key in &keys {
            execution.dispatch(key).expect("dispatch");
        }
        keys
    }

    #[test]
    fn array_succeeds_once_min_successes_reached() {
        let template = mapped(ArrayNode::new(task("inner")).with_min_successes(6));
        let mut execution = start(template, ten());
        let keys = dispatch_all(&mut execution);
        assert_eq!(keys.len(), 10);
        assert_eq!(
            execution.inputs(&InstanceKey::indexed("arr", 4)).expect("inputs"),
            outputs(&[("factor", Literal::Integer(3)), ("x", Literal::Integer(4))])
        );

        for index in 0..4 {
            execution
                .apply(&InstanceKey::indexed("arr", index), NodeOutcome::failure("bad"))
                .expect("apply");
        }
        for index in 4..9 {
            execution
                .apply(
                    &InstanceKey::indexed("arr", index),
                    NodeOutcome::success(outputs(&[("y", Literal::Integer(index as i64))])),
                )
                .expect("apply");
        }
        assert_eq!(state(&execution, "arr"), NodeState::Running);

        execution
            .apply(
                &InstanceKey::indexed("arr", 9),
                NodeOutcome::success(outputs(&[("y", Literal::Integer(9))])),
            )
            .expect("apply");
        assert_eq!(state(&execution, "arr"), NodeState::Succeeded);
        assert_eq!(execution.phase(), ExecutionPhase::Succeeded);

        let progress = execution.array_progress(&NodeId::from("arr")).expect("expanded");
        assert_eq!(progress.successes, 6);
        assert_eq!(progress.failures, 4);
        assert_eq!(progress.required, 6);

        let ys = execution.outputs().and_then(|o| o.get("ys")).expect("ys");
        let Literal::Collection(items) = ys else {
            panic!("expected a collection, got {ys:?}");
        };
        assert_eq!(items.len(), 10);
        assert_eq!(items[0], Literal::None);
        assert_eq!(items[9], Literal::Integer(9));
    }

    #[test]
    fn array_fails_when_ratio_becomes_unreachable() {
        let template = mapped(ArrayNode::new(task("inner")).with_min_success_ratio(0.5));
        let mut execution = start(template, ten());
        dispatch_all(&mut execution);

        for index in 0..5 {
            execution
                .apply(&InstanceKey::indexed("arr", index), NodeOutcome::failure("bad"))
                .expect("apply");
        }
        assert_eq!(state(&execution, "arr"), NodeState::Running);

        execution
            .apply(&InstanceKey::indexed("arr", 5), NodeOutcome::failure("bad"))
            .expect("apply");
        assert_eq!(state(&execution, "arr"), NodeState::Failed);
        assert_eq!(
            execution.node_failure(&NodeId::from("arr")),
            Some(&NodeFailure::ThresholdUnreachable {
                successes: 0,
                failures: 6,
                required: 5,
                total: 10,
            })
        );
        assert_eq!(execution.phase(), ExecutionPhase::Failed);

        // Stragglers are recorded without moving the counters.
        execution
            .apply(
                &InstanceKey::indexed("arr", 6),
                NodeOutcome::success(LiteralMap::new()),
            )
            .expect("late outcome");
        let progress = execution.array_progress(&NodeId::from("arr")).expect("expanded");
        assert_eq!(progress.successes, 0);
        assert_eq!(progress.failures, 6);
    }

    #[test]
    fn array_apply_is_never_double_counted() {
        let template = mapped(ArrayNode::new(task("inner")));
        let mut execution = start(template, ten());
        dispatch_all(&mut execution);
        let first = InstanceKey::indexed("arr", 0);
        execution
            .apply(&first, NodeOutcome::success(LiteralMap::new()))
            .expect("apply");
        let err = execution
            .apply(&first, NodeOutcome::success(LiteralMap::new()))
            .expect_err("duplicate");
        assert!(matches!(err.current_context(), TraversalError::AlreadyTerminal { .. }));
        let progress = execution.array_progress(&NodeId::from("arr")).expect("expanded");
        assert_eq!(progress.successes, 1);
    }

    #[test]
    fn array_respects_parallelism() {
        let template = mapped(ArrayNode::new(task("inner")).with_parallelism(2));
        let mut execution = start(template, ten());
        let arr = NodeId::from("arr");
        assert_eq!(ready(&execution.poll()), vec!["arr[0]", "arr[1]"]);
        assert_eq!(execution.available_capacity(&arr).expect("array"), 0);

        let first = InstanceKey::indexed("arr", 0);
        run(&mut execution, &first, NodeOutcome::success(LiteralMap::new()));
        assert_eq!(ready(&execution.poll()), vec!["arr[2]"]);
        assert_eq!(
            execution.state(&InstanceKey::indexed("arr", 3)),
            Some(NodeState::Pending)
        );
        assert!(execution.available_capacity(&NodeId::from("missing")).is_err());
    }

    #[test]
    fn array_without_parallelism_uses_engine_default() {
        let template = mapped(ArrayNode::new(task("inner")));
        let config = EngineConfig {
            default_parallelism: 3,
            ..EngineConfig::default()
        };
        let mut execution = start_with(template, ten(), config);
        assert_eq!(ready(&execution.poll()).len(), 3);
    }

    #[test]
    fn array_fan_out_limit() {
        let template = mapped(ArrayNode::new(task("inner")));
        let config = EngineConfig {
            max_fanout: 5,
            ..EngineConfig::default()
        };
        let execution = start_with(template, ten(), config);
        assert!(matches!(
            execution.node_failure(&NodeId::from("arr")),
            Some(NodeFailure::InputResolution { .. })
        ));
    }

    #[test]
    fn full_state_keeps_instance_outcomes() {
        let template = mapped(ArrayNode::new(task("inner")).with_execution_mode(ExecutionMode::FullState));
        let mut execution = start(template, ten());
        dispatch_all(&mut execution);
        let first = InstanceKey::indexed("arr", 0);
        execution
            .apply(&first, NodeOutcome::failure("bad input"))
            .expect("apply");
        assert_eq!(
            execution.instance_outcome(&first),
            Some(&NodeOutcome::failure("bad input"))
        );

        let minimal = mapped(ArrayNode::new(task("inner")));
        let mut execution = start(minimal, ten());
        dispatch_all(&mut execution);
        execution
            .apply(&first, NodeOutcome::failure("bad input"))
            .expect("apply");
        assert_eq!(execution.instance_outcome(&first), None);
    }

    fn parallel(policy: OnFailurePolicy) -> WorkflowTemplate {
        workflow("parallel")
            .with_metadata(WorkflowMetadata::default().with_on_failure(policy))
            .with_node(task("a"))
            .with_node(task("b"))
            .with_node(task("d"))
            .with_node(task("c").with_upstream("a"))
            .with_failure_node(task("cleanup"))
            .build(&NoInterfaces)
            .expect("valid template")
    }

    #[test]
    fn fail_immediately_skips_waiting_nodes() {
        let mut execution = start(parallel(OnFailurePolicy::FailImmediately), LiteralMap::new());
        assert_eq!(ready(&execution.poll()), vec!["a", "b", "d"]);
        execution.dispatch(&key("a")).expect("dispatch");
        execution.dispatch(&key("b")).expect("dispatch");

        execution
            .apply(&key("a"), NodeOutcome::failure("boom"))
            .expect("apply");
        let deltas = execution.poll();
        assert_eq!(skipped(&deltas), vec!["d", "c"]);
        assert_eq!(ready(&deltas), vec!["cleanup"]);
        assert_eq!(state(&execution, "b"), NodeState::Running);
        assert_eq!(execution.phase(), ExecutionPhase::Failing);

        run(&mut execution, &key("cleanup"), NodeOutcome::success(LiteralMap::new()));
        assert_eq!(execution.phase(), ExecutionPhase::Failed);

        // The straggler's result is still recorded.
        execution
            .apply(&key("b"), NodeOutcome::success(LiteralMap::new()))
            .expect("late outcome");
        assert_eq!(state(&execution, "b"), NodeState::Succeeded);
        assert_eq!(execution.phase(), ExecutionPhase::Failed);
        assert!(matches!(
            execution.dispatch(&key("cleanup")).expect_err("finished").current_context(),
            TraversalError::ExecutionFinished { phase: ExecutionPhase::Failed }
        ));
    }

    #[test]
    fn fail_after_executable_nodes_complete_does_not_wait_for_signals() {
        let template = workflow("approval")
            .with_metadata(
                WorkflowMetadata::default().with_on_failure(OnFailurePolicy::FailAfterExecutableNodesComplete),
            )
            .with_node(task("a"))
            .with_node(Node::new("approval", GateNode::approve("go")).expect("valid node"))
            .with_node(
                Node::new("wait", GateNode::sleep(Duration::from_secs(60)))
                    .expect("valid node"),
            )
            .with_failure_node(task("cleanup"))
            .build(&NoInterfaces)
            .expect("valid template");
        let clock = clock();
        let mut execution =
            Execution::start(Arc::new(template), LiteralMap::new(), EngineConfig::default(), clock.clone())
                .expect("start");
        let token = execution.gate_token(&NodeId::from("approval")).expect("open gate");
        assert_eq!(ready(&execution.poll()), vec!["a"]);

        run(&mut execution, &key("a"), NodeOutcome::failure("boom"));
        assert_eq!(execution.phase(), ExecutionPhase::Failing);
        // The sleep gate finishes on its own, so the run drains it first.
        assert!(ready(&execution.poll()).is_empty());

        clock.advance(Duration::from_secs(61));
        assert_eq!(execution.tick(), vec![NodeId::from("wait")]);
        assert_eq!(ready(&execution.poll()), vec!["cleanup"]);
        assert_eq!(state(&execution, "approval"), NodeState::Running);

        run(&mut execution, &key("cleanup"), NodeOutcome::success(LiteralMap::new()));
        assert_eq!(execution.phase(), ExecutionPhase::Failed);
        assert_eq!(state(&execution, "approval"), NodeState::Skipped);
        assert!(token.is_cancelled());
    }

    #[test]
    fn fail_after_executable_nodes_complete_drains_first() {
        let mut execution = start(
            parallel(OnFailurePolicy::FailAfterExecutableNodesComplete),
            LiteralMap::new(),
        );
        execution.poll();
        execution.dispatch(&key("a")).expect("dispatch");
        execution.dispatch(&key("b")).expect("dispatch");

        execution
            .apply(&key("a"), NodeOutcome::failure("boom"))
            .expect("apply");
        assert!(execution.poll().is_empty());
        assert_eq!(state(&execution, "c"), NodeState::Pending);
        assert_eq!(state(&execution, "d"), NodeState::Ready);

        execution
            .apply(&key("b"), NodeOutcome::success(LiteralMap::new()))
            .expect("apply");
        assert!(execution.poll().is_empty());

        run(&mut execution, &key("d"), NodeOutcome::success(LiteralMap::new()));
        let deltas = execution.poll();
        assert_eq!(skipped(&deltas), vec!["c"]);
        assert_eq!(ready(&deltas), vec!["cleanup"]);

        run(&mut execution, &key("cleanup"), NodeOutcome::success(LiteralMap::new()));
        assert_eq!(execution.phase(), ExecutionPhase::Failed);
    }

    fn gated() -> WorkflowTemplate {
        workflow("gated")
            .with_interface(TypedInterface::new().with_output("answer", LiteralType::Integer))
            .with_node(Node::new("approval", GateNode::approve("go")).expect("valid node"))
            .with_node(
                Node::new("wait", GateNode::sleep(Duration::from_secs(60)))
                    .expect("valid node")
                    .with_upstream("approval"),
            )
            .with_node(
                Node::new("ask", GateNode::signal("answer", LiteralType::Integer, "value"))
                    .expect("valid node")
                    .with_upstream("wait"),
            )
            .with_output(Binding::promise("answer", "ask", "value"))
            .build(&NoInterfaces)
            .expect("valid template")
    }

    #[test]
    fn gates_wait_for_signals_and_time() {
        let clock = clock();
        let mut execution =
            Execution::start(Arc::new(gated()), LiteralMap::new(), EngineConfig::default(), clock.clone())
                .expect("start");
        assert_eq!(state(&execution, "approval"), NodeState::Running);
        assert!(execution.gate_token(&NodeId::from("approval")).is_some());

        // Arrives before the signal gate opens.
        execution
            .satisfy("answer", Some(Literal::Integer(42)))
            .expect("buffered");
        execution.satisfy("go", None).expect("approve");
        assert_eq!(state(&execution, "wait"), NodeState::Running);
        assert_eq!(
            execution.next_deadline(),
            Some(DateTime::<Utc>::UNIX_EPOCH + TimeDelta::seconds(60))
        );

        assert!(execution.tick().is_empty());
        clock.advance(Duration::from_secs(61));
        assert_eq!(execution.tick(), vec![NodeId::from("wait")]);

        assert_eq!(state(&execution, "ask"), NodeState::Succeeded);
        assert_eq!(execution.phase(), ExecutionPhase::Succeeded);
        assert_eq!(
            execution.outputs(),
            Some(&outputs(&[("answer", Literal::Integer(42))]))
        );
    }

    #[test]
    fn signal_errors() {
        let mut execution = start(gated(), LiteralMap::new());
        let err = execution
            .satisfy("answer", Some(Literal::from("forty-two")))
            .expect_err("mistyped");
        assert!(matches!(
            err.current_context(),
            TraversalError::SignalTypeMismatch { found, .. } if found == "string"
        ));
        let err = execution.satisfy("nobody", None).expect_err("unknown");
        assert!(matches!(err.current_context(), TraversalError::UnknownSignal { .. }));

        execution.satisfy("go", None).expect("approve");
        let err = execution.satisfy("go", None).expect_err("already approved");
        assert!(matches!(err.current_context(), TraversalError::AlreadyTerminal { .. }));
    }

    #[test]
    fn rejected_approval_fails_gate() {
        let mut execution = start(gated(), LiteralMap::new());
        execution
            .satisfy("go", Some(Literal::Boolean(false)))
            .expect("delivered");
        assert_eq!(
            execution.node_failure(&NodeId::from("approval")),
            Some(&NodeFailure::Rejected {
                signal_id: "go".to_string()
            })
        );
        assert_eq!(execution.phase(), ExecutionPhase::Failed);
    }

    #[test]
    fn abort_cancels_gates_and_skips_waiting_nodes() {
        let mut execution = start(gated(), LiteralMap::new());
        let token = execution.gate_token(&NodeId::from("approval")).expect("open gate");
        execution.abort("operator request").expect("abort");
        assert!(token.is_cancelled());
        assert_eq!(execution.phase(), ExecutionPhase::Aborted);
        assert_eq!(state(&execution, "approval"), NodeState::Skipped);
        assert_eq!(state(&execution, "wait"), NodeState::Skipped);
        assert!(matches!(
            execution.abort("again").expect_err("finished").current_context(),
            TraversalError::ExecutionFinished { phase: ExecutionPhase::Aborted }
        ));
    }

    #[test]
    fn replay_rebuilds_identical_state() {
        let template = Arc::new(branching(true));
        let inputs = outputs(&[("x", Literal::Integer(2))]);
        let mut original =
            Execution::start(Arc::clone(&template), inputs.clone(), EngineConfig::default(), clock())
                .expect("start");
        run(
            &mut original,
            &key("c2"),
            NodeOutcome::success(outputs(&[("o0", Literal::Integer(7))])),
        );
        original.dispatch(&key("after")).expect("dispatch");

        let replayed = Execution::replay(
            original.id(),
            template,
            inputs,
            EngineConfig::default(),
            clock(),
            original.history().to_vec(),
        )
        .expect("replay");

        assert_eq!(replayed.id(), original.id());
        assert_eq!(replayed.phase(), original.phase());
        assert_eq!(replayed.history(), original.history());
        for id in ["b", "c1", "c2", "c3", "fallback", "after"] {
            assert_eq!(state(&replayed, id), state(&original, id), "state of {id}");
        }
        assert_eq!(
            replayed.node_outputs(&NodeId::from("b")),
            original.node_outputs(&NodeId::from("b"))
        );
    }

    #[test]
    fn replay_rejects_inconsistent_history() {
        let events = vec![ExecutionEvent::NodeCompleted {
            key: key("n1"),
            outcome: NodeOutcome::success(LiteralMap::new()),
        }];
        let err = Execution::replay(
            ExecutionId::new(),
            Arc::new(chain()),
            outputs(&[("a", Literal::Integer(1))]),
            EngineConfig::default(),
            clock(),
            events,
        )
        .expect_err("not dispatched");
        assert!(matches!(err.current_context(), TraversalError::InvalidTransition { .. }));
    }

    #[test]
    fn collection_bindings_materialize() {
        let template = workflow("collect")
            .with_node(task("a"))
            .with_node(task("b").with_upstream("a").with_input(Binding::new(
                "pair",
                BindingData::Collection(vec![
                    BindingData::Scalar(Literal::Integer(1)),
                    BindingData::Promise(crate::binding::OutputReference::new("a", "o0")),
                ]),
            )))
            .build(&NoInterfaces)
            .expect("valid template");
        let mut execution = start(template, LiteralMap::new());
        run(
            &mut execution,
            &key("a"),
            NodeOutcome::success(outputs(&[("o0", Literal::Integer(2))])),
        );
        assert_eq!(
            execution.inputs(&key("b")).expect("inputs"),
            outputs(&[(
                "pair",
                Literal::Collection(vec![Literal::Integer(1), Literal::Integer(2)])
            )])
        );
    }

    #[test]
    fn missing_upstream_output_fails_consumer() {
        let mut execution = start(chain(), outputs(&[("a", Literal::Integer(2))]));
        run(&mut execution, &key("n1"), NodeOutcome::success(LiteralMap::new()));
        assert!(matches!(
            execution.node_failure(&NodeId::from("n2")),
            Some(NodeFailure::InputResolution { .. })
        ));
        assert_eq!(execution.phase(), ExecutionPhase::Failed);
    }
}
