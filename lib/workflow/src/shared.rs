//! Single-writer access to an execution shared between tasks.
//!
//! [`SharedExecution`] serializes every transition behind a
//! `tokio::sync::Mutex` and publishes the events each transition recorded to
//! an [`EventSink`] before the lock is released, so sinks observe events in
//! the order the engine accepted them.

use crate::envelope::Envelope;
use crate::error::TraversalError;
use crate::execution::{ExecutionEvent, ExecutionPhase, InstanceKey, NodeOutcome, StateDelta};
use crate::literal::{Literal, LiteralMap};
use crate::node::NodeId;
use crate::traversal::Execution;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rootcause::Report;
use serde::{Deserialize, Serialize};
use skein_core::{EventId, ExecutionId, Result};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

/// A published execution event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: EventId,
    pub execution_id: ExecutionId,
    /// Position in the execution's history, starting at zero.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub event: ExecutionEvent,
}

/// Errors from an event sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// The record could not be encoded.
    Encoding { details: String },
    /// The sink could not accept the record.
    Unavailable { details: String },
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encoding { details } => write!(f, "failed to encode event: {details}"),
            Self::Unavailable { details } => write!(f, "event sink unavailable: {details}"),
        }
    }
}

impl std::error::Error for SinkError {}

/// Receives the events of an execution, in order.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Publishes one record.
    async fn publish(&self, record: Envelope<EventRecord>) -> Result<(), SinkError>;
}

/// Errors from [`SharedExecution`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SharedError {
    /// The engine rejected the transition; nothing was published.
    Transition(TraversalError),
    /// The transition was applied but its event could not be published.
    /// Publishing resumes from `sequence` on the next call.
    Publish { sequence: u64, source: SinkError },
}

impl fmt::Display for SharedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transition(error) => write!(f, "transition rejected: {error}"),
            Self::Publish { sequence, source } => {
                write!(f, "failed to publish event {sequence}: {source}")
            }
        }
    }
}

impl std::error::Error for SharedError {}

struct Shared {
    execution: Execution,
    /// Number of history events already handed to the sink.
    published: usize,
}

/// An execution behind an async mutex, publishing as it goes.
#[derive(Clone)]
pub struct SharedExecution {
    inner: Arc<Mutex<Shared>>,
    sink: Arc<dyn EventSink>,
}

impl fmt::Debug for SharedExecution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedExecution").finish_non_exhaustive()
    }
}

impl SharedExecution {
    /// Wraps an execution. Events already in its history count as
    /// published.
    #[must_use]
    pub fn new(execution: Execution, sink: Arc<dyn EventSink>) -> Self {
        let published = execution.history().len();
        Self {
            inner: Arc::new(Mutex::new(Shared {
                execution,
                published,
            })),
            sink,
        }
    }

    /// Runs a read-only closure against the execution.
    pub async fn read<R>(&self, f: impl FnOnce(&Execution) -> R) -> R {
        let shared = self.inner.lock().await;
        f(&shared.execution)
    }

    pub async fn phase(&self) -> ExecutionPhase {
        self.read(Execution::phase).await
    }

    /// Drains pending Ready and Skipped transitions.
    pub async fn poll(&self) -> Vec<StateDelta> {
        self.inner.lock().await.execution.poll()
    }

    /// Materialized inputs of a Ready or Running instance.
    ///
    /// # Errors
    ///
    /// See [`Execution::inputs`].
    pub async fn inputs(&self, key: &InstanceKey) -> Result<LiteralMap, SharedError> {
        let shared = self.inner.lock().await;
        shared.execution.inputs(key).map_err(rejected)
    }

    /// See [`Execution::dispatch`].
    ///
    /// # Errors
    ///
    /// Returns [`SharedError::Transition`] if the engine rejects the
    /// transition and [`SharedError::Publish`] if the sink fails.
    pub async fn dispatch(&self, key: &InstanceKey) -> Result<(), SharedError> {
        self.transition(|execution| execution.dispatch(key)).await
    }

    /// See [`Execution::apply`].
    ///
    /// # Errors
    ///
    /// Returns [`SharedError::Transition`] if the engine rejects the
    /// transition and [`SharedError::Publish`] if the sink fails.
    #[instrument(skip(self, key, outcome), fields(key = %key))]
    pub async fn apply(&self, key: &InstanceKey, outcome: NodeOutcome) -> Result<(), SharedError> {
        self.transition(|execution| execution.apply(key, outcome)).await
    }

    /// See [`Execution::satisfy`].
    ///
    /// # Errors
    ///
    /// Returns [`SharedError::Transition`] if the engine rejects the signal
    /// and [`SharedError::Publish`] if the sink fails.
    pub async fn satisfy(&self, signal_id: &str, value: Option<Literal>) -> Result<(), SharedError> {
        self.transition(|execution| execution.satisfy(signal_id, value)).await
    }

    /// See [`Execution::tick`].
    ///
    /// # Errors
    ///
    /// Returns [`SharedError::Publish`] if the sink fails.
    pub async fn tick(&self) -> Result<Vec<NodeId>, SharedError> {
        self.transition(|execution| Ok(execution.tick())).await
    }

    /// See [`Execution::abort`].
    ///
    /// # Errors
    ///
    /// Returns [`SharedError::Transition`] if the execution already finished
    /// and [`SharedError::Publish`] if the sink fails.
    pub async fn abort(&self, reason: impl Into<String> + Send) -> Result<(), SharedError> {
        self.transition(|execution| execution.abort(reason)).await
    }

    async fn transition<R>(
        &self,
        f: impl FnOnce(&mut Execution) -> Result<R, TraversalError> + Send,
    ) -> Result<R, SharedError> {
        let mut shared = self.inner.lock().await;
        let value = f(&mut shared.execution).map_err(rejected)?;
        self.publish_pending(&mut shared).await?;
        Ok(value)
    }

    async fn publish_pending(&self, shared: &mut Shared) -> Result<(), SharedError> {
        let pending = shared
            .execution
            .history()
            .get(shared.published..)
            .map(<[ExecutionEvent]>::to_vec)
            .unwrap_or_default();
        for event in pending {
            let sequence = shared.published as u64;
            let record = EventRecord {
                id: EventId::new(),
                execution_id: shared.execution.id(),
                sequence,
                timestamp: shared.execution.clock().now(),
                event,
            };
            self.sink
                .publish(Envelope::new(record))
                .await
                .map_err(|report| SharedError::Publish {
                    sequence,
                    source: report.current_context().clone(),
                })?;
            shared.published += 1;
            debug!(sequence, "event published");
        }
        Ok(())
    }
}

fn rejected(report: Report<TraversalError>) -> Report<SharedError> {
    SharedError::Transition(report.current_context().clone()).into()
}
