//! Execution agent contract.
//!
//! The agent runs compiled units in a hosted process. Results do not come back
//! from [`ExecutionAgent::evaluate`]; they arrive later as [`AgentEvent`]s on
//! the agent's event stream, tagged with the originating cell.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::workspace::{AssemblyReference, CompiledUnit, EvaluationContextId, WorkspaceCellId};

/// One frame of a remote stack trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    pub method: String,
    pub file: Option<String>,
    pub line: Option<u32>,
    /// Frame belongs to the agent's own evaluation machinery.
    #[serde(default)]
    pub is_host_frame: bool,
}

/// A structured exception raised by evaluated code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteException {
    pub type_name: String,
    pub message: String,
    #[serde(default)]
    pub stack_trace: Vec<StackFrame>,
    #[serde(default)]
    pub inner: Option<Box<RemoteException>>,
}

impl RemoteException {
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
            stack_trace: Vec::new(),
            inner: None,
        }
    }

    /// Copy of the exception with host frames removed, for display.
    pub fn filtered(&self) -> Self {
        Self {
            type_name: self.type_name.clone(),
            message: self.message.clone(),
            stack_trace: self
                .stack_trace
                .iter()
                .filter(|frame| !frame.is_host_frame)
                .cloned()
                .collect(),
            inner: self.inner.as_ref().map(|inner| Box::new(inner.filtered())),
        }
    }
}

impl std::fmt::Display for RemoteException {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.type_name, self.message)
    }
}

/// Agent failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AgentError {
    /// Evaluated code raised; the agent itself is fine.
    #[error("remote exception: {0}")]
    Remote(RemoteException),

    /// The agent process or its connection died.
    #[error("agent terminated: {0}")]
    Terminated(String),

    #[error("agent not connected")]
    NotConnected,
}

/// How a rendered result combines with what the view already shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultHandling {
    #[default]
    Replace,
    Append,
}

/// A value produced by an evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ResultValue {
    /// Reserved sentinel asking the front end to clear previous results.
    Clear,
    /// A represented value.
    Value(serde_json::Value),
}

impl ResultValue {
    pub fn is_clear(&self) -> bool {
        matches!(self, Self::Clear)
    }
}

/// Completion of an evaluation, delivered asynchronously.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationEvent {
    pub cell_id: WorkspaceCellId,
    pub result: Option<ResultValue>,
    pub exception: Option<RemoteException>,
    pub interrupted: bool,
    /// Culture tag the value was formatted with (e.g. `en-US`).
    pub culture: Option<String>,
    pub duration: Duration,
    #[serde(default)]
    pub handling: ResultHandling,
}

impl EvaluationEvent {
    pub fn value(cell_id: WorkspaceCellId, value: serde_json::Value) -> Self {
        Self {
            cell_id,
            result: Some(ResultValue::Value(value)),
            exception: None,
            interrupted: false,
            culture: None,
            duration: Duration::ZERO,
            handling: ResultHandling::Replace,
        }
    }
}

/// Output captured from stdout/stderr while a cell ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedOutputSegment {
    pub cell_id: WorkspaceCellId,
    pub bytes: Vec<u8>,
}

impl CapturedOutputSegment {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// Events emitted by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    Evaluation(EvaluationEvent),
    CapturedOutput(CapturedOutputSegment),
}

/// The hosted process code cells are executed in.
#[async_trait]
pub trait ExecutionAgent: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Hand over the event stream. Only the first caller receives it.
    fn take_event_stream(&self) -> Option<mpsc::UnboundedReceiver<AgentEvent>>;

    /// Discard all state accumulated by previous evaluations.
    async fn reset_state(&self) -> Result<(), AgentError>;

    async fn load_assemblies(
        &self,
        context: EvaluationContextId,
        assemblies: &[AssemblyReference],
    ) -> Result<(), AgentError>;

    /// Run a compiled unit. Completion is reported on the event stream.
    async fn evaluate(&self, unit: &CompiledUnit) -> Result<(), AgentError>;

    async fn abort_evaluation(&self, context: EvaluationContextId) -> Result<(), AgentError>;
}
