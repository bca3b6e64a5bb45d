//! Core engine for slate notebooks.
//!
//! This crate provides:
//! - The ordered cell sequence of a document
//! - Per-cell evaluation state and the registry owning it
//! - The evaluation orchestrator (upstream-then-downstream plans, single-flight
//!   compile/diagnose/execute pipeline)
//! - Routing of asynchronous agent results back to cell views
//! - The compilation workspace, execution agent and view contracts

pub mod agent;
pub mod cell;
pub mod config;
mod document;
pub mod error;
pub mod execute;
pub mod router;
pub mod session;
pub mod state;
pub mod view;
pub mod workspace;

#[cfg(test)]
mod testing;

pub use agent::{
    AgentError, AgentEvent, CapturedOutputSegment, EvaluationEvent, ExecutionAgent,
    RemoteException, ResultHandling, ResultValue, StackFrame,
};
pub use cell::{Cell, CellId, CellKind, CellSequence, CodeCell, ProseCell};
pub use config::{EngineConfig, SessionKind};
pub use error::{Error, Result};
pub use execute::{
    EvaluateOptions, EvaluateOutcome, EvaluationInhibitor, EvaluationPlan, EvaluationStatus,
    InhibitGuard, PipelinePhase, SkipReason,
};
pub use router::{ResultRouter, RouteOutcome};
pub use session::{NotebookSession, SessionEvent};
pub use state::{CellEvaluationState, CellSnapshot, EditorKey, EvaluationRegistry};
pub use view::{CellFlags, CellView, DocumentHost, HiddenCellView, RenderedResult};
pub use workspace::{
    AssemblyReference, CompilationWorkspace, CompiledUnit, Diagnostic, EvaluationContextId,
    EvaluationEnvironment, Severity, SourceLocation, WorkspaceCellId, WorkspaceError,
};
