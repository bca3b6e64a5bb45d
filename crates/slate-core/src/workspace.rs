//! Compilation workspace contract.
//!
//! The workspace owns per-cell compilation state. The engine only sees cell
//! identities, compiled units and diagnostics.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of a cell inside a compilation workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkspaceCellId(pub Uuid);

impl WorkspaceCellId {
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for WorkspaceCellId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of the agent-side evaluation context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct EvaluationContextId(pub u32);

/// Environment a compilation is emitted for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationEnvironment {
    pub working_directory: PathBuf,
}

/// Diagnostic severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Hidden,
    Info,
    Warning,
    Error,
}

/// Position of a diagnostic within the cell buffer (1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub line: u32,
    pub column: u32,
}

/// A compiler (or engine) diagnostic for a cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub location: Option<SourceLocation>,
}

impl Diagnostic {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            location: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    pub fn at(mut self, line: u32, column: u32) -> Self {
        self.location = Some(SourceLocation { line, column });
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// An assembly/library referenced by a compiled unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblyReference {
    pub name: String,
    /// The agent must integrate this reference before running the unit.
    pub has_integration: bool,
}

/// A compiled cell, ready to be executed by the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledUnit {
    pub cell_id: WorkspaceCellId,
    pub submission_number: u32,
    pub evaluation_context_id: EvaluationContextId,
    /// The cell ends in an expression whose value is its result.
    pub is_result_an_expression: bool,
    pub references: Vec<AssemblyReference>,
    /// Opaque executable payload.
    pub payload: Vec<u8>,
}

impl CompiledUnit {
    /// References the agent has to integrate before execution.
    pub fn integration_references(&self) -> Vec<AssemblyReference> {
        self.references
            .iter()
            .filter(|reference| reference.has_integration)
            .cloned()
            .collect()
    }
}

/// Workspace failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WorkspaceError {
    #[error("unknown workspace cell {0}")]
    UnknownCell(WorkspaceCellId),

    #[error("emit failed: {0}")]
    Emit(String),

    #[error("workspace unavailable")]
    Unavailable,
}

/// The compilation workspace a document's code cells are mirrored into.
#[async_trait]
pub trait CompilationWorkspace: Send + Sync {
    /// Add a cell between two neighbours and return its identity.
    fn insert_cell(
        &self,
        source: &str,
        previous: Option<WorkspaceCellId>,
        next: Option<WorkspaceCellId>,
    ) -> WorkspaceCellId;

    /// Remove a cell; `new_next` is the successor of its former predecessor.
    fn remove_cell(&self, cell: WorkspaceCellId, new_next: Option<WorkspaceCellId>);

    fn set_cell_buffer(&self, cell: WorkspaceCellId, text: &str);

    /// The evaluation context compiled units target.
    fn evaluation_context_id(&self) -> EvaluationContextId;

    /// Whether the cell's compilation is stale.
    async fn is_cell_outdated(&self, cell: WorkspaceCellId) -> bool;

    async fn emit_compilation(
        &self,
        cell: WorkspaceCellId,
        environment: &EvaluationEnvironment,
    ) -> Result<CompiledUnit, WorkspaceError>;

    async fn get_diagnostics(
        &self,
        cell: WorkspaceCellId,
    ) -> Result<Vec<Diagnostic>, WorkspaceError>;
}
