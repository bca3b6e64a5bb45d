//! Error types for slate-core.

use thiserror::Error;

use crate::agent::AgentError;
use crate::cell::CellId;
use crate::workspace::WorkspaceError;

/// Result type for slate-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in slate-core.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid structural operation (e.g., inserting a cell owned by another document).
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Cell is not part of this document.
    #[error("cell not found: {0}")]
    CellNotFound(CellId),

    /// The operation needs a code cell but was given a prose cell.
    #[error("{0} is not a code cell")]
    NotACodeCell(CellId),

    /// The evaluation was cancelled at a suspension point.
    #[error("evaluation cancelled")]
    Cancelled,

    /// Compilation workspace failure.
    #[error("workspace error: {0}")]
    Workspace(#[from] WorkspaceError),

    /// Execution agent failure.
    #[error("agent error: {0}")]
    Agent(#[from] AgentError),
}
