//! Evaluation orchestration types.
//!
//! # Pipeline
//!
//! ```text
//! evaluate_cell(T)
//!     │
//!     ├── EvaluationInhibitor::try_acquire   (single flight)
//!     │
//!     ├── Planning    upstream(T) ++ downstream(T)
//!     │
//!     └── for each planned cell
//!             ├── Compiling     emit_compilation
//!             ├── Diagnosing    get_diagnostics   ── errors ──> ErrorDiagnostic
//!             ├── Executing     agent.evaluate    ── died ────> Disconnected
//!             └── Rendering     exception / record / freeze
//! ```
//!
//! # Module Structure
//!
//! - `inhibitor` - Single-flight guard
//! - `plan` - Upstream/downstream plan construction

mod inhibitor;
pub(crate) mod plan;

use serde::{Deserialize, Serialize};

use crate::cell::CellId;

pub use inhibitor::{EvaluationInhibitor, InhibitGuard};
pub use plan::{EvaluateOptions, EvaluationPlan};

/// Where an evaluation request currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelinePhase {
    #[default]
    Idle,
    Planning,
    Compiling,
    Diagnosing,
    Executing,
    Rendering,
    Done,
    Disconnected,
    ErrorDiagnostic,
}

impl std::fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Planning => "planning",
            Self::Compiling => "compiling",
            Self::Diagnosing => "diagnosing",
            Self::Executing => "executing",
            Self::Rendering => "rendering",
            Self::Done => "done",
            Self::Disconnected => "disconnected",
            Self::ErrorDiagnostic => "error_diagnostic",
        };
        f.write_str(name)
    }
}

/// Result status of one cell or of a whole plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationStatus {
    Success,
    /// Evaluated code raised. Not an abort condition.
    EvaluationException,
    /// The cell did not compile. Aborts the plan.
    ErrorDiagnostic,
    /// Agent or workspace unreachable, or the agent died. Aborts the plan.
    Disconnected,
}

impl EvaluationStatus {
    /// Whether the rest of the plan must be abandoned.
    pub fn aborts_plan(self) -> bool {
        matches!(self, Self::ErrorDiagnostic | Self::Disconnected)
    }
}

/// Why an evaluation request did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another evaluation or interaction holds the inhibitor.
    Inhibited,
    Frozen,
    /// The cell has no registered evaluation state.
    Unbound,
    EmptyInput,
}

/// Outcome of an evaluation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvaluateOutcome {
    Skipped(SkipReason),
    Completed {
        status: EvaluationStatus,
        /// Cells whose pipeline ran, in order.
        evaluated: Vec<CellId>,
    },
}

impl EvaluateOutcome {
    pub fn status(&self) -> Option<EvaluationStatus> {
        match self {
            Self::Skipped(_) => None,
            Self::Completed { status, .. } => Some(*status),
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped(_))
    }

    /// Cells evaluated by this request (empty when skipped).
    pub fn evaluated(&self) -> &[CellId] {
        match self {
            Self::Skipped(_) => &[],
            Self::Completed { evaluated, .. } => evaluated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_statuses() {
        assert!(EvaluationStatus::ErrorDiagnostic.aborts_plan());
        assert!(EvaluationStatus::Disconnected.aborts_plan());
        assert!(!EvaluationStatus::EvaluationException.aborts_plan());
        assert!(!EvaluationStatus::Success.aborts_plan());
    }

    #[test]
    fn test_outcome_accessors() {
        let skipped = EvaluateOutcome::Skipped(SkipReason::Frozen);
        assert!(skipped.is_skipped());
        assert_eq!(skipped.status(), None);
        assert!(skipped.evaluated().is_empty());

        let done = EvaluateOutcome::Completed {
            status: EvaluationStatus::Success,
            evaluated: Vec::new(),
        };
        assert_eq!(done.status(), Some(EvaluationStatus::Success));
    }
}
