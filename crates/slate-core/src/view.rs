//! View contracts consumed by the engine.
//!
//! The front end implements [`DocumentHost`] to create and tear down views and
//! [`CellView`] to display one code cell. Calls arrive while the document is
//! locked, so implementations must not call back into the session.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::{CapturedOutputSegment, RemoteException, ResultHandling};
use crate::cell::CellId;
use crate::state::EditorKey;
use crate::workspace::Diagnostic;

/// Observable state flags of a code cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellFlags {
    /// Edited since it last ran.
    pub is_dirty: bool,
    /// Something upstream changed since it last ran.
    pub is_outdated: bool,
    pub is_evaluating: bool,
    pub has_error_diagnostics: bool,
}

/// What a view is asked to render as a cell's result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RenderedResult {
    Value { value: Option<serde_json::Value> },
    Exception { exception: RemoteException },
}

/// The view bound to one code cell.
pub trait CellView: Send + Sync {
    /// Clear everything rendered so far.
    fn reset(&self);

    fn render_diagnostic(&self, diagnostic: &Diagnostic);

    fn render_result(&self, culture: &str, result: &RenderedResult, handling: ResultHandling);

    fn render_captured_output(&self, segment: &CapturedOutputSegment);

    /// Flags changed.
    fn update_flags(&self, _flags: CellFlags) {}

    fn set_evaluation_duration(&self, _duration: Duration) {}

    /// The cell was frozen and is no longer editable.
    fn freeze(&self) {}

    fn focus(&self) {}
}

/// The front end hosting a document.
pub trait DocumentHost: Send + Sync {
    /// Create the view for a visible code cell.
    fn bind_code_cell(&self, cell: CellId, editor: EditorKey) -> Arc<dyn CellView>;

    fn bind_prose_cell(&self, cell: CellId);

    fn unbind_cell(&self, cell: CellId);

    /// Place a bound cell's view after `after` (or first).
    fn insert_cell_in_view(&self, cell: CellId, after: Option<CellId>);

    fn focus_cell(&self, _cell: CellId) {}
}

/// View for hidden cells. Nothing is displayed.
#[derive(Debug, Default)]
pub struct HiddenCellView;

impl CellView for HiddenCellView {
    fn reset(&self) {}

    fn render_diagnostic(&self, diagnostic: &Diagnostic) {
        tracing::debug!("hidden cell diagnostic: {}", diagnostic.message);
    }

    fn render_result(&self, _culture: &str, _result: &RenderedResult, _handling: ResultHandling) {}

    fn render_captured_output(&self, _segment: &CapturedOutputSegment) {}
}
