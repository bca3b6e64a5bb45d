//! Front end that records every view call.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rustc_hash::FxHashMap;
use slate_core::{
    CapturedOutputSegment, CellFlags, CellId, CellView, Diagnostic, DocumentHost, EditorKey,
    RenderedResult, ResultHandling,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One call made on a [`RecordingView`].
#[derive(Debug, Clone, PartialEq)]
pub enum ViewRecord {
    Reset,
    Diagnostic(Diagnostic),
    Result {
        culture: String,
        result: RenderedResult,
        handling: ResultHandling,
    },
    Output(String),
    Duration(Duration),
}

#[derive(Debug, Default)]
pub struct RecordingView {
    records: Mutex<Vec<ViewRecord>>,
    flags: Mutex<CellFlags>,
    frozen: Mutex<bool>,
    focus_requests: Mutex<usize>,
}

impl RecordingView {
    pub fn records(&self) -> Vec<ViewRecord> {
        lock(&self.records).clone()
    }

    /// Records since the last reset.
    pub fn current(&self) -> Vec<ViewRecord> {
        let records = lock(&self.records);
        let start = records
            .iter()
            .rposition(|record| *record == ViewRecord::Reset)
            .map_or(0, |index| index + 1);
        records[start..].to_vec()
    }

    pub fn results(&self) -> Vec<RenderedResult> {
        self.current()
            .into_iter()
            .filter_map(|record| match record {
                ViewRecord::Result { result, .. } => Some(result),
                _ => None,
            })
            .collect()
    }

    /// Last rendered value since the last reset.
    pub fn last_value(&self) -> Option<serde_json::Value> {
        self.results().into_iter().rev().find_map(|result| match result {
            RenderedResult::Value { value } => value,
            RenderedResult::Exception { .. } => None,
        })
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.current()
            .into_iter()
            .filter_map(|record| match record {
                ViewRecord::Diagnostic(diagnostic) => Some(diagnostic),
                _ => None,
            })
            .collect()
    }

    /// Captured output since the last reset, concatenated.
    pub fn output(&self) -> String {
        self.current()
            .into_iter()
            .filter_map(|record| match record {
                ViewRecord::Output(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn reset_count(&self) -> usize {
        lock(&self.records)
            .iter()
            .filter(|record| **record == ViewRecord::Reset)
            .count()
    }

    pub fn flags(&self) -> CellFlags {
        *lock(&self.flags)
    }

    pub fn is_frozen(&self) -> bool {
        *lock(&self.frozen)
    }

    pub fn focus_requests(&self) -> usize {
        *lock(&self.focus_requests)
    }

    fn push(&self, record: ViewRecord) {
        lock(&self.records).push(record);
    }
}

impl CellView for RecordingView {
    fn reset(&self) {
        self.push(ViewRecord::Reset);
    }

    fn render_diagnostic(&self, diagnostic: &Diagnostic) {
        self.push(ViewRecord::Diagnostic(diagnostic.clone()));
    }

    fn render_result(&self, culture: &str, result: &RenderedResult, handling: ResultHandling) {
        self.push(ViewRecord::Result {
            culture: culture.to_string(),
            result: result.clone(),
            handling,
        });
    }

    fn render_captured_output(&self, segment: &CapturedOutputSegment) {
        self.push(ViewRecord::Output(segment.text()));
    }

    fn update_flags(&self, flags: CellFlags) {
        *lock(&self.flags) = flags;
    }

    fn set_evaluation_duration(&self, duration: Duration) {
        self.push(ViewRecord::Duration(duration));
    }

    fn freeze(&self) {
        *lock(&self.frozen) = true;
    }

    fn focus(&self) {
        *lock(&self.focus_requests) += 1;
    }
}

#[derive(Default)]
struct HostState {
    views: FxHashMap<CellId, Arc<RecordingView>>,
    /// Visible cell order as the front end sees it.
    order: Vec<CellId>,
    focused: Vec<CellId>,
}

/// Document host handing out [`RecordingView`]s.
#[derive(Default)]
pub struct RecordingHost {
    state: Mutex<HostState>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// View bound to `cell`, if it is still bound.
    pub fn view(&self, cell: CellId) -> Option<Arc<RecordingView>> {
        lock(&self.state).views.get(&cell).cloned()
    }

    /// Cells in the order the front end displays them.
    pub fn order(&self) -> Vec<CellId> {
        lock(&self.state).order.clone()
    }

    pub fn focused(&self) -> Option<CellId> {
        lock(&self.state).focused.last().copied()
    }

    pub fn focus_history(&self) -> Vec<CellId> {
        lock(&self.state).focused.clone()
    }
}

impl DocumentHost for RecordingHost {
    fn bind_code_cell(&self, cell: CellId, editor: EditorKey) -> Arc<dyn CellView> {
        tracing::trace!("binding {} to {}", cell, editor);
        let view = Arc::new(RecordingView::default());
        lock(&self.state).views.insert(cell, view.clone());
        view
    }

    fn bind_prose_cell(&self, cell: CellId) {
        tracing::trace!("binding prose {}", cell);
    }

    fn unbind_cell(&self, cell: CellId) {
        let mut state = lock(&self.state);
        state.views.remove(&cell);
        state.order.retain(|id| *id != cell);
    }

    fn insert_cell_in_view(&self, cell: CellId, after: Option<CellId>) {
        insert_after(&mut lock(&self.state).order, cell, after);
    }

    fn focus_cell(&self, cell: CellId) {
        let mut state = lock(&self.state);
        if let Some(view) = state.views.get(&cell) {
            view.focus();
        }
        state.focused.push(cell);
    }
}

fn insert_after(order: &mut Vec<CellId>, cell: CellId, after: Option<CellId>) {
    order.retain(|id| *id != cell);
    let index = after
        .and_then(|after| order.iter().position(|id| *id == after))
        .map_or(0, |index| index + 1);
    order.insert(index, cell);
}
