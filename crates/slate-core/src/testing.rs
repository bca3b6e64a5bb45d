//! Test doubles shared by the unit tests of this crate.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::agent::{AgentError, AgentEvent, CapturedOutputSegment, ExecutionAgent, ResultHandling};
use crate::cell::CellId;
use crate::state::EditorKey;
use crate::view::{CellFlags, CellView, DocumentHost, RenderedResult};
use crate::workspace::{
    AssemblyReference, CompilationWorkspace, CompiledUnit, Diagnostic, EvaluationContextId,
    EvaluationEnvironment, WorkspaceCellId, WorkspaceError,
};

#[derive(Default)]
pub struct SpyView {
    flags: Mutex<Vec<CellFlags>>,
    freezes: Mutex<usize>,
    pub resets: Mutex<usize>,
    pub diagnostics: Mutex<Vec<Diagnostic>>,
    pub results: Mutex<Vec<(String, RenderedResult)>>,
    pub outputs: Mutex<Vec<String>>,
}

impl SpyView {
    pub fn flag_updates(&self) -> Vec<CellFlags> {
        self.flags.lock().unwrap().clone()
    }

    pub fn freeze_count(&self) -> usize {
        *self.freezes.lock().unwrap()
    }
}

impl CellView for SpyView {
    fn reset(&self) {
        *self.resets.lock().unwrap() += 1;
    }

    fn render_diagnostic(&self, diagnostic: &Diagnostic) {
        self.diagnostics.lock().unwrap().push(diagnostic.clone());
    }

    fn render_result(&self, culture: &str, result: &RenderedResult, _handling: ResultHandling) {
        self.results
            .lock()
            .unwrap()
            .push((culture.to_string(), result.clone()));
    }

    fn render_captured_output(&self, segment: &CapturedOutputSegment) {
        self.outputs.lock().unwrap().push(segment.text());
    }

    fn update_flags(&self, flags: CellFlags) {
        self.flags.lock().unwrap().push(flags);
    }

    fn freeze(&self) {
        *self.freezes.lock().unwrap() += 1;
    }
}

/// Host handing out [`SpyView`]s and recording focus changes.
#[derive(Default)]
pub struct SpyHost {
    pub views: Mutex<Vec<(CellId, Arc<SpyView>)>>,
    pub unbound: Mutex<Vec<CellId>>,
    pub focused: Mutex<Vec<CellId>>,
}

impl SpyHost {
    pub fn view(&self, cell: CellId) -> Arc<SpyView> {
        self.views
            .lock()
            .unwrap()
            .iter()
            .find(|(id, _)| *id == cell)
            .map(|(_, view)| view.clone())
            .unwrap()
    }
}

impl DocumentHost for SpyHost {
    fn bind_code_cell(&self, cell: CellId, _editor: EditorKey) -> Arc<dyn CellView> {
        let view = Arc::new(SpyView::default());
        self.views.lock().unwrap().push((cell, view.clone()));
        view
    }

    fn bind_prose_cell(&self, _cell: CellId) {}

    fn unbind_cell(&self, cell: CellId) {
        self.unbound.lock().unwrap().push(cell);
    }

    fn insert_cell_in_view(&self, _cell: CellId, _after: Option<CellId>) {}

    fn focus_cell(&self, cell: CellId) {
        self.focused.lock().unwrap().push(cell);
    }
}

/// Workspace that records structural calls and never compiles anything.
#[derive(Default)]
pub struct NullWorkspace {
    buffers: Mutex<Vec<(WorkspaceCellId, String)>>,
    pub inserts: Mutex<Vec<(WorkspaceCellId, Option<WorkspaceCellId>, Option<WorkspaceCellId>)>>,
    pub removals: Mutex<Vec<(WorkspaceCellId, Option<WorkspaceCellId>)>>,
}

impl NullWorkspace {
    pub fn buffers(&self) -> Vec<(WorkspaceCellId, String)> {
        self.buffers.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompilationWorkspace for NullWorkspace {
    fn insert_cell(
        &self,
        _source: &str,
        previous: Option<WorkspaceCellId>,
        next: Option<WorkspaceCellId>,
    ) -> WorkspaceCellId {
        let id = WorkspaceCellId::new_v4();
        self.inserts.lock().unwrap().push((id, previous, next));
        id
    }

    fn remove_cell(&self, cell: WorkspaceCellId, new_next: Option<WorkspaceCellId>) {
        self.removals.lock().unwrap().push((cell, new_next));
    }

    fn set_cell_buffer(&self, cell: WorkspaceCellId, text: &str) {
        self.buffers.lock().unwrap().push((cell, text.to_string()));
    }

    fn evaluation_context_id(&self) -> EvaluationContextId {
        EvaluationContextId::default()
    }

    async fn is_cell_outdated(&self, _cell: WorkspaceCellId) -> bool {
        false
    }

    async fn emit_compilation(
        &self,
        _cell: WorkspaceCellId,
        _environment: &EvaluationEnvironment,
    ) -> Result<CompiledUnit, WorkspaceError> {
        Err(WorkspaceError::Unavailable)
    }

    async fn get_diagnostics(
        &self,
        _cell: WorkspaceCellId,
    ) -> Result<Vec<Diagnostic>, WorkspaceError> {
        Ok(Vec::new())
    }
}

/// Agent that accepts every unit and reports nothing.
pub struct NullAgent {
    connected: AtomicBool,
    pub evaluations: AtomicUsize,
    pub resets: AtomicUsize,
}

impl NullAgent {
    pub fn new(connected: bool) -> Self {
        Self {
            connected: AtomicBool::new(connected),
            evaluations: AtomicUsize::new(0),
            resets: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ExecutionAgent for NullAgent {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn take_event_stream(&self) -> Option<mpsc::UnboundedReceiver<AgentEvent>> {
        None
    }

    async fn reset_state(&self) -> Result<(), AgentError> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load_assemblies(
        &self,
        _context: EvaluationContextId,
        _assemblies: &[AssemblyReference],
    ) -> Result<(), AgentError> {
        Ok(())
    }

    async fn evaluate(&self, _unit: &CompiledUnit) -> Result<(), AgentError> {
        self.evaluations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn abort_evaluation(&self, _context: EvaluationContextId) -> Result<(), AgentError> {
        Ok(())
    }
}
