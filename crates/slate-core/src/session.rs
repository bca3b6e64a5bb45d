//! Notebook session management.
//!
//! A [`NotebookSession`] owns one document and drives evaluation of its code
//! cells against an [`ExecutionAgent`]:
//!
//! - structural edits (insert, delete, buffer changes) keep the compilation
//!   workspace and the evaluation registry in step with the cell sequence
//! - evaluation requests are single-flight; each builds a plan and runs the
//!   compile, diagnose, execute and render pipeline cell by cell
//! - results arrive later on the agent's event stream and are applied by the
//!   [`ResultRouter`]
//!
//! The document mutex is only held in synchronous sections. Every await point
//! of a pipeline can be cancelled through the session token or the token
//! passed by the caller.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agent::{AgentError, ExecutionAgent, RemoteException, ResultHandling};
use crate::cell::{Cell, CellId, CellKind, CodeCell, ProseCell};
use crate::config::EngineConfig;
use crate::document::{self, Document, SharedDocument};
use crate::error::{Error, Result};
use crate::execute::plan::{self, EvaluateOptions, EvaluationPlan};
use crate::execute::{
    EvaluateOutcome, EvaluationInhibitor, EvaluationStatus, InhibitGuard, PipelinePhase,
    SkipReason,
};
use crate::router::ResultRouter;
use crate::state::CellSnapshot;
use crate::view::{CellView, DocumentHost, RenderedResult};
use crate::workspace::{CompilationWorkspace, Diagnostic, EvaluationEnvironment, WorkspaceCellId};

/// Diagnostic rendered when evaluation is requested without an agent.
pub const NOT_CONNECTED: &str = "Cannot evaluate: not connected to agent.";

/// Diagnostic rendered when the agent dies while running a cell.
pub const AGENT_TERMINATED: &str = "The application terminated during evaluation of this cell. \
     Run this cell manually to try again.";

/// Lifecycle notifications from the hosting client.
pub enum SessionEvent {
    /// The agent is up; its event stream can be consumed.
    AgentConnected,
    AgentDisconnected,
    /// The compilation workspace finished loading.
    CompilationWorkspaceAvailable(Arc<dyn CompilationWorkspace>),
}

impl std::fmt::Debug for SessionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AgentConnected => f.write_str("AgentConnected"),
            Self::AgentDisconnected => f.write_str("AgentDisconnected"),
            Self::CompilationWorkspaceAvailable(_) => f.write_str("CompilationWorkspaceAvailable"),
        }
    }
}

/// A cell about to run, with what the pipeline needs outside the lock.
struct RunningCell {
    cell: CellId,
    workspace_id: WorkspaceCellId,
    view: Arc<dyn CellView>,
}

/// Puts the pipeline back to idle on every exit path.
struct PhaseGuard<'a> {
    document: &'a SharedDocument,
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        document::lock(self.document).phase = PipelinePhase::Idle;
    }
}

/// A notebook session.
pub struct NotebookSession {
    id: Uuid,
    config: EngineConfig,
    document: SharedDocument,
    agent: Arc<dyn ExecutionAgent>,
    host: Arc<dyn DocumentHost>,
    inhibitor: EvaluationInhibitor,
    /// Document-scoped cancellation.
    cancel: CancellationToken,
    router: ResultRouter,
    router_task: Mutex<Option<JoinHandle<()>>>,
}

impl NotebookSession {
    pub fn new(
        config: EngineConfig,
        agent: Arc<dyn ExecutionAgent>,
        host: Arc<dyn DocumentHost>,
    ) -> Self {
        let document: SharedDocument = Arc::new(Mutex::new(Document::new()));
        let router = ResultRouter::new(
            document.clone(),
            config.session_kind,
            &config.default_culture,
        );
        let id = Uuid::new_v4();
        tracing::info!("session {} created ({:?})", id, config.session_kind);

        Self {
            id,
            config,
            document,
            agent,
            host,
            inhibitor: EvaluationInhibitor::new(),
            cancel: CancellationToken::new(),
            router,
            router_task: Mutex::new(None),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Document> {
        document::lock(&self.document)
    }

    /// Router applying agent events to this document.
    pub fn result_router(&self) -> ResultRouter {
        self.router.clone()
    }

    pub fn phase(&self) -> PipelinePhase {
        self.lock().phase
    }

    fn set_phase(&self, phase: PipelinePhase) {
        tracing::debug!("pipeline {}", phase);
        self.lock().phase = phase;
    }

    // =========================================================================
    // Document structure
    // =========================================================================

    /// Populate the document, guaranteeing at least one code cell.
    pub fn load(&self, cells: Vec<Cell>) -> Result<Vec<CellId>> {
        let mut ids = Vec::with_capacity(cells.len());
        {
            let mut doc = self.lock();
            for cell in cells {
                let after = doc.cells.last();
                let id = match cell {
                    Cell::Code(code) => doc.insert_code_cell(code, after, &*self.host)?,
                    Cell::Prose(prose) => doc.insert_prose_cell(prose, after, &*self.host)?,
                };
                ids.push(id);
            }
        }

        let first_visible = self.first_visible_code_cell();
        match first_visible {
            Some(cell) => self.host.focus_cell(cell),
            None => {
                self.start_new_code_cell()?;
            }
        }

        tracing::debug!("loaded {} cells", ids.len());
        Ok(ids)
    }

    fn first_visible_code_cell(&self) -> Option<CellId> {
        let doc = self.lock();
        doc.cells
            .iter_kind(CellKind::Code)
            .map(|(id, _)| id)
            .find(|&id| doc.state_for_cell(id).is_some_and(|state| !state.is_hidden()))
    }

    pub fn insert_code_cell(&self, after: Option<CellId>) -> Result<CellId> {
        let code = CodeCell::new(self.config.language.as_str());
        self.lock().insert_code_cell(code, after, &*self.host)
    }

    pub fn insert_prose_cell(&self, after: Option<CellId>, markup: &str) -> Result<CellId> {
        self.lock()
            .insert_prose_cell(ProseCell::new(markup), after, &*self.host)
    }

    /// Focus the prose cell right after `after`, or insert an empty one.
    pub fn insert_or_focus_prose_cell(&self, after: CellId) -> Result<CellId> {
        let following = {
            let doc = self.lock();
            doc.cells
                .next(after)
                .filter(|&next| doc.cells.get(next).is_some_and(|c| c.is_kind(CellKind::Prose)))
        };

        match following {
            Some(cell) => {
                self.host.focus_cell(cell);
                Ok(cell)
            }
            None => self.insert_prose_cell(Some(after), ""),
        }
    }

    /// Append an empty code cell after the last cell and focus it.
    pub fn start_new_code_cell(&self) -> Result<CellId> {
        let cell = {
            let mut doc = self.lock();
            let after = doc.cells.last();
            let code = CodeCell::new(self.config.language.as_str());
            doc.insert_code_cell(code, after, &*self.host)?
        };
        self.host.focus_cell(cell);
        Ok(cell)
    }

    pub fn delete_cell(&self, cell: CellId) -> Result<()> {
        let focus = self.lock().delete_cell(cell, &*self.host)?;
        if let Some(focus) = focus {
            self.host.focus_cell(focus);
        }
        Ok(())
    }

    /// Replace a code cell's source.
    pub fn set_cell_buffer(&self, cell: CellId, text: &str) -> Result<()> {
        self.lock().set_cell_buffer(cell, text)
    }

    pub fn outdate_all_code_cells(&self) {
        self.lock().outdate_all_code_cells();
    }

    /// Add `#r "<reference>"` lines to the hidden reference cell, creating it
    /// ahead of the first code cell on first use.
    pub fn add_top_level_references<S: AsRef<str>>(&self, references: &[S]) -> Result<bool> {
        if references.is_empty() {
            return Ok(false);
        }

        let mut doc = self.lock();
        let cell = match doc.registry.hidden_cell() {
            Some(cell) => cell,
            None => {
                let after = doc
                    .cells
                    .first_of_kind(CellKind::Code)
                    .and_then(|first| doc.cells.previous(first));
                let code = CodeCell::hidden(self.config.language.as_str());
                doc.insert_code_cell(code, after, &*self.host)?
            }
        };

        let mut buffer = doc.source_of(cell)?.to_string();
        for reference in references {
            if !buffer.is_empty() {
                buffer.push('\n');
            }
            buffer.push_str(&format!("#r \"{}\"", reference.as_ref()));
        }
        doc.set_cell_buffer(cell, &buffer)?;

        tracing::debug!("added {} top-level references", references.len());
        Ok(true)
    }

    /// Apply a lifecycle notification.
    ///
    /// `AgentConnected` starts the router task on the current Tokio runtime.
    /// Outside a runtime the agent's event stream is left in place for the
    /// caller to drain.
    pub fn handle_session_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::AgentConnected => {
                tracing::info!("agent connected");
                let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                    tracing::warn!("no tokio runtime, agent results will not be routed");
                    return;
                };
                match self.agent.take_event_stream() {
                    Some(events) => {
                        let task = runtime.spawn(
                            self.router.clone().run(events, self.cancel.child_token()),
                        );
                        let previous = self
                            .router_task
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .replace(task);
                        if let Some(previous) = previous {
                            previous.abort();
                        }
                    }
                    None => tracing::warn!("agent event stream already taken"),
                }
            }
            SessionEvent::AgentDisconnected => tracing::warn!("agent disconnected"),
            SessionEvent::CompilationWorkspaceAvailable(workspace) => {
                tracing::info!("compilation workspace available");
                self.lock().install_workspace(workspace);
            }
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Linked cells in document order.
    pub fn cells(&self) -> Vec<CellId> {
        self.lock().cells.iter().map(|(id, _)| id).collect()
    }

    /// Linked code cells in document order, hidden ones included.
    pub fn code_cells(&self) -> Vec<CellId> {
        self.lock()
            .cells
            .iter_kind(CellKind::Code)
            .map(|(id, _)| id)
            .collect()
    }

    pub fn cell_kind(&self, cell: CellId) -> Option<CellKind> {
        self.lock().cells.get(cell).map(Cell::kind)
    }

    pub fn cell_source(&self, cell: CellId) -> Option<String> {
        self.lock().source_of(cell).ok().map(str::to_string)
    }

    pub fn cell_state(&self, cell: CellId) -> Option<CellSnapshot> {
        self.lock().state_for_cell(cell).map(|state| state.snapshot())
    }

    pub fn hidden_cell(&self) -> Option<CellId> {
        self.lock().registry.hidden_cell()
    }

    // =========================================================================
    // Evaluation
    // =========================================================================

    pub fn can_evaluate(&self) -> bool {
        self.inhibitor.can_evaluate()
    }

    /// Block evaluation until the guard is dropped.
    pub fn inhibit_evaluate(&self) -> InhibitGuard {
        self.inhibitor.inhibit()
    }

    pub async fn evaluate_cell(
        &self,
        cell: CellId,
        cancel: &CancellationToken,
    ) -> Result<EvaluateOutcome> {
        self.evaluate_cell_with(cell, EvaluateOptions::default(), cancel)
            .await
    }

    /// Evaluate every code cell, starting from the first one.
    pub async fn evaluate_all(&self, cancel: &CancellationToken) -> Result<EvaluateOutcome> {
        let first = self.lock().cells.first_of_kind(CellKind::Code);
        match first {
            Some(first) => {
                self.evaluate_cell_with(first, EvaluateOptions::evaluate_all(), cancel)
                    .await
            }
            None => Ok(EvaluateOutcome::Completed {
                status: EvaluationStatus::Success,
                evaluated: Vec::new(),
            }),
        }
    }

    /// Console-style submission of `input` as the next code cell.
    pub async fn evaluate_input(
        &self,
        input: &str,
        cancel: &CancellationToken,
    ) -> Result<EvaluateOutcome> {
        if input.trim().is_empty() {
            return Ok(EvaluateOutcome::Skipped(SkipReason::EmptyInput));
        }
        // Held across cell selection and the buffer write so a rejected
        // submission leaves the document untouched.
        let Some(_inhibit) = self.inhibitor.try_acquire() else {
            tracing::warn!("input rejected: evaluation is inhibited");
            return Ok(EvaluateOutcome::Skipped(SkipReason::Inhibited));
        };

        let reusable = self.reusable_input_cell();
        let target = match reusable {
            Some(cell) => cell,
            None => self.start_new_code_cell()?,
        };
        self.set_cell_buffer(target, input)?;

        let outcome = self.run_single(target, cancel).await?;
        if outcome.status().is_some_and(|status| !status.aborts_plan()) {
            self.start_new_code_cell()?;
        }
        Ok(outcome)
    }

    /// The last code cell, when it can take the next submission: its buffer is
    /// empty, or it never ran in a console session.
    fn reusable_input_cell(&self) -> Option<CellId> {
        let doc = self.lock();
        let cell = doc.cells.last_of_kind(CellKind::Code)?;
        let state = doc.state_for_cell(cell)?;
        if state.is_hidden() || state.is_frozen() {
            return None;
        }

        let is_empty = doc.source_of(cell).is_ok_and(|source| source.trim().is_empty());
        let is_pending = !self.config.session_kind.is_workbook() && state.evaluation_count() == 0;
        (is_empty || is_pending).then_some(cell)
    }

    /// Ask the agent to abort whatever it is running.
    pub async fn abort_evaluation(&self) -> Result<()> {
        if !self.agent.is_connected() {
            tracing::debug!("abort requested without an agent");
            return Ok(());
        }
        let context = self
            .lock()
            .workspace
            .as_ref()
            .map(|workspace| workspace.evaluation_context_id());
        if let Some(context) = context {
            self.agent.abort_evaluation(context).await?;
        }
        Ok(())
    }

    /// Cancel in-flight pipelines and stop routing results.
    pub fn shutdown(&self) {
        tracing::info!("session {} shutting down", self.id);
        self.cancel.cancel();
        let task = self
            .router_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(task);
    }

    async fn cancellable<F: Future>(
        &self,
        cancel: &CancellationToken,
        future: F,
    ) -> Result<F::Output> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            _ = cancel.cancelled() => Err(Error::Cancelled),
            output = future => Ok(output),
        }
    }

    /// Evaluate `cell`, its stale upstream cells, and the downstream cells
    /// selected by `options`.
    pub async fn evaluate_cell_with(
        &self,
        cell: CellId,
        options: EvaluateOptions,
        cancel: &CancellationToken,
    ) -> Result<EvaluateOutcome> {
        let Some(_inhibit) = self.inhibitor.try_acquire() else {
            tracing::warn!("evaluation of {} rejected: evaluation is inhibited", cell);
            return Ok(EvaluateOutcome::Skipped(SkipReason::Inhibited));
        };
        self.run_plan(cell, options, cancel).await
    }

    /// Run one cell's pipeline without planning or resetting the agent.
    /// The caller holds the inhibitor.
    async fn run_single(
        &self,
        cell: CellId,
        cancel: &CancellationToken,
    ) -> Result<EvaluateOutcome> {
        if let Some(reason) = self.check_target(cell)? {
            tracing::debug!("evaluation of {} skipped: {:?}", cell, reason);
            return Ok(EvaluateOutcome::Skipped(reason));
        }

        let _phase = PhaseGuard {
            document: &self.document,
        };

        let Some(workspace) = self.preflight(cell) else {
            return Ok(EvaluateOutcome::Completed {
                status: EvaluationStatus::Disconnected,
                evaluated: Vec::new(),
            });
        };

        let Some(running) = self.begin_cell(cell) else {
            tracing::debug!("skipping {}: frozen or unbound", cell);
            return Ok(EvaluateOutcome::Skipped(SkipReason::Unbound));
        };
        let status = self.evaluate_one(&running, &workspace, cancel).await?;
        self.set_phase(phase_after(status));

        Ok(EvaluateOutcome::Completed {
            status,
            evaluated: vec![cell],
        })
    }

    /// Build and run the plan for `cell`. The caller holds the inhibitor.
    async fn run_plan(
        &self,
        cell: CellId,
        options: EvaluateOptions,
        cancel: &CancellationToken,
    ) -> Result<EvaluateOutcome> {
        if let Some(reason) = self.check_target(cell)? {
            tracing::debug!("evaluation of {} skipped: {:?}", cell, reason);
            return Ok(EvaluateOutcome::Skipped(reason));
        }

        let _phase = PhaseGuard {
            document: &self.document,
        };

        let Some(workspace) = self.preflight(cell) else {
            return Ok(EvaluateOutcome::Completed {
                status: EvaluationStatus::Disconnected,
                evaluated: Vec::new(),
            });
        };

        self.set_phase(PipelinePhase::Planning);
        let plan = self.build_plan(cell, options, &workspace, cancel).await?;
        tracing::debug!(
            "plan for {}: upstream {:?}, downstream {:?}",
            cell,
            plan.upstream(),
            plan.downstream()
        );

        if !self.reset_agent_if_needed(&plan, cancel).await? {
            return Ok(EvaluateOutcome::Completed {
                status: EvaluationStatus::Disconnected,
                evaluated: Vec::new(),
            });
        }

        let mut status = EvaluationStatus::Success;
        let mut evaluated = Vec::with_capacity(plan.len());
        for planned in plan.cells() {
            let Some(running) = self.begin_cell(planned) else {
                tracing::debug!("skipping {}: frozen or unbound", planned);
                continue;
            };

            let cell_status = self.evaluate_one(&running, &workspace, cancel).await?;
            evaluated.push(planned);

            if cell_status.aborts_plan() {
                self.set_phase(phase_after(cell_status));
                return Ok(EvaluateOutcome::Completed {
                    status: cell_status,
                    evaluated,
                });
            }
            if cell_status == EvaluationStatus::EvaluationException {
                status = cell_status;
            }
        }

        let last_code = self.lock().cells.last_of_kind(CellKind::Code);
        if !options.evaluate_all && last_code == Some(cell) {
            self.start_new_code_cell()?;
        }

        self.set_phase(phase_after(status));
        Ok(EvaluateOutcome::Completed { status, evaluated })
    }

    fn check_target(&self, cell: CellId) -> Result<Option<SkipReason>> {
        let doc = self.lock();
        if !doc.cells.contains(cell) {
            return Err(Error::CellNotFound(cell));
        }
        doc.source_of(cell)?;

        Ok(match doc.state_for_cell(cell) {
            None => Some(SkipReason::Unbound),
            Some(state) if state.is_frozen() => Some(SkipReason::Frozen),
            Some(_) => None,
        })
    }

    /// The workspace to evaluate against, or `None` after marking `cell`
    /// errored when the agent or workspace is unavailable.
    fn preflight(&self, cell: CellId) -> Option<Arc<dyn CompilationWorkspace>> {
        let workspace = self.lock().workspace.clone();
        match workspace {
            Some(workspace) if self.agent.is_connected() => Some(workspace),
            _ => {
                tracing::warn!("cannot evaluate {}: agent not connected", cell);
                let mut doc = self.lock();
                if let Some(state) = doc.state_for_cell_mut(cell) {
                    state.set_evaluating(false);
                    state.set_has_error_diagnostics(true);
                    state.view().render_diagnostic(&Diagnostic::error(NOT_CONNECTED));
                }
                doc.phase = PipelinePhase::Disconnected;
                None
            }
        }
    }

    async fn build_plan(
        &self,
        trigger: CellId,
        options: EvaluateOptions,
        workspace: &Arc<dyn CompilationWorkspace>,
        cancel: &CancellationToken,
    ) -> Result<EvaluationPlan> {
        let candidates = plan::upstream_candidates(&self.lock(), trigger);

        let mut upstream = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let include = match (candidate.forced, candidate.workspace_id) {
                (true, _) => true,
                (false, Some(id)) => {
                    self.cancellable(cancel, workspace.is_cell_outdated(id))
                        .await?
                }
                (false, None) => false,
            };
            if include {
                upstream.push(candidate.cell);
            }
        }

        let downstream = plan::schedule_downstream(&mut self.lock(), trigger, options.evaluate_all);
        Ok(EvaluationPlan::new(trigger, upstream, downstream))
    }

    /// Workbook runs triggered from the first code cell begin from a clean
    /// agent. Returns false when the agent could not be reset.
    async fn reset_agent_if_needed(
        &self,
        plan: &EvaluationPlan,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let first_code = self.lock().cells.first_of_kind(CellKind::Code);
        if !self.config.session_kind.is_workbook() || first_code != Some(plan.trigger()) {
            return Ok(true);
        }

        tracing::debug!("resetting agent state");
        match self.cancellable(cancel, self.agent.reset_state()).await? {
            Ok(()) => Ok(true),
            Err(err) => {
                tracing::error!("agent reset failed: {}", err);
                let mut doc = self.lock();
                if let Some(state) = doc.state_for_cell_mut(plan.trigger()) {
                    state.set_has_error_diagnostics(true);
                    state.view().render_diagnostic(&Diagnostic::error(NOT_CONNECTED));
                }
                doc.phase = PipelinePhase::Disconnected;
                Ok(false)
            }
        }
    }

    /// Re-validate a planned cell and mark it evaluating.
    fn begin_cell(&self, cell: CellId) -> Option<RunningCell> {
        let mut doc = self.lock();
        let state = doc.state_for_cell_mut(cell)?;
        if state.is_frozen() {
            return None;
        }
        let workspace_id = state.workspace_cell_id()?;

        state.view().reset();
        state.set_has_error_diagnostics(false);
        state.set_evaluating(true);
        Some(RunningCell {
            cell,
            workspace_id,
            view: state.view().clone(),
        })
    }

    /// Compile, diagnose and execute one cell.
    async fn evaluate_one(
        &self,
        running: &RunningCell,
        workspace: &Arc<dyn CompilationWorkspace>,
        cancel: &CancellationToken,
    ) -> Result<EvaluationStatus> {
        if !self.agent.is_connected() {
            tracing::warn!("agent disconnected before {} could run", running.cell);
            let mut doc = self.lock();
            if let Some(state) = doc.state_for_cell_mut(running.cell) {
                state.set_evaluating(false);
                state.set_has_error_diagnostics(true);
            }
            running.view.render_diagnostic(&Diagnostic::error(NOT_CONNECTED));
            return Ok(EvaluationStatus::Disconnected);
        }

        self.set_phase(PipelinePhase::Compiling);
        let environment = EvaluationEnvironment {
            working_directory: self.config.working_directory.clone(),
        };
        let emitted = self
            .cancellable(cancel, workspace.emit_compilation(running.workspace_id, &environment))
            .await?;
        let unit = match emitted {
            Ok(unit) => unit,
            Err(err) => {
                tracing::error!("compiling {} failed: {}", running.cell, err);
                return Ok(self.complete_cell(running, None, true));
            }
        };

        self.set_phase(PipelinePhase::Diagnosing);
        let diagnostics = match self
            .cancellable(cancel, workspace.get_diagnostics(running.workspace_id))
            .await?
        {
            Ok(diagnostics) => diagnostics,
            Err(err) => {
                tracing::error!("fetching diagnostics for {} failed: {}", running.cell, err);
                return Ok(self.complete_cell(running, None, true));
            }
        };

        let has_errors = diagnostics.iter().any(Diagnostic::is_error);
        {
            let mut doc = self.lock();
            for diagnostic in &diagnostics {
                running.view.render_diagnostic(diagnostic);
            }
            if let Some(state) = doc.state_for_cell_mut(running.cell) {
                state.set_has_error_diagnostics(has_errors);
                state.set_result_is_expression(unit.is_result_an_expression);
                if has_errors {
                    state.set_evaluating(false);
                }
            }
        }
        if has_errors {
            tracing::debug!("{} has error diagnostics", running.cell);
            return Ok(EvaluationStatus::ErrorDiagnostic);
        }

        self.set_phase(PipelinePhase::Executing);
        let integrations = unit.integration_references();
        let execution = async {
            if !integrations.is_empty() {
                self.agent
                    .load_assemblies(unit.evaluation_context_id, &integrations)
                    .await?;
            }
            self.agent.evaluate(&unit).await
        };

        let (exception, terminated) = match self.cancellable(cancel, execution).await? {
            Ok(()) => (None, false),
            Err(AgentError::Remote(exception)) => (Some(exception), false),
            Err(err) => {
                tracing::error!("agent failed while evaluating {}: {}", running.cell, err);
                (None, true)
            }
        };

        self.set_phase(PipelinePhase::Rendering);
        Ok(self.complete_cell(running, exception, terminated))
    }

    /// Render the outcome of a cell and record its evaluation.
    fn complete_cell(
        &self,
        running: &RunningCell,
        exception: Option<RemoteException>,
        terminated: bool,
    ) -> EvaluationStatus {
        let mut doc = self.lock();

        if terminated {
            running.view.render_diagnostic(&Diagnostic::error(AGENT_TERMINATED));
        }
        if let Some(exception) = &exception {
            let rendered = RenderedResult::Exception {
                exception: exception.filtered(),
            };
            running
                .view
                .render_result(&self.config.default_culture, &rendered, ResultHandling::Replace);
        }

        match doc.state_for_cell_mut(running.cell) {
            Some(state) => {
                state.set_evaluating(false);
                state.record_evaluation(terminated);
                if !self.config.session_kind.is_workbook() {
                    state.freeze();
                }
            }
            None => tracing::debug!("{} was removed while evaluating", running.cell),
        }

        if exception.is_some() {
            EvaluationStatus::EvaluationException
        } else if terminated {
            EvaluationStatus::Disconnected
        } else {
            EvaluationStatus::Success
        }
    }
}

/// Phase a pipeline ends in for its final status.
fn phase_after(status: EvaluationStatus) -> PipelinePhase {
    match status {
        EvaluationStatus::ErrorDiagnostic => PipelinePhase::ErrorDiagnostic,
        EvaluationStatus::Disconnected => PipelinePhase::Disconnected,
        EvaluationStatus::Success | EvaluationStatus::EvaluationException => PipelinePhase::Done,
    }
}

impl Drop for NotebookSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
