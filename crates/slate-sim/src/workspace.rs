//! In-process compilation workspace.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use slate_core::{
    CompilationWorkspace, CompiledUnit, Diagnostic, EvaluationContextId, EvaluationEnvironment,
    WorkspaceCellId, WorkspaceError,
};

use crate::lang;

struct SimCell {
    id: WorkspaceCellId,
    source: String,
    /// Tick of the last change to this cell or its position.
    changed_at: u64,
    /// Tick of the last emit, if any.
    emitted_at: Option<u64>,
}

#[derive(Default)]
struct Inner {
    cells: Vec<SimCell>,
    tick: u64,
    submissions: u32,
}

impl Inner {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn position(&self, id: WorkspaceCellId) -> Option<usize> {
        self.cells.iter().position(|cell| cell.id == id)
    }

    fn touch(&mut self, index: usize) {
        let tick = self.next_tick();
        if let Some(cell) = self.cells.get_mut(index) {
            cell.changed_at = tick;
        }
    }

    /// A cell is outdated when it was never emitted, or when it or any cell
    /// before it changed after its last emit.
    fn is_outdated(&self, index: usize) -> bool {
        match self.cells[index].emitted_at {
            None => true,
            Some(emitted_at) => self.cells[..=index]
                .iter()
                .any(|cell| cell.changed_at > emitted_at),
        }
    }
}

/// Ordered cells compiled with the simulated language.
pub struct SimWorkspace {
    inner: Mutex<Inner>,
    context: EvaluationContextId,
    fail_next_emit: AtomicBool,
}

impl Default for SimWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

impl SimWorkspace {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            context: EvaluationContextId(1),
            fail_next_emit: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next `emit_compilation` fail.
    pub fn fail_next_emit(&self) {
        self.fail_next_emit.store(true, Ordering::SeqCst);
    }

    /// Cell identities in workspace order.
    pub fn order(&self) -> Vec<WorkspaceCellId> {
        self.lock().cells.iter().map(|cell| cell.id).collect()
    }

    pub fn source(&self, id: WorkspaceCellId) -> Option<String> {
        let inner = self.lock();
        inner.position(id).map(|index| inner.cells[index].source.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CompilationWorkspace for SimWorkspace {
    fn insert_cell(
        &self,
        source: &str,
        previous: Option<WorkspaceCellId>,
        next: Option<WorkspaceCellId>,
    ) -> WorkspaceCellId {
        let mut inner = self.lock();
        let index = previous
            .and_then(|previous| inner.position(previous).map(|index| index + 1))
            .or_else(|| next.and_then(|next| inner.position(next)))
            .unwrap_or(inner.cells.len());

        let id = WorkspaceCellId::new_v4();
        let tick = inner.next_tick();
        inner.cells.insert(
            index,
            SimCell {
                id,
                source: source.to_string(),
                changed_at: tick,
                emitted_at: None,
            },
        );
        tracing::debug!("workspace cell {} inserted at {}", id, index);
        id
    }

    fn remove_cell(&self, cell: WorkspaceCellId, new_next: Option<WorkspaceCellId>) {
        let mut inner = self.lock();
        let Some(index) = inner.position(cell) else {
            tracing::warn!("removing unknown workspace cell {}", cell);
            return;
        };
        inner.cells.remove(index);

        // Everything after the removed cell lost an upstream definition.
        let successor = new_next
            .and_then(|next| inner.position(next))
            .or_else(|| (index < inner.cells.len()).then_some(index));
        if let Some(successor) = successor {
            inner.touch(successor);
        }
    }

    fn set_cell_buffer(&self, cell: WorkspaceCellId, text: &str) {
        let mut inner = self.lock();
        match inner.position(cell) {
            Some(index) => {
                inner.cells[index].source = text.to_string();
                inner.touch(index);
            }
            None => tracing::warn!("buffer change for unknown workspace cell {}", cell),
        }
    }

    fn evaluation_context_id(&self) -> EvaluationContextId {
        self.context
    }

    async fn is_cell_outdated(&self, cell: WorkspaceCellId) -> bool {
        let inner = self.lock();
        inner
            .position(cell)
            .is_none_or(|index| inner.is_outdated(index))
    }

    async fn emit_compilation(
        &self,
        cell: WorkspaceCellId,
        _environment: &EvaluationEnvironment,
    ) -> Result<CompiledUnit, WorkspaceError> {
        if self.fail_next_emit.swap(false, Ordering::SeqCst) {
            return Err(WorkspaceError::Emit("injected emit failure".to_string()));
        }

        let mut inner = self.lock();
        let index = inner
            .position(cell)
            .ok_or(WorkspaceError::UnknownCell(cell))?;

        let (program, _) = lang::parse(&inner.cells[index].source);
        let payload =
            serde_json::to_vec(&program).map_err(|err| WorkspaceError::Emit(err.to_string()))?;

        let tick = inner.tick;
        inner.cells[index].emitted_at = Some(tick);
        inner.submissions += 1;

        Ok(CompiledUnit {
            cell_id: cell,
            submission_number: inner.submissions,
            evaluation_context_id: self.context,
            is_result_an_expression: program.is_result_an_expression(),
            references: program.references(),
            payload,
        })
    }

    async fn get_diagnostics(
        &self,
        cell: WorkspaceCellId,
    ) -> Result<Vec<Diagnostic>, WorkspaceError> {
        let source = self.source(cell).ok_or(WorkspaceError::UnknownCell(cell))?;
        Ok(lang::parse(&source).1)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn environment() -> EvaluationEnvironment {
        EvaluationEnvironment {
            working_directory: PathBuf::from("."),
        }
    }

    #[test]
    fn test_insert_order() {
        let workspace = SimWorkspace::new();
        let a = workspace.insert_cell("a = 1", None, None);
        let c = workspace.insert_cell("c = 3", Some(a), None);
        let b = workspace.insert_cell("b = 2", Some(a), Some(c));
        let head = workspace.insert_cell("h = 0", None, Some(a));
        assert_eq!(workspace.order(), vec![head, a, b, c]);

        workspace.remove_cell(b, Some(c));
        assert_eq!(workspace.order(), vec![head, a, c]);
    }

    #[tokio::test]
    async fn test_outdated_tracking() {
        let workspace = SimWorkspace::new();
        let env = environment();
        let a = workspace.insert_cell("a = 1", None, None);
        let b = workspace.insert_cell("a + 1", Some(a), None);
        assert!(workspace.is_cell_outdated(b).await);

        workspace.emit_compilation(a, &env).await.unwrap();
        workspace.emit_compilation(b, &env).await.unwrap();
        assert!(!workspace.is_cell_outdated(a).await);
        assert!(!workspace.is_cell_outdated(b).await);

        workspace.set_cell_buffer(a, "a = 2");
        assert!(workspace.is_cell_outdated(a).await);
        assert!(workspace.is_cell_outdated(b).await);
    }

    #[tokio::test]
    async fn test_removal_outdates_successor() {
        let workspace = SimWorkspace::new();
        let env = environment();
        let a = workspace.insert_cell("a = 1", None, None);
        let b = workspace.insert_cell("a + 1", Some(a), None);
        workspace.emit_compilation(b, &env).await.unwrap();
        assert!(!workspace.is_cell_outdated(b).await);

        workspace.remove_cell(a, Some(b));
        assert!(workspace.is_cell_outdated(b).await);
    }

    #[tokio::test]
    async fn test_emit_unit() {
        let workspace = SimWorkspace::new();
        let a = workspace.insert_cell("#r \"Plot.Integration\"\nx = 2\nx * 3", None, None);
        let unit = workspace.emit_compilation(a, &environment()).await.unwrap();

        assert_eq!(unit.cell_id, a);
        assert_eq!(unit.submission_number, 1);
        assert!(unit.is_result_an_expression);
        assert_eq!(unit.integration_references().len(), 1);
        let program: lang::Program = serde_json::from_slice(&unit.payload).unwrap();
        assert_eq!(program.statements.len(), 3);
    }

    #[tokio::test]
    async fn test_injected_failure_and_unknown_cell() {
        let workspace = SimWorkspace::new();
        let a = workspace.insert_cell("1", None, None);
        workspace.fail_next_emit();
        assert!(matches!(
            workspace.emit_compilation(a, &environment()).await,
            Err(WorkspaceError::Emit(_))
        ));
        assert!(workspace.emit_compilation(a, &environment()).await.is_ok());

        let unknown = WorkspaceCellId::new_v4();
        assert!(matches!(
            workspace.get_diagnostics(unknown).await,
            Err(WorkspaceError::UnknownCell(_))
        ));
    }

    #[tokio::test]
    async fn test_diagnostics() {
        let workspace = SimWorkspace::new();
        let a = workspace.insert_cell("x = (1", None, None);
        let diagnostics = workspace.get_diagnostics(a).await.unwrap();
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].is_error());
    }
}
