//! Document structure shared by the session and the result router.
//!
//! All methods are synchronous. The session holds the document behind a mutex
//! and never keeps the lock across a suspension point.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::cell::{Cell, CellId, CellKind, CellSequence, CodeCell, ProseCell};
use crate::error::{Error, Result};
use crate::execute::PipelinePhase;
use crate::state::{CellEvaluationState, EditorKey, EvaluationRegistry};
use crate::view::{CellView, DocumentHost, HiddenCellView};
use crate::workspace::{CompilationWorkspace, WorkspaceCellId};

/// Shared handle to a document.
pub(crate) type SharedDocument = Arc<Mutex<Document>>;

/// Lock a document, recovering from a poisoned mutex.
pub(crate) fn lock(document: &Mutex<Document>) -> MutexGuard<'_, Document> {
    document.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) struct Document {
    pub(crate) cells: CellSequence,
    pub(crate) registry: EvaluationRegistry,
    pub(crate) workspace: Option<Arc<dyn CompilationWorkspace>>,
    pub(crate) phase: PipelinePhase,
    next_editor: u64,
}

impl Document {
    pub(crate) fn new() -> Self {
        Self {
            cells: CellSequence::new(),
            registry: EvaluationRegistry::new(),
            workspace: None,
            phase: PipelinePhase::Idle,
            next_editor: 1,
        }
    }

    fn allocate_editor(&mut self) -> EditorKey {
        let editor = EditorKey(self.next_editor);
        self.next_editor += 1;
        editor
    }

    fn editor_of(&self, cell: CellId) -> Option<EditorKey> {
        self.cells.get(cell)?.as_code()?.editor()
    }

    /// State of a code cell, resolved through the registry.
    pub(crate) fn state_for_cell(&self, cell: CellId) -> Option<&CellEvaluationState> {
        self.registry.lookup(self.editor_of(cell)?)
    }

    pub(crate) fn state_for_cell_mut(&mut self, cell: CellId) -> Option<&mut CellEvaluationState> {
        let editor = self.editor_of(cell)?;
        self.registry.lookup_mut(editor)
    }

    pub(crate) fn workspace_id_of(&self, cell: CellId) -> Option<WorkspaceCellId> {
        self.state_for_cell(cell)?.workspace_cell_id()
    }

    fn code_cell(&self, cell: CellId) -> Result<&CodeCell> {
        match self.cells.get(cell) {
            Some(Cell::Code(code)) => Ok(code),
            Some(Cell::Prose(_)) => Err(Error::NotACodeCell(cell)),
            None => Err(Error::CellNotFound(cell)),
        }
    }

    pub(crate) fn source_of(&self, cell: CellId) -> Result<&str> {
        self.code_cell(cell).map(|code| code.source.as_str())
    }

    /// Link a code cell, create its view and state, and mirror it into the
    /// workspace between its code neighbours.
    pub(crate) fn insert_code_cell(
        &mut self,
        code: CodeCell,
        after: Option<CellId>,
        host: &dyn DocumentHost,
    ) -> Result<CellId> {
        let mut code = code;
        code.editor = None;
        let is_hidden = code.is_hidden;
        let id = self.cells.create(code);
        if let Err(err) = self.cells.insert(id, after) {
            self.cells.discard(id);
            return Err(err);
        }

        let previous = self.cells.previous_of_kind(id, CellKind::Code);
        let next = self.cells.next_of_kind(id, CellKind::Code);

        let editor = self.allocate_editor();
        let view: Arc<dyn CellView> = if is_hidden {
            Arc::new(HiddenCellView)
        } else {
            host.bind_code_cell(id, editor)
        };

        let mut state = CellEvaluationState::new(id, editor, view);
        if is_hidden {
            state = state.hidden();
        }

        if let Some(workspace) = self.workspace.clone() {
            let previous = previous.and_then(|cell| self.workspace_id_of(cell));
            let next = next.and_then(|cell| self.workspace_id_of(cell));
            let source = self.source_of(id)?.to_string();
            let workspace_id = workspace.insert_cell(&source, previous, next);
            state.bind_to_workspace(workspace, workspace_id);
        }

        if !is_hidden {
            host.insert_cell_in_view(id, after);
        }

        self.registry.bind(editor, state)?;
        if let Some(code) = self.cells.get_mut(id).and_then(Cell::as_code_mut) {
            code.editor = Some(editor);
        }

        self.outdate_code_cells_from(id);
        tracing::debug!("inserted {} after {:?}", id, after);
        Ok(id)
    }

    pub(crate) fn insert_prose_cell(
        &mut self,
        prose: ProseCell,
        after: Option<CellId>,
        host: &dyn DocumentHost,
    ) -> Result<CellId> {
        let id = self.cells.create(prose);
        if let Err(err) = self.cells.insert(id, after) {
            self.cells.discard(id);
            return Err(err);
        }
        host.bind_prose_cell(id);
        host.insert_cell_in_view(id, after);
        Ok(id)
    }

    /// Remove a cell from the document. Returns the cell that should take focus.
    pub(crate) fn delete_cell(
        &mut self,
        cell: CellId,
        host: &dyn DocumentHost,
    ) -> Result<Option<CellId>> {
        if !self.cells.contains(cell) {
            return Err(Error::CellNotFound(cell));
        }

        if let Some(editor) = self.editor_of(cell) {
            self.outdate_code_cells_from(cell);

            let next = self.cells.next_of_kind(cell, CellKind::Code);
            if let (Some(workspace), Some(workspace_id)) =
                (self.workspace.clone(), self.workspace_id_of(cell))
            {
                let new_next = next.and_then(|next| self.workspace_id_of(next));
                workspace.remove_cell(workspace_id, new_next);
            }

            self.registry.unbind(editor);
        }

        let focus = self.cells.next(cell).or_else(|| self.cells.previous(cell));
        self.cells.remove(cell)?;
        self.cells.discard(cell);
        host.unbind_cell(cell);

        tracing::debug!("deleted {}", cell);
        Ok(focus)
    }

    /// Replace a code cell's buffer, mark it dirty and forward the edit.
    pub(crate) fn set_cell_buffer(&mut self, cell: CellId, text: &str) -> Result<()> {
        match self.cells.get_mut(cell) {
            Some(Cell::Code(code)) => code.source = text.to_string(),
            Some(Cell::Prose(_)) => return Err(Error::NotACodeCell(cell)),
            None => return Err(Error::CellNotFound(cell)),
        }

        if let Some(state) = self.state_for_cell_mut(cell) {
            state.mark_dirty();
            state.buffer_changed(text);
        }
        Ok(())
    }

    /// Mark `cell` and every later code cell outdated.
    pub(crate) fn outdate_code_cells_from(&mut self, cell: CellId) {
        let mut current = if self.cells.get(cell).is_some_and(|c| c.is_kind(CellKind::Code)) {
            Some(cell)
        } else {
            self.cells.next_of_kind(cell, CellKind::Code)
        };

        while let Some(id) = current {
            if let Some(state) = self.state_for_cell_mut(id) {
                state.mark_outdated();
            }
            current = self.cells.next_of_kind(id, CellKind::Code);
        }
    }

    pub(crate) fn outdate_all_code_cells(&mut self) {
        if let Some(first) = self.cells.first_of_kind(CellKind::Code) {
            self.outdate_code_cells_from(first);
        }
    }

    /// Install the compilation workspace and bind every registered code cell
    /// to it in document order.
    pub(crate) fn install_workspace(&mut self, workspace: Arc<dyn CompilationWorkspace>) {
        self.workspace = Some(workspace.clone());

        let cells: Vec<CellId> = self
            .cells
            .iter_kind(CellKind::Code)
            .map(|(id, _)| id)
            .collect();

        let mut previous = None;
        for cell in cells {
            let Ok(source) = self.source_of(cell).map(str::to_string) else {
                continue;
            };
            let Some(state) = self.state_for_cell_mut(cell) else {
                continue;
            };
            let workspace_id = workspace.insert_cell(&source, previous, None);
            state.bind_to_workspace(workspace.clone(), workspace_id);
            previous = Some(workspace_id);
        }

        tracing::info!("compilation workspace bound to {} cells", self.registry.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{NullWorkspace, SpyHost};

    fn document_with_workspace() -> (Document, Arc<NullWorkspace>, SpyHost) {
        let mut doc = Document::new();
        let workspace = Arc::new(NullWorkspace::default());
        doc.install_workspace(workspace.clone());
        (doc, workspace, SpyHost::default())
    }

    #[test]
    fn test_insert_code_cell_binds_state() {
        let (mut doc, workspace, host) = document_with_workspace();
        let a = doc.insert_code_cell(CodeCell::new("slate"), None, &host).unwrap();
        let b = doc.insert_code_cell(CodeCell::new("slate"), Some(a), &host).unwrap();

        let state = doc.state_for_cell(b).unwrap();
        assert_eq!(state.cell(), b);
        assert!(state.is_bound());

        let inserts = workspace.inserts.lock().unwrap().clone();
        assert_eq!(inserts.len(), 2);
        assert_eq!(inserts[1].1, doc.workspace_id_of(a));
        assert_eq!(inserts[1].2, None);
    }

    #[test]
    fn test_insert_between_passes_both_neighbours() {
        let (mut doc, workspace, host) = document_with_workspace();
        let a = doc.insert_code_cell(CodeCell::new("slate"), None, &host).unwrap();
        let c = doc.insert_code_cell(CodeCell::new("slate"), Some(a), &host).unwrap();
        let p = doc.insert_prose_cell(ProseCell::new("note"), Some(a), &host).unwrap();
        doc.insert_code_cell(CodeCell::new("slate"), Some(p), &host).unwrap();

        let inserts = workspace.inserts.lock().unwrap().clone();
        assert_eq!(inserts[2].1, doc.workspace_id_of(a));
        assert_eq!(inserts[2].2, doc.workspace_id_of(c));
    }

    #[test]
    fn test_insert_outdates_following_cells() {
        let (mut doc, _, host) = document_with_workspace();
        let a = doc.insert_code_cell(CodeCell::new("slate"), None, &host).unwrap();
        let b = doc.insert_code_cell(CodeCell::new("slate"), Some(a), &host).unwrap();
        doc.state_for_cell_mut(a).unwrap().record_evaluation(false);
        doc.state_for_cell_mut(b).unwrap().record_evaluation(false);

        doc.insert_code_cell(CodeCell::new("slate"), Some(a), &host).unwrap();
        assert!(doc.state_for_cell(b).unwrap().flags().is_outdated);
        assert!(!doc.state_for_cell(a).unwrap().flags().is_outdated);
    }

    #[test]
    fn test_hidden_cell_has_no_visible_view() {
        let (mut doc, _, host) = document_with_workspace();
        let hidden = doc.insert_code_cell(CodeCell::hidden("slate"), None, &host).unwrap();
        assert!(host.views.lock().unwrap().is_empty());
        assert_eq!(doc.registry.hidden_cell(), Some(hidden));
    }

    #[test]
    fn test_set_cell_buffer_marks_dirty_and_forwards() {
        let (mut doc, workspace, host) = document_with_workspace();
        let a = doc.insert_code_cell(CodeCell::new("slate"), None, &host).unwrap();
        doc.set_cell_buffer(a, "x = 1").unwrap();

        assert_eq!(doc.source_of(a).unwrap(), "x = 1");
        assert!(doc.state_for_cell(a).unwrap().flags().is_dirty);
        let id = doc.workspace_id_of(a).unwrap();
        assert_eq!(workspace.buffers(), vec![(id, "x = 1".to_string())]);

        let p = doc.insert_prose_cell(ProseCell::new(""), Some(a), &host).unwrap();
        assert!(matches!(doc.set_cell_buffer(p, "x"), Err(Error::NotACodeCell(_))));
    }

    #[test]
    fn test_delete_cell_relinks_workspace_and_unbinds() {
        let (mut doc, workspace, host) = document_with_workspace();
        let a = doc.insert_code_cell(CodeCell::new("slate"), None, &host).unwrap();
        let b = doc.insert_code_cell(CodeCell::new("slate"), Some(a), &host).unwrap();
        let c = doc.insert_code_cell(CodeCell::new("slate"), Some(b), &host).unwrap();
        let b_id = doc.workspace_id_of(b).unwrap();
        let c_id = doc.workspace_id_of(c);

        let focus = doc.delete_cell(b, &host).unwrap();
        assert_eq!(focus, Some(c));
        assert_eq!(workspace.removals.lock().unwrap().clone(), vec![(b_id, c_id)]);
        assert_eq!(doc.registry.len(), 2);
        assert!(doc.registry.find_by_workspace_id(b_id).is_none());
        assert!(!doc.cells.contains(b));
        assert_eq!(host.unbound.lock().unwrap().clone(), vec![b]);

        let focus = doc.delete_cell(c, &host).unwrap();
        assert_eq!(focus, Some(a));
        assert!(matches!(doc.delete_cell(c, &host), Err(Error::CellNotFound(_))));
    }

    #[test]
    fn test_deferred_workspace_binding() {
        let mut doc = Document::new();
        let host = SpyHost::default();
        let a = doc.insert_code_cell(CodeCell::new("slate"), None, &host).unwrap();
        let b = doc.insert_code_cell(CodeCell::new("slate"), Some(a), &host).unwrap();
        assert!(doc.workspace_id_of(a).is_none());

        let workspace = Arc::new(NullWorkspace::default());
        doc.install_workspace(workspace.clone());

        let inserts = workspace.inserts.lock().unwrap().clone();
        assert_eq!(inserts.len(), 2);
        assert_eq!(inserts[0].0, doc.workspace_id_of(a).unwrap());
        assert_eq!(inserts[1].1, doc.workspace_id_of(a));
        assert_eq!(inserts[1].0, doc.workspace_id_of(b).unwrap());
    }
}
