//! Evaluation state of one code cell.

use std::sync::Arc;

use crate::cell::CellId;
use crate::view::{CellFlags, CellView};
use crate::workspace::{CompilationWorkspace, WorkspaceCellId};

use super::registry::EditorKey;

/// Link between a cell state and its compilation workspace.
#[derive(Clone)]
struct WorkspaceBinding {
    workspace: Arc<dyn CompilationWorkspace>,
    cell_id: WorkspaceCellId,
}

/// Point-in-time copy of a cell's evaluation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellSnapshot {
    pub evaluation_count: u32,
    pub agent_terminated_while_evaluating: bool,
    pub is_result_an_expression: bool,
    pub is_frozen: bool,
    pub is_hidden: bool,
    pub flags: CellFlags,
    pub workspace_cell_id: Option<WorkspaceCellId>,
}

/// Evaluation bookkeeping for one code cell.
///
/// Owned by the [`EvaluationRegistry`](super::EvaluationRegistry). The state
/// points at its cell and view but owns neither.
pub struct CellEvaluationState {
    cell: CellId,
    editor: EditorKey,
    view: Arc<dyn CellView>,
    is_hidden: bool,
    binding: Option<WorkspaceBinding>,
    evaluation_count: u32,
    agent_terminated_while_evaluating: bool,
    is_result_an_expression: bool,
    is_frozen: bool,
    flags: CellFlags,
}

impl CellEvaluationState {
    pub fn new(cell: CellId, editor: EditorKey, view: Arc<dyn CellView>) -> Self {
        Self {
            cell,
            editor,
            view,
            is_hidden: false,
            binding: None,
            evaluation_count: 0,
            agent_terminated_while_evaluating: false,
            is_result_an_expression: false,
            is_frozen: false,
            flags: CellFlags::default(),
        }
    }

    pub(crate) fn hidden(mut self) -> Self {
        self.is_hidden = true;
        self
    }

    pub fn cell(&self) -> CellId {
        self.cell
    }

    pub fn editor(&self) -> EditorKey {
        self.editor
    }

    pub fn view(&self) -> &Arc<dyn CellView> {
        &self.view
    }

    pub fn is_hidden(&self) -> bool {
        self.is_hidden
    }

    /// Identity assigned by the workspace, once bound.
    pub fn workspace_cell_id(&self) -> Option<WorkspaceCellId> {
        self.binding.as_ref().map(|binding| binding.cell_id)
    }

    pub fn is_bound(&self) -> bool {
        self.binding.is_some()
    }

    pub fn evaluation_count(&self) -> u32 {
        self.evaluation_count
    }

    pub fn agent_terminated_while_evaluating(&self) -> bool {
        self.agent_terminated_while_evaluating
    }

    pub fn is_result_an_expression(&self) -> bool {
        self.is_result_an_expression
    }

    pub(crate) fn set_result_is_expression(&mut self, value: bool) {
        self.is_result_an_expression = value;
    }

    pub fn is_frozen(&self) -> bool {
        self.is_frozen
    }

    pub fn flags(&self) -> CellFlags {
        self.flags
    }

    pub fn snapshot(&self) -> CellSnapshot {
        CellSnapshot {
            evaluation_count: self.evaluation_count,
            agent_terminated_while_evaluating: self.agent_terminated_while_evaluating,
            is_result_an_expression: self.is_result_an_expression,
            is_frozen: self.is_frozen,
            is_hidden: self.is_hidden,
            flags: self.flags,
            workspace_cell_id: self.workspace_cell_id(),
        }
    }

    /// Attach to a workspace identity. Buffer changes are forwarded from now on.
    pub fn bind_to_workspace(
        &mut self,
        workspace: Arc<dyn CompilationWorkspace>,
        cell_id: WorkspaceCellId,
    ) {
        self.binding = Some(WorkspaceBinding { workspace, cell_id });
    }

    /// Forward a buffer edit to the workspace.
    pub fn buffer_changed(&self, text: &str) {
        if let Some(binding) = &self.binding {
            binding.workspace.set_cell_buffer(binding.cell_id, text);
        }
    }

    /// Detach from the workspace; later edits are no longer forwarded.
    pub fn dispose(&mut self) {
        self.binding = None;
    }

    fn update(&mut self, apply: impl FnOnce(&mut CellFlags)) {
        let before = self.flags;
        apply(&mut self.flags);
        if self.flags != before {
            self.view.update_flags(self.flags);
        }
    }

    pub fn mark_dirty(&mut self) {
        if !self.is_frozen {
            self.update(|flags| flags.is_dirty = true);
        }
    }

    pub fn mark_outdated(&mut self) {
        if !self.is_frozen {
            self.update(|flags| flags.is_outdated = true);
        }
    }

    pub fn set_evaluating(&mut self, value: bool) {
        self.update(|flags| flags.is_evaluating = value);
    }

    pub fn set_has_error_diagnostics(&mut self, value: bool) {
        self.update(|flags| flags.has_error_diagnostics = value);
    }

    /// Record a finished evaluation.
    pub fn record_evaluation(&mut self, agent_terminated: bool) {
        self.evaluation_count += 1;
        self.agent_terminated_while_evaluating = agent_terminated;
        self.update(|flags| {
            flags.is_dirty = false;
            flags.is_outdated = false;
            flags.is_evaluating = false;
        });
    }

    /// Refuse any further evaluation of this cell.
    pub fn freeze(&mut self) {
        if !self.is_frozen {
            self.is_frozen = true;
            self.view.freeze();
        }
    }
}

impl std::fmt::Debug for CellEvaluationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CellEvaluationState")
            .field("cell", &self.cell)
            .field("editor", &self.editor)
            .field("workspace_cell_id", &self.workspace_cell_id())
            .field("evaluation_count", &self.evaluation_count)
            .field("agent_terminated_while_evaluating", &self.agent_terminated_while_evaluating)
            .field("is_frozen", &self.is_frozen)
            .field("flags", &self.flags)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{NullWorkspace, SpyView};

    fn state_with_spy() -> (CellEvaluationState, Arc<SpyView>) {
        let view = Arc::new(SpyView::default());
        let mut seq = crate::cell::CellSequence::new();
        let cell = seq.create(crate::cell::CodeCell::new("slate"));
        (CellEvaluationState::new(cell, EditorKey(1), view.clone()), view)
    }

    #[test]
    fn test_new_state() {
        let (state, _) = state_with_spy();
        assert_eq!(state.evaluation_count(), 0);
        assert!(!state.is_bound());
        assert!(!state.is_frozen());
        assert_eq!(state.flags(), CellFlags::default());
    }

    #[test]
    fn test_flag_changes_reach_view() {
        let (mut state, view) = state_with_spy();
        state.mark_dirty();
        state.mark_dirty();
        state.mark_outdated();

        let updates = view.flag_updates();
        assert_eq!(updates.len(), 2);
        assert!(updates[1].is_dirty && updates[1].is_outdated);
    }

    #[test]
    fn test_record_evaluation_clears_flags() {
        let (mut state, _) = state_with_spy();
        state.mark_dirty();
        state.mark_outdated();
        state.set_evaluating(true);

        state.record_evaluation(true);
        assert_eq!(state.evaluation_count(), 1);
        assert!(state.agent_terminated_while_evaluating());
        assert!(!state.flags().is_dirty);
        assert!(!state.flags().is_outdated);
        assert!(!state.flags().is_evaluating);

        state.record_evaluation(false);
        assert_eq!(state.evaluation_count(), 2);
        assert!(!state.agent_terminated_while_evaluating());
    }

    #[test]
    fn test_frozen_flags_never_change() {
        let (mut state, view) = state_with_spy();
        state.freeze();
        state.freeze();
        state.mark_dirty();
        state.mark_outdated();

        assert!(state.is_frozen());
        assert!(!state.flags().is_dirty);
        assert!(!state.flags().is_outdated);
        assert_eq!(view.freeze_count(), 1);
    }

    #[test]
    fn test_buffer_forwarding_stops_after_dispose() {
        let (mut state, _) = state_with_spy();
        let workspace = Arc::new(NullWorkspace::default());
        let id = WorkspaceCellId::new_v4();
        state.bind_to_workspace(workspace.clone(), id);
        assert_eq!(state.workspace_cell_id(), Some(id));

        state.buffer_changed("x = 1");
        state.dispose();
        state.buffer_changed("x = 2");

        assert_eq!(workspace.buffers(), vec![(id, "x = 1".to_string())]);
        assert!(!state.is_bound());
    }
}
