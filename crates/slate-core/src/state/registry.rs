//! Registry mapping live editors to evaluation state.

use rustc_hash::FxHashMap;

use crate::cell::CellId;
use crate::error::{Error, Result};
use crate::workspace::WorkspaceCellId;

use super::cell_state::CellEvaluationState;

/// Identity of a live editor/view bound to a code cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EditorKey(pub u64);

impl std::fmt::Display for EditorKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "editor_{}", self.0)
    }
}

/// The single source of truth from editor identity to evaluation state.
///
/// A cell whose state is not registered yet is not eligible for scheduling.
#[derive(Default)]
pub struct EvaluationRegistry {
    states: FxHashMap<EditorKey, CellEvaluationState>,
}

impl EvaluationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the state for an editor.
    pub fn bind(&mut self, editor: EditorKey, state: CellEvaluationState) -> Result<()> {
        if self.states.contains_key(&editor) {
            return Err(Error::InvalidOperation(format!("{editor} is already bound")));
        }
        self.states.insert(editor, state);
        Ok(())
    }

    /// Remove and dispose the state for an editor.
    pub fn unbind(&mut self, editor: EditorKey) -> bool {
        match self.states.remove(&editor) {
            Some(mut state) => {
                state.dispose();
                true
            }
            None => false,
        }
    }

    pub fn lookup(&self, editor: EditorKey) -> Option<&CellEvaluationState> {
        self.states.get(&editor)
    }

    pub fn lookup_mut(&mut self, editor: EditorKey) -> Option<&mut CellEvaluationState> {
        self.states.get_mut(&editor)
    }

    /// Linear scan by workspace identity.
    pub fn find_by_workspace_id(&self, id: WorkspaceCellId) -> Option<&CellEvaluationState> {
        self.states
            .values()
            .find(|state| state.workspace_cell_id() == Some(id))
    }

    /// The hidden cell holding top-level references, if any.
    pub fn hidden_cell(&self) -> Option<CellId> {
        self.states
            .values()
            .find(|state| state.is_hidden())
            .map(|state| state.cell())
    }

    pub fn iter(&self) -> impl Iterator<Item = (EditorKey, &CellEvaluationState)> + '_ {
        self.states.iter().map(|(key, state)| (*key, state))
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
