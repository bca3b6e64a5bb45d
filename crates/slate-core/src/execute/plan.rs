//! Evaluation plan construction.
//!
//! A plan for trigger cell `T` is the upstream segment (code cells up to and
//! including `T` that need to run, in document order) followed by the
//! downstream segment (code cells after `T` that already produced output).

use crate::cell::{CellId, CellKind};
use crate::document::Document;
use crate::workspace::WorkspaceCellId;

/// Options for one evaluation request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvaluateOptions {
    /// Schedule every downstream cell, not only previously evaluated ones.
    pub evaluate_all: bool,
}

impl EvaluateOptions {
    pub fn evaluate_all() -> Self {
        Self { evaluate_all: true }
    }
}

/// Ordered list of cells one request will run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationPlan {
    trigger: CellId,
    upstream: Vec<CellId>,
    downstream: Vec<CellId>,
}

impl EvaluationPlan {
    pub fn new(trigger: CellId, upstream: Vec<CellId>, downstream: Vec<CellId>) -> Self {
        Self {
            trigger,
            upstream,
            downstream,
        }
    }

    pub fn trigger(&self) -> CellId {
        self.trigger
    }

    pub fn upstream(&self) -> &[CellId] {
        &self.upstream
    }

    pub fn downstream(&self) -> &[CellId] {
        &self.downstream
    }

    /// Upstream cells followed by downstream cells.
    pub fn cells(&self) -> impl Iterator<Item = CellId> + '_ {
        self.upstream.iter().chain(self.downstream.iter()).copied()
    }

    pub fn len(&self) -> usize {
        self.upstream.len() + self.downstream.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A code cell at or before the trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct UpstreamCandidate {
    pub(crate) cell: CellId,
    /// Runs regardless of what the workspace reports.
    pub(crate) forced: bool,
    pub(crate) workspace_id: Option<WorkspaceCellId>,
}

/// Code cells from the first one through `trigger`, in document order.
///
/// Cells without a registered state or already frozen are left out. Entries
/// that are not forced still run when the workspace reports them outdated.
pub(crate) fn upstream_candidates(doc: &Document, trigger: CellId) -> Vec<UpstreamCandidate> {
    let mut candidates = Vec::new();
    let mut current = Some(trigger);

    while let Some(cell) = current {
        if let Some(state) = doc.state_for_cell(cell).filter(|state| !state.is_frozen()) {
            let flags = state.flags();
            candidates.push(UpstreamCandidate {
                cell,
                forced: cell == trigger
                    || state.evaluation_count() == 0
                    || flags.is_dirty
                    || flags.is_outdated,
                workspace_id: state.workspace_cell_id(),
            });
        }
        current = doc.cells.previous_of_kind(cell, CellKind::Code);
    }

    candidates.reverse();
    candidates
}

/// Walk forward from `trigger` and pick the cells to cascade into.
///
/// Every downstream cell is marked outdated. Once a cell that was running when
/// the agent terminated is seen, nothing after it is scheduled.
pub(crate) fn schedule_downstream(
    doc: &mut Document,
    trigger: CellId,
    evaluate_all: bool,
) -> Vec<CellId> {
    let mut scheduled = Vec::new();
    let mut skip_remaining = false;
    let mut current = doc.cells.next_of_kind(trigger, CellKind::Code);

    while let Some(cell) = current {
        current = doc.cells.next_of_kind(cell, CellKind::Code);
        let Some(state) = doc.state_for_cell_mut(cell) else {
            continue;
        };

        if skip_remaining || state.agent_terminated_while_evaluating() {
            skip_remaining = true;
        } else if !state.is_frozen() && (evaluate_all || state.evaluation_count() > 0) {
            scheduled.push(cell);
        }

        state.mark_outdated();
    }

    scheduled
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cell::{CodeCell, ProseCell};
    use crate::testing::{NullWorkspace, SpyHost};

    struct Fixture {
        doc: Document,
        host: SpyHost,
    }

    impl Fixture {
        fn new() -> Self {
            let mut doc = Document::new();
            doc.install_workspace(Arc::new(NullWorkspace::default()));
            Self {
                doc,
                host: SpyHost::default(),
            }
        }

        fn code_cells(&mut self, n: usize) -> Vec<CellId> {
            let mut cells = Vec::new();
            for _ in 0..n {
                let after = self.doc.cells.last();
                let cell = self
                    .doc
                    .insert_code_cell(CodeCell::new("slate"), after, &self.host)
                    .unwrap();
                cells.push(cell);
            }
            cells
        }

        fn evaluated(&mut self, cell: CellId) {
            self.doc.state_for_cell_mut(cell).unwrap().record_evaluation(false);
        }
    }

    fn forced(candidates: &[UpstreamCandidate]) -> Vec<CellId> {
        candidates.iter().filter(|c| c.forced).map(|c| c.cell).collect()
    }

    #[test]
    fn test_upstream_in_document_order() {
        let mut fx = Fixture::new();
        let cells = fx.code_cells(3);

        let candidates = upstream_candidates(&fx.doc, cells[2]);
        let order: Vec<_> = candidates.iter().map(|c| c.cell).collect();
        assert_eq!(order, cells);
        assert_eq!(forced(&candidates), cells);
    }

    #[test]
    fn test_upstream_forces_only_stale_cells() {
        let mut fx = Fixture::new();
        let cells = fx.code_cells(4);
        for &cell in &cells {
            fx.evaluated(cell);
        }
        fx.doc.set_cell_buffer(cells[1], "y = 2").unwrap();

        let candidates = upstream_candidates(&fx.doc, cells[3]);
        assert_eq!(candidates.len(), 4);
        assert_eq!(forced(&candidates), vec![cells[1], cells[3]]);
        assert!(candidates.iter().all(|c| c.workspace_id.is_some()));
    }

    #[test]
    fn test_upstream_skips_frozen_and_prose() {
        let mut fx = Fixture::new();
        let cells = fx.code_cells(2);
        fx.doc
            .insert_prose_cell(ProseCell::new("text"), Some(cells[0]), &fx.host)
            .unwrap();
        fx.doc.state_for_cell_mut(cells[0]).unwrap().freeze();

        let candidates = upstream_candidates(&fx.doc, cells[1]);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].cell, cells[1]);
    }

    #[test]
    fn test_downstream_only_previously_evaluated() {
        let mut fx = Fixture::new();
        let cells = fx.code_cells(4);
        fx.evaluated(cells[1]);
        fx.evaluated(cells[3]);

        let scheduled = schedule_downstream(&mut fx.doc, cells[0], false);
        assert_eq!(scheduled, vec![cells[1], cells[3]]);
        for &cell in &cells[1..] {
            assert!(fx.doc.state_for_cell(cell).unwrap().flags().is_outdated);
        }
    }

    #[test]
    fn test_downstream_evaluate_all() {
        let mut fx = Fixture::new();
        let cells = fx.code_cells(3);
        let scheduled = schedule_downstream(&mut fx.doc, cells[0], true);
        assert_eq!(scheduled, vec![cells[1], cells[2]]);
    }

    #[test]
    fn test_downstream_latch_after_termination() {
        let mut fx = Fixture::new();
        let cells = fx.code_cells(5);
        fx.evaluated(cells[1]);
        fx.doc.state_for_cell_mut(cells[2]).unwrap().record_evaluation(true);
        fx.evaluated(cells[3]);
        fx.evaluated(cells[4]);

        let scheduled = schedule_downstream(&mut fx.doc, cells[0], true);
        assert_eq!(scheduled, vec![cells[1]]);
        for &cell in &cells[2..] {
            assert!(fx.doc.state_for_cell(cell).unwrap().flags().is_outdated);
        }
    }

    #[test]
    fn test_plan_order() {
        let mut fx = Fixture::new();
        let cells = fx.code_cells(3);
        let plan = EvaluationPlan::new(cells[1], vec![cells[0], cells[1]], vec![cells[2]]);
        assert_eq!(plan.cells().collect::<Vec<_>>(), cells);
        assert_eq!(plan.len(), 3);
        assert_eq!(plan.trigger(), cells[1]);
    }
}
