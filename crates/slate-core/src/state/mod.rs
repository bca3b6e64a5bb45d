//! Per-cell evaluation state and the registry that owns it.
//!
//! - [`CellEvaluationState`]: evaluation count, termination latch, frozen
//!   flag and the view flags of one code cell
//! - [`EvaluationRegistry`]: editor identity to state map

mod cell_state;
mod registry;

pub use cell_state::{CellEvaluationState, CellSnapshot};
pub use registry::{EditorKey, EvaluationRegistry};
