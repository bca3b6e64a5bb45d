//! Document cells.
//!
//! This module provides:
//! - Cell types (code and prose)
//! - The ordered cell sequence with adjacency queries

mod sequence;
mod types;

pub use sequence::CellSequence;
pub use types::{Cell, CellId, CellKind, CodeCell, ProseCell};
