//! Types for document cells.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::state::EditorKey;

/// Source of cell identities. Identities are unique for the whole process so a
/// sequence can tell its own cells apart from cells created by another one.
static NEXT_CELL_ID: AtomicUsize = AtomicUsize::new(1);

/// Unique identifier for a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct CellId(pub(crate) usize);

impl CellId {
    pub(crate) fn next() -> Self {
        Self(NEXT_CELL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for CellId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cell_{}", self.0)
    }
}

/// Kind of a cell, used for adjacency queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellKind {
    /// Executable code.
    Code,
    /// Markup text, never evaluated.
    Prose,
}

/// An executable code cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeCell {
    /// Source buffer.
    pub source: String,
    /// Language tag.
    pub language: String,
    /// Whether the cell is written out when the document is persisted.
    pub should_serialize: bool,
    /// Hidden cells have no visible view (e.g. the reference cell).
    pub is_hidden: bool,
    /// Editor bound to this cell, once it has a view.
    pub(crate) editor: Option<EditorKey>,
}

impl CodeCell {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            source: String::new(),
            language: language.into(),
            should_serialize: true,
            is_hidden: false,
            editor: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// A hidden, non-persisted cell.
    pub fn hidden(language: impl Into<String>) -> Self {
        Self {
            should_serialize: false,
            is_hidden: true,
            ..Self::new(language)
        }
    }

    pub fn editor(&self) -> Option<EditorKey> {
        self.editor
    }
}

/// A prose (markup) cell.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProseCell {
    pub markup: String,
}

impl ProseCell {
    pub fn new(markup: impl Into<String>) -> Self {
        Self {
            markup: markup.into(),
        }
    }
}

/// A cell of the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    Code(CodeCell),
    Prose(ProseCell),
}

impl Cell {
    pub fn kind(&self) -> CellKind {
        match self {
            Self::Code(_) => CellKind::Code,
            Self::Prose(_) => CellKind::Prose,
        }
    }

    pub fn is_kind(&self, kind: CellKind) -> bool {
        self.kind() == kind
    }

    /// Whether the cell takes part in persistence.
    pub fn should_serialize(&self) -> bool {
        match self {
            Self::Code(code) => code.should_serialize,
            Self::Prose(_) => true,
        }
    }

    pub fn as_code(&self) -> Option<&CodeCell> {
        match self {
            Self::Code(code) => Some(code),
            Self::Prose(_) => None,
        }
    }

    pub fn as_code_mut(&mut self) -> Option<&mut CodeCell> {
        match self {
            Self::Code(code) => Some(code),
            Self::Prose(_) => None,
        }
    }
}

impl From<CodeCell> for Cell {
    fn from(cell: CodeCell) -> Self {
        Self::Code(cell)
    }
}

impl From<ProseCell> for Cell {
    fn from(cell: ProseCell) -> Self {
        Self::Prose(cell)
    }
}
