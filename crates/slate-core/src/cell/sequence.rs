//! Ordered cell sequence.
//!
//! Cells live in an arena keyed by [`CellId`]; predecessor and successor links
//! are stored as optional ids. A node stays in the arena after removal, in a
//! detached state, so it can be inserted again.

use rustc_hash::FxHashMap;

use crate::error::{Error, Result};

use super::types::{Cell, CellId, CellKind};

struct CellNode {
    cell: Cell,
    prev: Option<CellId>,
    next: Option<CellId>,
    linked: bool,
}

/// The ordered, doubly-linked list of cells forming one document.
#[derive(Default)]
pub struct CellSequence {
    nodes: FxHashMap<CellId, CellNode>,
    head: Option<CellId>,
    tail: Option<CellId>,
    len: usize,
}

impl CellSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a detached cell owned by this sequence.
    pub fn create(&mut self, cell: impl Into<Cell>) -> CellId {
        let id = CellId::next();
        self.nodes.insert(
            id,
            CellNode {
                cell: cell.into(),
                prev: None,
                next: None,
                linked: false,
            },
        );
        id
    }

    /// Link a cell into the sequence after `after`.
    ///
    /// With `after = None` the cell becomes the head of an empty sequence;
    /// otherwise it goes right before the first cell that is persisted, so
    /// hidden cells can stay ahead of the visible head.
    pub fn insert(&mut self, id: CellId, after: Option<CellId>) -> Result<()> {
        let node = self.nodes.get(&id).ok_or_else(|| {
            Error::InvalidOperation(format!("{id} belongs to another document"))
        })?;
        if node.linked {
            return Ok(());
        }

        match after {
            Some(after) => {
                if !self.contains(after) {
                    return Err(Error::InvalidOperation(format!(
                        "cannot insert after {after}: not part of this document"
                    )));
                }
                self.link_after(id, after);
            }
            None if self.head.is_none() => self.link_after_tail(id),
            None => {
                let before = self
                    .iter()
                    .find(|(_, cell)| cell.should_serialize())
                    .map(|(before, _)| before);
                match before {
                    Some(before) => self.link_before(id, before),
                    None => self.link_after_tail(id),
                }
            }
        }

        self.len += 1;
        Ok(())
    }

    /// Unlink a cell, leaving it detached.
    pub fn remove(&mut self, id: CellId) -> Result<()> {
        let (prev, next) = match self.nodes.get_mut(&id) {
            Some(node) if node.linked => {
                node.linked = false;
                (node.prev.take(), node.next.take())
            }
            _ => return Err(Error::CellNotFound(id)),
        };

        match prev {
            Some(prev) => self.node_mut(prev).next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.node_mut(next).prev = prev,
            None => self.tail = prev,
        }

        self.len -= 1;
        Ok(())
    }

    /// Drop a detached cell from the arena.
    pub fn discard(&mut self, id: CellId) -> Option<Cell> {
        match self.nodes.get(&id) {
            Some(node) if !node.linked => self.nodes.remove(&id).map(|node| node.cell),
            _ => None,
        }
    }

    fn node_mut(&mut self, id: CellId) -> &mut CellNode {
        self.nodes
            .get_mut(&id)
            .unwrap_or_else(|| unreachable!("linked neighbour {id} missing from arena"))
    }

    fn link_after(&mut self, id: CellId, after: CellId) {
        let next = self.node_mut(after).next.replace(id);
        {
            let node = self.node_mut(id);
            node.prev = Some(after);
            node.next = next;
            node.linked = true;
        }
        match next {
            Some(next) => self.node_mut(next).prev = Some(id),
            None => self.tail = Some(id),
        }
    }

    fn link_before(&mut self, id: CellId, before: CellId) {
        match self.node_mut(before).prev {
            Some(prev) => self.link_after(id, prev),
            None => {
                self.node_mut(before).prev = Some(id);
                let node = self.node_mut(id);
                node.prev = None;
                node.next = Some(before);
                node.linked = true;
                self.head = Some(id);
            }
        }
    }

    fn link_after_tail(&mut self, id: CellId) {
        match self.tail {
            Some(tail) => self.link_after(id, tail),
            None => {
                let node = self.node_mut(id);
                node.prev = None;
                node.next = None;
                node.linked = true;
                self.head = Some(id);
                self.tail = Some(id);
            }
        }
    }

    /// Whether the cell is currently linked into this sequence.
    pub fn contains(&self, id: CellId) -> bool {
        self.nodes.get(&id).is_some_and(|node| node.linked)
    }

    pub fn get(&self, id: CellId) -> Option<&Cell> {
        self.nodes.get(&id).map(|node| &node.cell)
    }

    pub fn get_mut(&mut self, id: CellId) -> Option<&mut Cell> {
        self.nodes.get_mut(&id).map(|node| &mut node.cell)
    }

    pub fn first(&self) -> Option<CellId> {
        self.head
    }

    pub fn last(&self) -> Option<CellId> {
        self.tail
    }

    pub fn next(&self, id: CellId) -> Option<CellId> {
        self.nodes.get(&id).and_then(|node| node.next)
    }

    pub fn previous(&self, id: CellId) -> Option<CellId> {
        self.nodes.get(&id).and_then(|node| node.prev)
    }

    fn is_kind(&self, id: CellId, kind: CellKind) -> bool {
        self.get(id).is_some_and(|cell| cell.is_kind(kind))
    }

    pub fn first_of_kind(&self, kind: CellKind) -> Option<CellId> {
        let head = self.head?;
        if self.is_kind(head, kind) {
            Some(head)
        } else {
            self.next_of_kind(head, kind)
        }
    }

    pub fn last_of_kind(&self, kind: CellKind) -> Option<CellId> {
        let tail = self.tail?;
        if self.is_kind(tail, kind) {
            Some(tail)
        } else {
            self.previous_of_kind(tail, kind)
        }
    }

    pub fn next_of_kind(&self, id: CellId, kind: CellKind) -> Option<CellId> {
        let mut current = self.next(id);
        while let Some(candidate) = current {
            if self.is_kind(candidate, kind) {
                return Some(candidate);
            }
            current = self.next(candidate);
        }
        None
    }

    pub fn previous_of_kind(&self, id: CellId, kind: CellKind) -> Option<CellId> {
        let mut current = self.previous(id);
        while let Some(candidate) = current {
            if self.is_kind(candidate, kind) {
                return Some(candidate);
            }
            current = self.previous(candidate);
        }
        None
    }

    /// Iterate linked cells in document order.
    pub fn iter(&self) -> impl Iterator<Item = (CellId, &Cell)> + '_ {
        std::iter::successors(self.head, |&id| self.next(id))
            .filter_map(|id| self.get(id).map(|cell| (id, cell)))
    }

    /// Iterate linked cells of one kind in document order.
    pub fn iter_kind(&self, kind: CellKind) -> impl Iterator<Item = (CellId, &Cell)> + '_ {
        self.iter().filter(move |(_, cell)| cell.is_kind(kind))
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
