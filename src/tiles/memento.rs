use std::collections::HashMap;
use std::sync::Arc;

use crate::error::TileError;
use crate::tiles::tile::Tile;

/// State of one cell before and after a transaction. `None` means the cell
/// had no tile.
pub(crate) struct MementoItem {
    pub old: Option<Arc<Tile>>,
    pub new: Option<Arc<Tile>>,
}

/// Tiles touched by one transaction.
///
/// `old` tiles are only ever locked for read, so they keep the
/// pre-transaction bytes however the live tiles change.
#[derive(Default)]
pub struct Memento {
    items: HashMap<(i32, i32), MementoItem>,
}

impl Memento {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, col: i32, row: i32) -> bool {
        self.items.contains_key(&(col, row))
    }

    /// Cells touched, in no particular order.
    pub fn cells(&self) -> impl Iterator<Item = (i32, i32)> + '_ {
        self.items.keys().copied()
    }

    pub(crate) fn record(&mut self, col: i32, row: i32, old: Option<Arc<Tile>>) {
        self.items
            .entry((col, row))
            .or_insert(MementoItem { old, new: None });
    }

    /// `Some(None)` if the cell was recorded as absent before the transaction.
    pub(crate) fn old_tile(&self, col: i32, row: i32) -> Option<Option<Arc<Tile>>> {
        self.items.get(&(col, row)).map(|item| item.old.clone())
    }

    pub(crate) fn items(&self) -> impl Iterator<Item = (&(i32, i32), &MementoItem)> {
        self.items.iter()
    }

    pub(crate) fn items_mut(&mut self) -> impl Iterator<Item = (&(i32, i32), &mut MementoItem)> {
        self.items.iter_mut()
    }
}

/// Open transaction plus undo/redo stacks of committed ones.
#[derive(Default)]
pub struct MementoManager {
    current: Option<Memento>,
    undo_stack: Vec<Memento>,
    redo_stack: Vec<Memento>,
}

impl MementoManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_recording(&self) -> bool {
        self.current.is_some()
    }

    pub fn begin(&mut self) -> Result<(), TileError> {
        if self.current.is_some() {
            return Err(TileError::TransactionAlreadyOpen);
        }
        self.current = Some(Memento::default());
        Ok(())
    }

    pub fn current(&self) -> Option<&Memento> {
        self.current.as_ref()
    }

    pub(crate) fn current_mut(&mut self) -> Option<&mut Memento> {
        self.current.as_mut()
    }

    /// Closes the open transaction without touching the stacks.
    pub(crate) fn take_current(&mut self) -> Result<Memento, TileError> {
        self.current.take().ok_or(TileError::NoTransaction)
    }

    /// Push a committed transaction and clear redo.
    pub(crate) fn push_committed(&mut self, memento: Memento) {
        self.undo_stack.push(memento);
        self.redo_stack.clear();
    }

    pub(crate) fn pop_undo(&mut self) -> Result<Memento, TileError> {
        if self.current.is_some() {
            return Err(TileError::TransactionOpen);
        }
        self.undo_stack.pop().ok_or(TileError::NothingToUndo)
    }

    pub(crate) fn push_redo(&mut self, memento: Memento) {
        self.redo_stack.push(memento);
    }

    pub(crate) fn pop_redo(&mut self) -> Result<Memento, TileError> {
        if self.current.is_some() {
            return Err(TileError::TransactionOpen);
        }
        self.redo_stack.pop().ok_or(TileError::NothingToRedo)
    }

    pub(crate) fn push_undo(&mut self, memento: Memento) {
        self.undo_stack.push(memento);
    }

    pub fn can_undo(&self) -> bool {
        self.current.is_none() && !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        self.current.is_none() && !self.redo_stack.is_empty()
    }
}
