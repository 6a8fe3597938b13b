//! Undo/Redo - bounded stacks of committed local transactions.
//!
//! The manager only stores what was committed. Turning a record back into
//! edits is the coordinator's job: each entry's [`Change`] yields an inverse
//! [`braid_core::Update`] which is committed as a fresh transaction, so undo
//! is ordinary forward editing and converges like any other write.

use crate::registry::FieldPath;
use crate::transaction::TransactionId;
use braid_core::{Change, Patch};
use std::collections::VecDeque;

/// What one committed transaction did to one field.
#[derive(Clone, Debug, PartialEq)]
pub struct UndoEntry {
    pub path: FieldPath,
    pub change: Change,
    pub patch: Patch,
}

/// A committed transaction, as the undo stacks see it.
#[derive(Clone, Debug, PartialEq)]
pub struct UndoRecord {
    pub transaction_id: TransactionId,
    pub entries: Vec<UndoEntry>,
}

/// Undo and redo stacks for the local replica.
#[derive(Clone, Debug)]
pub struct UndoManager {
    undo_stack: VecDeque<UndoRecord>,
    redo_stack: VecDeque<UndoRecord>,
    max_depth: usize,
}

impl UndoManager {
    pub fn new(max_depth: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: VecDeque::new(),
            max_depth,
        }
    }

    /// Set the maximum number of records kept per stack.
    pub fn set_max_depth(&mut self, max: usize) {
        self.max_depth = max;
        Self::trim(&mut self.undo_stack, max);
        Self::trim(&mut self.redo_stack, max);
    }

    /// Record a fresh local commit. Clears the redo stack.
    pub fn record(&mut self, record: UndoRecord) {
        self.redo_stack.clear();
        self.push_undo(record);
    }

    /// Push onto the undo stack without touching redo (used by redo).
    pub fn push_undo(&mut self, record: UndoRecord) {
        self.undo_stack.push_back(record);
        Self::trim(&mut self.undo_stack, self.max_depth);
    }

    /// Push onto the redo stack (used by undo).
    pub fn push_redo(&mut self, record: UndoRecord) {
        self.redo_stack.push_back(record);
        Self::trim(&mut self.redo_stack, self.max_depth);
    }

    pub fn pop_undo(&mut self) -> Option<UndoRecord> {
        self.undo_stack.pop_back()
    }

    pub fn pop_redo(&mut self) -> Option<UndoRecord> {
        self.redo_stack.pop_back()
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_stack_size(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_stack_size(&self) -> usize {
        self.redo_stack.len()
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }

    fn trim(stack: &mut VecDeque<UndoRecord>, max: usize) {
        while stack.len() > max {
            stack.pop_front();
        }
    }
}

impl Default for UndoManager {
    fn default() -> Self {
        Self::new(100)
    }
}
