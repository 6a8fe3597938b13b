//! Register field - a last-writer-wins scalar.
//!
//! Every write is kept in a history sorted by [`DuplexId`], newest first.
//! The visible value is always the head of that history, so a write that
//! arrives late with a lower id is recorded but never surfaces. Replaying
//! the same patch twice leaves the history untouched.

use crate::compose::Compose;
use crate::duplex::DuplexId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Observer-facing delta of a register.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegisterChange {
    pub previous: Value,
    pub current: Value,
}

impl RegisterChange {
    pub fn is_noop(&self) -> bool {
        self.previous == self.current
    }
}

impl Compose for RegisterChange {
    fn compose(self, later: Self) -> Self {
        Self {
            previous: self.previous,
            current: later.current,
        }
    }
}

/// Wire-level delta of a register: the written value and the id it was
/// written under.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegisterPatch {
    pub id: DuplexId,
    pub value: Value,
}

impl Compose for RegisterPatch {
    /// Only the last write of a transaction needs to travel.
    fn compose(self, later: Self) -> Self {
        later
    }
}

/// A last-writer-wins register over JSON values.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RegisterField {
    value: Value,
    /// Write history, sorted by id descending.
    history: Vec<(DuplexId, Value)>,
}

impl RegisterField {
    pub fn new() -> Self {
        Self::default()
    }

    /// A register holding `value` before any write has been observed.
    pub fn with_value(value: Value) -> Self {
        Self {
            value,
            history: Vec::new(),
        }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn history(&self) -> &[(DuplexId, Value)] {
        &self.history
    }

    /// Id of the winning write, if any write has been seen.
    pub fn winner(&self) -> Option<DuplexId> {
        self.history.first().map(|(id, _)| *id)
    }

    /// Apply a local write under a freshly minted id.
    pub fn apply_update(&mut self, value: Value, id: DuplexId) -> (RegisterChange, RegisterPatch) {
        let change = self.integrate(id, value.clone());
        (change, RegisterPatch { id, value })
    }

    /// Apply a write received from a peer.
    pub fn apply_patch(&mut self, patch: &RegisterPatch) -> RegisterChange {
        self.integrate(patch.id, patch.value.clone())
    }

    fn integrate(&mut self, id: DuplexId, value: Value) -> RegisterChange {
        let previous = self.value.clone();
        match self.history.binary_search_by(|(existing, _)| id.cmp(existing)) {
            // Same id: a later write of the same transaction, or a redelivery
            // carrying the identical value.
            Ok(pos) => self.history[pos].1 = value,
            Err(pos) => self.history.insert(pos, (id, value)),
        }
        if let Some((_, head)) = self.history.first() {
            self.value = head.clone();
        }
        RegisterChange {
            previous,
            current: self.value.clone(),
        }
    }

    /// Drop losing writes at or below `stable_version`. The winner is kept.
    pub fn compact(&mut self, stable_version: u64) -> usize {
        let before = self.history.len();
        let mut index = 0;
        self.history.retain(|(id, _)| {
            let keep = index == 0 || id.version > stable_version;
            index += 1;
            keep
        });
        before - self.history.len()
    }
}
