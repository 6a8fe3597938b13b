//! Field - the closed set of replicated field kinds.
//!
//! Every operation dispatches with an exhaustive `match`, so adding a kind
//! forces every operation to handle it. Pairing a delta of one kind with a
//! field of another is reported as [`CoreError::KindMismatch`].

use crate::compose::Compose;
use crate::duplex::DuplexId;
use crate::error::{CoreError, Result};
use crate::map::{MapChange, MapField, MapPatch, MapUpdate};
use crate::register::{RegisterChange, RegisterField, RegisterPatch};
use crate::sequence::{ListField, SequenceChange, SequencePatch, Splice, SpliceOp, TextField};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Kind tag of a field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Register,
    Map,
    List,
    Text,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldKind::Register => "register",
            FieldKind::Map => "map",
            FieldKind::List => "list",
            FieldKind::Text => "text",
        };
        f.write_str(name)
    }
}

/// A local mutation request.
#[derive(Clone, Debug, PartialEq)]
pub enum Update {
    Register(Value),
    Map(MapUpdate),
    List(Vec<Splice<Value>>),
    Text(Vec<Splice<char>>),
    /// Undo previously produced list ops.
    RevertList(Vec<SpliceOp<Value>>),
    /// Undo previously produced text ops.
    RevertText(Vec<SpliceOp<char>>),
}

impl Update {
    pub fn kind(&self) -> FieldKind {
        match self {
            Update::Register(_) => FieldKind::Register,
            Update::Map(_) => FieldKind::Map,
            Update::List(_) | Update::RevertList(_) => FieldKind::List,
            Update::Text(_) | Update::RevertText(_) => FieldKind::Text,
        }
    }
}

/// Observer-facing delta.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Change {
    Register(RegisterChange),
    Map(MapChange),
    List(SequenceChange<Value>),
    Text(SequenceChange<char>),
}

impl Change {
    pub fn kind(&self) -> FieldKind {
        match self {
            Change::Register(_) => FieldKind::Register,
            Change::Map(_) => FieldKind::Map,
            Change::List(_) => FieldKind::List,
            Change::Text(_) => FieldKind::Text,
        }
    }

    /// True if observers would see no difference.
    pub fn is_noop(&self) -> bool {
        match self {
            Change::Register(c) => c.is_noop(),
            Change::Map(c) => c.is_noop(),
            Change::List(c) => c.is_empty(),
            Change::Text(c) => c.is_empty(),
        }
    }

    /// Compose with a later change to the same field.
    pub fn merge(self, later: Change) -> Result<Change> {
        match (self, later) {
            (Change::Register(a), Change::Register(b)) => Ok(Change::Register(a.compose(b))),
            (Change::Map(a), Change::Map(b)) => Ok(Change::Map(a.compose(b))),
            (Change::List(a), Change::List(b)) => Ok(Change::List(a.compose(b))),
            (Change::Text(a), Change::Text(b)) => Ok(Change::Text(a.compose(b))),
            (a, b) => Err(CoreError::KindMismatch {
                expected: a.kind(),
                found: b.kind(),
            }),
        }
    }

    /// The update that restores what this change replaced. Sequences are
    /// inverted through their patch ops so the inverse resolves against
    /// element ids rather than stale positions.
    pub fn inverse(&self, patch: &Patch) -> Result<Update> {
        match (self, patch) {
            (Change::Register(c), Patch::Register(_)) => Ok(Update::Register(c.previous.clone())),
            (Change::Map(c), Patch::Map(_)) => Ok(Update::Map(
                c.keys
                    .iter()
                    .map(|(key, kc)| (key.clone(), kc.previous.clone()))
                    .collect(),
            )),
            (Change::List(_), Patch::List(p)) => Ok(Update::RevertList(p.ops.clone())),
            (Change::Text(_), Patch::Text(p)) => Ok(Update::RevertText(p.ops.clone())),
            (c, p) => Err(CoreError::KindMismatch {
                expected: c.kind(),
                found: p.kind(),
            }),
        }
    }
}

/// Wire-level delta.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Patch {
    Register(RegisterPatch),
    Map(MapPatch),
    List(SequencePatch<Value>),
    Text(SequencePatch<char>),
}

impl Patch {
    pub fn kind(&self) -> FieldKind {
        match self {
            Patch::Register(_) => FieldKind::Register,
            Patch::Map(_) => FieldKind::Map,
            Patch::List(_) => FieldKind::List,
            Patch::Text(_) => FieldKind::Text,
        }
    }

    /// True if the patch carries nothing a peer needs.
    pub fn is_empty(&self) -> bool {
        match self {
            Patch::Register(_) => false,
            Patch::Map(p) => p.entries.is_empty(),
            Patch::List(p) => p.is_empty(),
            Patch::Text(p) => p.is_empty(),
        }
    }

    /// Compose with a later patch to the same field.
    pub fn merge(self, later: Patch) -> Result<Patch> {
        match (self, later) {
            (Patch::Register(a), Patch::Register(b)) => Ok(Patch::Register(a.compose(b))),
            (Patch::Map(a), Patch::Map(b)) => Ok(Patch::Map(a.compose(b))),
            (Patch::List(a), Patch::List(b)) => Ok(Patch::List(a.compose(b))),
            (Patch::Text(a), Patch::Text(b)) => Ok(Patch::Text(a.compose(b))),
            (a, b) => Err(CoreError::KindMismatch {
                expected: a.kind(),
                found: b.kind(),
            }),
        }
    }
}

/// A replicated field instance: visible value plus private metadata.
#[derive(Clone, Debug, PartialEq)]
pub enum Field {
    Register(RegisterField),
    Map(MapField),
    List(ListField),
    Text(TextField),
}

impl Field {
    /// A field of `kind` in its default state.
    pub fn new(kind: FieldKind) -> Self {
        match kind {
            FieldKind::Register => Field::Register(RegisterField::new()),
            FieldKind::Map => Field::Map(MapField::new()),
            FieldKind::List => Field::List(ListField::new()),
            FieldKind::Text => Field::Text(TextField::new()),
        }
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            Field::Register(_) => FieldKind::Register,
            Field::Map(_) => FieldKind::Map,
            Field::List(_) => FieldKind::List,
            Field::Text(_) => FieldKind::Text,
        }
    }

    /// The externally visible value as plain JSON.
    pub fn value(&self) -> Value {
        match self {
            Field::Register(f) => f.value().clone(),
            Field::Map(f) => Value::Object(
                f.value()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ),
            Field::List(f) => Value::Array(f.to_vec()),
            Field::Text(f) => Value::String(f.text()),
        }
    }

    pub fn as_register(&self) -> Option<&RegisterField> {
        match self {
            Field::Register(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&MapField> {
        match self {
            Field::Map(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&ListField> {
        match self {
            Field::List(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&TextField> {
        match self {
            Field::Text(f) => Some(f),
            _ => None,
        }
    }

    /// Apply a local mutation under the transaction id `at`.
    pub fn apply_update(&mut self, update: Update, at: DuplexId) -> Result<(Change, Patch)> {
        let expected = self.kind();
        match (self, update) {
            (Field::Register(f), Update::Register(value)) => {
                let (change, patch) = f.apply_update(value, at);
                Ok((Change::Register(change), Patch::Register(patch)))
            }
            (Field::Map(f), Update::Map(entries)) => {
                let (change, patch) = f.apply_update(entries, at);
                Ok((Change::Map(change), Patch::Map(patch)))
            }
            (Field::List(f), Update::List(splices)) => {
                let (change, patch) = f.apply_update(splices, at);
                Ok((Change::List(change), Patch::List(patch)))
            }
            (Field::List(f), Update::RevertList(ops)) => {
                let (change, patch) = f.revert(&ops, at);
                Ok((Change::List(change), Patch::List(patch)))
            }
            (Field::Text(f), Update::Text(splices)) => {
                let (change, patch) = f.apply_update(splices, at);
                Ok((Change::Text(change), Patch::Text(patch)))
            }
            (Field::Text(f), Update::RevertText(ops)) => {
                let (change, patch) = f.revert(&ops, at);
                Ok((Change::Text(change), Patch::Text(patch)))
            }
            (_, update) => Err(CoreError::KindMismatch {
                expected,
                found: update.kind(),
            }),
        }
    }

    /// Apply a patch produced by any replica.
    pub fn apply_patch(&mut self, patch: &Patch) -> Result<Change> {
        let expected = self.kind();
        match (self, patch) {
            (Field::Register(f), Patch::Register(p)) => Ok(Change::Register(f.apply_patch(p))),
            (Field::Map(f), Patch::Map(p)) => Ok(Change::Map(f.apply_patch(p))),
            (Field::List(f), Patch::List(p)) => Ok(Change::List(f.apply_patch(p))),
            (Field::Text(f), Patch::Text(p)) => Ok(Change::Text(f.apply_patch(p))),
            (_, patch) => Err(CoreError::KindMismatch {
                expected,
                found: patch.kind(),
            }),
        }
    }

    /// Drop metadata made redundant by `stable_version`.
    pub fn compact(&mut self, stable_version: u64) -> usize {
        match self {
            Field::Register(f) => f.compact(stable_version),
            Field::Map(f) => f.compact(stable_version),
            Field::List(f) => f.compact(stable_version),
            Field::Text(f) => f.compact(stable_version),
        }
    }
}
