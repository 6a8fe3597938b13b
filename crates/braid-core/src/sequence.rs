//! Sequence field - the replicated list behind both List and Text.
//!
//! Elements are kept in RGA order: every element remembers the element it was
//! inserted after (its anchor) and is placed right after that anchor, skipping
//! any neighbours with a greater id. Element ids come from a per-field Lamport
//! counter, so a freshly inserted element always outranks everything the
//! inserting replica had seen, which is what makes concurrent inserts at the
//! same spot interleave identically everywhere.
//!
//! Removed elements stay in the node list as tombstones and are recorded in
//! the cemetery together with the id of the transaction that removed them.
//! Tombstones never leave the node list: a concurrent insert that arrives
//! late still has to skip past them exactly as every other replica did.
//! Compaction only forgets the cemetery record of a stable tombstone, leaving
//! a zero-width order marker behind.

use crate::compose::Compose;
use crate::duplex::DuplexId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Globally unique id of a sequence element.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementId {
    /// Lamport counter of the field at insertion time.
    pub counter: u64,
    /// Replica that inserted the element.
    pub store_id: u32,
}

impl ElementId {
    pub const fn new(counter: u64, store_id: u32) -> Self {
        Self { counter, store_id }
    }
}

impl PartialOrd for ElementId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ElementId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.counter
            .cmp(&other.counter)
            .then_with(|| self.store_id.cmp(&other.store_id))
    }
}

/// Where an inserted run attaches: at the start, or after a given element.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Anchor {
    Head,
    After(ElementId),
}

/// A local edit: remove `remove` elements at `index`, then insert `insert`
/// there. Out-of-range values are clamped.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Splice<E> {
    pub index: usize,
    pub remove: usize,
    pub insert: Vec<E>,
}

impl<E> Splice<E> {
    pub fn new(index: usize, remove: usize, insert: Vec<E>) -> Self {
        Self { index, remove, insert }
    }

    pub fn insert(index: usize, items: Vec<E>) -> Self {
        Self::new(index, 0, items)
    }

    pub fn remove(index: usize, count: usize) -> Self {
        Self::new(index, count, Vec::new())
    }
}

impl Splice<char> {
    /// Text splice from a string slice.
    pub fn text(index: usize, remove: usize, text: &str) -> Self {
        Self::new(index, remove, text.chars().collect())
    }
}

/// Observer-facing description of one splice, in visible positions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpliceChange<E> {
    pub index: usize,
    pub removed: Vec<E>,
    pub inserted: Vec<E>,
}

impl SpliceChange<char> {
    pub fn removed_text(&self) -> String {
        self.removed.iter().collect()
    }

    pub fn inserted_text(&self) -> String {
        self.inserted.iter().collect()
    }
}

/// Observer-facing delta of a sequence. Splices apply in order, each seeing
/// the effect of the previous one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SequenceChange<E> {
    pub splices: Vec<SpliceChange<E>>,
}

impl<E> Default for SequenceChange<E> {
    fn default() -> Self {
        Self { splices: Vec::new() }
    }
}

impl<E> SequenceChange<E> {
    pub fn is_empty(&self) -> bool {
        self.splices.is_empty()
    }

    /// Replay the splices over a plain vector.
    pub fn apply_to(&self, target: &mut Vec<E>)
    where
        E: Clone,
    {
        for splice in &self.splices {
            let end = (splice.index + splice.removed.len()).min(target.len());
            target.splice(splice.index..end, splice.inserted.iter().cloned());
        }
    }
}

impl<E> Compose for SequenceChange<E> {
    fn compose(mut self, later: Self) -> Self {
        self.splices.extend(later.splices);
        self
    }
}

/// Wire-level form of one splice, expressed with element ids.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpliceOp<E> {
    /// Transaction id under which removals are recorded.
    pub at: DuplexId,
    pub removed_ids: Vec<ElementId>,
    pub removed: Vec<E>,
    /// Element the inserted run follows, as seen by the author.
    pub anchor: Anchor,
    pub inserted_ids: Vec<ElementId>,
    pub inserted: Vec<E>,
}

impl<E> SpliceOp<E> {
    fn new(at: DuplexId, anchor: Anchor) -> Self {
        Self {
            at,
            removed_ids: Vec::new(),
            removed: Vec::new(),
            anchor,
            inserted_ids: Vec::new(),
            inserted: Vec::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.removed_ids.is_empty() && self.inserted_ids.is_empty()
    }
}

/// Wire-level delta of a sequence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SequencePatch<E> {
    pub ops: Vec<SpliceOp<E>>,
}

impl<E> Default for SequencePatch<E> {
    fn default() -> Self {
        Self { ops: Vec::new() }
    }
}

impl<E> SequencePatch<E> {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

impl<E> Compose for SequencePatch<E> {
    fn compose(mut self, later: Self) -> Self {
        self.ops.extend(later.ops);
        self
    }
}

/// Cemetery marker for a removed element.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tombstone {
    pub removed_at: DuplexId,
}

#[derive(Clone, Debug, PartialEq)]
struct Node<E> {
    id: ElementId,
    origin: Anchor,
    /// `None` once removed.
    item: Option<E>,
}

/// Replicated sequence of `E`.
#[derive(Clone, Debug, PartialEq)]
pub struct SequenceField<E> {
    nodes: Vec<Node<E>>,
    cemetery: BTreeMap<ElementId, Tombstone>,
    /// Inserts whose anchor has not arrived yet.
    pending: Vec<Node<E>>,
    clock: u64,
    len: usize,
}

pub type ListField = SequenceField<Value>;
pub type TextField = SequenceField<char>;

impl<E> Default for SequenceField<E> {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            cemetery: BTreeMap::new(),
            pending: Vec::new(),
            clock: 0,
            len: 0,
        }
    }
}

impl<E: Clone + PartialEq> SequenceField<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &E> {
        self.nodes.iter().filter_map(|n| n.item.as_ref())
    }

    pub fn get(&self, index: usize) -> Option<&E> {
        self.iter().nth(index)
    }

    pub fn to_vec(&self) -> Vec<E> {
        self.iter().cloned().collect()
    }

    /// Ids of the visible elements, parallel to [`to_vec`](Self::to_vec).
    pub fn ids(&self) -> Vec<ElementId> {
        self.nodes
            .iter()
            .filter(|n| n.item.is_some())
            .map(|n| n.id)
            .collect()
    }

    pub fn cemetery(&self) -> &BTreeMap<ElementId, Tombstone> {
        &self.cemetery
    }

    /// Number of inserts parked until their anchor arrives.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Apply local splices under transaction id `at`.
    pub fn apply_update(
        &mut self,
        splices: Vec<Splice<E>>,
        at: DuplexId,
    ) -> (SequenceChange<E>, SequencePatch<E>) {
        let mut change = SequenceChange::default();
        let mut patch = SequencePatch::default();

        for splice in splices {
            let index = splice.index.min(self.len);
            let remove = splice.remove.min(self.len - index);
            if remove == 0 && splice.insert.is_empty() {
                continue;
            }

            let targets: Vec<ElementId> = self
                .nodes
                .iter()
                .filter(|n| n.item.is_some())
                .skip(index)
                .take(remove)
                .map(|n| n.id)
                .collect();

            let anchor = match index {
                0 => Anchor::Head,
                _ => self
                    .visible_id(index - 1)
                    .map(Anchor::After)
                    .unwrap_or(Anchor::Head),
            };
            let mut op = SpliceOp::new(at, anchor);

            for id in targets {
                if let Some((_, item)) = self.tombstone(id, at) {
                    op.removed_ids.push(id);
                    op.removed.push(item);
                }
            }

            let mut origin = anchor;
            for item in splice.insert {
                let id = self.next_id(at.store_id);
                self.place_local(Node {
                    id,
                    origin,
                    item: Some(item.clone()),
                });
                origin = Anchor::After(id);
                op.inserted_ids.push(id);
                op.inserted.push(item);
            }

            change.splices.push(SpliceChange {
                index,
                removed: op.removed.clone(),
                inserted: op.inserted.clone(),
            });
            patch.ops.push(op);
        }

        (change, patch)
    }

    /// Apply a patch from a peer. Removals and anchors resolve against the
    /// current ids, not the positions the author saw.
    pub fn apply_patch(&mut self, patch: &SequencePatch<E>) -> SequenceChange<E> {
        let mut splices = Vec::new();
        for op in &patch.ops {
            for id in &op.removed_ids {
                if let Some((index, item)) = self.tombstone(*id, op.at) {
                    push_removal(&mut splices, index, item);
                }
            }

            let mut origin = op.anchor;
            for (id, item) in op.inserted_ids.iter().zip(&op.inserted) {
                self.integrate(
                    Node {
                        id: *id,
                        origin,
                        item: Some(item.clone()),
                    },
                    &mut splices,
                );
                origin = Anchor::After(*id);
            }
        }
        SequenceChange { splices }
    }

    /// Undo the given ops as a new local edit: remove what they inserted and
    /// re-insert what they removed after their anchor, with fresh ids.
    pub fn revert(
        &mut self,
        ops: &[SpliceOp<E>],
        at: DuplexId,
    ) -> (SequenceChange<E>, SequencePatch<E>) {
        let mut splices = Vec::new();
        let mut patch = SequencePatch::default();

        for op in ops.iter().rev() {
            let mut inverse = SpliceOp::new(at, op.anchor);

            for id in &op.inserted_ids {
                if !self.is_visible(id) {
                    continue;
                }
                if let Some((index, item)) = self.tombstone(*id, at) {
                    inverse.removed_ids.push(*id);
                    inverse.removed.push(item.clone());
                    push_removal(&mut splices, index, item);
                }
            }

            let mut origin = op.anchor;
            for item in &op.removed {
                let id = self.next_id(at.store_id);
                if let Some(index) = self.place_local(Node {
                    id,
                    origin,
                    item: Some(item.clone()),
                }) {
                    push_insertion(&mut splices, index, item.clone());
                }
                origin = Anchor::After(id);
                inverse.inserted_ids.push(id);
                inverse.inserted.push(item.clone());
            }

            if !inverse.is_empty() {
                patch.ops.push(inverse);
            }
        }

        (SequenceChange { splices }, patch)
    }

    /// Forget the cemetery records of tombstones removed at or below
    /// `stable_version`. The tombstones themselves stay in the node list as
    /// order markers. Removals of elements that have not arrived yet are
    /// kept. Returns the number of records dropped.
    pub fn compact(&mut self, stable_version: u64) -> usize {
        let placed: Vec<ElementId> = self
            .nodes
            .iter()
            .filter(|n| n.item.is_none())
            .map(|n| n.id)
            .collect();

        let mut dropped = 0;
        for id in placed {
            let stable = self
                .cemetery
                .get(&id)
                .is_some_and(|t| t.removed_at.version <= stable_version);
            if stable {
                self.cemetery.remove(&id);
                dropped += 1;
            }
        }
        dropped
    }

    /// Tombstones still holding a position in the node list.
    pub fn marker_count(&self) -> usize {
        self.nodes.len() - self.len
    }

    fn next_id(&mut self, store_id: u32) -> ElementId {
        self.clock += 1;
        ElementId::new(self.clock, store_id)
    }

    fn visible_id(&self, index: usize) -> Option<ElementId> {
        self.nodes
            .iter()
            .filter(|n| n.item.is_some())
            .nth(index)
            .map(|n| n.id)
    }

    fn node_position(&self, id: &ElementId) -> Option<usize> {
        self.nodes.iter().position(|n| n.id == *id)
    }

    fn visible_before(&self, position: usize) -> usize {
        self.nodes[..position]
            .iter()
            .filter(|n| n.item.is_some())
            .count()
    }

    fn is_visible(&self, id: &ElementId) -> bool {
        self.nodes.iter().any(|n| n.id == *id && n.item.is_some())
    }

    fn is_known(&self, id: &ElementId) -> bool {
        self.node_position(id).is_some() || self.pending.iter().any(|n| n.id == *id)
    }

    /// Node index at which scanning for an insert after `anchor` starts.
    /// Removed anchors keep their slot, so only an unseen anchor fails.
    fn resolve_anchor(&self, anchor: &Anchor) -> Option<usize> {
        match anchor {
            Anchor::Head => Some(0),
            Anchor::After(id) => self.node_position(id).map(|position| position + 1),
        }
    }

    /// Place a node in RGA order. Returns its visible index if it is visible,
    /// or hands the node back when its anchor is unknown.
    fn place(&mut self, mut node: Node<E>) -> Result<Option<usize>, Node<E>> {
        let Some(start) = self.resolve_anchor(&node.origin) else {
            return Err(node);
        };

        let mut position = start;
        while position < self.nodes.len() && self.nodes[position].id > node.id {
            position += 1;
        }

        self.clock = self.clock.max(node.id.counter);
        if self.cemetery.contains_key(&node.id) {
            node.item = None;
        }
        let visible = node.item.is_some();
        self.nodes.insert(position, node);

        if visible {
            self.len += 1;
            Ok(Some(self.visible_before(position)))
        } else {
            Ok(None)
        }
    }

    fn place_local(&mut self, node: Node<E>) -> Option<usize> {
        match self.place(node) {
            Ok(index) => index,
            // Local anchors are always known; keep the element reachable anyway.
            Err(mut node) => {
                node.origin = Anchor::Head;
                self.place(node).ok().flatten()
            }
        }
    }

    fn integrate(&mut self, node: Node<E>, splices: &mut Vec<SpliceChange<E>>) {
        if self.is_known(&node.id) {
            return;
        }
        self.clock = self.clock.max(node.id.counter);

        match self.place(node) {
            Ok(Some(index)) => {
                let item = self.nodes.iter().filter_map(|n| n.item.as_ref()).nth(index);
                if let Some(item) = item.cloned() {
                    push_insertion(splices, index, item);
                }
            }
            Ok(None) => {}
            Err(node) => {
                self.pending.push(node);
                return;
            }
        }
        self.drain_pending(splices);
    }

    fn drain_pending(&mut self, splices: &mut Vec<SpliceChange<E>>) {
        loop {
            let mut progressed = false;
            for node in std::mem::take(&mut self.pending) {
                let item = node.item.clone();
                match self.place(node) {
                    Ok(index) => {
                        progressed = true;
                        if let (Some(index), Some(item)) = (index, item) {
                            push_insertion(splices, index, item);
                        }
                    }
                    Err(node) => self.pending.push(node),
                }
            }
            if !progressed || self.pending.is_empty() {
                break;
            }
        }
    }

    /// Mark `id` removed under `at`. Returns the visible index and value if
    /// the element was visible. Unknown ids are remembered so a late insert
    /// arrives already removed.
    fn tombstone(&mut self, id: ElementId, at: DuplexId) -> Option<(usize, E)> {
        let position = self.node_position(&id);
        let compacted = position.is_some_and(|p| self.nodes[p].item.is_none())
            && !self.cemetery.contains_key(&id);
        if compacted {
            return None;
        }

        let marker = self.cemetery.entry(id).or_insert(Tombstone { removed_at: at });
        if at > marker.removed_at {
            marker.removed_at = at;
        }

        match position {
            Some(position) => {
                let item = self.nodes[position].item.take()?;
                self.len -= 1;
                Some((self.visible_before(position), item))
            }
            None => {
                if let Some(parked) = self.pending.iter_mut().find(|n| n.id == id) {
                    parked.item = None;
                }
                None
            }
        }
    }
}

impl SequenceField<char> {
    pub fn text(&self) -> String {
        self.iter().collect()
    }
}

fn push_removal<E>(splices: &mut Vec<SpliceChange<E>>, index: usize, item: E) {
    if let Some(last) = splices.last_mut() {
        if last.inserted.is_empty() && last.index == index {
            last.removed.push(item);
            return;
        }
    }
    splices.push(SpliceChange {
        index,
        removed: vec![item],
        inserted: Vec::new(),
    });
}

fn push_insertion<E>(splices: &mut Vec<SpliceChange<E>>, index: usize, item: E) {
    if let Some(last) = splices.last_mut() {
        if last.index + last.inserted.len() == index {
            last.inserted.push(item);
            return;
        }
    }
    splices.push(SpliceChange {
        index,
        removed: Vec::new(),
        inserted: vec![item],
    });
}
