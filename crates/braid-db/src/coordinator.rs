//! Transaction coordinator.
//!
//! Owns the field registry of one replica and drives it through the
//! `Idle -> InTransaction -> Idle` state machine. Local edits are applied to
//! staged copies of the touched fields and only swapped into the registry on
//! commit, so observers and readers never see half a transaction. Remote
//! transactions are applied the same way: staged, then published in one wave.
//!
//! Committed local transactions are queued in an outbox; whoever owns the
//! replication boundary drains it and broadcasts.
//!
//! A remote write never fails because of the kind of field it targets.
//! Replicas that concurrently create one address with different kinds each
//! keep every variant, and the registry shows the one written last.

use crate::context::ReplicaContext;
use crate::error::{DbError, Result};
use crate::registry::{FieldPath, FieldRegistry, FieldSlot};
use crate::transaction::{PatchEntry, Transaction, TransactionId};
use crate::undo::{UndoEntry, UndoManager, UndoRecord};
use braid_core::{Change, CoreError, DuplexId, Field, MapUpdate, Patch, Splice, Update};
use serde_json::Value;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::{debug, trace};

/// Coordinator configuration.
#[derive(Clone, Debug)]
pub struct CoordinatorConfig {
    /// Maximum number of transactions kept on each of the undo and redo stacks.
    pub undo_depth: usize,
    /// Remember applied transaction ids and ignore redeliveries.
    pub track_seen: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            undo_depth: 100,
            track_seen: true,
        }
    }
}

/// Where a change wave came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    Local,
    Remote,
    Undo,
    Redo,
}

/// One field's change within a wave.
#[derive(Clone, Debug, PartialEq)]
pub struct ChangeEvent {
    pub path: FieldPath,
    pub change: Change,
}

/// All changes produced by one committed or applied transaction.
#[derive(Clone, Debug, PartialEq)]
pub struct ChangeWave {
    pub transaction_id: TransactionId,
    pub origin: Origin,
    pub store_id: u32,
    pub version: u64,
    pub events: Vec<ChangeEvent>,
}

impl ChangeWave {
    pub fn get(&self, path: &FieldPath) -> Option<&Change> {
        self.events
            .iter()
            .find(|e| &e.path == path)
            .map(|e| &e.change)
    }
}

/// Result of applying a transaction received from a peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemoteOutcome {
    Applied { fields: usize },
    /// Already applied; nothing happened.
    Duplicate,
}

/// Metadata dropped by a compaction pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CompactionStats {
    pub stable_version: u64,
    pub fields_visited: usize,
    pub entries_dropped: usize,
    /// Transaction ids forgotten by duplicate detection.
    pub seen_dropped: usize,
}

pub type Observer = Box<dyn FnMut(&ChangeWave) + Send>;

struct StagedEdit {
    path: FieldPath,
    change: Change,
    patch: Patch,
}

struct OpenTransaction {
    id: TransactionId,
    version: u64,
    staged: BTreeMap<FieldPath, FieldSlot>,
    edits: Vec<StagedEdit>,
}

enum State {
    Idle,
    InTransaction(OpenTransaction),
}

/// Transaction coordinator for one replica.
pub struct Coordinator {
    context: ReplicaContext,
    config: CoordinatorConfig,
    registry: FieldRegistry,
    state: State,
    /// Applied transaction ids with their versions. Ids at or below
    /// `seen_floor` are pruned by compaction and recognised by version.
    seen: HashMap<TransactionId, u64>,
    seen_floor: u64,
    undo: UndoManager,
    observers: Vec<Observer>,
    outbox: VecDeque<Transaction>,
}

impl Coordinator {
    pub fn new(context: ReplicaContext, config: CoordinatorConfig) -> Self {
        let undo = UndoManager::new(config.undo_depth);
        Self {
            context,
            config,
            registry: FieldRegistry::new(),
            state: State::Idle,
            seen: HashMap::new(),
            seen_floor: 0,
            undo,
            observers: Vec::new(),
            outbox: VecDeque::new(),
        }
    }

    /// A coordinator with default configuration.
    pub fn with_store_id(store_id: u32) -> Self {
        Self::new(ReplicaContext::new(store_id), CoordinatorConfig::default())
    }

    pub fn store_id(&self) -> u32 {
        self.context.store_id()
    }

    /// The last version drawn or observed by the local clock.
    pub fn version(&self) -> u64 {
        self.context.clock().current()
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn registry(&self) -> &FieldRegistry {
        &self.registry
    }

    pub fn is_in_transaction(&self) -> bool {
        matches!(self.state, State::InTransaction(_))
    }

    /// Committed state of a field.
    pub fn field(&self, path: &FieldPath) -> Option<&Field> {
        self.registry.get(path)
    }

    /// Committed value of a field as plain JSON.
    pub fn value(&self, path: &FieldPath) -> Option<Value> {
        self.registry.get(path).map(Field::value)
    }

    pub fn text(&self, path: &FieldPath) -> Option<String> {
        self.registry.get(path)?.as_text().map(|t| t.text())
    }

    pub fn has_seen(&self, id: &TransactionId) -> bool {
        self.seen.contains_key(id)
    }

    /// Number of transaction ids remembered for duplicate detection.
    pub fn seen_len(&self) -> usize {
        self.seen.len()
    }

    fn is_duplicate(&self, tx: &Transaction) -> bool {
        self.config.track_seen && (tx.version <= self.seen_floor || self.seen.contains_key(&tx.id))
    }

    /// Register an observer, called once per change wave.
    pub fn subscribe(&mut self, observer: Observer) {
        self.observers.push(observer);
    }

    // ---- transaction lifecycle ----

    pub fn begin_transaction(&mut self) -> Result<()> {
        if self.is_in_transaction() {
            return Err(DbError::IllegalState(
                "begin_transaction called inside a transaction".to_string(),
            ));
        }
        let version = self.context.clock_mut().next();
        let id = TransactionId::new();
        trace!(transaction = %id, version, "begin transaction");
        self.state = State::InTransaction(OpenTransaction {
            id,
            version,
            staged: BTreeMap::new(),
            edits: Vec::new(),
        });
        Ok(())
    }

    /// Commit the open transaction. Returns `None` for an empty commit,
    /// which is neither broadcast nor recorded for undo.
    pub fn end_transaction(&mut self) -> Result<Option<Transaction>> {
        self.commit(Origin::Local)
    }

    /// Discard the open transaction. Nothing it staged becomes visible.
    pub fn abort_transaction(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.state, State::Idle) {
            State::InTransaction(open) => {
                debug!(transaction = %open.id, edits = open.edits.len(), "aborted transaction");
                Ok(())
            }
            State::Idle => Err(DbError::IllegalState(
                "abort_transaction called while idle".to_string(),
            )),
        }
    }

    /// Run `f` inside a transaction. Commits on success, aborts on error.
    pub fn transact<F>(&mut self, f: F) -> Result<Option<Transaction>>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        self.begin_transaction()?;
        match f(self) {
            Ok(()) => self.end_transaction(),
            Err(err) => {
                if self.is_in_transaction() {
                    self.abort_transaction()?;
                }
                Err(err)
            }
        }
    }

    // ---- mutations (require an open transaction) ----

    /// Apply a local update to a field, creating it on first reference.
    pub fn update(&mut self, path: &FieldPath, update: Update) -> Result<()> {
        let store_id = self.context.store_id();
        let State::InTransaction(open) = &mut self.state else {
            return Err(DbError::IllegalState(format!(
                "update to {} outside a transaction",
                path
            )));
        };
        let at = DuplexId::new(open.version, store_id);

        let slot = match open.staged.entry(path.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                entry.insert(self.registry.slot(path).cloned().unwrap_or_default())
            }
        };
        match slot.kind() {
            Some(kind) if kind != update.kind() => {
                return Err(CoreError::KindMismatch {
                    expected: kind,
                    found: update.kind(),
                }
                .into())
            }
            _ => {}
        }
        let (change, patch) = slot.write(update.kind(), at).apply_update(update, at)?;

        match open.edits.iter_mut().find(|e| &e.path == path) {
            Some(edit) => {
                let merged_change = edit.change.clone().merge(change)?;
                let merged_patch = edit.patch.clone().merge(patch)?;
                edit.change = merged_change;
                edit.patch = merged_patch;
            }
            None => open.edits.push(StagedEdit {
                path: path.clone(),
                change,
                patch,
            }),
        }
        Ok(())
    }

    /// Write a register.
    pub fn set(&mut self, path: &FieldPath, value: impl Into<Value>) -> Result<()> {
        self.update(path, Update::Register(value.into()))
    }

    pub fn set_key(&mut self, path: &FieldPath, key: &str, value: impl Into<Value>) -> Result<()> {
        let mut entries = MapUpdate::new();
        entries.insert(key.to_string(), Some(value.into()));
        self.update(path, Update::Map(entries))
    }

    pub fn remove_key(&mut self, path: &FieldPath, key: &str) -> Result<()> {
        let mut entries = MapUpdate::new();
        entries.insert(key.to_string(), None);
        self.update(path, Update::Map(entries))
    }

    pub fn splice_text(
        &mut self,
        path: &FieldPath,
        index: usize,
        remove: usize,
        text: &str,
    ) -> Result<()> {
        self.update(path, Update::Text(vec![Splice::text(index, remove, text)]))
    }

    pub fn splice_list(
        &mut self,
        path: &FieldPath,
        index: usize,
        remove: usize,
        items: Vec<Value>,
    ) -> Result<()> {
        self.update(path, Update::List(vec![Splice::new(index, remove, items)]))
    }

    // ---- remote ingestion ----

    /// Apply a transaction committed by any replica.
    ///
    /// The whole transaction is staged before anything is published. A patch
    /// whose kind differs from the visible one lands in its own variant; it
    /// only produces an event if that variant ends up visible.
    pub fn apply_remote(&mut self, tx: &Transaction) -> Result<RemoteOutcome> {
        if self.is_in_transaction() {
            return Err(DbError::IllegalState(
                "apply_remote called inside a local transaction".to_string(),
            ));
        }
        if self.is_duplicate(tx) {
            debug!(transaction = %tx.id, "ignoring duplicate transaction");
            return Ok(RemoteOutcome::Duplicate);
        }

        let at = tx.duplex_id();
        let mut staged: BTreeMap<FieldPath, FieldSlot> = BTreeMap::new();
        let mut events: Vec<ChangeEvent> = Vec::new();
        for entry in &tx.patches {
            let path = entry.path();
            let kind = entry.patch.kind();
            let slot = match staged.entry(path.clone()) {
                Entry::Occupied(slot) => slot.into_mut(),
                Entry::Vacant(slot) => {
                    let existing = self.registry.slot(&path).cloned().unwrap_or_else(|| {
                        debug!(field = %path, %kind, "creating unresolved field");
                        FieldSlot::new()
                    });
                    slot.insert(existing)
                }
            };
            trace!(field = %path, transaction = %tx.id, "applying patch");
            let before = slot.kind();
            let change = slot.write(kind, at).apply_patch(&entry.patch)?;
            if slot.kind() != Some(kind) {
                trace!(field = %path, %kind, "patch landed in a hidden variant");
                continue;
            }
            if let Some(previous) = before.filter(|previous| *previous != kind) {
                debug!(field = %path, from = %previous, to = %kind, "field kind superseded");
            }
            match events.iter_mut().find(|e| e.path == path) {
                Some(event) if event.change.kind() == kind => {
                    event.change = event.change.clone().merge(change)?
                }
                Some(event) => event.change = change,
                None => events.push(ChangeEvent { path, change }),
            }
        }

        let fields = staged.len();
        for (path, slot) in staged {
            self.registry.insert(path, slot);
        }
        self.context.clock_mut().observe(tx.version);
        if self.config.track_seen {
            self.seen.insert(tx.id.clone(), tx.version);
        }
        debug!(
            transaction = %tx.id,
            store_id = tx.store_id,
            version = tx.version,
            fields,
            "applied remote transaction"
        );

        self.notify(ChangeWave {
            transaction_id: tx.id.clone(),
            origin: Origin::Remote,
            store_id: tx.store_id,
            version: tx.version,
            events,
        });
        Ok(RemoteOutcome::Applied { fields })
    }

    // ---- undo / redo ----

    pub fn can_undo(&self) -> bool {
        self.undo.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.undo.can_redo()
    }

    /// Revert the most recent local transaction by committing its inverse
    /// as a new transaction. Returns `None` if there is nothing to undo or
    /// the inverse turned out empty.
    pub fn undo(&mut self) -> Result<Option<Transaction>> {
        self.ensure_idle("undo")?;
        match self.undo.pop_undo() {
            Some(record) => self.replay_inverse(record, Origin::Undo),
            None => Ok(None),
        }
    }

    /// Re-apply the most recently undone transaction.
    pub fn redo(&mut self) -> Result<Option<Transaction>> {
        self.ensure_idle("redo")?;
        match self.undo.pop_redo() {
            Some(record) => self.replay_inverse(record, Origin::Redo),
            None => Ok(None),
        }
    }

    fn replay_inverse(&mut self, record: UndoRecord, origin: Origin) -> Result<Option<Transaction>> {
        self.begin_transaction()?;
        for entry in record.entries.iter().rev() {
            if self.registry.get(&entry.path).map(Field::kind) != Some(entry.change.kind()) {
                debug!(field = %entry.path, "field kind superseded, skipping its inverse");
                continue;
            }
            let staged = entry
                .change
                .inverse(&entry.patch)
                .map_err(DbError::from)
                .and_then(|update| self.update(&entry.path, update));
            if let Err(err) = staged {
                self.abort_transaction()?;
                return Err(err);
            }
        }
        debug!(reverted = %record.transaction_id, ?origin, "replaying inverse");
        self.commit(origin)
    }

    // ---- replication boundary ----

    /// Take every committed local transaction not yet handed out.
    pub fn drain_outbox(&mut self) -> Vec<Transaction> {
        self.outbox.drain(..).collect()
    }

    /// Take the oldest committed transaction not yet handed out.
    pub fn pop_outbox(&mut self) -> Option<Transaction> {
        self.outbox.pop_front()
    }

    /// Put back a transaction that could not be handed out, ahead of
    /// everything still queued.
    pub fn requeue(&mut self, tx: Transaction) {
        self.outbox.push_front(tx);
    }

    pub fn outbox_len(&self) -> usize {
        self.outbox.len()
    }

    // ---- compaction ----

    /// Drop history entries and tombstone records at or below
    /// `stable_version`, along with the seen ids of transactions at or below
    /// it; a redelivery of one of those is recognised by its version.
    ///
    /// The caller guarantees every replica has applied all transactions at
    /// or below that version; see [`crate::StabilityTracker`].
    pub fn compact(&mut self, stable_version: u64) -> Result<CompactionStats> {
        self.ensure_idle("compact")?;
        let mut stats = CompactionStats {
            stable_version,
            ..CompactionStats::default()
        };
        for field in self.registry.fields_mut() {
            stats.fields_visited += 1;
            stats.entries_dropped += field.compact(stable_version);
        }
        if self.config.track_seen && stable_version > self.seen_floor {
            self.seen_floor = stable_version;
            let before = self.seen.len();
            self.seen.retain(|_, version| *version > stable_version);
            stats.seen_dropped = before - self.seen.len();
        }
        debug!(
            stable_version,
            fields = stats.fields_visited,
            dropped = stats.entries_dropped,
            seen_dropped = stats.seen_dropped,
            "compacted"
        );
        Ok(stats)
    }

    // ---- internals ----

    fn ensure_idle(&self, operation: &str) -> Result<()> {
        if self.is_in_transaction() {
            return Err(DbError::IllegalState(format!(
                "{} called inside a transaction",
                operation
            )));
        }
        Ok(())
    }

    fn commit(&mut self, origin: Origin) -> Result<Option<Transaction>> {
        let open = match std::mem::replace(&mut self.state, State::Idle) {
            State::InTransaction(open) => open,
            State::Idle => {
                return Err(DbError::IllegalState(
                    "end_transaction called while idle".to_string(),
                ))
            }
        };

        let OpenTransaction {
            id,
            version,
            mut staged,
            edits,
        } = open;
        let edits: Vec<StagedEdit> = edits.into_iter().filter(|e| !e.patch.is_empty()).collect();
        if edits.is_empty() {
            trace!(transaction = %id, "empty commit");
            return Ok(None);
        }

        for edit in &edits {
            if let Some(slot) = staged.remove(&edit.path) {
                self.registry.insert(edit.path.clone(), slot);
            }
        }

        let store_id = self.context.store_id();
        let tx = Transaction {
            id: id.clone(),
            store_id,
            version,
            patches: edits
                .iter()
                .map(|e| PatchEntry::new(&e.path, e.patch.clone()))
                .collect(),
        };
        if self.config.track_seen {
            self.seen.insert(id.clone(), version);
        }

        let record = UndoRecord {
            transaction_id: id.clone(),
            entries: edits
                .iter()
                .map(|e| UndoEntry {
                    path: e.path.clone(),
                    change: e.change.clone(),
                    patch: e.patch.clone(),
                })
                .collect(),
        };
        match origin {
            Origin::Local | Origin::Remote => self.undo.record(record),
            Origin::Undo => self.undo.push_redo(record),
            Origin::Redo => self.undo.push_undo(record),
        }

        debug!(transaction = %id, version, fields = edits.len(), ?origin, "committed transaction");
        self.notify(ChangeWave {
            transaction_id: id,
            origin,
            store_id,
            version,
            events: edits
                .into_iter()
                .map(|e| ChangeEvent {
                    path: e.path,
                    change: e.change,
                })
                .collect(),
        });
        self.outbox.push_back(tx.clone());
        Ok(Some(tx))
    }

    fn notify(&mut self, wave: ChangeWave) {
        for observer in self.observers.iter_mut() {
            observer(&wave);
        }
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("store_id", &self.context.store_id())
            .field("version", &self.version())
            .field("fields", &self.registry.len())
            .field("in_transaction", &self.is_in_transaction())
            .field("outbox", &self.outbox.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_core::FieldKind;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn path(field: &str) -> FieldPath {
        FieldPath::new("docs", "d1", field)
    }

    fn recorder(coordinator: &mut Coordinator) -> Arc<Mutex<Vec<ChangeWave>>> {
        let waves = Arc::new(Mutex::new(Vec::new()));
        let sink = waves.clone();
        coordinator.subscribe(Box::new(move |wave| sink.lock().unwrap().push(wave.clone())));
        waves
    }

    #[test]
    fn test_nesting_is_illegal() {
        let mut c = Coordinator::with_store_id(1);
        assert!(matches!(c.end_transaction(), Err(DbError::IllegalState(_))));
        assert!(matches!(c.abort_transaction(), Err(DbError::IllegalState(_))));

        c.begin_transaction().unwrap();
        assert!(matches!(c.begin_transaction(), Err(DbError::IllegalState(_))));
        assert!(matches!(c.undo(), Err(DbError::IllegalState(_))));
        assert!(c.is_in_transaction());
    }

    #[test]
    fn test_update_outside_transaction() {
        let mut c = Coordinator::with_store_id(1);
        let err = c.set(&path("title"), "x").unwrap_err();
        assert!(matches!(err, DbError::IllegalState(_)));
        assert!(c.registry().is_empty());
    }

    #[test]
    fn test_nothing_visible_until_commit() {
        let mut c = Coordinator::with_store_id(1);
        c.begin_transaction().unwrap();
        c.set(&path("title"), "draft").unwrap();
        assert_eq!(c.value(&path("title")), None);

        let tx = c.end_transaction().unwrap().unwrap();
        assert_eq!(c.value(&path("title")), Some(json!("draft")));
        assert_eq!(tx.store_id, 1);
        assert_eq!(tx.version, 1);
        assert_eq!(c.drain_outbox(), vec![tx]);
        assert_eq!(c.outbox_len(), 0);
    }

    #[test]
    fn test_abort_discards_everything() {
        let mut c = Coordinator::with_store_id(1);
        let waves = recorder(&mut c);

        c.begin_transaction().unwrap();
        c.splice_text(&path("body"), 0, 0, "scratch").unwrap();
        c.abort_transaction().unwrap();

        assert_eq!(c.value(&path("body")), None);
        assert!(waves.lock().unwrap().is_empty());
        assert_eq!(c.outbox_len(), 0);
        assert!(!c.can_undo());
    }

    #[test]
    fn test_empty_commit_is_silent() {
        let mut c = Coordinator::with_store_id(1);
        let waves = recorder(&mut c);

        assert_eq!(c.transact(|_| Ok(())).unwrap(), None);
        // A zero-width splice produces an empty patch and is elided too.
        let committed = c.transact(|c| c.splice_text(&path("body"), 0, 0, "")).unwrap();
        assert_eq!(committed, None);

        assert!(waves.lock().unwrap().is_empty());
        assert_eq!(c.outbox_len(), 0);
        assert_eq!(c.value(&path("body")), None);
    }

    #[test]
    fn test_edits_in_one_transaction_merge() {
        let mut c = Coordinator::with_store_id(1);
        let waves = recorder(&mut c);

        let tx = c
            .transact(|c| {
                c.set(&path("title"), "a")?;
                c.set(&path("title"), "b")?;
                c.splice_text(&path("body"), 0, 0, "hello")?;
                c.splice_text(&path("body"), 5, 0, " world")
            })
            .unwrap()
            .unwrap();

        assert_eq!(tx.patches.len(), 2);
        assert_eq!(c.value(&path("title")), Some(json!("b")));
        assert_eq!(c.text(&path("body")), Some("hello world".to_string()));

        let waves = waves.lock().unwrap();
        assert_eq!(waves.len(), 1);
        assert_eq!(waves[0].origin, Origin::Local);
        match waves[0].get(&path("title")) {
            Some(Change::Register(change)) => {
                assert_eq!(change.previous, Value::Null);
                assert_eq!(change.current, json!("b"));
            }
            other => panic!("unexpected change {:?}", other),
        }
    }

    #[test]
    fn test_failed_transact_aborts() {
        let mut c = Coordinator::with_store_id(1);
        c.transact(|c| c.set(&path("title"), "kept")).unwrap();

        let err = c
            .transact(|c| {
                c.set(&path("other"), 1)?;
                c.set_key(&path("title"), "k", 1)
            })
            .unwrap_err();
        assert_eq!(
            err,
            DbError::Core(CoreError::KindMismatch {
                expected: FieldKind::Register,
                found: FieldKind::Map,
            })
        );
        assert!(!c.is_in_transaction());
        assert_eq!(c.value(&path("other")), None);
        assert_eq!(c.value(&path("title")), Some(json!("kept")));
    }

    #[test]
    fn test_remote_apply_and_duplicate() {
        let mut author = Coordinator::with_store_id(1);
        let tx = author
            .transact(|c| c.set_key(&path("tags"), "color", "red"))
            .unwrap()
            .unwrap();

        let mut peer = Coordinator::with_store_id(2);
        let waves = recorder(&mut peer);
        assert_eq!(peer.apply_remote(&tx).unwrap(), RemoteOutcome::Applied { fields: 1 });
        assert_eq!(peer.apply_remote(&tx).unwrap(), RemoteOutcome::Duplicate);

        assert_eq!(peer.value(&path("tags")), Some(json!({"color": "red"})));
        assert_eq!(waves.lock().unwrap().len(), 1);
        assert_eq!(waves.lock().unwrap()[0].origin, Origin::Remote);
        assert!(peer.has_seen(&tx.id));
        // Remote transactions are not the local replica's to undo.
        assert!(!peer.can_undo());
    }

    #[test]
    fn test_remote_clock_observation() {
        let mut a = Coordinator::with_store_id(1);
        let mut b = Coordinator::with_store_id(2);
        for _ in 0..5 {
            b.transact(|c| c.set(&path("n"), 1)).unwrap();
        }
        for tx in b.drain_outbox() {
            a.apply_remote(&tx).unwrap();
        }

        let tx = a.transact(|c| c.set(&path("n"), 2)).unwrap().unwrap();
        assert_eq!(tx.version, 6);
        b.apply_remote(&tx).unwrap();
        assert_eq!(b.value(&path("n")), Some(json!(2)));
    }

    #[test]
    fn test_concurrent_kinds_resolve_to_latest_writer() {
        let mut a = Coordinator::with_store_id(1);
        let mut b = Coordinator::with_store_id(2);
        let from_a = a
            .transact(|c| {
                c.set(&path("shared"), 1)?;
                c.set(&path("other"), "a")
            })
            .unwrap()
            .unwrap();
        let from_b = b
            .transact(|c| c.splice_text(&path("shared"), 0, 0, "hi"))
            .unwrap()
            .unwrap();

        let waves = recorder(&mut a);
        assert_eq!(a.apply_remote(&from_b).unwrap(), RemoteOutcome::Applied { fields: 1 });
        assert_eq!(b.apply_remote(&from_a).unwrap(), RemoteOutcome::Applied { fields: 2 });

        // (1, 2) beats (1, 1): the text wins on both sides.
        assert_eq!(a.value(&path("shared")), Some(json!("hi")));
        assert_eq!(b.value(&path("shared")), Some(json!("hi")));
        assert_eq!(b.value(&path("other")), Some(json!("a")));
        assert!(matches!(waves.lock().unwrap()[0].get(&path("shared")), Some(Change::Text(_))));

        // The losing register keeps converging underneath.
        let slot = b.registry().slot(&path("shared")).unwrap();
        assert_eq!(slot.variant(FieldKind::Register).map(Field::value), Some(json!(1)));

        // Text edits keep both sides in step; a local register write is refused.
        let again = a.transact(|c| c.splice_text(&path("shared"), 2, 0, "!")).unwrap().unwrap();
        b.apply_remote(&again).unwrap();
        assert_eq!(b.value(&path("shared")), Some(json!("hi!")));
        assert_eq!(a.value(&path("shared")), b.value(&path("shared")));
        assert!(matches!(
            b.transact(|c| c.set(&path("shared"), 5)),
            Err(DbError::Core(CoreError::KindMismatch { .. }))
        ));
    }

    #[test]
    fn test_hidden_variant_write_is_silent() {
        let mut a = Coordinator::with_store_id(1);
        a.transact(|c| c.splice_text(&path("shared"), 0, 0, "x")).unwrap();
        a.transact(|c| c.splice_text(&path("shared"), 1, 0, "y")).unwrap();

        let mut b = Coordinator::with_store_id(2);
        let stale = b.transact(|c| c.set(&path("shared"), 1)).unwrap().unwrap();

        let waves = recorder(&mut a);
        assert_eq!(a.apply_remote(&stale).unwrap(), RemoteOutcome::Applied { fields: 1 });
        assert_eq!(a.text(&path("shared")), Some("xy".to_string()));
        assert!(waves.lock().unwrap()[0].events.is_empty());
    }

    #[test]
    fn test_outbox_requeue_keeps_order() {
        let mut c = Coordinator::with_store_id(1);
        let first = c.transact(|c| c.set(&path("n"), 1)).unwrap().unwrap();
        let second = c.transact(|c| c.set(&path("n"), 2)).unwrap().unwrap();

        let taken = c.pop_outbox().unwrap();
        assert_eq!(taken, first);
        c.requeue(taken);
        assert_eq!(c.drain_outbox(), vec![first, second]);
    }

    #[test]
    fn test_compact_prunes_seen_ids() {
        let mut author = Coordinator::with_store_id(1);
        let mut txs = Vec::new();
        for n in 0..3 {
            txs.push(author.transact(|c| c.set(&path("n"), n)).unwrap().unwrap());
        }

        let mut peer = Coordinator::with_store_id(2);
        for tx in &txs {
            peer.apply_remote(tx).unwrap();
        }
        assert_eq!(peer.seen_len(), 3);

        let stats = peer.compact(2).unwrap();
        assert_eq!(stats.seen_dropped, 2);
        assert_eq!(peer.seen_len(), 1);

        // Forgotten ids are still recognised as duplicates by version.
        for tx in &txs {
            assert_eq!(peer.apply_remote(tx).unwrap(), RemoteOutcome::Duplicate);
        }
        assert_eq!(peer.value(&path("n")), Some(json!(2)));
    }

    #[test]
    fn test_undo_redo_round_trip() {
        let mut c = Coordinator::with_store_id(1);
        c.transact(|c| c.splice_text(&path("body"), 0, 0, "hello")).unwrap();
        c.transact(|c| c.splice_text(&path("body"), 5, 0, " there")).unwrap();

        let undo = c.undo().unwrap().unwrap();
        assert!(undo.version > 2);
        assert_eq!(c.text(&path("body")), Some("hello".to_string()));
        assert!(c.can_redo());

        c.redo().unwrap().unwrap();
        assert_eq!(c.text(&path("body")), Some("hello there".to_string()));

        c.undo().unwrap();
        c.undo().unwrap();
        assert_eq!(c.text(&path("body")), Some(String::new()));
        assert!(!c.can_undo());
        assert_eq!(c.undo().unwrap(), None);
        // Undo and redo are broadcast like any other commit.
        assert_eq!(c.drain_outbox().len(), 6);
    }

    #[test]
    fn test_new_commit_clears_redo() {
        let mut c = Coordinator::with_store_id(1);
        c.transact(|c| c.set(&path("n"), 1)).unwrap();
        c.undo().unwrap();
        assert!(c.can_redo());

        c.transact(|c| c.set(&path("n"), 2)).unwrap();
        assert!(!c.can_redo());
    }

    #[test]
    fn test_compact_prunes_history() {
        let mut c = Coordinator::with_store_id(1);
        for n in 0..4 {
            c.transact(|c| c.set(&path("n"), n)).unwrap();
        }
        c.transact(|c| c.splice_text(&path("body"), 0, 0, "abc")).unwrap();
        c.transact(|c| c.splice_text(&path("body"), 0, 3, "")).unwrap();

        let stats = c.compact(c.version()).unwrap();
        assert_eq!(stats.fields_visited, 2);
        assert_eq!(stats.entries_dropped, 3 + 3);
        assert_eq!(c.value(&path("n")), Some(json!(3)));
        assert_eq!(c.text(&path("body")), Some(String::new()));
    }
}
