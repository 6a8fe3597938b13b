//! Replica - a coordinator wired to a replication adapter.
//!
//! Startup follows a fixed handshake: obtain a store id, subscribe, replay
//! the adapter's history, and only then hand the replica to the caller.
//! Subscribing before the history fetch means nothing broadcast in between
//! is lost; the overlap is absorbed as duplicates.

use crate::adapter::{Inbound, ReplicationAdapter};
use crate::config::ReplicaConfig;
use crate::error::{Result, SdkError};
use braid_db::{
    ChangeWave, CompactionStats, Coordinator, Field, FieldPath, RemoteOutcome, ReplicaContext,
    StabilityTracker, Transaction,
};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc::error::TryRecvError};
use tracing::{debug, warn};

/// Events emitted by a replica.
#[derive(Clone, Debug)]
pub enum ReplicaEvent {
    /// The adapter assigned a store id.
    Connected { store_id: u32 },
    /// Startup history replay finished.
    Replayed { transactions: usize },
    /// A transaction was committed locally or applied from a peer.
    Changed(ChangeWave),
    /// An inbound payload could not be decoded or applied and was dropped.
    Rejected { reason: String },
}

/// A running replica.
pub struct Replica<A: ReplicationAdapter> {
    adapter: Arc<A>,
    coordinator: Coordinator,
    inbound: Inbound,
    stability: StabilityTracker,
    event_tx: broadcast::Sender<ReplicaEvent>,
}

impl<A: ReplicationAdapter> Replica<A> {
    /// Connect through `adapter` and replay prior history.
    pub async fn connect(adapter: Arc<A>, config: ReplicaConfig) -> Result<Self> {
        let store_id = adapter.create_replica_id().await?;
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));

        let mut coordinator = Coordinator::new(
            ReplicaContext::new(store_id),
            config.coordinator.clone(),
        );
        let waves = event_tx.clone();
        coordinator.subscribe(Box::new(move |wave| {
            let _ = waves.send(ReplicaEvent::Changed(wave.clone()));
        }));

        let inbound = adapter.subscribe()?;
        let mut replica = Self {
            adapter,
            coordinator,
            inbound,
            stability: StabilityTracker::new(store_id),
            event_tx,
        };
        let _ = replica.event_tx.send(ReplicaEvent::Connected { store_id });

        if config.replay_history {
            let history = replica.adapter.fetch_history().await?;
            let mut replayed = 0;
            for payload in &history {
                if let Some(RemoteOutcome::Applied { .. }) = replica.ingest(payload)? {
                    replayed += 1;
                }
            }
            debug!(store_id, replayed, "replayed history");
            let _ = replica.event_tx.send(ReplicaEvent::Replayed {
                transactions: replayed,
            });
        }

        Ok(replica)
    }

    pub fn store_id(&self) -> u32 {
        self.coordinator.store_id()
    }

    pub fn adapter(&self) -> &Arc<A> {
        &self.adapter
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// Subscribe to replica events.
    pub fn events(&self) -> broadcast::Receiver<ReplicaEvent> {
        self.event_tx.subscribe()
    }

    pub fn field(&self, path: &FieldPath) -> Option<&Field> {
        self.coordinator.field(path)
    }

    pub fn value(&self, path: &FieldPath) -> Option<Value> {
        self.coordinator.value(path)
    }

    pub fn text(&self, path: &FieldPath) -> Option<String> {
        self.coordinator.text(path)
    }

    /// All committed fields as nested JSON: table, record, field.
    pub fn snapshot(&self) -> Value {
        let mut tables = Map::new();
        for (table_id, table) in self.coordinator.registry().tables() {
            let mut records = Map::new();
            for (record_id, record) in table.records() {
                let fields: Map<String, Value> = record
                    .fields()
                    .map(|(field_id, field)| (field_id.to_string(), field.value()))
                    .collect();
                records.insert(record_id.to_string(), Value::Object(fields));
            }
            tables.insert(table_id.to_string(), Value::Object(records));
        }
        Value::Object(tables)
    }

    // ---- local edits ----

    /// Run `f` in a transaction and broadcast the result.
    pub async fn transact<F>(&mut self, f: F) -> Result<Option<Transaction>>
    where
        F: FnOnce(&mut Coordinator) -> braid_db::Result<()>,
    {
        let committed = self.coordinator.transact(f)?;
        self.flush().await?;
        Ok(committed)
    }

    pub async fn undo(&mut self) -> Result<Option<Transaction>> {
        let committed = self.coordinator.undo()?;
        self.flush().await?;
        Ok(committed)
    }

    pub async fn redo(&mut self) -> Result<Option<Transaction>> {
        let committed = self.coordinator.redo()?;
        self.flush().await?;
        Ok(committed)
    }

    pub fn can_undo(&self) -> bool {
        self.coordinator.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.coordinator.can_redo()
    }

    /// Broadcast every committed transaction still in the outbox, oldest
    /// first. A transaction that fails to go out is put back at the head of
    /// the outbox for the next flush, together with everything behind it.
    pub async fn flush(&mut self) -> Result<usize> {
        let mut sent = 0;
        while let Some(tx) = self.coordinator.pop_outbox() {
            let outcome = match tx.to_bytes() {
                Ok(payload) => self.adapter.broadcast(payload).await.map_err(SdkError::from),
                Err(err) => Err(err.into()),
            };
            if let Err(err) = outcome {
                warn!(
                    store_id = self.store_id(),
                    transaction = %tx.id,
                    pending = self.coordinator.outbox_len() + 1,
                    error = %err,
                    "broadcast failed, keeping transaction queued"
                );
                self.coordinator.requeue(tx);
                return Err(err);
            }
            sent += 1;
        }
        Ok(sent)
    }

    // ---- inbound ----

    /// Apply every inbound transaction already queued. Returns how many
    /// were newly applied.
    pub fn sync(&mut self) -> Result<usize> {
        let mut applied = 0;
        loop {
            match self.inbound.try_recv() {
                Ok(payload) => {
                    if let Some(RemoteOutcome::Applied { .. }) = self.ingest(&payload)? {
                        applied += 1;
                    }
                }
                Err(TryRecvError::Empty) => return Ok(applied),
                Err(TryRecvError::Disconnected) => return Err(SdkError::Disconnected),
            }
        }
    }

    /// Wait for the next inbound payload and apply it. `None` means the
    /// payload was malformed or could not be applied, and was dropped.
    pub async fn next_remote(&mut self) -> Result<Option<RemoteOutcome>> {
        match self.inbound.recv().await {
            Some(payload) => self.ingest(&payload),
            None => Err(SdkError::Disconnected),
        }
    }

    fn ingest(&mut self, payload: &[u8]) -> Result<Option<RemoteOutcome>> {
        let tx = match Transaction::from_bytes(payload) {
            Ok(tx) => tx,
            Err(err) => {
                warn!(store_id = self.store_id(), error = %err, "dropping malformed payload");
                self.reject(err.to_string());
                return Ok(None);
            }
        };
        let outcome = match self.coordinator.apply_remote(&tx) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(
                    store_id = self.store_id(),
                    transaction = %tx.id,
                    error = %err,
                    "dropping transaction that could not be applied"
                );
                self.reject(err.to_string());
                return Ok(None);
            }
        };
        if tx.store_id != self.store_id() {
            self.stability.track(tx.store_id);
        }
        Ok(Some(outcome))
    }

    fn reject(&self, reason: String) {
        let _ = self.event_tx.send(ReplicaEvent::Rejected { reason });
    }

    // ---- compaction ----

    pub fn stability(&self) -> &StabilityTracker {
        &self.stability
    }

    /// Record that `store_id` has applied every transaction up to `version`.
    pub fn acknowledge(&mut self, store_id: u32, version: u64) {
        self.stability.acknowledge(store_id, version);
    }

    /// Compact everything at or below the current stable version.
    pub fn compact(&mut self) -> Result<CompactionStats> {
        let stable = self.stability.stable_version();
        Ok(self.coordinator.compact(stable)?)
    }
}
