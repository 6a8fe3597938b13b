//! Replication adapter boundary and the in-memory hub.
//!
//! An adapter moves encoded transactions between replicas. It hands out
//! store ids, fans broadcasts out to every other subscriber, and keeps the
//! history a late joiner replays before it starts editing. Payloads are
//! opaque bytes here; encoding is the replica's concern.

use crate::error::SdkError;
use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Receiving end of an adapter subscription.
pub type Inbound = mpsc::Receiver<Vec<u8>>;

/// Adapter error type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdapterError {
    ConnectionFailed(String),
    SendFailed(String),
    Disconnected,
}

impl std::fmt::Display for AdapterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdapterError::ConnectionFailed(e) => write!(f, "Connection failed: {}", e),
            AdapterError::SendFailed(e) => write!(f, "Send failed: {}", e),
            AdapterError::Disconnected => write!(f, "Disconnected"),
        }
    }
}

impl std::error::Error for AdapterError {}

impl From<AdapterError> for SdkError {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::Disconnected => SdkError::Disconnected,
            other => SdkError::Network(other.to_string()),
        }
    }
}

/// The transport a replica replicates through.
#[async_trait]
pub trait ReplicationAdapter: Send + Sync + 'static {
    /// Obtain this replica's store id. Called once, before anything else.
    async fn create_replica_id(&self) -> Result<u32, AdapterError>;

    /// Send an encoded transaction to every other replica.
    async fn broadcast(&self, payload: Vec<u8>) -> Result<(), AdapterError>;

    /// Every transaction broadcast so far, in broadcast order.
    async fn fetch_history(&self) -> Result<Vec<Vec<u8>>, AdapterError>;

    /// Start receiving transactions broadcast by other replicas.
    fn subscribe(&self) -> Result<Inbound, AdapterError>;
}

/// Configuration for the in-memory hub.
#[derive(Clone, Debug)]
pub struct HubConfig {
    /// Capacity of each subscriber's inbound channel.
    pub channel_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
        }
    }
}

#[derive(Default)]
struct HubState {
    next_replica_id: u32,
    history: Vec<Vec<u8>>,
    subscribers: BTreeMap<u32, mpsc::Sender<Vec<u8>>>,
}

/// In-process broadcast hub for tests and simulation.
///
/// Cloning yields another handle to the same hub.
#[derive(Clone, Default)]
pub struct MemoryHub {
    config: HubConfig,
    state: Arc<RwLock<HubState>>,
}

impl MemoryHub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            config,
            state: Arc::new(RwLock::new(HubState::default())),
        }
    }

    /// A new, not yet identified adapter attached to this hub.
    pub fn adapter(&self) -> MemoryAdapter {
        MemoryAdapter {
            hub: self.clone(),
            replica_id: Mutex::new(None),
        }
    }

    pub fn history_len(&self) -> usize {
        self.state.read().history.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.read().subscribers.len()
    }

    /// Send the whole history to one subscriber again, as an at-least-once
    /// transport would after a reconnect.
    pub async fn redeliver(&self, replica_id: u32) -> Result<usize, AdapterError> {
        let (sender, history) = {
            let state = self.state.read();
            let sender = state
                .subscribers
                .get(&replica_id)
                .cloned()
                .ok_or(AdapterError::Disconnected)?;
            (sender, state.history.clone())
        };
        let count = history.len();
        for payload in history {
            sender
                .send(payload)
                .await
                .map_err(|e| AdapterError::SendFailed(e.to_string()))?;
        }
        Ok(count)
    }

    /// Inject a raw payload as if some replica had broadcast it.
    pub async fn inject(&self, payload: Vec<u8>) {
        let senders: Vec<_> = self.state.read().subscribers.values().cloned().collect();
        join_all(senders.iter().map(|tx| tx.send(payload.clone()))).await;
    }

    fn next_replica_id(&self) -> u32 {
        let mut state = self.state.write();
        state.next_replica_id += 1;
        state.next_replica_id
    }
}

/// One replica's connection to a [`MemoryHub`].
pub struct MemoryAdapter {
    hub: MemoryHub,
    replica_id: Mutex<Option<u32>>,
}

impl MemoryAdapter {
    pub fn replica_id(&self) -> Option<u32> {
        *self.replica_id.lock()
    }

    /// Drop the subscription. Further broadcasts to this replica are skipped.
    pub fn disconnect(&self) {
        if let Some(id) = self.replica_id() {
            self.hub.state.write().subscribers.remove(&id);
            debug!(replica = id, "disconnected from hub");
        }
    }

    fn require_id(&self) -> Result<u32, AdapterError> {
        self.replica_id().ok_or_else(|| {
            AdapterError::ConnectionFailed("create_replica_id has not been called".to_string())
        })
    }
}

#[async_trait]
impl ReplicationAdapter for MemoryAdapter {
    async fn create_replica_id(&self) -> Result<u32, AdapterError> {
        let mut slot = self.replica_id.lock();
        if let Some(id) = *slot {
            return Ok(id);
        }
        let id = self.hub.next_replica_id();
        *slot = Some(id);
        debug!(replica = id, "assigned replica id");
        Ok(id)
    }

    async fn broadcast(&self, payload: Vec<u8>) -> Result<(), AdapterError> {
        let own_id = self.require_id()?;
        let senders: Vec<_> = {
            let mut state = self.hub.state.write();
            state.history.push(payload.clone());
            state
                .subscribers
                .iter()
                .filter(|(id, _)| **id != own_id)
                .map(|(_, tx)| tx.clone())
                .collect()
        };

        // A closed subscriber has disconnected; the others still get it.
        join_all(senders.iter().map(|tx| tx.send(payload.clone()))).await;
        Ok(())
    }

    async fn fetch_history(&self) -> Result<Vec<Vec<u8>>, AdapterError> {
        self.require_id()?;
        Ok(self.hub.state.read().history.clone())
    }

    fn subscribe(&self) -> Result<Inbound, AdapterError> {
        let id = self.require_id()?;
        let (tx, rx) = mpsc::channel(self.hub.config.channel_capacity);
        self.hub.state.write().subscribers.insert(id, tx);
        Ok(rx)
    }
}
