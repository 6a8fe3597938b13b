//! Stability tracking for safe compaction.
//!
//! Each replica reports the version up to which it has applied every
//! transaction. The minimum over all tracked replicas is the stable version:
//! nothing at or below it can still be in flight, so superseded history
//! entries and tombstone records at or below it may be dropped.

use std::collections::BTreeMap;

/// Per-replica acknowledged versions.
#[derive(Clone, Debug)]
pub struct StabilityTracker {
    local_store_id: u32,
    frontiers: BTreeMap<u32, u64>,
}

/// Snapshot of stability state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StabilityStats {
    pub peer_count: usize,
    pub local_version: u64,
    pub stable_version: u64,
}

impl StabilityTracker {
    pub fn new(local_store_id: u32) -> Self {
        let mut frontiers = BTreeMap::new();
        frontiers.insert(local_store_id, 0);
        Self {
            local_store_id,
            frontiers,
        }
    }

    pub fn local_store_id(&self) -> u32 {
        self.local_store_id
    }

    /// Start tracking a peer that has acknowledged nothing yet.
    pub fn track(&mut self, store_id: u32) {
        self.frontiers.entry(store_id).or_insert(0);
    }

    /// Record that `store_id` has applied every transaction up to `version`.
    /// Frontiers never move backwards.
    pub fn acknowledge(&mut self, store_id: u32, version: u64) {
        let frontier = self.frontiers.entry(store_id).or_insert(0);
        *frontier = (*frontier).max(version);
    }

    /// Stop tracking a peer. The local replica cannot be removed.
    pub fn remove_peer(&mut self, store_id: u32) {
        if store_id != self.local_store_id {
            self.frontiers.remove(&store_id);
        }
    }

    pub fn frontier(&self, store_id: u32) -> Option<u64> {
        self.frontiers.get(&store_id).copied()
    }

    pub fn peer_count(&self) -> usize {
        self.frontiers.len() - 1
    }

    /// Minimum acknowledged version across all tracked replicas.
    pub fn stable_version(&self) -> u64 {
        self.frontiers.values().copied().min().unwrap_or(0)
    }

    pub fn is_stable(&self, version: u64) -> bool {
        version <= self.stable_version()
    }

    pub fn stats(&self) -> StabilityStats {
        StabilityStats {
            peer_count: self.peer_count(),
            local_version: self.frontier(self.local_store_id).unwrap_or(0),
            stable_version: self.stable_version(),
        }
    }
}
