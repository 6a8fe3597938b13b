//! Per-replica context: store id and local clock.
//!
//! Passed to the coordinator at construction instead of living in globals,
//! so several replicas can share one process.

use serde::{Deserialize, Serialize};

/// Lamport-style version counter.
///
/// Local commits draw strictly increasing versions. Observing a remote
/// version moves the clock past it, so a later local write always outranks
/// everything this replica has already seen.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalClock {
    version: u64,
}

impl LocalClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// The last version drawn or observed.
    pub fn current(&self) -> u64 {
        self.version
    }

    pub fn next(&mut self) -> u64 {
        self.version += 1;
        self.version
    }

    pub fn observe(&mut self, version: u64) {
        self.version = self.version.max(version);
    }
}

/// Identity and clock of one replica.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplicaContext {
    store_id: u32,
    clock: LocalClock,
}

impl ReplicaContext {
    pub fn new(store_id: u32) -> Self {
        Self {
            store_id,
            clock: LocalClock::new(),
        }
    }

    pub fn store_id(&self) -> u32 {
        self.store_id
    }

    pub fn clock(&self) -> &LocalClock {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut LocalClock {
        &mut self.clock
    }
}
