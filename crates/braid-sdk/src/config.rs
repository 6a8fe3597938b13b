//! Replica configuration.

use braid_db::CoordinatorConfig;

/// Configuration for a [`crate::Replica`].
#[derive(Clone, Debug)]
pub struct ReplicaConfig {
    pub coordinator: CoordinatorConfig,
    /// Replay the adapter's history before accepting local edits.
    pub replay_history: bool,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            coordinator: CoordinatorConfig::default(),
            replay_history: true,
            event_capacity: 256,
        }
    }
}

/// Builder for replica configuration.
pub struct ReplicaConfigBuilder {
    config: ReplicaConfig,
}

impl ReplicaConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ReplicaConfig::default(),
        }
    }

    pub fn undo_depth(mut self, depth: usize) -> Self {
        self.config.coordinator.undo_depth = depth;
        self
    }

    pub fn track_seen(mut self, enabled: bool) -> Self {
        self.config.coordinator.track_seen = enabled;
        self
    }

    pub fn replay_history(mut self, enabled: bool) -> Self {
        self.config.replay_history = enabled;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    pub fn build(self) -> ReplicaConfig {
        self.config
    }
}

impl Default for ReplicaConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
