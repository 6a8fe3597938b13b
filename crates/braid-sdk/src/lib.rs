//! Braid SDK - replicas, replication adapters and the in-memory hub
//!
//! A [`Replica`] wraps a [`braid_db::Coordinator`] and connects it to a
//! [`ReplicationAdapter`]. Local commits are broadcast as they happen;
//! inbound transactions are applied when the caller pumps them with
//! [`Replica::sync`] or [`Replica::next_remote`].
//!
//! # Quick Start
//!
//! ```rust
//! use braid_sdk::prelude::*;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let hub = MemoryHub::default();
//! let mut alice = Replica::connect(Arc::new(hub.adapter()), ReplicaConfig::default()).await?;
//! let mut bob = Replica::connect(Arc::new(hub.adapter()), ReplicaConfig::default()).await?;
//!
//! let title = FieldPath::new("notes", "n1", "title");
//! alice.transact(|c| c.splice_text(&title, 0, 0, "Groceries")).await?;
//!
//! bob.sync()?;
//! assert_eq!(bob.text(&title).as_deref(), Some("Groceries"));
//! # Ok::<(), SdkError>(())
//! # }).unwrap();
//! ```
//!
//! # Architecture
//!
//! - [`adapter`] - the replication boundary and [`MemoryHub`]
//! - [`replica`] - startup handshake, broadcast and inbound pump
//! - [`config`] - replica configuration
//! - [`error`] - error types

pub mod adapter;
pub mod config;
pub mod error;
pub mod replica;

pub use adapter::{AdapterError, HubConfig, Inbound, MemoryAdapter, MemoryHub, ReplicationAdapter};
pub use config::{ReplicaConfig, ReplicaConfigBuilder};
pub use error::{Result, SdkError};
pub use replica::{Replica, ReplicaEvent};

// Re-export the types callers need to edit and observe fields.
pub use braid_db::{
    Change, ChangeWave, Coordinator, CoordinatorConfig, FieldKind, FieldPath, Origin,
    RemoteOutcome, Transaction,
};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::adapter::{MemoryHub, ReplicationAdapter};
    pub use crate::config::{ReplicaConfig, ReplicaConfigBuilder};
    pub use crate::error::SdkError;
    pub use crate::replica::{Replica, ReplicaEvent};
    pub use braid_db::{Change, FieldPath, Origin};
}
