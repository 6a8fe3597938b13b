//! # braid-db
//!
//! Transaction layer for the Braid replicated store.
//!
//! This crate provides:
//! - [`FieldRegistry`]: tables of records of fields, created on first reference
//! - [`Coordinator`]: the `Idle -> InTransaction -> Idle` state machine that
//!   stages local edits, applies remote transactions and notifies observers
//! - [`Transaction`]: the unit of replication, encoded as JSON on the wire
//! - Undo/redo as forward transactions
//! - [`StabilityTracker`] for deciding when history can be compacted
//!
//! ## Example
//!
//! ```rust
//! use braid_db::{Coordinator, FieldPath};
//!
//! let title = FieldPath::new("notes", "n1", "title");
//!
//! let mut alice = Coordinator::with_store_id(1);
//! let tx = alice
//!     .transact(|c| c.splice_text(&title, 0, 0, "Groceries"))
//!     .unwrap()
//!     .unwrap();
//!
//! let mut bob = Coordinator::with_store_id(2);
//! bob.apply_remote(&tx).unwrap();
//! assert_eq!(bob.text(&title).as_deref(), Some("Groceries"));
//! ```

pub mod context;
pub mod coordinator;
pub mod error;
pub mod registry;
pub mod stability;
pub mod transaction;
pub mod undo;

pub use context::{LocalClock, ReplicaContext};
pub use coordinator::{
    ChangeEvent, ChangeWave, CompactionStats, Coordinator, CoordinatorConfig, Observer, Origin,
    RemoteOutcome,
};
pub use error::{DbError, Result};
pub use registry::{FieldPath, FieldRegistry, FieldSlot, Record, Table};
pub use stability::{StabilityStats, StabilityTracker};
pub use transaction::{PatchEntry, Transaction, TransactionId};
pub use undo::{UndoEntry, UndoManager, UndoRecord};

// Field engine re-exports, so most callers only need this crate.
pub use braid_core::{
    Change, DuplexId, Field, FieldKind, MapUpdate, Patch, Splice, Update,
};
