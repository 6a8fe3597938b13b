//! # braid-core
//!
//! Field engine for the Braid replicated store.
//!
//! This crate provides:
//! - [`DuplexId`]: the (version, store id) ordering key
//! - Register, Map, List and Text fields with local updates and remote patches
//! - [`Change`] (observer-facing) and [`Patch`] (wire-facing) deltas
//! - [`Compose`] for folding deltas recorded inside one transaction
//!
//! Everything here is synchronous and free of I/O; transactions and
//! replication live in `braid-db` and `braid-sdk`.
//!
//! ## Example
//!
//! ```rust
//! use braid_core::{DuplexId, Field, FieldKind, Splice, Update};
//!
//! let mut local = Field::new(FieldKind::Text);
//! let (_change, patch) = local
//!     .apply_update(Update::Text(vec![Splice::text(0, 0, "hello")]), DuplexId::new(1, 1))
//!     .unwrap();
//!
//! let mut remote = Field::new(FieldKind::Text);
//! remote.apply_patch(&patch).unwrap();
//! assert_eq!(remote.value(), local.value());
//! ```

pub mod compose;
pub mod duplex;
pub mod error;
pub mod field;
pub mod map;
pub mod register;
pub mod sequence;

pub use compose::Compose;
pub use duplex::DuplexId;
pub use error::{CoreError, Result};
pub use field::{Change, Field, FieldKind, Patch, Update};
pub use map::{KeyChange, MapChange, MapField, MapPatch, MapUpdate};
pub use register::{RegisterChange, RegisterField, RegisterPatch};
pub use sequence::{
    Anchor, ElementId, ListField, SequenceChange, SequenceField, SequencePatch, Splice,
    SpliceChange, SpliceOp, TextField, Tombstone,
};
