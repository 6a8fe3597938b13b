//! DuplexId - the ordering key used for last-writer-wins resolution.
//!
//! A DuplexId pairs the version of the transaction that produced a write
//! with the id of the replica that committed it. Higher versions win; equal
//! versions are broken by the higher store id. The pair can be packed into a
//! single integer (or a fixed-width hex key) whose natural ordering matches
//! the semantic one.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Width of the hex key produced by [`DuplexId::to_key`].
const KEY_WIDTH: usize = 24;

/// Composite (version, store id) ordering key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DuplexId {
    /// Transaction version (logical clock of the committing replica).
    pub version: u64,
    /// Identity of the committing replica.
    pub store_id: u32,
}

impl DuplexId {
    pub const fn new(version: u64, store_id: u32) -> Self {
        Self { version, store_id }
    }

    /// Pack into a single sortable scalar: version in the high bits,
    /// store id in the low 32 bits.
    pub fn pack(&self) -> u128 {
        ((self.version as u128) << 32) | self.store_id as u128
    }

    pub fn unpack(packed: u128) -> Self {
        Self {
            version: (packed >> 32) as u64,
            store_id: (packed & u32::MAX as u128) as u32,
        }
    }

    /// Fixed-width hex form of [`pack`](Self::pack). String comparison of
    /// two keys matches the ordering of the ids they encode.
    pub fn to_key(&self) -> String {
        format!("{:0width$x}", self.pack(), width = KEY_WIDTH)
    }

    pub fn from_key(key: &str) -> Result<Self, CoreError> {
        if key.len() != KEY_WIDTH {
            return Err(CoreError::InvalidKey(key.to_string()));
        }
        u128::from_str_radix(key, 16)
            .map(Self::unpack)
            .map_err(|_| CoreError::InvalidKey(key.to_string()))
    }

    /// Returns true if `self` beats `other` in last-writer-wins resolution.
    pub fn wins_over(&self, other: &DuplexId) -> bool {
        self > other
    }
}

impl PartialOrd for DuplexId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DuplexId {
    /// Greater means "newer": higher version first, then higher store id.
    fn cmp(&self, other: &Self) -> Ordering {
        self.version
            .cmp(&other.version)
            .then_with(|| self.store_id.cmp(&other.store_id))
    }
}

impl fmt::Display for DuplexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.version, self.store_id)
    }
}
