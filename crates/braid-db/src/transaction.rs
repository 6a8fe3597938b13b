//! Transactions - the unit of replication.
//!
//! A transaction bundles every patch produced between `begin_transaction`
//! and `end_transaction`, stamped with the committing replica's store id and
//! the version it drew from its local clock. Transactions are plain data and
//! travel as JSON.

use crate::error::Result;
use crate::registry::FieldPath;
use braid_core::{DuplexId, Patch};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Globally unique transaction identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn new() -> Self {
        Self(Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for TransactionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One field's patch within a transaction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PatchEntry {
    pub table_id: String,
    pub record_id: String,
    pub field_id: String,
    pub patch: Patch,
}

impl PatchEntry {
    pub fn new(path: &FieldPath, patch: Patch) -> Self {
        Self {
            table_id: path.table_id.clone(),
            record_id: path.record_id.clone(),
            field_id: path.field_id.clone(),
            patch,
        }
    }

    pub fn path(&self) -> FieldPath {
        FieldPath::new(&self.table_id, &self.record_id, &self.field_id)
    }
}

/// A committed batch of patches.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub store_id: u32,
    pub version: u64,
    pub patches: Vec<PatchEntry>,
}

impl Transaction {
    /// The ordering key every patch in this transaction was written under.
    pub fn duplex_id(&self) -> DuplexId {
        DuplexId::new(self.version, self.store_id)
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use braid_core::RegisterPatch;
    use serde_json::json;

    fn sample() -> Transaction {
        Transaction {
            id: TransactionId::from("01J0000000000000000000TEST"),
            store_id: 3,
            version: 7,
            patches: vec![PatchEntry::new(
                &FieldPath::new("notes", "n1", "title"),
                Patch::Register(RegisterPatch {
                    id: DuplexId::new(7, 3),
                    value: json!("hello"),
                }),
            )],
        }
    }

    #[test]
    fn test_bytes_round_trip() {
        let tx = sample();
        let bytes = tx.to_bytes().unwrap();
        assert_eq!(Transaction::from_bytes(&bytes).unwrap(), tx);
    }

    #[test]
    fn test_wire_is_plain_json() {
        let wire = serde_json::to_value(sample()).unwrap();
        assert_eq!(wire["store_id"], json!(3));
        assert_eq!(wire["patches"][0]["table_id"], json!("notes"));
        assert_eq!(wire["patches"][0]["patch"]["kind"], json!("register"));
    }

    #[test]
    fn test_malformed_bytes() {
        let err = Transaction::from_bytes(b"{not json").unwrap_err();
        assert!(matches!(err, DbError::Serialization(_)));
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(TransactionId::new(), TransactionId::new());
        assert_eq!(sample().duplex_id(), DuplexId::new(7, 3));
        assert_eq!(sample().patches[0].path().to_string(), "notes/n1/title");
    }
}
