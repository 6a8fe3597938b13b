//! Error types for the database layer.

use braid_core::CoreError;
use thiserror::Error;

/// Errors that can occur in coordinator operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DbError {
    /// Transaction misuse: nesting, ending while idle, or mutating outside
    /// a transaction. Never retried.
    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DbError>;
