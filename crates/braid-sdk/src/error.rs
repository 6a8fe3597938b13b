//! Error types for the Braid SDK.

use braid_db::DbError;
use std::fmt;

/// Error type for SDK operations.
#[derive(Debug)]
pub enum SdkError {
    /// Coordinator rejected the operation.
    Db(DbError),
    /// Transport failure.
    Network(String),
    /// A payload could not be encoded or decoded.
    Serialization(String),
    /// The inbound channel is closed.
    Disconnected,
}

impl fmt::Display for SdkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdkError::Db(e) => write!(f, "Database error: {}", e),
            SdkError::Network(e) => write!(f, "Network error: {}", e),
            SdkError::Serialization(e) => write!(f, "Serialization error: {}", e),
            SdkError::Disconnected => write!(f, "Disconnected"),
        }
    }
}

impl std::error::Error for SdkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SdkError::Db(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DbError> for SdkError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Serialization(e) => SdkError::Serialization(e),
            other => SdkError::Db(other),
        }
    }
}

/// Result type for SDK operations.
pub type Result<T> = std::result::Result<T, SdkError>;
