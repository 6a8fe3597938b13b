//! Error types for the field engine.

use crate::field::FieldKind;
use thiserror::Error;

/// Errors raised by field operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Field kind mismatch: expected {expected}, found {found}")]
    KindMismatch { expected: FieldKind, found: FieldKind },

    #[error("Invalid ordering key: {0}")]
    InvalidKey(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
