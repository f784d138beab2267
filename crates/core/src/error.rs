//! Shared error model.

use thiserror::Error;

/// Failures raised by core primitives.
///
/// Storage, numeric and fetch failures have their own error types in the
/// crates that own those concerns.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// An identifier could not be parsed.
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl CoreError {
    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
