//! Error types shared across PDCIO crates

use crate::config::ConfigError;
use crate::types::ValueType;
use thiserror::Error;

/// Common result type for PDCIO operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for PDCIO
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid {value_type} value: expected {expected} bytes, got {actual}")]
    InvalidValueWidth {
        value_type: ValueType,
        expected: usize,
        actual: usize,
    },

    #[error("string value is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl Error {
    /// Create an invalid key error
    pub fn invalid_key(msg: impl Into<String>) -> Self {
        Self::InvalidKey(msg.into())
    }
}
