//! Region engine, cache and storage error types

use thiserror::Error;

/// Region arithmetic and cache errors
#[derive(Error, Debug)]
pub enum RegionError {
    /// Dimensionality outside what the operation supports
    #[error("unsupported dimensionality: {0}")]
    UnsupportedDimension(usize),

    /// Malformed region (no dimensions, zero length, overflow)
    #[error("invalid region: {0}")]
    InvalidRegion(String),

    #[error("dimension mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },

    #[error("buffer too small: need {needed} bytes, have {actual}")]
    BufferTooSmall { needed: usize, actual: usize },

    #[error("failed to start flush daemon: {0}")]
    Daemon(#[source] std::io::Error),

    /// Durable storage failure, passed through unchanged
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl RegionError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidRegion(msg.into())
    }
}

/// Region merge precondition failures
#[derive(Error, Debug)]
pub enum MergeError {
    /// More than one dimension differs
    #[error("regions differ in more than one dimension")]
    NotAdjacent,

    /// The connecting dimension leaves a gap between the regions
    #[error("regions are separated by a gap")]
    Gap,

    #[error(transparent)]
    Region(#[from] RegionError),
}

/// Durable storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object {object} has no data for the requested region")]
    OutOfRange { object: u64 },

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Result type for region and cache operations
pub type RegionResult<T> = Result<T, RegionError>;
