//! Attribute index error types

use crate::transport::RejectedEntry;

use pdcio_common::{ShardId, ValueType};
use pdcio_placement::PlacementError;
use thiserror::Error;

/// Attribute index error
#[derive(Error, Debug)]
pub enum IndexError {
    /// Some shards did not acknowledge an insert; retrying them is safe
    #[error("insert failed on shards {failed_shards:?}")]
    PartialInsert { failed_shards: Vec<ShardId> },

    /// Some shards did not acknowledge a delete
    #[error("delete failed on shards {failed_shards:?}")]
    PartialDelete { failed_shards: Vec<ShardId> },

    /// Shards refused some keys outright; every other key was applied.
    /// Retrying the refused keys fails the same way.
    #[error("{} entries rejected, shards {failed_shards:?} unreachable", .rejected.len())]
    Rejected {
        rejected: Vec<RejectedEntry>,
        failed_shards: Vec<ShardId>,
    },

    /// Shard timed out or failed during a search
    #[error("shard {0} unreachable")]
    Unreachable(ShardId),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("invalid key: {0}")]
    InvalidKey(#[from] pdcio_common::Error),

    /// Attribute already holds values of another type
    #[error("attribute {attribute} holds {expected} values, got {actual}")]
    TypeMismatch {
        attribute: String,
        expected: ValueType,
        actual: ValueType,
    },

    /// Index snapshot could not be encoded or decoded
    #[error("persist error: {0}")]
    Persist(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("placement error: {0}")]
    Placement(#[from] PlacementError),
}

impl IndexError {
    pub fn invalid_query(msg: impl Into<String>) -> Self {
        Self::InvalidQuery(msg.into())
    }
}

/// Result type for index operations
pub type IndexResult<T> = Result<T, IndexError>;
