//! Shard transport
//!
//! The router talks to shards only through [`ShardTransport`]. Requests are
//! grouped so that each shard receives at most one message per operation.

use crate::query::Predicate;
use crate::shard::ShardIndex;

use async_trait::async_trait;
use pdcio_common::{IndexKey, ObjectId, ShardId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Shard table an entry belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TableKind {
    Exact,
    Prefix,
    Suffix,
    Numeric,
}

/// One index entry addressed to one table of a shard
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShardEntry {
    pub table: TableKind,
    pub key: IndexKey,
}

/// Which string tables a search consults
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchScope {
    /// The exact-value table, scanned for wildcard predicates
    Exact,
    /// The prefix or suffix affix tables
    Affix,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShardQuery {
    pub attribute: String,
    pub predicate: Predicate,
    pub scope: SearchScope,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ShardRequest {
    Insert(Vec<ShardEntry>),
    Delete(Vec<ShardEntry>),
    Search(ShardQuery),
}

/// An entry a shard refused; resending it fails the same way
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RejectedEntry {
    pub attribute: String,
    pub object_id: ObjectId,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ShardResponse {
    /// Every valid entry was applied; `changed` counts those that altered
    /// the shard
    Applied {
        changed: usize,
        rejected: Vec<RejectedEntry>,
    },
    Objects(Vec<ObjectId>),
}

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("shard {0} timed out")]
    Timeout(ShardId),

    #[error("shard {0} unreachable")]
    Unreachable(ShardId),

    #[error("shard {shard_id} failed: {message}")]
    Shard { shard_id: ShardId, message: String },
}

/// Point-to-point delivery to a shard, addressed by shard id
#[async_trait]
pub trait ShardTransport: Send + Sync {
    async fn send(
        &self,
        shard: ShardId,
        request: ShardRequest,
    ) -> Result<ShardResponse, TransportError>;
}

/// In-process transport over a fixed set of shard indexes
pub struct LocalTransport {
    shards: Vec<Arc<ShardIndex>>,
}

impl LocalTransport {
    /// Create `num_shards` empty shards
    #[must_use]
    pub fn new(num_shards: u32, affix_len: usize) -> Self {
        Self {
            shards: (0..num_shards)
                .map(|id| Arc::new(ShardIndex::new(id, affix_len)))
                .collect(),
        }
    }

    /// Wrap existing shards; shard `i` must have id `i`
    #[must_use]
    pub const fn from_shards(shards: Vec<Arc<ShardIndex>>) -> Self {
        Self { shards }
    }

    #[must_use]
    pub fn shard(&self, id: ShardId) -> Option<&Arc<ShardIndex>> {
        self.shards.get(id as usize)
    }

    #[must_use]
    pub fn shards(&self) -> &[Arc<ShardIndex>] {
        &self.shards
    }
}

#[async_trait]
impl ShardTransport for LocalTransport {
    async fn send(
        &self,
        shard: ShardId,
        request: ShardRequest,
    ) -> Result<ShardResponse, TransportError> {
        let index = self.shard(shard).ok_or(TransportError::Unreachable(shard))?;
        index.handle(request).map_err(|e| {
            debug!("Shard {shard} rejected request: {e}");
            TransportError::Shard {
                shard_id: shard,
                message: e.to_string(),
            }
        })
    }
}
