//! PDCIO Index - DART distributed attribute indexing
//!
//! Object attributes (`key=value` tags) are indexed across a fixed number of
//! shards so that exact, prefix, suffix, infix and numeric range queries can
//! each be answered by a predictable set of shards.
//!
//! # Components
//!
//! - [`query`]: query pattern grammar and classification
//! - [`expr`]: AND / OR / NOT expressions over query patterns
//! - [`shard`]: per-shard inverted index with snapshot persistence
//! - [`transport`]: shard request types and the transport seam
//! - [`router`]: placement, fan-out and result merging
//! - [`context`]: startup wiring

pub mod context;
pub mod error;
pub mod expr;
pub mod query;
pub mod router;
pub mod shard;
pub mod transport;

pub use context::IndexContext;
pub use error::{IndexError, IndexResult};
pub use expr::Expr;
pub use query::{NumericBound, Predicate, QueryClass, QueryPattern};
pub use router::{DartRouter, SearchResult};
pub use shard::{ShardIndex, ShardStats};
pub use transport::{
    LocalTransport, RejectedEntry, SearchScope, ShardEntry, ShardQuery, ShardRequest, ShardResponse,
    ShardTransport, TableKind, TransportError,
};
