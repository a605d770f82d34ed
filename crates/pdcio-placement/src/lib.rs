//! PDCIO Placement - query-aware shard placement
//!
//! Maps attribute keys onto index shards so that every query class can be
//! answered by a small, deterministic set of shards.
//!
//! # Query classes
//!
//! - **Exact**: one shard from a djb2 hash of the whole key
//! - **Prefix / Suffix**: a primary shard from the leading (or reversed
//!   trailing) affix, plus `replication_factor - 1` replicas derived by
//!   re-mixing the primary hash
//! - **Infix**: no anchor, so every shard
//! - **Numeric**: equal-width range partition of each numeric type's own
//!   domain; a query literal of unknown type visits the union
//!
//! # Example
//! ```ignore
//! use pdcio_placement::HashSpace;
//!
//! let space = HashSpace::new(4, 2)?;
//! let exact = space.hash_for_exact(b"name\x1fstr001str");
//! let replicas = space.hash_for_prefix(b"name\x1fstr001str", 8);
//! ```

pub mod hash_space;

pub use hash_space::{HashSpace, NUMERIC_TYPES, PlacementError, PlacementResult, djb2};
