//! PDCIO Region - region arithmetic and write-back region cache
//!
//! This crate provides:
//! - N-dimensional region relations, strided overlap copies and 1-D merges
//! - A per-object write-back cache with size-bound and idle flushing
//! - The durable storage boundary and an in-memory backend

pub mod cache;
pub mod context;
pub mod error;
pub mod flush;
pub mod region;
pub mod storage;

pub use cache::{CacheStats, RegionCache};
pub use context::CacheContext;
pub use error::{MergeError, RegionError, RegionResult, StorageError};
pub use flush::FlushDaemon;
pub use region::{
    RegionDescriptor, RegionRelation, copy_overlap, merge_adjacent, merged_extent,
    overlap_subregion, relation,
};
pub use storage::{DurableStorage, MemoryStorage};
