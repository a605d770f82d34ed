//! PDCIO Common - Shared types and utilities
//!
//! This crate provides the identifier types, typed attribute values,
//! configuration and error definitions used by the index and region crates.

pub mod config;
pub mod error;
pub mod types;

pub use config::{
    CacheConfig, Config, ConfigError, IndexConfig, IndexMode, NumericDomain, NumericDomains,
    ReplicaSelection,
};
pub use error::{Error, Result};
pub use types::*;
