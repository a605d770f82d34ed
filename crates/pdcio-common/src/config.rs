//! Configuration types for PDCIO
//!
//! The index and cache are configured from environment-style key/value
//! pairs. The same structures deserialize from a TOML file for the bench
//! driver.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const ENV_MAX_CACHE_SIZE: &str = "MAX_CACHE_SIZE_BYTES";
pub const ENV_FLUSH_INTERVAL: &str = "CACHE_FLUSH_INTERVAL_SECONDS";
pub const ENV_SWEEP_INTERVAL: &str = "CACHE_SWEEP_INTERVAL_MS";
pub const ENV_NUM_SHARDS: &str = "NUM_SHARDS";
pub const ENV_REPLICATION_FACTOR: &str = "REPLICATION_FACTOR";
pub const ENV_AFFIX_LENGTH: &str = "AFFIX_LENGTH";
pub const ENV_SHARD_TIMEOUT: &str = "SHARD_TIMEOUT_MS";
pub const ENV_INDEX_MODE: &str = "INDEX_MODE";
pub const ENV_REPLICA_SELECTION: &str = "REPLICA_SELECTION";

/// 96 GiB
pub const DEFAULT_MAX_CACHE_BYTES: u64 = 34_359_738_368 * 3;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
}

/// Root configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub index: IndexConfig,
    pub cache: CacheConfig,
}

impl Config {
    /// Load from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup; `NUM_SHARDS` is required
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        let num_shards: u32 =
            parse(&lookup, ENV_NUM_SHARDS)?.ok_or(ConfigError::Missing(ENV_NUM_SHARDS))?;
        if num_shards == 0 {
            return Err(ConfigError::Invalid {
                key: ENV_NUM_SHARDS,
                value: "0".to_string(),
            });
        }
        config.index.num_shards = num_shards;

        if let Some(v) = parse(&lookup, ENV_REPLICATION_FACTOR)? {
            config.index.replication_factor = v;
        }
        if let Some(v) = parse(&lookup, ENV_AFFIX_LENGTH)? {
            config.index.affix_len = v;
        }
        if let Some(v) = parse(&lookup, ENV_SHARD_TIMEOUT)? {
            config.index.shard_timeout_ms = v;
        }
        if let Some(v) = parse(&lookup, ENV_INDEX_MODE)? {
            config.index.mode = v;
        }
        if let Some(v) = parse(&lookup, ENV_REPLICA_SELECTION)? {
            config.index.replica_selection = v;
        }
        if let Some(v) = parse(&lookup, ENV_MAX_CACHE_SIZE)? {
            config.cache.max_cache_bytes = v;
        }
        if let Some(v) = parse(&lookup, ENV_FLUSH_INTERVAL)? {
            config.cache.flush_interval_secs = v;
        }
        if let Some(v) = parse(&lookup, ENV_SWEEP_INTERVAL)? {
            config.cache.sweep_interval_ms = v;
        }

        Ok(config)
    }
}

fn parse<F, T>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}

/// How tags are placed across shards
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexMode {
    /// Exact, prefix and suffix placement with affix replication
    #[default]
    Dart,
    /// Exact-hash placement only; affix queries broadcast
    FullHash,
}

impl FromStr for IndexMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dart" => Ok(Self::Dart),
            "full_hash" | "dht" => Ok(Self::FullHash),
            other => Err(format!("unknown index mode: {other}")),
        }
    }
}

impl fmt::Display for IndexMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dart => write!(f, "dart"),
            Self::FullHash => write!(f, "full_hash"),
        }
    }
}

/// Which replicas of an affix placement a search contacts
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicaSelection {
    #[default]
    All,
    RoundRobin,
}

impl FromStr for ReplicaSelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "round_robin" | "rr" => Ok(Self::RoundRobin),
            other => Err(format!("unknown replica selection: {other}")),
        }
    }
}

/// How one numeric value type is laid out over the shards
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumericDomain {
    /// Equal-width slices of `[lo, hi)`; values outside land on the end shards
    Linear { lo: f64, hi: f64 },
    /// Equal-width slices of the order-preserving bit pattern of the value
    Ordinal,
}

impl NumericDomain {
    /// Signed 32-bit span
    pub const INT32: Self = Self::Linear {
        lo: -2_147_483_648.0,
        hi: 2_147_483_648.0,
    };
    /// Unsigned 32-bit span
    pub const UINT32: Self = Self::Linear {
        lo: 0.0,
        hi: 4_294_967_296.0,
    };

    #[must_use]
    pub fn is_valid(&self) -> bool {
        match *self {
            Self::Linear { lo, hi } => lo.is_finite() && hi.is_finite() && lo < hi,
            Self::Ordinal => true,
        }
    }
}

/// Placement domain per numeric value type
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NumericDomains {
    pub int64: NumericDomain,
    pub uint64: NumericDomain,
    pub double: NumericDomain,
}

impl Default for NumericDomains {
    fn default() -> Self {
        Self {
            int64: NumericDomain::INT32,
            uint64: NumericDomain::UINT32,
            double: NumericDomain::Ordinal,
        }
    }
}

/// Attribute index configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Number of index shards
    pub num_shards: u32,
    /// Shard copies per prefix/suffix insert
    pub replication_factor: u32,
    /// Affix length used to key the prefix and suffix tables
    pub affix_len: usize,
    /// Per-shard request timeout in milliseconds
    pub shard_timeout_ms: u64,
    pub mode: IndexMode,
    pub replica_selection: ReplicaSelection,
    /// Shard layout of numeric attributes, per value type
    pub numeric: NumericDomains,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            num_shards: 1,
            replication_factor: 1,
            affix_len: 3,
            shard_timeout_ms: 10_000,
            mode: IndexMode::Dart,
            replica_selection: ReplicaSelection::All,
            numeric: NumericDomains::default(),
        }
    }
}

impl IndexConfig {
    #[must_use]
    pub const fn shard_timeout(&self) -> Duration {
        Duration::from_millis(self.shard_timeout_ms)
    }
}

/// Region cache configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Upper bound on cached bytes before a synchronous flush-all
    pub max_cache_bytes: u64,
    /// Idle time after which a bucket is flushed by the background sweep
    pub flush_interval_secs: u64,
    /// How often the background sweep wakes up
    pub sweep_interval_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_cache_bytes: DEFAULT_MAX_CACHE_BYTES,
            flush_interval_secs: 30,
            sweep_interval_ms: 1_000,
        }
    }
}

impl CacheConfig {
    #[must_use]
    pub const fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[("NUM_SHARDS", "4")])).unwrap();
        assert_eq!(config.index.num_shards, 4);
        assert_eq!(config.index.replication_factor, 1);
        assert_eq!(config.index.affix_len, 3);
        assert_eq!(config.cache.max_cache_bytes, 103_079_215_104);
        assert_eq!(config.cache.flush_interval(), Duration::from_secs(30));
        assert_eq!(config.index.numeric.int64, NumericDomain::INT32);
        assert_eq!(config.index.numeric.double, NumericDomain::Ordinal);
    }

    #[test]
    fn test_numeric_domain_validity() {
        assert!(NumericDomain::UINT32.is_valid());
        assert!(NumericDomain::Ordinal.is_valid());
        assert!(!NumericDomain::Linear { lo: 5.0, hi: 5.0 }.is_valid());
        assert!(!NumericDomain::Linear { lo: 0.0, hi: f64::INFINITY }.is_valid());
        assert!(!NumericDomain::Linear { lo: f64::NAN, hi: 1.0 }.is_valid());
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("NUM_SHARDS", "8"),
            ("REPLICATION_FACTOR", "2"),
            ("MAX_CACHE_SIZE_BYTES", "1024"),
            ("CACHE_FLUSH_INTERVAL_SECONDS", "5"),
            ("INDEX_MODE", "full_hash"),
            ("REPLICA_SELECTION", "round_robin"),
        ]))
        .unwrap();
        assert_eq!(config.index.replication_factor, 2);
        assert_eq!(config.cache.max_cache_bytes, 1024);
        assert_eq!(config.cache.flush_interval_secs, 5);
        assert_eq!(config.index.mode, IndexMode::FullHash);
        assert_eq!(config.index.replica_selection, ReplicaSelection::RoundRobin);
    }

    #[test]
    fn test_num_shards_required() {
        assert!(matches!(
            Config::from_lookup(lookup(&[])),
            Err(ConfigError::Missing("NUM_SHARDS"))
        ));
        assert!(matches!(
            Config::from_lookup(lookup(&[("NUM_SHARDS", "0")])),
            Err(ConfigError::Invalid { .. })
        ));
        assert!(matches!(
            Config::from_lookup(lookup(&[("NUM_SHARDS", "4"), ("REPLICATION_FACTOR", "two")])),
            Err(ConfigError::Invalid {
                key: "REPLICATION_FACTOR",
                ..
            })
        ));
    }
}
