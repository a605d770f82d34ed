//! Region cache lifecycle

use crate::cache::RegionCache;
use crate::error::RegionResult;
use crate::flush::FlushDaemon;
use crate::storage::DurableStorage;

use pdcio_common::CacheConfig;
use std::sync::Arc;
use tracing::info;

/// The region cache together with its flush daemon
pub struct CacheContext {
    config: CacheConfig,
    cache: Arc<RegionCache>,
    daemon: FlushDaemon,
}

impl CacheContext {
    /// Build the cache over `storage` and start the flush daemon
    pub fn start(config: CacheConfig, storage: Arc<dyn DurableStorage>) -> RegionResult<Self> {
        let cache = Arc::new(RegionCache::new(storage, config.max_cache_bytes));
        let daemon = FlushDaemon::spawn(
            Arc::clone(&cache),
            config.flush_interval(),
            config.sweep_interval(),
        )?;
        info!(
            "Region cache started (max {} bytes)",
            config.max_cache_bytes
        );
        Ok(Self {
            config,
            cache,
            daemon,
        })
    }

    pub fn cache(&self) -> &Arc<RegionCache> {
        &self.cache
    }

    pub const fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Stop the daemon, then write everything still cached
    pub fn shutdown(mut self) -> RegionResult<()> {
        self.daemon.shutdown();
        self.cache.flush_all()
    }
}
