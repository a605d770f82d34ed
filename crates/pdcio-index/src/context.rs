//! Index context: the hash space, router and configuration built once at
//! startup and shared by every caller.

use crate::error::IndexResult;
use crate::router::DartRouter;
use crate::transport::{LocalTransport, ShardTransport};

use pdcio_common::IndexConfig;
use pdcio_placement::HashSpace;
use std::sync::Arc;
use tracing::info;

pub struct IndexContext {
    config: IndexConfig,
    router: DartRouter,
}

impl IndexContext {
    pub fn new(config: IndexConfig, transport: Arc<dyn ShardTransport>) -> IndexResult<Self> {
        let space = HashSpace::new(config.num_shards, config.replication_factor)?
            .with_numeric_domains(config.numeric)?;
        let router = DartRouter::new(space, transport, &config);
        info!(
            "Index context ready: {} shards, replication {}, affix {}, mode {}",
            config.num_shards, config.replication_factor, config.affix_len, config.mode
        );
        Ok(Self { config, router })
    }

    /// Context backed by in-process shards
    pub fn local(config: IndexConfig) -> IndexResult<(Self, Arc<LocalTransport>)> {
        let transport = Arc::new(LocalTransport::new(config.num_shards, config.affix_len));
        let context = Self::new(config, transport.clone())?;
        Ok((context, transport))
    }

    #[must_use]
    pub const fn router(&self) -> &DartRouter {
        &self.router
    }

    #[must_use]
    pub const fn config(&self) -> &IndexConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IndexError;
    use pdcio_common::IndexKey;

    #[test]
    fn test_rejects_zero_shards() {
        let config = IndexConfig {
            num_shards: 0,
            ..IndexConfig::default()
        };
        assert!(matches!(
            IndexContext::local(config),
            Err(IndexError::Placement(_))
        ));
    }

    #[test]
    fn test_rejects_empty_numeric_domain() {
        let mut config = IndexConfig::default();
        config.numeric.double = pdcio_common::NumericDomain::Linear { lo: 0.0, hi: 0.0 };
        assert!(matches!(
            IndexContext::local(config),
            Err(IndexError::Placement(_))
        ));
    }

    #[tokio::test]
    async fn test_local_context_round_trip() {
        let config = IndexConfig {
            num_shards: 3,
            replication_factor: 2,
            ..IndexConfig::default()
        };
        let (context, transport) = IndexContext::local(config).unwrap();
        let key = IndexKey::string("project", "climate-sim", 42).unwrap();
        context.router().insert(&key).await.unwrap();

        let postings: usize = transport.shards().iter().map(|s| s.stats().postings).sum();
        // exact + two prefix replicas + two suffix replicas
        assert_eq!(postings, 5);

        let result = context.router().search_str("project=clim*").await.unwrap();
        assert_eq!(result.object_ids.len(), 1);
    }
}
