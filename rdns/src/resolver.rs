//! Cache-first resolver façade over the iterative engine.

use std::net::Ipv4Addr;
use std::time::Duration;

use crate::cache::{CacheStats, DnsCache};
use crate::config::ServerConfig;
use crate::iterative::{IterativeResolver, ResolveError};
use crate::records::{RecordType, canonical_name};

/// Outcome of a resolution, with enough context for the handler to stamp
/// the answer TTL and for the query log to tell hits from walks.
#[derive(Debug, Clone, Copy)]
pub struct Resolution {
    pub addr: Ipv4Addr,
    pub ttl: u32,
    pub cached: bool,
}

pub struct Resolver {
    cache: Option<DnsCache>,
    engine: IterativeResolver,
}

impl Resolver {
    pub fn new(config: &ServerConfig) -> Self {
        let cache = config.enable_caching.then(|| {
            DnsCache::new(
                config.cache_max_entries,
                Duration::from_secs(config.cache_cleanup_interval_secs),
            )
        });
        let engine = IterativeResolver::new(
            cache.clone(),
            Duration::from_secs(config.cache_ttl_secs),
        );
        Self { cache, engine }
    }

    /// Assemble a resolver from parts; used by tests to point the engine at
    /// a mock upstream.
    pub fn from_parts(engine: IterativeResolver, cache: Option<DnsCache>) -> Self {
        Self { cache, engine }
    }

    pub async fn resolve(
        &self,
        domain: &str,
        qtype: RecordType,
    ) -> Result<Resolution, ResolveError> {
        let name = canonical_name(domain);
        if name.is_empty() {
            return Err(ResolveError::InvalidDomain);
        }

        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get(&name).await {
                return Ok(Resolution {
                    addr: hit.addr,
                    ttl: hit.remaining_ttl.as_secs() as u32,
                    cached: true,
                });
            }
        }

        let resolved = self.engine.resolve(&name, qtype).await?;
        Ok(Resolution {
            addr: resolved.addr,
            ttl: resolved.ttl,
            cached: false,
        })
    }

    pub async fn resolve_a(&self, domain: &str) -> Result<Resolution, ResolveError> {
        self.resolve(domain, RecordType::A).await
    }

    pub async fn stats(&self) -> CacheStats {
        match &self.cache {
            Some(cache) => cache.stats().await,
            None => CacheStats::default(),
        }
    }

    pub async fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear().await;
        }
    }

    /// Stop the cache sweeper. Called once at shutdown.
    pub fn close(&self) {
        if let Some(cache) = &self.cache {
            cache.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_domain_rejected() {
        let config = ServerConfig::default();
        let resolver = Resolver::new(&config);
        assert!(matches!(
            resolver.resolve_a("").await,
            Err(ResolveError::InvalidDomain)
        ));
        assert!(matches!(
            resolver.resolve_a(".").await,
            Err(ResolveError::InvalidDomain)
        ));
    }

    #[tokio::test]
    async fn test_caching_disabled_reports_empty_stats() {
        let config = ServerConfig {
            enable_caching: false,
            ..Default::default()
        };
        let resolver = Resolver::new(&config);
        let stats = resolver.stats().await;
        assert_eq!(stats.total_capacity, 0);
        assert_eq!(stats.hits, 0);
    }
}
