//! Facet aggregation cache keyed by category context.
//!
//! Facet counts change slowly and do not depend on the user's filters, sort or
//! page, so they are cached separately under a much coarser key with longer
//! lifetimes. Lookups never fail: an unavailable facet summary is simply absent.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::inflight::{FlightRole, InFlightRegistry, SharedComputation};
use super::key::CacheKeyBuilder;
use super::ttl::{CacheStats, Lookup, TtlCache, TtlCacheConfig};
use crate::backend::FacetSummary;
use crate::error::Result;
use crate::query::FacetContext;

/// Facet cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacetCacheConfig {
    #[serde(with = "humantime_serde", default = "default_ttl")]
    pub ttl: Duration,

    #[serde(with = "humantime_serde", default = "default_stale_ceiling")]
    pub stale_ceiling: Duration,

    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Concurrent facet fetches allowed
    #[serde(default = "default_max_inflight")]
    pub max_inflight: usize,
}

impl Default for FacetCacheConfig {
    fn default() -> Self {
        Self {
            ttl: default_ttl(),
            stale_ceiling: default_stale_ceiling(),
            capacity: default_capacity(),
            max_inflight: default_max_inflight(),
        }
    }
}

impl FacetCacheConfig {
    /// Settings for the underlying TTL cache.
    pub fn ttl_config(&self) -> TtlCacheConfig {
        TtlCacheConfig::default()
            .with_ttl(self.ttl)
            .with_stale_ceiling(self.stale_ceiling)
            .with_capacity(self.capacity)
    }
}

fn default_ttl() -> Duration {
    Duration::from_secs(600)
}

fn default_stale_ceiling() -> Duration {
    Duration::from_secs(3600)
}

fn default_capacity() -> usize {
    200
}

fn default_max_inflight() -> usize {
    64
}

/// Shared facet summary.
pub type Facets = Arc<FacetSummary>;

/// Facet cache with its own single-flight registry.
pub struct FacetCache {
    cache: Arc<TtlCache<Facets>>,
    inflight: InFlightRegistry<Facets>,
    closed: AtomicBool,
}

impl FacetCache {
    pub fn new(config: &FacetCacheConfig, max_age: Duration) -> Self {
        Self {
            cache: Arc::new(TtlCache::new("facets", config.ttl_config())),
            inflight: InFlightRegistry::new("facets", config.max_inflight, max_age),
            closed: AtomicBool::new(false),
        }
    }

    /// Facets for `context`, fetching through `fetch` on a miss.
    ///
    /// A stale summary is returned immediately and refreshed in the background.
    /// Failures are logged and yield `None`.
    pub async fn get<F, Fut>(&self, context: &FacetContext, fetch: F) -> Option<Facets>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<FacetSummary>> + Send + 'static,
    {
        let key = CacheKeyBuilder::facets(context);

        match self.cache.get(&key) {
            Lookup::Fresh(facets) => Some(facets),
            Lookup::Stale(facets) => {
                if !self.closed.load(Ordering::Acquire) {
                    // The refresh runs detached; its outcome only matters to the cache.
                    if let Err(e) = self.start(&key, fetch) {
                        debug!(key = %key, error = %e, "Facet refresh not scheduled");
                    }
                }
                Some(facets)
            }
            Lookup::Miss => {
                let result = match self.start(&key, fetch) {
                    Ok((computation, _)) => computation.await,
                    Err(e) => Err(e),
                };
                match result {
                    Ok(facets) => Some(facets),
                    Err(e) => {
                        warn!(key = %key, error = %e, "Facet lookup failed, omitting facets");
                        None
                    }
                }
            }
        }
    }

    fn start<F, Fut>(&self, key: &str, fetch: F) -> Result<(SharedComputation<Facets>, FlightRole)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<FacetSummary>> + Send + 'static,
    {
        let cache = Arc::clone(&self.cache);
        let owned_key = key.to_string();
        self.inflight.get_or_create(key, move || {
            let fut = fetch();
            async move {
                let facets = Arc::new(fut.await?);
                cache.set(owned_key, Arc::clone(&facets));
                Ok(facets)
            }
        })
    }

    pub fn clear(&self) {
        self.cache.clear();
        self.inflight.clear();
    }

    /// Stop scheduling refreshes and abort pending fetches.
    pub fn shutdown(&self) -> usize {
        self.closed.store(true, Ordering::Release);
        self.inflight.abort_all()
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Number of facet fetches currently pending.
    pub fn pending(&self) -> usize {
        self.inflight.len()
    }
}
