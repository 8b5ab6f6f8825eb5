//! Caching layer for catalog queries.
//!
//! This module provides:
//!
//! - **Deterministic Keys**: structured, order-independent keys derived from a
//!   normalized query
//! - **TTL Cache**: bounded process-local map with fresh / stale / expired states
//!   and frequency-biased eviction
//! - **Single Flight**: a registry of shared pending computations so identical
//!   concurrent misses reach the backend once
//! - **Facet Cache**: a coarser cache for facet counts keyed by category context
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                         Cache Layer                                  │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐        ┌──────────────────────────────────┐    │
//! │  │ CacheKeyBuilder │──key──▶│ TtlCache<Arc<QueryResult>>       │    │
//! │  └─────────────────┘        │  fresh ─▶ return                 │    │
//! │                             │  stale ─▶ return + refresh ──┐   │    │
//! │                             │  miss  ─────────────────────┐│   │    │
//! │                             └─────────────────────────────┼┼───┘    │
//! │                                                           ▼▼        │
//! │                             ┌──────────────────────────────────┐    │
//! │                             │ InFlightRegistry (single flight) │    │
//! │                             └──────────────────────────────────┘    │
//! │                                                                     │
//! │  ┌─────────────────────────────────────────────────────────────┐    │
//! │  │ FacetCache = TtlCache + InFlightRegistry, keyed by context  │    │
//! │  └─────────────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use catalog_core::cache::{CacheKeyBuilder, Lookup, TtlCache, TtlCacheConfig};
//!
//! let cache = TtlCache::new("results", TtlCacheConfig::default());
//! let key = CacheKeyBuilder::build(&query);
//!
//! match cache.get(&key) {
//!     Lookup::Fresh(v) => serve(v),
//!     Lookup::Stale(v) => { schedule_refresh(&key); serve(v) }
//!     Lookup::Miss => cache.set(key, compute().await?),
//! }
//! ```

pub mod facet;
pub mod inflight;
pub mod key;
pub mod ttl;

pub use facet::{FacetCache, FacetCacheConfig, Facets};
pub use inflight::{FlightRole, InFlightRegistry, SharedComputation};
pub use key::{CacheKeyBuilder, KeyType, KEY_VERSION};
pub use ttl::{CacheEntry, CacheStats, Lookup, TtlCache, TtlCacheConfig};
