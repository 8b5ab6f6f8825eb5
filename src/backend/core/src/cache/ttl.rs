//! Bounded in-process cache with stale-while-revalidate semantics.
//!
//! Every entry moves through three states, evaluated lazily on read:
//!
//! ```text
//!   age <= ttl                 Fresh    served as-is
//!   ttl < age <= stale_ceiling Stale    served, caller schedules a refresh
//!   age > stale_ceiling        Expired  deleted and reported as a miss
//! ```
//!
//! Capacity is soft. Eviction is amortized into [`TtlCache::set`]: once the map
//! reaches `capacity * cleanup_threshold` entries, expired entries are swept and,
//! if the map is still over `capacity`, the coldest entries are dropped. Coldness
//! is `last_access + access_count * frequency_weight`, so frequently read keys
//! survive longer than keys that were merely touched recently.

use dashmap::DashMap;
use metrics::{counter, gauge};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{CatalogError, Result};

// ═══════════════════════════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════════════════════════

/// TTL cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtlCacheConfig {
    /// How long an entry is fresh
    #[serde(with = "humantime_serde", default = "default_ttl")]
    pub ttl: Duration,

    /// Age after which an entry is no longer served at all
    #[serde(with = "humantime_serde", default = "default_stale_ceiling")]
    pub stale_ceiling: Duration,

    /// Hard entry cap enforced by eviction
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Fraction of capacity at which `set` starts sweeping
    #[serde(default = "default_cleanup_threshold")]
    pub cleanup_threshold: f64,

    /// Fraction of entries dropped per eviction pass
    #[serde(default = "default_eviction_fraction")]
    pub eviction_fraction: f64,

    /// Recency credit granted per recorded access
    #[serde(with = "humantime_serde", default = "default_frequency_weight")]
    pub frequency_weight: Duration,
}

impl Default for TtlCacheConfig {
    fn default() -> Self {
        Self {
            ttl: default_ttl(),
            stale_ceiling: default_stale_ceiling(),
            capacity: default_capacity(),
            cleanup_threshold: default_cleanup_threshold(),
            eviction_fraction: default_eviction_fraction(),
            frequency_weight: default_frequency_weight(),
        }
    }
}

impl TtlCacheConfig {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_stale_ceiling(mut self, stale_ceiling: Duration) -> Self {
        self.stale_ceiling = stale_ceiling;
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Reject settings the cache cannot honour.
    pub fn validate(&self, section: &str) -> Result<()> {
        if self.ttl.is_zero() {
            return Err(CatalogError::configuration(format!("{section}.ttl must be positive")));
        }
        if self.stale_ceiling < self.ttl {
            return Err(CatalogError::configuration(format!(
                "{section}.stale_ceiling must be at least {section}.ttl"
            )));
        }
        if self.capacity == 0 {
            return Err(CatalogError::configuration(format!(
                "{section}.capacity must be positive"
            )));
        }
        if !(self.cleanup_threshold > 0.0 && self.cleanup_threshold <= 1.0) {
            return Err(CatalogError::configuration(format!(
                "{section}.cleanup_threshold must be in (0, 1]"
            )));
        }
        if !(self.eviction_fraction > 0.0 && self.eviction_fraction <= 1.0) {
            return Err(CatalogError::configuration(format!(
                "{section}.eviction_fraction must be in (0, 1]"
            )));
        }
        Ok(())
    }
}

fn default_ttl() -> Duration {
    Duration::from_secs(60)
}

fn default_stale_ceiling() -> Duration {
    Duration::from_secs(300)
}

fn default_capacity() -> usize {
    1000
}

fn default_cleanup_threshold() -> f64 {
    0.9
}

fn default_eviction_fraction() -> f64 {
    0.2
}

fn default_frequency_weight() -> Duration {
    Duration::from_secs(1)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Entries and Lookups
// ═══════════════════════════════════════════════════════════════════════════════

/// A cached value with its bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub created_at: Instant,
    pub access_count: u64,
    pub last_access: Instant,
}

impl<V> CacheEntry<V> {
    fn new(value: V, now: Instant) -> Self {
        Self {
            value,
            created_at: now,
            access_count: 0,
            last_access: now,
        }
    }
}

/// Outcome of a cache read.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<V> {
    Fresh(V),
    Stale(V),
    Miss,
}

impl<V> Lookup<V> {
    pub fn is_hit(&self) -> bool {
        !matches!(self, Self::Miss)
    }

    pub fn into_value(self) -> Option<V> {
        match self {
            Self::Fresh(v) | Self::Stale(v) => Some(v),
            Self::Miss => None,
        }
    }

    /// Short label used in logs and metrics.
    pub fn status(&self) -> &'static str {
        match self {
            Self::Fresh(_) => "fresh",
            Self::Stale(_) => "stale",
            Self::Miss => "miss",
        }
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub entries: u64,
    pub hits: u64,
    pub stale_hits: u64,
    pub misses: u64,
    pub evictions: u64,
    /// Fresh and stale hits over all reads (0.0 - 1.0)
    pub hit_rate: f64,
}

// ═══════════════════════════════════════════════════════════════════════════════
// TTL Cache
// ═══════════════════════════════════════════════════════════════════════════════

/// Process-local TTL cache.
pub struct TtlCache<V> {
    name: &'static str,
    config: TtlCacheConfig,
    entries: DashMap<String, CacheEntry<V>>,
    /// Reference point for eviction scores
    epoch: Instant,
    hits: AtomicU64,
    stale_hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    /// One sweep at a time; concurrent writers skip instead of queueing
    eviction_lock: Mutex<()>,
}

impl<V: Clone> TtlCache<V> {
    /// Create a cache. `name` labels its metrics.
    pub fn new(name: &'static str, config: TtlCacheConfig) -> Self {
        Self {
            name,
            entries: DashMap::with_capacity(config.capacity),
            config,
            epoch: Instant::now(),
            hits: AtomicU64::new(0),
            stale_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            eviction_lock: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn config(&self) -> &TtlCacheConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    /// Look up `key`, classifying the entry by age. Hits bump the access
    /// bookkeeping; expired entries are deleted.
    pub fn get(&self, key: &str) -> Lookup<V> {
        let now = Instant::now();

        let lookup = match self.entries.get_mut(key) {
            Some(mut entry) => {
                let age = now.saturating_duration_since(entry.created_at);
                if age > self.config.stale_ceiling {
                    None
                } else {
                    entry.access_count += 1;
                    entry.last_access = now;
                    let value = entry.value.clone();
                    Some(if age <= self.config.ttl {
                        Lookup::Fresh(value)
                    } else {
                        Lookup::Stale(value)
                    })
                }
            }
            None => Some(Lookup::Miss),
        };

        let lookup = match lookup {
            Some(lookup) => lookup,
            None => {
                // A concurrent `set` may have replaced the entry since the read.
                let ceiling = self.config.stale_ceiling;
                self.entries.remove_if(key, |_, e| {
                    now.saturating_duration_since(e.created_at) > ceiling
                });
                debug!(cache = self.name, key = %key, "Expired entry removed on read");
                Lookup::Miss
            }
        };

        match &lookup {
            Lookup::Fresh(_) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                counter!("catalog_cache_hits_total", "cache" => self.name, "state" => "fresh")
                    .increment(1);
            }
            Lookup::Stale(_) => {
                self.stale_hits.fetch_add(1, Ordering::Relaxed);
                counter!("catalog_cache_hits_total", "cache" => self.name, "state" => "stale")
                    .increment(1);
            }
            Lookup::Miss => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                counter!("catalog_cache_misses_total", "cache" => self.name).increment(1);
            }
        }

        lookup
    }

    /// Fresh or stale value without touching bookkeeping or statistics.
    pub fn peek_stale(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        self.entries.get(key).and_then(|entry| {
            (now.saturating_duration_since(entry.created_at) <= self.config.stale_ceiling)
                .then(|| entry.value.clone())
        })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Writes
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert or replace `key`. A replaced entry starts over with no accesses.
    pub fn set(&self, key: impl Into<String>, value: V) {
        self.entries
            .insert(key.into(), CacheEntry::new(value, Instant::now()));

        let len = self.entries.len();
        if len as f64 >= self.config.capacity as f64 * self.config.cleanup_threshold {
            self.evict_if_over_capacity();
        }
        gauge!("catalog_cache_entries", "cache" => self.name).set(self.entries.len() as f64);
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        self.entries.remove(key).map(|(_, entry)| entry.value)
    }

    pub fn clear(&self) {
        self.entries.clear();
        gauge!("catalog_cache_entries", "cache" => self.name).set(0.0);
    }

    /// Sweep expired entries, then drop the coldest entries while over capacity.
    ///
    /// Returns the number of entries removed. A sweep already running on another
    /// thread makes this a no-op.
    pub fn evict_if_over_capacity(&self) -> usize {
        let Some(_guard) = self.eviction_lock.try_lock() else {
            return 0;
        };

        let now = Instant::now();
        let ceiling = self.config.stale_ceiling;
        let before = self.entries.len();
        self.entries
            .retain(|_, e| now.saturating_duration_since(e.created_at) <= ceiling);
        let expired = before.saturating_sub(self.entries.len());

        let len = self.entries.len();
        let mut dropped = 0;
        if len > self.config.capacity {
            let fraction = (len as f64 * self.config.eviction_fraction).ceil() as usize;
            let target = fraction.max(len - self.config.capacity);

            let mut ranked: Vec<(f64, String)> = self
                .entries
                .iter()
                .map(|e| (self.score(e.value()), e.key().clone()))
                .collect();
            ranked.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

            for (_, key) in ranked.into_iter().take(target) {
                if self.entries.remove(&key).is_some() {
                    dropped += 1;
                }
            }
        }

        let removed = expired + dropped;
        if removed > 0 {
            self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
            counter!("catalog_cache_evictions_total", "cache" => self.name)
                .increment(removed as u64);
            debug!(
                cache = self.name,
                expired = expired,
                dropped = dropped,
                remaining = self.entries.len(),
                "Cache eviction pass"
            );
        }
        removed
    }

    /// Eviction rank; lower is colder.
    fn score(&self, entry: &CacheEntry<V>) -> f64 {
        let recency = entry
            .last_access
            .saturating_duration_since(self.epoch)
            .as_millis() as f64;
        recency + entry.access_count as f64 * self.config.frequency_weight.as_millis() as f64
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Introspection
    // ─────────────────────────────────────────────────────────────────────────

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let stale_hits = self.stale_hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + stale_hits + misses;

        CacheStats {
            entries: self.entries.len() as u64,
            hits,
            stale_hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            hit_rate: if total > 0 {
                (hits + stale_hits) as f64 / total as f64
            } else {
                0.0
            },
        }
    }
}
