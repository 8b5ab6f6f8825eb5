//! Integration tests for cache keys, freshness bands and eviction.
//!
//! Tests cover:
//! - Key determinism across parameter order and absent/empty values
//! - Fresh -> stale -> expired transitions around the TTL and stale ceiling
//! - Eviction under pressure, biased towards frequently read keys
//! - Facet cache fresh/stale behaviour

use catalog_core::backend::{FacetSummary, FacetValue};
use catalog_core::cache::{
    CacheKeyBuilder, FacetCache, FacetCacheConfig, Lookup, TtlCache, TtlCacheConfig,
};
use catalog_core::query::{NormalizedQuery, RawQueryParams};
use catalog_core::CatalogError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn normalize(pairs: &[(&str, &str)]) -> NormalizedQuery {
    NormalizedQuery::from_raw(&RawQueryParams::from_pairs(pairs.iter().copied())).unwrap()
}

// ============================================================================
// Key Determinism
// ============================================================================

#[test]
fn test_key_ignores_parameter_order() {
    let a = normalize(&[
        ("category", "Electronics"),
        ("brands", "Sony,Apple"),
        ("colors", "Black"),
        ("minPrice", "10"),
    ]);
    let b = normalize(&[
        ("minPrice", "10"),
        ("colors", "Black"),
        ("brands", "Apple"),
        ("brands", "Sony"),
        ("category", "Electronics"),
    ]);

    assert_eq!(CacheKeyBuilder::build(&a), CacheKeyBuilder::build(&b));
}

#[test]
fn test_key_treats_empty_as_absent() {
    let a = normalize(&[("category", "Clothing")]);
    let b = normalize(&[("category", "Clothing"), ("brands", ""), ("q", "  ")]);

    assert_eq!(CacheKeyBuilder::build(&a), CacheKeyBuilder::build(&b));
}

#[test]
fn test_key_distinguishes_pages_and_filters() {
    let page0 = normalize(&[("category", "Clothing")]);
    let page1 = normalize(&[("category", "Clothing"), ("page", "1")]);
    let filtered = normalize(&[("category", "Clothing"), ("colors", "Red")]);

    assert_ne!(CacheKeyBuilder::build(&page0), CacheKeyBuilder::build(&page1));
    assert_ne!(CacheKeyBuilder::build(&page0), CacheKeyBuilder::build(&filtered));
    assert_eq!(
        CacheKeyBuilder::listing(&page0),
        CacheKeyBuilder::listing(&page1)
    );
}

#[test]
fn test_key_is_stable_across_calls() {
    let query = normalize(&[
        ("category", "Electronics"),
        ("subcategory", "Audio"),
        ("spec.Storage", "128GB,64GB"),
        ("sort", "price-asc"),
    ]);
    let first = CacheKeyBuilder::build(&query);
    for _ in 0..100 {
        assert_eq!(CacheKeyBuilder::build(&query.clone()), first);
    }
}

// ============================================================================
// Freshness Transitions
// ============================================================================

fn cache() -> TtlCache<u32> {
    TtlCache::new(
        "test",
        TtlCacheConfig::default()
            .with_ttl(Duration::from_secs(60))
            .with_stale_ceiling(Duration::from_secs(300)),
    )
}

#[tokio::test(start_paused = true)]
async fn test_fresh_just_before_ttl() {
    let cache = cache();
    cache.set("k", 1);

    tokio::time::advance(Duration::from_secs(60) - Duration::from_millis(1)).await;
    assert!(matches!(cache.get("k"), Lookup::Fresh(1)));
}

#[tokio::test(start_paused = true)]
async fn test_stale_just_after_ttl() {
    let cache = cache();
    cache.set("k", 1);

    tokio::time::advance(Duration::from_secs(60) + Duration::from_millis(1)).await;
    assert!(matches!(cache.get("k"), Lookup::Stale(1)));
    assert_eq!(cache.stats().stale_hits, 1);
}

#[tokio::test(start_paused = true)]
async fn test_expired_beyond_ceiling_is_removed() {
    let cache = cache();
    cache.set("k", 1);

    tokio::time::advance(Duration::from_secs(300) + Duration::from_millis(1)).await;
    assert!(matches!(cache.get("k"), Lookup::Miss));
    assert!(!cache.contains("k"));
    assert!(cache.peek_stale("k").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_replacing_entry_restarts_its_age() {
    let cache = cache();
    cache.set("k", 1);
    tokio::time::advance(Duration::from_secs(90)).await;
    assert!(matches!(cache.get("k"), Lookup::Stale(1)));

    cache.set("k", 2);
    assert!(matches!(cache.get("k"), Lookup::Fresh(2)));
}

// ============================================================================
// Eviction
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_eviction_keeps_size_bounded_and_hot_keys() {
    let capacity = 100;
    let cache: TtlCache<usize> = TtlCache::new(
        "eviction",
        TtlCacheConfig::default().with_capacity(capacity),
    );

    for i in 0..10 {
        cache.set(format!("hot-{i}"), i);
    }
    for _ in 0..50 {
        for i in 0..10 {
            assert!(cache.get(&format!("hot-{i}")).is_hit());
        }
    }

    for i in 0..capacity * 2 {
        tokio::time::advance(Duration::from_millis(1)).await;
        cache.set(format!("cold-{i}"), i);
        assert!(cache.len() <= capacity);
    }

    assert!(cache.stats().evictions > 0);
    for i in 0..10 {
        assert!(cache.contains(&format!("hot-{i}")), "hot-{i} was evicted");
    }
}

#[tokio::test(start_paused = true)]
async fn test_eviction_sweeps_expired_first() {
    let cache: TtlCache<usize> = TtlCache::new(
        "sweep",
        TtlCacheConfig::default()
            .with_ttl(Duration::from_secs(1))
            .with_stale_ceiling(Duration::from_secs(2))
            .with_capacity(10),
    );
    for i in 0..8 {
        cache.set(format!("old-{i}"), i);
    }

    tokio::time::advance(Duration::from_secs(3)).await;
    cache.set("new", 99);

    assert_eq!(cache.evict_if_over_capacity(), 0);
    assert_eq!(cache.len(), 1);
    assert!(cache.contains("new"));
}

// ============================================================================
// Facet Cache
// ============================================================================

fn summary() -> FacetSummary {
    let mut summary = FacetSummary::new();
    summary.insert(
        "brand".into(),
        vec![FacetValue {
            value: "Acme".into(),
            count: 3,
        }],
    );
    summary
}

#[tokio::test(start_paused = true)]
async fn test_facet_cache_serves_stale_and_refreshes_once() {
    let config = FacetCacheConfig::default();
    let facets = FacetCache::new(&config, Duration::from_secs(30));
    let context = normalize(&[("category", "Electronics")]).facet_context();
    let fetches = Arc::new(AtomicUsize::new(0));

    let fetch = |fetches: Arc<AtomicUsize>| {
        move || async move {
            fetches.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<_, CatalogError>(summary())
        }
    };

    assert!(facets.get(&context, fetch(fetches.clone())).await.is_some());
    assert_eq!(fetches.load(Ordering::SeqCst), 1);

    tokio::time::advance(config.ttl + Duration::from_secs(1)).await;
    // Two stale reads back to back share one refresh.
    assert!(facets.get(&context, fetch(fetches.clone())).await.is_some());
    assert!(facets.get(&context, fetch(fetches.clone())).await.is_some());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(fetches.load(Ordering::SeqCst), 2);
    assert_eq!(facets.pending(), 0);
}
