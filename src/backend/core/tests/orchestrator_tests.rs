//! End-to-end tests for the query orchestrator over the in-memory catalog.
//!
//! Tests cover:
//! - Request coalescing (K identical misses -> one backend call)
//! - The Electronics scenario (primary store, search index, cache hit)
//! - Stale hits serving immediately and refreshing exactly once
//! - Error payloads, validation and cache clearing
//! - Capacity bypass and primary-store page walking

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use catalog_core::backend::{
    BackendKind, FacetSummary, InMemoryCatalog, PrimaryPage, PrimaryQuery, PrimaryStore,
    SearchIndex, SearchPage, SearchRequest,
};
use catalog_core::config::Config;
use catalog_core::error::{CatalogError, ErrorCode, Result};
use catalog_core::orchestrator::{CatalogResponse, QueryOrchestrator, ResponseSource};
use catalog_core::query::{FacetContext, RawQueryParams};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// In-memory catalog that counts calls and can be slowed down or broken.
struct CountingBackend {
    catalog: InMemoryCatalog,
    delay: Duration,
    failing: AtomicBool,
    primary_calls: AtomicUsize,
    search_calls: AtomicUsize,
    facet_calls: AtomicUsize,
}

impl CountingBackend {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            catalog: InMemoryCatalog::sample(),
            delay,
            failing: AtomicBool::new(false),
            primary_calls: AtomicUsize::new(0),
            search_calls: AtomicUsize::new(0),
            facet_calls: AtomicUsize::new(0),
        })
    }

    fn primary(&self) -> usize {
        self.primary_calls.load(Ordering::SeqCst)
    }

    fn search(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    async fn pause(&self) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        if self.failing.load(Ordering::SeqCst) {
            return Err(CatalogError::transient_backend("test", "connection reset"));
        }
        Ok(())
    }
}

#[async_trait]
impl PrimaryStore for CountingBackend {
    async fn query(&self, query: &PrimaryQuery) -> Result<PrimaryPage> {
        self.primary_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await?;
        PrimaryStore::query(&self.catalog, query).await
    }
}

#[async_trait]
impl SearchIndex for CountingBackend {
    async fn search(&self, request: &SearchRequest) -> Result<SearchPage> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await?;
        self.catalog.search(request).await
    }

    async fn fetch_facets(&self, context: &FacetContext) -> Result<FacetSummary> {
        self.facet_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await?;
        self.catalog.fetch_facets(context).await
    }
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.executor.base_delay = Duration::from_millis(5);
    config.server.request_timeout = Duration::from_secs(2);
    config.cache.ttl = Duration::from_secs(60);
    config.cache.stale_ceiling = Duration::from_secs(300);
    config
}

fn setup(config: &Config, delay: Duration) -> (QueryOrchestrator, Arc<CountingBackend>) {
    let backend = CountingBackend::new(delay);
    let orchestrator = QueryOrchestrator::new(config, backend.clone(), backend.clone());
    (orchestrator, backend)
}

fn params(pairs: &[(&str, &str)]) -> RawQueryParams {
    RawQueryParams::from_pairs(pairs.iter().copied())
}

async fn ask(orchestrator: &QueryOrchestrator, pairs: &[(&str, &str)]) -> CatalogResponse {
    orchestrator.query_catalog(&params(pairs)).await
}

// ============================================================================
// Coalescing
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_concurrent_identical_misses_share_one_call() {
    let (orchestrator, backend) = setup(&test_config(), Duration::from_millis(100));
    let query = [("q", "headphones")];

    let responses =
        futures::future::join_all((0..20).map(|_| ask(&orchestrator, &query))).await;

    assert_eq!(backend.search(), 1);
    let fresh = responses
        .iter()
        .filter(|r| r.source == ResponseSource::Fresh)
        .count();
    let deduped = responses
        .iter()
        .filter(|r| r.source == ResponseSource::Dedupe)
        .count();
    assert_eq!(fresh, 1);
    assert_eq!(deduped, 19);
    assert!(responses.iter().all(|r| r.items.len() == 12));
}

// ============================================================================
// Electronics Scenario
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_electronics_scenario() {
    let (orchestrator, backend) = setup(&test_config(), Duration::from_millis(10));

    // Plain category browse: primary store.
    let browse = ask(&orchestrator, &[("category", "Electronics")]).await;
    assert_eq!(browse.backend, Some(BackendKind::PrimaryStore));
    assert_eq!(browse.source, ResponseSource::Fresh);
    assert_eq!(browse.items.len(), 24);
    assert!(browse.has_more);
    assert!(browse.cursor.is_some());
    let facets = browse.facets.as_ref().expect("page 0 carries facets");
    assert!(facets.contains_key("brand"));
    assert_eq!(backend.primary(), 1);

    // A brand filter needs the search index.
    let filtered = ask(&orchestrator, &[("category", "Electronics"), ("brands", "Acme")]).await;
    assert_eq!(filtered.backend, Some(BackendKind::SearchIndex));
    assert!(filtered.items.iter().all(|p| p.brand == "Acme"));
    assert_eq!(filtered.total, Some(filtered.items.len() as u64));
    assert_eq!(backend.search(), 1);

    // Repeating the browse is a cache hit.
    let again = ask(&orchestrator, &[("category", "Electronics")]).await;
    assert_eq!(again.source, ResponseSource::Cache);
    assert_eq!(again.items, browse.items);
    assert_eq!(backend.primary(), 1);

    // Facets for the category were fetched once for both listings.
    assert_eq!(backend.facet_calls.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Stale While Revalidate
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_stale_hits_refresh_exactly_once() {
    let (orchestrator, backend) = setup(&test_config(), Duration::from_millis(50));
    let query = [("category", "Clothing"), ("subcategory", "Shoes")];

    ask(&orchestrator, &query).await;
    assert_eq!(backend.primary(), 1);

    tokio::time::advance(Duration::from_secs(61)).await;
    let first = ask(&orchestrator, &query).await;
    let second = ask(&orchestrator, &query).await;
    assert_eq!(first.source, ResponseSource::Stale);
    assert_eq!(second.source, ResponseSource::Stale);
    assert!(!first.degraded);
    // stale hits answer without waiting on the backend
    assert_eq!(backend.primary(), 1);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(backend.primary(), 2);

    let refreshed = ask(&orchestrator, &query).await;
    assert_eq!(refreshed.source, ResponseSource::Cache);
    assert_eq!(backend.primary(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_entry_beyond_ceiling_is_recomputed() {
    let (orchestrator, backend) = setup(&test_config(), Duration::from_millis(10));
    let query = [("category", "Clothing")];

    ask(&orchestrator, &query).await;
    tokio::time::advance(Duration::from_secs(301)).await;

    let response = ask(&orchestrator, &query).await;
    assert_eq!(response.source, ResponseSource::Fresh);
    assert_eq!(backend.primary(), 2);
}

// ============================================================================
// Failures and Validation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_failure_without_stale_entry_is_error_payload() {
    let (orchestrator, backend) = setup(&test_config(), Duration::from_millis(10));
    backend.failing.store(true, Ordering::SeqCst);

    let response = ask(&orchestrator, &[("q", "boots")]).await;

    assert!(response.is_error());
    assert!(response.items.is_empty());
    assert!(!response.has_more);
    assert_eq!(
        response.error.as_ref().map(|e| e.code),
        Some(ErrorCode::TransientBackendError)
    );
    // first attempt plus two retries
    assert_eq!(backend.search(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_stale_entry_survives_failed_refresh() {
    let (orchestrator, backend) = setup(&test_config(), Duration::from_millis(10));
    let query = [("q", "sneakers")];

    let original = ask(&orchestrator, &query).await;
    backend.failing.store(true, Ordering::SeqCst);
    tokio::time::advance(Duration::from_secs(61)).await;

    let stale = ask(&orchestrator, &query).await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    let still_stale = ask(&orchestrator, &query).await;

    assert_eq!(stale.source, ResponseSource::Stale);
    assert_eq!(still_stale.source, ResponseSource::Stale);
    assert_eq!(still_stale.items, original.items);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_params_never_reach_the_cache() {
    let (orchestrator, backend) = setup(&test_config(), Duration::ZERO);

    let response = ask(&orchestrator, &[("category", "Electronics"), ("pageSize", "1000")]).await;

    assert!(response.is_error());
    assert_eq!(
        response.error.as_ref().map(|e| e.code),
        Some(ErrorCode::InvalidRange)
    );
    let stats = orchestrator.stats();
    assert_eq!(stats.results.misses + stats.results.hits, 0);
    assert_eq!(backend.primary() + backend.search(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_clear_cache_forces_recompute() {
    let (orchestrator, backend) = setup(&test_config(), Duration::from_millis(10));
    let query = [("category", "Clothing"), ("gender", "unisex")];

    ask(&orchestrator, &query).await;
    orchestrator.clear_cache();
    let response = ask(&orchestrator, &query).await;

    assert_eq!(response.source, ResponseSource::Fresh);
    assert_eq!(backend.primary(), 2);
    assert_eq!(orchestrator.stats().results.entries, 1);
}

// ============================================================================
// Capacity Bypass
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_full_registry_bypasses_cache() {
    let mut config = test_config();
    config.inflight.max_entries = 1;
    let (orchestrator, backend) = setup(&config, Duration::from_millis(100));

    let slow = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { ask(&orchestrator, &[("q", "boots")]).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    let bypassed = ask(&orchestrator, &[("q", "polos")]).await;
    assert_eq!(bypassed.source, ResponseSource::Fresh);
    assert!(!bypassed.is_error());
    assert!(!bypassed.items.is_empty());

    slow.await.unwrap();

    // The bypassed result was not stored.
    let again = ask(&orchestrator, &[("q", "polos")]).await;
    assert_eq!(again.source, ResponseSource::Fresh);
    assert_eq!(backend.search(), 3);
}

// ============================================================================
// Page Walking
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_primary_pages_walk_and_reuse_tokens() {
    let (orchestrator, backend) = setup(&test_config(), Duration::from_millis(1));
    let page = |n: &'static str| [("category", "Electronics"), ("pageSize", "10"), ("page", n)];

    let third = ask(&orchestrator, &page("2")).await;
    assert_eq!(third.backend, Some(BackendKind::PrimaryStore));
    assert_eq!(third.page, 2);
    assert_eq!(third.items.len(), 10);
    assert!(third.facets.is_none());
    assert_eq!(backend.primary(), 3);

    let cursor = URL_SAFE_NO_PAD.decode(third.cursor.as_deref().unwrap()).unwrap();
    let cursor: serde_json::Value = serde_json::from_slice(&cursor).unwrap();
    assert_eq!(cursor["p"], 3);

    // Page 3's token was recorded while fetching page 2.
    let fourth = ask(&orchestrator, &page("3")).await;
    assert_eq!(fourth.page, 3);
    assert_eq!(backend.primary(), 4);
    assert!(fourth.items.iter().all(|p| !third.items.contains(p)));

    // 72 products in 8 pages: page 9 lies past the end.
    let past_end = ask(&orchestrator, &page("9")).await;
    assert!(past_end.items.is_empty());
    assert!(!past_end.has_more);
    assert!(!past_end.is_error());
}

#[tokio::test(start_paused = true)]
async fn test_distant_page_falls_back_to_search_index() {
    let mut config = test_config();
    config.router.max_page_walk = 3;
    let (orchestrator, backend) = setup(&config, Duration::from_millis(1));

    let response = ask(
        &orchestrator,
        &[("category", "Electronics"), ("pageSize", "10"), ("page", "5")],
    )
    .await;

    assert_eq!(response.backend, Some(BackendKind::SearchIndex));
    assert_eq!(response.items.len(), 10);
    assert_eq!(response.total, Some(72));
    assert_eq!(backend.primary(), 0);
    assert_eq!(backend.search(), 1);
}
