//! Query orchestrator: the catalog query façade.
//!
//! ```text
//!   raw params ─▶ normalize ─▶ results cache ─┬─ fresh ──────────────▶ respond (cache)
//!                                             ├─ stale ─▶ refresh ───▶ respond (stale)
//!                                             └─ miss ──▶ in-flight ─┬─ join ─▶ respond (dedupe)
//!                                                                    └─ lead ─▶ route ─▶ execute ─▶ store ─▶ respond (fresh)
//! ```
//!
//! Every computation, whether triggered by a miss or by a stale hit, goes
//! through the same in-flight registry, so a key is never computed twice at
//! once. Failures are absorbed here: callers always get a [`CatalogResponse`].

pub mod circuit_breaker;
pub mod cursor;
pub mod response;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerMetrics, CircuitState};
pub use cursor::{KnownPage, PageCursor, PageTokenIndex};
pub use response::{CatalogResponse, QueryResult, ResponseSource};
pub use retry::{backoff_delay, ExecutorConfig, RetryingExecutor};

use metrics::{counter, histogram};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::backend::{BackendKind, PrimaryQuery, PrimaryStore, SearchIndex, SearchRequest};
use crate::cache::{
    CacheKeyBuilder, CacheStats, FacetCache, InFlightRegistry, FlightRole, Lookup, TtlCache,
};
use crate::config::Config;
use crate::error::{CatalogError, ErrorCode, Result};
use crate::query::{NormalizedQuery, RawQueryParams};
use crate::routing::{BackendPlan, BackendRouter};

/// Snapshot of the orchestrator's caches and breakers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorStats {
    pub results: CacheStats,
    pub facets: CacheStats,
    pub in_flight: usize,
    pub facet_fetches_in_flight: usize,
    pub page_token_listings: usize,
    pub breakers: Vec<CircuitBreakerMetrics>,
}

/// Answers catalog queries from cache or backends. Cheap to clone.
#[derive(Clone)]
pub struct QueryOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    results: TtlCache<Arc<QueryResult>>,
    inflight: InFlightRegistry<Arc<QueryResult>>,
    facets: FacetCache,
    router: BackendRouter,
    executor: RetryingExecutor,
    page_tokens: PageTokenIndex,
    primary: Arc<dyn PrimaryStore>,
    search: Arc<dyn SearchIndex>,
    request_timeout: Duration,
    shutdown: CancellationToken,
}

impl QueryOrchestrator {
    pub fn new(
        config: &Config,
        primary: Arc<dyn PrimaryStore>,
        search: Arc<dyn SearchIndex>,
    ) -> Self {
        let inner = Inner {
            results: TtlCache::new("results", config.cache.clone()),
            inflight: InFlightRegistry::new(
                "results",
                config.inflight.max_entries,
                config.inflight.max_age,
            ),
            facets: FacetCache::new(&config.facets, config.inflight.max_age),
            router: BackendRouter::new(config.router.clone()),
            executor: RetryingExecutor::new(config.executor.clone()),
            page_tokens: PageTokenIndex::new(config.router.page_token_listings),
            primary,
            search,
            request_timeout: config.server.request_timeout,
            shutdown: CancellationToken::new(),
        };

        info!(
            ttl_ms = config.cache.ttl.as_millis() as u64,
            stale_ceiling_ms = config.cache.stale_ceiling.as_millis() as u64,
            capacity = config.cache.capacity,
            request_timeout_ms = config.server.request_timeout.as_millis() as u64,
            "Query orchestrator created"
        );

        Self {
            inner: Arc::new(inner),
        }
    }

    /// Validate raw parameters and answer the query. Invalid parameters are
    /// rejected before any cache is consulted.
    pub async fn query_catalog(&self, raw: &RawQueryParams) -> CatalogResponse {
        let started = Instant::now();
        match NormalizedQuery::from_raw(raw) {
            Ok(query) => self.query(query).await,
            Err(e) => {
                debug!(error = %e, "Rejected catalog query");
                let response = CatalogResponse::failure(&e, 0, started);
                record_request(&response, started);
                response
            }
        }
    }

    /// Answer an already normalized query.
    #[instrument(skip_all, fields(page = query.page, sort = query.sort.as_str()))]
    pub async fn query(&self, query: NormalizedQuery) -> CatalogResponse {
        let started = Instant::now();
        let key = CacheKeyBuilder::build(&query);
        let query = Arc::new(query);

        let response = match self.inner.results.get(&key) {
            Lookup::Fresh(result) => {
                CatalogResponse::from_result(&result, ResponseSource::Cache, started)
            }
            Lookup::Stale(result) => {
                self.schedule_refresh(&key, &query);
                CatalogResponse::from_result(&result, ResponseSource::Stale, started)
            }
            Lookup::Miss => self.compute(&key, &query, started).await,
        };

        record_request(&response, started);
        response
    }

    /// Start a background recomputation unless one is already running.
    fn schedule_refresh(&self, key: &str, query: &Arc<NormalizedQuery>) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        let owned_key = key.to_string();
        let query = Arc::clone(query);
        match self
            .inner
            .inflight
            .get_or_create(key, move || Inner::compute_and_store(inner, owned_key, query))
        {
            Ok((_, FlightRole::Leader)) => debug!(key = %key, "Scheduled stale refresh"),
            Ok((_, FlightRole::Follower)) => {}
            Err(e) => debug!(key = %key, error = %e, "Stale refresh not scheduled"),
        }
    }

    async fn compute(
        &self,
        key: &str,
        query: &Arc<NormalizedQuery>,
        started: Instant,
    ) -> CatalogResponse {
        let inner = Arc::clone(&self.inner);
        let owned_key = key.to_string();
        let owned_query = Arc::clone(query);
        let flight = self.inner.inflight.get_or_create(key, move || {
            Inner::compute_and_store(inner, owned_key, owned_query)
        });

        let outcome = match flight {
            Ok((computation, role)) => {
                let source = match role {
                    FlightRole::Leader => ResponseSource::Fresh,
                    FlightRole::Follower => ResponseSource::Dedupe,
                };
                self.wait(computation).await.map(|result| (result, source))
            }
            Err(e) if e.code() == ErrorCode::CapacityExceeded => {
                warn!(key = %key, "In-flight registry full, executing without cache");
                let inner = Arc::clone(&self.inner);
                let query = Arc::clone(query);
                self.wait(async move { Inner::execute(&inner, &query).await.map(Arc::new) })
                    .await
                    .map(|result| (result, ResponseSource::Fresh))
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok((result, source)) => CatalogResponse::from_result(&result, source, started),
            Err(e) => self.fallback(key, query.page, e, started),
        }
    }

    /// Wait for a result under the request deadline. Giving up does not
    /// cancel a shared computation.
    async fn wait<F>(&self, fut: F) -> Result<Arc<QueryResult>>
    where
        F: std::future::Future<Output = Result<Arc<QueryResult>>>,
    {
        match tokio::time::timeout(self.inner.request_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(CatalogError::timeout(
                "catalog query",
                self.inner.request_timeout,
            )),
        }
    }

    /// Serve stale data when there is any, otherwise an error payload.
    fn fallback(
        &self,
        key: &str,
        page: u32,
        error: CatalogError,
        started: Instant,
    ) -> CatalogResponse {
        match self.inner.results.peek_stale(key) {
            Some(result) => {
                warn!(
                    key = %key,
                    error_code = %error.code(),
                    error = %error,
                    "Serving stale result after failed computation"
                );
                CatalogResponse::degraded(&result, &error, started)
            }
            None => {
                error.log();
                CatalogResponse::failure(&error, page, started)
            }
        }
    }

    /// Drop every cached result, facet summary, page token and pending entry.
    pub fn clear_cache(&self) {
        self.inner.results.clear();
        self.inner.inflight.clear();
        self.inner.facets.clear();
        self.inner.page_tokens.clear();
        info!("Catalog caches cleared");
    }

    pub fn stats(&self) -> OrchestratorStats {
        OrchestratorStats {
            results: self.inner.results.stats(),
            facets: self.inner.facets.stats(),
            in_flight: self.inner.inflight.len(),
            facet_fetches_in_flight: self.inner.facets.pending(),
            page_token_listings: self.inner.page_tokens.len(),
            breakers: self.inner.executor.breaker_metrics(),
        }
    }

    pub fn router(&self) -> &BackendRouter {
        &self.inner.router
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Stop scheduling refreshes, give pending computations up to `grace` to
    /// settle, then abort the rest.
    pub async fn shutdown(&self, grace: Duration) {
        self.inner.shutdown.cancel();

        let deadline = Instant::now() + grace;
        while !self.inner.inflight.is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let aborted = self.inner.inflight.abort_all() + self.inner.facets.shutdown();
        info!(aborted = aborted, "Query orchestrator shut down");
    }
}

impl Inner {
    async fn compute_and_store(
        inner: Arc<Inner>,
        key: String,
        query: Arc<NormalizedQuery>,
    ) -> Result<Arc<QueryResult>> {
        let result = Arc::new(Inner::execute(&inner, &query).await?);
        inner.results.set(key, Arc::clone(&result));
        Ok(result)
    }

    /// Route and run the listing; on page 0 fetch facets alongside it.
    async fn execute(this: &Arc<Inner>, query: &NormalizedQuery) -> Result<QueryResult> {
        if query.page != 0 {
            return this.fetch_listing(query).await;
        }

        let context = query.facet_context();
        let owned_context = context.clone();
        let inner = Arc::clone(this);
        let facets = this.facets.get(&context, move || async move {
            inner
                .executor
                .execute(BackendKind::SearchIndex, "fetch_facets", || {
                    inner.search.fetch_facets(&owned_context)
                })
                .await
        });

        let (listing, facets) = tokio::join!(this.fetch_listing(query), facets);
        let mut result = listing?;
        result.facets = facets;
        Ok(result)
    }

    async fn fetch_listing(&self, query: &NormalizedQuery) -> Result<QueryResult> {
        let (decision, plan) = self.router.plan(query);
        debug!(
            backend = %decision.backend,
            reason = decision.reason.as_str(),
            "Routed catalog query"
        );

        match plan {
            BackendPlan::Primary(request) => match self.fetch_primary(query, request).await? {
                Some(result) => Ok(result),
                None => {
                    counter!("catalog_page_walk_fallbacks_total").increment(1);
                    debug!(page = query.page, "Page too far from a known token, using search index");
                    self.fetch_search(self.router.search_request(query)).await
                }
            },
            BackendPlan::Search(request) => self.fetch_search(request).await,
        }
    }

    /// Fetch `query.page` from the primary store, walking forward from the
    /// nearest page whose token is known. `None` when the walk would exceed
    /// the configured bound.
    async fn fetch_primary(
        &self,
        query: &NormalizedQuery,
        mut request: PrimaryQuery,
    ) -> Result<Option<QueryResult>> {
        let listing = CacheKeyBuilder::listing(query);
        let known = self.page_tokens.nearest_known(&listing, query.page);
        if query.page - known.page > self.router.config().max_page_walk {
            return Ok(None);
        }

        request.page_token = known.token;
        let mut page = known.page;
        loop {
            let fetched = self
                .executor
                .execute(BackendKind::PrimaryStore, "query", || {
                    self.primary.query(&request)
                })
                .await?;

            if let Some(token) = &fetched.next_page_token {
                self.page_tokens.record(&listing, page + 1, token.clone());
            }

            if page == query.page {
                let cursor = fetched
                    .next_page_token
                    .as_ref()
                    .map(|token| {
                        PageCursor {
                            page: page + 1,
                            token: token.clone(),
                        }
                        .encode()
                    })
                    .transpose()?;
                return Ok(Some(QueryResult {
                    items: fetched.items,
                    has_more: fetched.next_page_token.is_some(),
                    page,
                    total: None,
                    cursor,
                    facets: None,
                    backend: BackendKind::PrimaryStore,
                }));
            }

            match fetched.next_page_token {
                Some(token) => {
                    request.page_token = Some(token);
                    page += 1;
                }
                // The listing ends before the requested page.
                None => {
                    return Ok(Some(QueryResult {
                        items: Vec::new(),
                        has_more: false,
                        page: query.page,
                        total: None,
                        cursor: None,
                        facets: None,
                        backend: BackendKind::PrimaryStore,
                    }))
                }
            }
        }
    }

    async fn fetch_search(&self, request: SearchRequest) -> Result<QueryResult> {
        let found = self
            .executor
            .execute(BackendKind::SearchIndex, "search", || {
                self.search.search(&request)
            })
            .await?;

        Ok(QueryResult {
            has_more: found.page.saturating_add(1) < found.total_pages,
            page: request.page,
            total: Some(found.total_hits),
            items: found.hits,
            cursor: None,
            facets: None,
            backend: BackendKind::SearchIndex,
        })
    }
}

fn record_request(response: &CatalogResponse, started: Instant) {
    let outcome = if response.is_error() {
        "error"
    } else if response.degraded {
        "degraded"
    } else {
        "ok"
    };
    counter!(
        "catalog_requests_total",
        "source" => response.source.as_str(),
        "outcome" => outcome,
    )
    .increment(1);
    histogram!("catalog_request_duration_seconds").record(started.elapsed().as_secs_f64());
}
