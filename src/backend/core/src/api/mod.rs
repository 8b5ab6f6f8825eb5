//! HTTP surface for the catalog service.
//!
//! - `GET  /api/v1/products`           listing by category, filters and sort
//! - `GET  /api/v1/search`             free-text search (`q` required)
//! - `GET  /api/v1/admin/cache/stats`  cache, coalescing and breaker statistics
//! - `POST /api/v1/admin/cache/clear`  drop every cache
//! - `GET  /health`, `GET /metrics`

mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::orchestrator::QueryOrchestrator;
use crate::telemetry::MetricsRegistry;

pub use handlers::SOURCE_HEADER;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: QueryOrchestrator,
    pub metrics: MetricsRegistry,
}

/// Build the API router.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::prometheus_metrics))
        .nest("/api/v1", v1_router())
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
        .with_state(state)
}

fn v1_router() -> Router<AppState> {
    Router::new()
        .route("/products", get(handlers::list_products))
        .route("/search", get(handlers::search_products))
        .route("/admin/cache/stats", get(handlers::cache_stats))
        .route("/admin/cache/clear", post(handlers::clear_cache))
}

/// API response wrapper for administrative endpoints.
#[derive(serde::Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
        }
    }
}
