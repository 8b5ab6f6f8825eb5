//! API request handlers.
//!
//! Catalog queries never fail at the HTTP layer: the orchestrator always
//! produces a [`CatalogResponse`]. Error payloads carry the status of their
//! error code; degraded (stale) answers are served as 200.

use axum::{
    extract::{Query, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use super::{ApiResponse, AppState};
use crate::error::{CatalogError, ErrorCode};
use crate::orchestrator::CatalogResponse;
use crate::query::RawQueryParams;

/// Response header naming the path that answered a catalog query.
pub const SOURCE_HEADER: &str = "x-catalog-source";

// ═══════════════════════════════════════════════════════════════════════════════
// Health Check
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let status = if state.orchestrator.is_shutting_down() {
        "shutting_down"
    } else {
        "healthy"
    };
    Json(serde_json::json!({
        "status": status,
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Catalog Queries
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn list_products(
    State(state): State<AppState>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Response {
    let raw = RawQueryParams::from_pairs(pairs);
    catalog_response(state.orchestrator.query_catalog(&raw).await)
}

pub async fn search_products(
    State(state): State<AppState>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Response {
    let raw = RawQueryParams::from_pairs(pairs);
    let has_text = raw.q.as_deref().is_some_and(|q| !q.trim().is_empty());
    if !has_text {
        return CatalogError::invalid_field(
            ErrorCode::ValidationError,
            "q",
            "Search requires a non-empty q parameter",
        )
        .into_response();
    }
    catalog_response(state.orchestrator.query_catalog(&raw).await)
}

fn catalog_response(response: CatalogResponse) -> Response {
    let status = match &response.error {
        Some(error) if !response.degraded => error.code.http_status(),
        _ => StatusCode::OK,
    };
    let source = HeaderValue::from_static(response.source.as_str());

    let mut http = (status, Json(response)).into_response();
    http.headers_mut().insert(SOURCE_HEADER, source);
    http
}

// ═══════════════════════════════════════════════════════════════════════════════
// Administration
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn cache_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.orchestrator.stats()))
}

pub async fn clear_cache(State(state): State<AppState>) -> impl IntoResponse {
    state.orchestrator.clear_cache();
    Json(ApiResponse::success(serde_json::json!({ "cleared": true })))
}

pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.metrics.render(),
    )
}
