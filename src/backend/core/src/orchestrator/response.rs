//! Result and response payloads.

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::backend::{BackendKind, Product};
use crate::cache::Facets;
use crate::error::{CatalogError, ErrorInfo};

/// A computed listing page as stored in the result cache.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub items: Vec<Product>,
    pub has_more: bool,
    pub page: u32,
    /// Total matches, when the backend reports it
    pub total: Option<u64>,
    /// Continuation for the next primary-store page
    pub cursor: Option<String>,
    pub facets: Option<Facets>,
    pub backend: BackendKind,
}

/// How a response was produced. Diagnostic only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseSource {
    /// Fresh cache hit
    Cache,
    /// Stale cache entry, refresh scheduled or compute failed
    Stale,
    /// Joined another caller's computation
    Dedupe,
    /// Computed for this request
    Fresh,
}

impl ResponseSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Stale => "stale",
            Self::Dedupe => "dedupe",
            Self::Fresh => "fresh",
        }
    }
}

/// Response returned to callers of the orchestrator.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogResponse {
    pub items: Vec<Product>,
    pub has_more: bool,
    pub page: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub facets: Option<Facets>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<BackendKind>,
    pub source: ResponseSource,
    pub timing_ms: u64,
    /// Served from stale data after a failure
    pub degraded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl CatalogResponse {
    pub fn from_result(result: &QueryResult, source: ResponseSource, started: Instant) -> Self {
        Self {
            items: result.items.clone(),
            has_more: result.has_more,
            page: result.page,
            total: result.total,
            cursor: result.cursor.clone(),
            facets: result.facets.clone(),
            backend: Some(result.backend),
            source,
            timing_ms: elapsed_ms(started),
            degraded: false,
            error: None,
        }
    }

    /// Stale data standing in for a failed computation.
    pub fn degraded(result: &QueryResult, error: &CatalogError, started: Instant) -> Self {
        Self {
            degraded: true,
            error: Some(ErrorInfo::from(error)),
            ..Self::from_result(result, ResponseSource::Stale, started)
        }
    }

    /// Error payload: no items, no continuation.
    pub fn failure(error: &CatalogError, page: u32, started: Instant) -> Self {
        Self {
            items: Vec::new(),
            has_more: false,
            page,
            total: None,
            cursor: None,
            facets: None,
            backend: None,
            source: ResponseSource::Fresh,
            timing_ms: elapsed_ms(started),
            degraded: false,
            error: Some(ErrorInfo::from(error)),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some() && !self.degraded
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
