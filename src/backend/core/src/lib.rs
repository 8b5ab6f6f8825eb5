#![allow(clippy::result_large_err)]
//! # Catalog Core
//!
//! Query caching and routing layer of the product catalog.
//!
//! ## Architecture
//!
//! - **Query**: parameter validation and normalization
//! - **Cache**: deterministic keys, TTL cache with stale-while-revalidate,
//!   single-flight request coalescing and the facet cache
//! - **Routing**: capability-driven choice between the primary store and the
//!   search index
//! - **Orchestrator**: the query façade, with retries, deadlines and circuit
//!   breaking around backend calls
//! - **Backend**: backend contracts and an in-memory reference catalog
//! - **API**: axum HTTP surface
//! - **Telemetry**: structured logging and Prometheus metrics

pub mod api;
pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod query;
pub mod routing;
pub mod telemetry;

pub use error::{CatalogError, ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::backend::{
        BackendKind, FacetSummary, InMemoryCatalog, PrimaryStore, Product, SearchIndex,
    };
    pub use crate::cache::{CacheKeyBuilder, FacetCache, InFlightRegistry, Lookup, TtlCache};
    pub use crate::config::Config;
    pub use crate::error::{CatalogError, ErrorCode, ErrorContext, Result};
    pub use crate::orchestrator::{
        CatalogResponse, QueryOrchestrator, QueryResult, ResponseSource, RetryingExecutor,
    };
    pub use crate::query::{NormalizedQuery, QuickFilter, RawQueryParams, SortOption};
    pub use crate::routing::{BackendRouter, RouteDecision, RouteReason};
}
