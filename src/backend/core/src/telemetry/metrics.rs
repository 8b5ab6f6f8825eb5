//! Prometheus metrics.
//!
//! Metrics are emitted through the `metrics` facade at the call sites (cache,
//! coalescing, routing, backend executor). This module installs the Prometheus
//! recorder, registers descriptions and renders the text exposition for
//! `/metrics`.

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Deserialize;
use std::collections::HashMap;

/// Metrics configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Whether metrics collection is enabled
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,

    /// Histogram buckets for durations (in seconds)
    #[serde(default = "default_duration_buckets")]
    pub duration_buckets: Vec<f64>,

    /// Global labels to add to all metrics
    #[serde(default)]
    pub global_labels: HashMap<String, String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            duration_buckets: default_duration_buckets(),
            global_labels: HashMap::new(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_duration_buckets() -> Vec<f64> {
    vec![
        0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
    ]
}

/// Handle onto the installed recorder.
#[derive(Clone, Default)]
pub struct MetricsRegistry {
    prometheus_handle: Option<PrometheusHandle>,
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("prometheus_handle", &self.prometheus_handle.is_some())
            .finish()
    }
}

impl MetricsRegistry {
    /// A registry with no recorder; renders nothing.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.prometheus_handle.is_some()
    }

    /// Render all metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.prometheus_handle
            .as_ref()
            .map(|h| h.render())
            .unwrap_or_default()
    }
}

/// Install the Prometheus recorder. Only one recorder can be installed per
/// process.
pub fn init_metrics(config: &MetricsConfig, service_name: &str) -> anyhow::Result<MetricsRegistry> {
    if !config.enabled {
        return Ok(MetricsRegistry::disabled());
    }

    let mut builder = PrometheusBuilder::new().add_global_label("service", service_name);
    for (key, value) in &config.global_labels {
        builder = builder.add_global_label(key, value);
    }
    builder = builder.set_buckets(&config.duration_buckets)?;

    let handle = builder.install_recorder()?;
    register_metric_descriptions();

    tracing::info!(service_name = %service_name, "Metrics initialized");

    Ok(MetricsRegistry {
        prometheus_handle: Some(handle),
    })
}

fn register_metric_descriptions() {
    // Requests
    describe_counter!(
        "catalog_requests_total",
        "Catalog queries answered, by response source"
    );
    describe_histogram!(
        "catalog_request_duration_seconds",
        "End-to-end catalog query latency in seconds"
    );

    // Caches
    describe_counter!("catalog_cache_hits_total", "Cache hits by cache and freshness");
    describe_counter!("catalog_cache_misses_total", "Cache misses by cache");
    describe_counter!(
        "catalog_cache_evictions_total",
        "Entries dropped by eviction sweeps"
    );
    describe_gauge!("catalog_cache_entries", "Entries currently cached");

    // Coalescing
    describe_counter!(
        "catalog_inflight_joins_total",
        "Computations started (leader) or joined (follower)"
    );
    describe_counter!(
        "catalog_inflight_rejected_total",
        "Computations refused because the registry was full"
    );
    describe_gauge!("catalog_inflight_entries", "Computations currently pending");

    // Routing
    describe_counter!(
        "catalog_route_decisions_total",
        "Routing decisions by backend and reason"
    );
    describe_counter!(
        "catalog_filter_truncations_total",
        "Value sets truncated to the backend limit"
    );
    describe_counter!(
        "catalog_page_walk_fallbacks_total",
        "Primary-store page walks abandoned for the search index"
    );

    // Backends
    describe_counter!("catalog_backend_calls_total", "Backend calls by outcome");
    describe_counter!("catalog_backend_retries_total", "Backend call retries");
    describe_histogram!(
        "catalog_backend_call_duration_seconds",
        "Backend call latency in seconds, retries included"
    );
    describe_gauge!(
        "catalog_circuit_state",
        "Circuit state per backend (0 closed, 1 half-open, 2 open)"
    );

    describe_counter!("catalog_errors_total", "Errors by code and severity");
}
