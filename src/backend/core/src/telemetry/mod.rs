//! Telemetry: structured logging and Prometheus metrics.
//!
//! ```rust,no_run
//! use catalog_core::telemetry::{init_telemetry, TelemetryConfig};
//!
//! let handle = init_telemetry(&TelemetryConfig::default()).expect("telemetry");
//! println!("{}", handle.metrics.render());
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogFormat, LoggingConfig};
pub use metrics::{init_metrics, MetricsConfig, MetricsRegistry};

use serde::Deserialize;

/// Unified telemetry configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    /// Service name attached to metrics and startup logs
    #[serde(default = "default_service_name")]
    pub service_name: String,

    #[serde(default = "default_service_version")]
    pub service_version: String,

    /// Environment (development, staging, production)
    #[serde(default = "default_environment")]
    pub environment: String,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            service_version: default_service_version(),
            environment: default_environment(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

fn default_service_name() -> String {
    "catalog-core".to_string()
}

fn default_service_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_environment() -> String {
    std::env::var("CATALOG_ENVIRONMENT").unwrap_or_else(|_| "development".to_string())
}

/// Initialize metrics, then logging. Call once at startup.
pub fn init_telemetry(config: &TelemetryConfig) -> anyhow::Result<TelemetryHandle> {
    let metrics = init_metrics(&config.metrics, &config.service_name)?;
    init_logging(&config.logging, &config.environment)?;

    ::tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = %config.environment,
        "Telemetry initialized"
    );

    Ok(TelemetryHandle { metrics })
}

/// Handle for the telemetry lifecycle.
pub struct TelemetryHandle {
    pub metrics: MetricsRegistry,
}

impl TelemetryHandle {
    pub fn shutdown(self) {
        ::tracing::info!("Telemetry shutdown complete");
    }
}
