//! Configuration management.
//!
//! Settings are layered: an optional file, then `CATALOG__`-prefixed
//! environment variables (`CATALOG__SERVER__PORT=9000`,
//! `CATALOG__CACHE__TTL=90s`). Every section has defaults.

use serde::Deserialize;
use std::time::Duration;

use crate::cache::{FacetCacheConfig, TtlCacheConfig};
use crate::error::{CatalogError, Result};
use crate::orchestrator::ExecutorConfig;
use crate::routing::RouterConfig;
use crate::telemetry::TelemetryConfig;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "CATALOG";

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Listing result cache
    #[serde(default)]
    pub cache: TtlCacheConfig,

    /// Facet cache
    #[serde(default)]
    pub facets: FacetCacheConfig,

    /// Backend retries, deadlines and circuit breaking
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Backend routing
    #[serde(default)]
    pub router: RouterConfig,

    /// Request coalescing
    #[serde(default)]
    pub inflight: InFlightConfig,

    /// Logging and metrics
    #[serde(default)]
    pub observability: TelemetryConfig,

    /// JSON file of products loaded into the in-memory catalog
    #[serde(default)]
    pub seed_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Longest a caller waits for a listing
    #[serde(with = "humantime_serde", default = "default_request_timeout")]
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout: default_request_timeout(),
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InFlightConfig {
    /// Hard limit on concurrent distinct computations
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Age after which a pending computation is considered stuck and replaced
    #[serde(with = "humantime_serde", default = "default_max_age")]
    pub max_age: Duration,
}

impl Default for InFlightConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            max_age: default_max_age(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_request_timeout() -> Duration {
    Duration::from_secs(5)
}
fn default_max_entries() -> usize {
    1024
}
fn default_max_age() -> Duration {
    Duration::from_secs(30)
}

impl Config {
    /// Load configuration from `config/catalog.*` (if present) and the environment.
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/catalog").required(false))
            .add_source(environment())
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Load from a specific file path.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(environment())
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Reject settings the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.cache.validate("cache")?;
        self.facets.ttl_config().validate("facets")?;

        if self.server.request_timeout.is_zero() {
            return Err(CatalogError::configuration(
                "server.request_timeout must be positive",
            ));
        }
        if self.executor.call_timeout.is_zero() {
            return Err(CatalogError::configuration(
                "executor.call_timeout must be positive",
            ));
        }
        if self.inflight.max_entries == 0 || self.facets.max_inflight == 0 {
            return Err(CatalogError::configuration(
                "inflight.max_entries and facets.max_inflight must be positive",
            ));
        }
        if self.router.search_max_in_values == 0 {
            return Err(CatalogError::configuration(
                "router.search_max_in_values must be positive",
            ));
        }
        Ok(())
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
}
