//! Structured logging for the catalog server.
//!
//! JSON lines in production, pretty output in development. Per-module levels
//! let one subsystem (say `catalog_core::cache`) run at `debug` on its own.

use serde::Deserialize;
use std::collections::HashMap;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Logging configuration (`observability.logging`).
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Global log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,

    /// Per-module log levels, e.g. `catalog_core::cache = "debug"`
    #[serde(default)]
    pub module_levels: HashMap<String, String>,

    /// Emit a close event, with its duration, for every finished span
    #[serde(default)]
    pub log_spans: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            module_levels: HashMap::new(),
            log_spans: false,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
    Compact,
}

fn default_log_level() -> String {
    std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string())
}

fn span_events(config: &LoggingConfig) -> FmtSpan {
    if config.log_spans {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    }
}

/// Build the level filter from the global level and per-module overrides.
pub fn build_filter(config: &LoggingConfig) -> anyhow::Result<EnvFilter> {
    let mut filter = EnvFilter::try_new(&config.level)?;
    for (module, level) in &config.module_levels {
        let directive = format!("{}={}", module, level);
        filter = filter.add_directive(directive.parse()?);
    }
    Ok(filter)
}

/// The format actually used: development swaps the JSON default for pretty.
fn effective_format<'a>(config: &'a LoggingConfig, environment: &str) -> &'a LogFormat {
    if environment == "development" && config.format == LogFormat::Json {
        &LogFormat::Pretty
    } else {
        &config.format
    }
}

/// Install the global subscriber.
pub fn init_logging(config: &LoggingConfig, environment: &str) -> anyhow::Result<()> {
    let filter = build_filter(config)?;

    let base = fmt::layer().with_span_events(span_events(config));
    let layer = match effective_format(config, environment) {
        LogFormat::Json => base.json().flatten_event(true).boxed(),
        LogFormat::Pretty => base.pretty().boxed(),
        LogFormat::Compact => base.compact().boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()?;

    Ok(())
}
