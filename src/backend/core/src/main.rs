//! Catalog Server - Main entry point

use std::sync::Arc;
use std::time::Duration;

use catalog_core::{
    api::{self, AppState},
    backend::InMemoryCatalog,
    config::Config,
    orchestrator::QueryOrchestrator,
    telemetry,
};

/// Time pending computations get to settle on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Warning: Could not load config: {}. Using defaults.", e);
        Config::default()
    });
    config.validate()?;

    let telemetry = telemetry::init_telemetry(&config.observability)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Catalog Server"
    );

    let catalog = match &config.seed_path {
        Some(path) => InMemoryCatalog::from_json_file(path)?,
        None => InMemoryCatalog::sample(),
    };
    tracing::info!(products = catalog.len(), "Catalog loaded");
    let catalog = Arc::new(catalog);

    let orchestrator = QueryOrchestrator::new(&config, catalog.clone(), catalog);

    let app = api::build_router(AppState {
        orchestrator: orchestrator.clone(),
        metrics: telemetry.metrics.clone(),
    });

    let addr = config.server.bind_address();
    tracing::info!(address = %addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    orchestrator.shutdown(SHUTDOWN_GRACE).await;
    telemetry.shutdown();
    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
