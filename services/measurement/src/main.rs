use anyhow::{Context, Result};
use measurement_service::api::{start_api_server, AppState};
use measurement_service::{
    Config, LocalBlobStore, MeasurementService, MemoryRecordStore, PgRecordStore, RecordStore,
    StoreBackend,
};
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting Measurement Service"
    );

    // Initialize metrics
    if config.service.metrics_port != 0 {
        init_metrics(config.service.metrics_port)?;
    }

    // Initialize components
    let blob_store = Arc::new(
        LocalBlobStore::new(&config.media).context("Failed to resolve content root")?,
    );
    blob_store
        .initialize()
        .await
        .context("Failed to initialize blob store")?;

    let record_store = init_record_store(&config).await?;

    let service = Arc::new(MeasurementService::new(blob_store, record_store));
    let api_state = AppState { service };

    start_api_server(api_state, &config, shutdown_signal()).await?;

    info!("Measurement service stopped");

    Ok(())
}

/// Connect the configured record store backend
async fn init_record_store(config: &Config) -> Result<Arc<dyn RecordStore>> {
    match config.database.backend {
        StoreBackend::Postgres => {
            let store = PgRecordStore::new(&config.database)
                .await
                .context("Failed to initialize record store")?;

            // Run migrations if enabled
            if config.database.run_migrations {
                store
                    .run_migrations()
                    .await
                    .context("Failed to run database migrations")?;
            }

            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            warn!("Using in-memory record store, records will not survive a restart");
            Ok(Arc::new(MemoryRecordStore::new()))
        }
    }
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }

    info!("Shutting down measurement service");
}
