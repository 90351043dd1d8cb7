use accident_risk::{
    api::{build_router_with_limit, AppState},
    config::Config,
    ingestion::IngestionPipeline,
    ml::RiskModelService,
    state::create_store,
    storage::create_storage,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {}", e);
        eprintln!("Using default configuration");
        Config::default()
    });

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "accident_risk={},tower_http=info",
            config.observability.log_level
        )
        .into()
    });
    let registry = tracing_subscriber::registry().with(filter);
    if config.observability.json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!("Starting Accident Risk v{}", env!("CARGO_PKG_VERSION"));

    // Initialize Prometheus metrics
    if config.observability.prometheus_enabled {
        if let Err(e) = accident_risk::metrics::init_metrics() {
            tracing::warn!("Failed to initialize metrics: {}", e);
            tracing::warn!("Continuing without metrics");
        } else {
            tracing::info!("✅ Prometheus metrics initialized");
        }
    } else {
        tracing::info!("⚠️  Prometheus metrics disabled in configuration");
    }

    // Record store
    tracing::info!("Record store backend: {:?}", config.store.backend);
    let store = create_store(&config.store).await?;
    tracing::info!("✅ Record store initialized");

    // Artifact storage
    let storage = create_storage(&config.artifacts)?;
    tracing::info!(
        "✅ Artifact storage initialized ({})",
        storage.backend_name()
    );

    // Model service
    let service = Arc::new(RiskModelService::new(
        config.pipeline.clone(),
        &config.artifacts,
        store.clone(),
        storage,
    ));
    if let Err(e) = service.warm_up().await {
        tracing::warn!("⚠️  Model warm-up failed: {}", e);
        tracing::warn!("   Predictions will retry loading on demand");
    }

    let ingestion = Arc::new(
        IngestionPipeline::new(config.pipeline.clone(), store.clone()).with_service(service.clone()),
    );

    let state = AppState::new(service, ingestion, store);
    let app = build_router_with_limit(state, config.server.max_upload_bytes).layer(
        TimeoutLayer::new(Duration::from_secs(config.server.request_timeout_secs)),
    );

    // Start HTTP server
    let http_addr = format!("{}:{}", config.server.host, config.server.http_port);
    let http_listener = tokio::net::TcpListener::bind(&http_addr).await?;

    tracing::info!("🚀 HTTP API server listening on http://{}", http_addr);
    tracing::info!("   Health: http://{}/health", http_addr);
    tracing::info!("   Metrics: http://{}/metrics", http_addr);
    tracing::info!("Press Ctrl+C to shutdown");

    axum::serve(http_listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down gracefully...");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    tracing::info!("Shutdown signal received");
}
