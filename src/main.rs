use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use std::time::Duration;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use scriptframe_gen::app_state::AppState;
use scriptframe_gen::config::{AppConfig, EnvSource};
use scriptframe_gen::routes;
use scriptframe_gen::services::registry::Providers;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment (and .env)
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing scriptframe-gen server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    routes::metrics::describe_metrics();

    // Construct every provider up front so misconfiguration shows in the
    // startup log rather than on the first request.
    let providers = Providers::new(Arc::new(EnvSource));
    let storage = providers.storage();
    let audio = providers.audio();
    let images = providers.images();
    tracing::info!(
        storage = storage.name(),
        storage_external = storage.externally_reachable(),
        audio = audio.name(),
        image = images.name(),
        poll_interval_ms = config.poll_interval_ms,
        max_polls = config.max_polls,
        "Providers ready"
    );

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.source_fetch_timeout_secs))
        .build()
        .expect("Failed to build HTTP client");
    let state = AppState::new(providers, http, config.public_dir.clone());

    let app = routes::api_router(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(config.max_body_bytes));

    tracing::info!("Starting scriptframe-gen on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}
