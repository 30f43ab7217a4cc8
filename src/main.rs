//! Roadpulse - Traffic CCTV Occupancy Analysis Server
//!
//! Main entry point.

use roadpulse::{
    batch_orchestrator::BatchOrchestrator,
    capture_manager::{CaptureManager, FfmpegOpener},
    channel_registry::ChannelRegistry,
    inference_client::{InferenceClient, VehicleDetector},
    publish_pipeline::PublishPipeline,
    result_store::ResultStore,
    roi_store::RoiStore,
    state::{AppConfig, AppState},
    web_api,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "roadpulse=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting roadpulse v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    tracing::info!(
        inference_url = %config.inference_url,
        mask_dir = %config.mask_dir.display(),
        frame_skip = config.frame_skip,
        worker_count = config.worker_count,
        threshold_profile = %config.threshold_profile,
        "Configuration loaded"
    );

    match FfmpegOpener::check_ffmpeg().await {
        Ok(version) => tracing::info!(version = %version, "ffmpeg available"),
        Err(e) => tracing::warn!(error = %e, "ffmpeg check failed, captures will not open"),
    }

    // Initialize components
    let roi_store = Arc::new(RoiStore::load(&config.mask_dir)?);
    let registry = Arc::new(ChannelRegistry::new(config.policy()));
    let capture = Arc::new(CaptureManager::new(
        Arc::new(FfmpegOpener::default()),
        config.frame_skip,
        config.frame_timeout(),
    ));
    let detector: Arc<dyn VehicleDetector> =
        Arc::new(InferenceClient::new(config.inference_url.clone()));
    let store = Arc::new(ResultStore::new());
    let publisher = Arc::new(PublishPipeline::start(
        store.clone(),
        config.render(),
        config.worker_count,
    ));

    let orchestrator = Arc::new(BatchOrchestrator::new(
        registry.clone(),
        capture.clone(),
        detector.clone(),
        roi_store,
        publisher.clone(),
        config.inference_params(),
        config.profile(),
        config.empty_backoff(),
    ));

    let state = AppState {
        config,
        registry,
        capture,
        detector,
        store,
        publisher,
        orchestrator: orchestrator.clone(),
    };

    let app = web_api::create_router(state.clone())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    // Start the analysis cycle loop
    orchestrator.start().await;
    tracing::info!("BatchOrchestrator started");

    // Start server
    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop the pipeline before exiting
    orchestrator.stop().await;
    state.publisher.shutdown().await;
    state.capture.release_all().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => tracing::error!(error = %e, "Failed to install SIGTERM handler"),
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
