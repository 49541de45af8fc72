use std::net::SocketAddr;
use std::sync::Arc;

use relay_cloud::{BlobPublisher, S3Publisher};
use relay_comfyui::api::ComfyUIApi;
use relay_events::{JobReporter, MemoryStateStore, RedisStateStore, StateStore, WebhookDelivery};
use relay_pipeline::JobRunner;
use relay_worker::config::{LogFormat, WorkerConfig};
use relay_worker::state::AppState;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Configuration ---
    let config = WorkerConfig::from_env().expect("Invalid worker configuration");

    // --- Tracing ---
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "relay_worker=debug,relay_pipeline=debug,relay_comfyui=info,tower_http=info".into()
    });
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }

    tracing::info!(
        host = %config.host,
        port = config.port,
        comfy_url = %config.comfy_url(),
        enable_flux = config.enable_flux,
        "Loaded worker configuration",
    );

    // --- State store ---
    let store: Arc<dyn StateStore> = match &config.redis_url {
        Some(url) => {
            tracing::info!("Using Redis state store");
            Arc::new(RedisStateStore::open(url).expect("Invalid REDIS_URL"))
        }
        None => {
            tracing::warn!("REDIS_URL not set, job state is kept in memory");
            Arc::new(MemoryStateStore::new())
        }
    };

    // --- Image publisher ---
    let publisher: Option<Arc<dyn BlobPublisher>> = match config.bucket.clone() {
        Some(bucket) => Some(Arc::new(S3Publisher::new(bucket).await)),
        None => {
            tracing::info!("No bucket configured, images are returned as base64");
            None
        }
    };

    // --- Runner ---
    let runner = JobRunner::new(
        ComfyUIApi::new(config.comfy_url()),
        JobReporter::new(store, WebhookDelivery::new()),
        publisher,
        config.runner_settings(),
    );

    let shutdown = CancellationToken::new();
    let app = relay_worker::build_app_router(AppState::new(runner, shutdown.clone()));

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting worker");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .expect("Server error");

    tracing::info!("Worker stopped");
}

/// Wait for SIGINT or SIGTERM, then cancel in-flight jobs.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received, cancelling in-flight jobs");
    shutdown.cancel();
}
