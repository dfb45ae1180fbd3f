use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use storyframe_api::background;
use storyframe_api::config::{BlobConfig, ServerConfig};
use storyframe_api::router::build_app_router;
use storyframe_api::state::AppState;
use storyframe_generation::HttpGenerationClient;
use storyframe_storage::{BlobStore, HttpImageFetcher, LocalBlobStore, S3BlobStore};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| {
                    "storyframe_api=debug,storyframe_pipeline=debug,tower_http=debug".into()
                }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");
    if config.pipeline.callback_url.is_none() {
        tracing::warn!("PUBLIC_BASE_URL not set, generation callbacks disabled");
    }

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = storyframe_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    storyframe_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    tracing::info!("Database health check passed");

    storyframe_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    // --- Blob store ---
    let blobs: Arc<dyn BlobStore> = match &config.blob {
        BlobConfig::S3 {
            bucket_prefix,
            public_base_url,
        } => {
            tracing::info!(%bucket_prefix, "Using S3 blob store");
            Arc::new(S3BlobStore::from_env(bucket_prefix.clone(), public_base_url.clone()).await)
        }
        BlobConfig::Local {
            root,
            public_base_url,
        } => {
            tracing::info!(root = %root.display(), "Using local blob store");
            Arc::new(LocalBlobStore::new(root.clone(), public_base_url.clone()))
        }
    };

    // --- Generation Service ---
    let generator = Arc::new(HttpGenerationClient::new(
        config.generation.api_url.clone(),
        config.generation.api_key.clone(),
    ));
    tracing::info!(api_url = %config.generation.api_url, "Generation client created");

    // --- App state ---
    let state = AppState::new(
        pool,
        config.clone(),
        generator,
        blobs,
        Arc::new(HttpImageFetcher::new()),
    );

    // --- Stuck sweep ---
    let sweep_cancel = tokio_util::sync::CancellationToken::new();
    let sweep_handle = tokio::spawn(background::stuck_sweep::run(
        Arc::clone(&state.recovery),
        Duration::from_secs(config.stuck_sweep_interval_secs),
        sweep_cancel.clone(),
    ));

    // --- Router ---
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    sweep_cancel.cancel();
    let _ = tokio::time::timeout(
        Duration::from_secs(config.shutdown_timeout_secs),
        sweep_handle,
    )
    .await;
    tracing::info!("Stuck sweep stopped");

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
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
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
