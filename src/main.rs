//! Step Rewriter
//!
//! Periodically reconciles step records from the change feed and serves a
//! small HTTP API for on-demand cycles and device settings.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use step_rewriter::config::Config;
use step_rewriter::db;
use step_rewriter::feed::SqliteChangeFeed;
use step_rewriter::log_sink::FileLogSink;
use step_rewriter::prefs::SqlitePreferences;
use step_rewriter::reconcile::{ReconciliationEngine, SourceRouter};
use step_rewriter::routes;
use step_rewriter::scheduler::CycleRunner;
use step_rewriter::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "step_rewriter=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();

    let config = Config::from_env().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config from env: {}, using defaults", e);
        Config::default()
    });

    tracing::info!("Starting Step Rewriter v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Re-tag source: {}", config.sync.retag_source);
    tracing::info!("Cumulative source: {}", config.sync.cumulative_source);

    // Initialize database
    let db_pool = db::create_pool(&config.database.url)
        .await
        .context("Failed to initialize database")?;
    tracing::info!("Database initialized at {}", config.database.url);

    let feed = Arc::new(SqliteChangeFeed::new(db_pool.clone(), config.sync.batch_size));
    let prefs = Arc::new(SqlitePreferences::new(db_pool.clone()));
    let sink = Arc::new(FileLogSink::new(config.activity_log.path.clone()));
    tracing::info!("Activity log at {}", sink.path().display());

    let engine = ReconciliationEngine::new(
        feed,
        prefs.clone(),
        sink,
        SourceRouter::from_config(&config.sync),
    );
    let runner = Arc::new(CycleRunner::new(Arc::new(engine)));

    // Periodic sync, stopped after the server drains
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let periodic = runner
        .clone()
        .start_periodic(config.sync.interval(), shutdown_rx);
    tracing::info!("Periodic sync every {}s", config.sync.interval().as_secs());

    let app_state = AppState::new(config.clone(), Some(db_pool), runner, prefs);

    // Build CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = routes::router(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Start server with graceful shutdown
    let host: std::net::IpAddr = config
        .server
        .host
        .parse()
        .with_context(|| format!("Invalid SERVER_HOST: {}", config.server.host))?;
    let addr = SocketAddr::from((host, config.server.port));
    tracing::info!("Step Rewriter listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    let _ = shutdown_tx.send(true);
    if let Err(e) = periodic.await {
        tracing::warn!("Periodic sync task ended abnormally: {}", e);
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
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
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
