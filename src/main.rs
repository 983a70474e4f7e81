//! Zipline server: chunked upload ingestion and assembly.
//!
//! Main entry point that wires all crates together and starts the server.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, fmt};

use zipline_api::AppState;
use zipline_core::config::AppConfig;
use zipline_core::error::AppError;
use zipline_core::traits::UploadNotifier;
use zipline_database::DatabasePool;
use zipline_database::migration::run_migrations;
use zipline_service::{
    AssemblyDispatcher, MetadataRegistrar, PartialUploadService, PasswordHasher, SessionTracker,
    WebhookNotifier,
};
use zipline_storage::ChunkStore;
use zipline_worker::{AssemblyHandler, AssemblyPool, CronScheduler, SessionReaper};

#[tokio::main]
async fn main() {
    let env = std::env::var("ZIPLINE_ENV").unwrap_or_else(|_| "development".to_string());
    let config = match AppConfig::load(&env) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);
    tracing::info!(env = %env, "Configuration loaded");

    if let Err(e) = run(config).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

/// Main server run function
async fn run(config: AppConfig) -> Result<(), AppError> {
    tracing::info!("Starting Zipline v{}", env!("CARGO_PKG_VERSION"));

    // ── Step 1: Database connection + migrations ─────────────────
    let db = DatabasePool::connect(&config.database).await?;
    run_migrations(db.pool()).await?;
    let repos = db.repositories();

    // ── Step 2: Content store and fragment directory ─────────────
    tracing::info!(backend = ?config.storage.backend, "Initializing content store...");
    let storage = zipline_storage::from_config(&config.storage, config.chunks.size_bytes).await?;
    let chunk_store = ChunkStore::new(&config.core.temp_directory).await?;
    tracing::info!(
        temp_directory = %chunk_store.dir().display(),
        "Content store initialized"
    );

    // ── Step 3: Notifications ────────────────────────────────────
    let notifier = WebhookNotifier::new(&config.notifications)?;
    if notifier.is_enabled() {
        tracing::info!("Upload webhook enabled");
    }
    let notifier: Arc<dyn UploadNotifier> = Arc::new(notifier);

    // ── Step 4: Assembly pool ────────────────────────────────────
    let handler = Arc::new(AssemblyHandler::new(
        repos.clone(),
        Arc::clone(&storage),
        chunk_store.clone(),
        notifier,
    ));
    let pool = AssemblyPool::start(handler, &config.worker);

    // ── Step 5: Upload services ──────────────────────────────────
    let tracker = Arc::new(SessionTracker::new(config.files.max_file_size_bytes));
    let password_hasher = Arc::new(PasswordHasher::new());
    let registrar = MetadataRegistrar::new(
        repos.clone(),
        Arc::clone(&storage),
        PasswordHasher::new(),
        config.files.clone(),
    );
    let uploads = Arc::new(PartialUploadService::new(
        &config,
        Arc::clone(&tracker),
        chunk_store.clone(),
        registrar,
        Arc::clone(&pool) as Arc<dyn AssemblyDispatcher>,
    ));

    // ── Step 6: Session reaper ───────────────────────────────────
    let mut scheduler = CronScheduler::new().await?;
    let reaper = SessionReaper::new(
        Arc::clone(&tracker),
        chunk_store.clone(),
        pool.active(),
        Duration::from_secs(config.chunks.session_ttl_seconds),
    );
    scheduler
        .register_session_reaper(&config.chunks.reaper_cron, reaper)
        .await?;
    scheduler.start().await?;

    // ── Step 7: HTTP server ──────────────────────────────────────
    let state = AppState {
        config: Arc::new(config.clone()),
        repos,
        storage,
        uploads,
        password_hasher,
        started_at: Instant::now(),
    };
    let app = zipline_api::build_app(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::internal(format!("Failed to bind {}: {}", addr, e)))?;

    tracing::info!("Zipline listening on {}", addr);

    // ── Step 8: Graceful shutdown ────────────────────────────────
    let (signal_tx, mut signal_rx) = watch::channel(false);
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown_signal().await;
        tracing::info!("Shutdown signal received, starting graceful shutdown...");
        let _ = signal_tx.send(true);
    });

    // Open connections get `server.shutdown_grace_seconds` to finish.
    let grace = Duration::from_secs(config.server.shutdown_grace_seconds);
    let served = server.into_future();
    tokio::pin!(served);
    tokio::select! {
        result = &mut served => {
            result.map_err(|e| AppError::internal(format!("Server error: {}", e)))?;
        }
        _ = async {
            let _ = signal_rx.wait_for(|signalled| *signalled).await;
            tokio::time::sleep(grace).await;
        } => {
            tracing::warn!("Open connections did not finish within the grace period");
        }
    }

    // ── Step 9: Stop background work ─────────────────────────────
    if let Err(e) = scheduler.shutdown().await {
        tracing::warn!("Scheduler shutdown failed: {}", e);
    }
    pool.shutdown().await;
    let abandoned = tracker.len();
    tracker.clear();
    if abandoned > 0 {
        tracing::info!(abandoned, "Dropped unfinished upload sessions");
    }
    db.close().await;

    tracing::info!("Zipline server shut down gracefully");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
