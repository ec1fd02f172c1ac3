use anyhow::Result;
use axum::{routing::get, Router};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod config;
mod db;
mod models;
mod services;

use config::AppConfig;
use services::snapshot::{CacheOptions, SnapshotCache};
use services::trakt::{TraktClient, TraktOptions};

/// Tracks all background task handles for graceful shutdown
struct BackgroundTasks {
    handles: Vec<(&'static str, JoinHandle<()>)>,
    shutdown: CancellationToken,
}

impl BackgroundTasks {
    fn new() -> Self {
        Self {
            handles: Vec::new(),
            shutdown: CancellationToken::new(),
        }
    }

    fn token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    fn spawn<F>(&mut self, name: &'static str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        self.handles.push((name, handle));
    }

    async fn shutdown(self) {
        tracing::info!("Initiating graceful shutdown...");
        self.shutdown.cancel();

        for (name, handle) in self.handles {
            tracing::debug!("Waiting for {} to finish...", name);
            match tokio::time::timeout(Duration::from_secs(10), handle).await {
                Ok(Ok(())) => tracing::debug!("{} finished cleanly", name),
                Ok(Err(e)) => tracing::warn!("{} panicked: {}", name, e),
                Err(_) => tracing::warn!("{} timed out during shutdown", name),
            }
        }

        tracing::info!("All background tasks stopped");
    }
}

pub struct AppState {
    pub config: AppConfig,
    pub cache: Arc<SnapshotCache>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sitcom_shuffle=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load .env file if present
    dotenvy::dotenv().ok();

    let config = AppConfig::load();
    config.paths.ensure_dirs().await?;
    config.log_config();

    // Database setup - pointer and token store only, so a small pool is fine
    let database_url = config.database_url();
    tracing::debug!("Database URL: {}", database_url);

    let connect_options = SqliteConnectOptions::from_str(&database_url)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(connect_options)
        .await?;

    db::migrate(&pool).await?;

    // Tokens rotated by a previous run take priority over config values
    let (access_token, refresh_token) = match db::load_tokens(&pool).await? {
        Some(pair) => {
            tracing::debug!("Using persisted Trakt tokens");
            pair
        }
        None => (
            config.trakt.access_token.clone().unwrap_or_default(),
            config.trakt.refresh_token.clone().unwrap_or_default(),
        ),
    };

    let trakt = TraktClient::new(
        TraktOptions {
            api_base: config.trakt.api_base.clone(),
            client_id: config.trakt.client_id.clone().unwrap_or_default(),
            client_secret: config.trakt.client_secret.clone().unwrap_or_default(),
            access_token,
            refresh_token,
            username: config.trakt_username(),
            list_id: config.trakt_list_id(),
            request_timeout: config.request_timeout(),
            include_specials: config.catalog.include_specials,
            require_imdb_ids: config.catalog.require_imdb_ids,
        },
        pool.clone(),
    )?;

    let cache = Arc::new(SnapshotCache::new(
        Arc::new(trakt),
        CacheOptions {
            ttl: config.snapshot_ttl(),
            policy: config.catalog.shuffle_policy,
            batch_size: config.catalog.batch_size,
            serve_stale: config.catalog.serve_stale,
            publish_empty: config.catalog.publish_empty,
            blob_dir: config.paths.snapshot_dir(),
        },
        pool.clone(),
    ));

    // Reads survive a restart: pick up the last published snapshot
    match cache.restore().await {
        Ok(true) => {}
        Ok(false) => tracing::info!("No published snapshot yet (cold start)"),
        Err(e) => tracing::warn!("Could not restore snapshot: {:#}", e),
    }

    let state = Arc::new(AppState {
        config: config.clone(),
        cache: cache.clone(),
    });

    let mut bg_tasks = BackgroundTasks::new();
    let shutdown_token = bg_tasks.token();

    // Scheduled aggregation: one pass shortly after startup, then on the TTL
    // interval. Reads also trigger refreshes on cache miss, so this mainly
    // keeps the catalog warm between requests.
    if config.trakt_configured() {
        let refresher_cache = cache.clone();
        let interval = config.snapshot_ttl();
        let cancel = shutdown_token.clone();
        bg_tasks.spawn("catalog-refresher", async move {
            tokio::time::sleep(Duration::from_secs(1)).await;

            loop {
                match refresher_cache.refresh().await {
                    Ok(snapshot) => {
                        tracing::debug!("Scheduled refresh done: {} episodes", snapshot.len())
                    }
                    Err(e) => tracing::error!("Scheduled refresh failed: {:#}", e),
                }

                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!("Catalog refresher received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        });
    } else {
        tracing::warn!("Catalog refresher disabled: Trakt is not configured");
    }

    // Root handler
    async fn root_handler() -> &'static str {
        "Sitcom Shuffle"
    }

    // Build router
    let app = Router::new()
        .route("/", get(root_handler).head(root_handler))
        .route("/health", get(|| async { "OK" }))
        .merge(api::routes())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::new(config.bind_address.parse()?, config.port);
    tracing::info!("Starting server on {}", addr);

    // Create shutdown signal listener
    let shutdown_signal = async {
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
            _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
            _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
        }
    };

    // Start server with graceful shutdown
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    // After server stops, gracefully shutdown background tasks
    bg_tasks.shutdown().await;

    tracing::info!("Server shutdown complete");
    Ok(())
}
