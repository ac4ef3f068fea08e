mod cli;

use anyhow::Context;
use axum::http::{HeaderValue, Method, header};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gitlink_core::connector::HttpGitLabConnector;
use gitlink_core::db::session::SetupSessionRepo;
use gitlink_core::db::{DbPool, create_pool, run_migrations};
use gitlink_core::crypto::EncryptionKey;
use gitlink_server::{AppState, ServerConfig, routes};

use cli::{Cli, Commands};

/// How often expired setup sessions are purged.
const PURGE_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gitlink_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or_default() {
        Commands::Run { bind, env_file } => {
            load_env(env_file)?;
            run(bind).await
        }
        Commands::Migrate { env_file } => {
            load_env(env_file)?;
            let config = ServerConfig::from_env().map_err(anyhow::Error::msg)?;
            let _pool = open_database(&config).await?;
            Ok(())
        }
    }
}

fn load_env(env_file: Option<PathBuf>) -> anyhow::Result<()> {
    match env_file {
        Some(path) => {
            dotenvy::from_path(&path)
                .with_context(|| format!("Failed to load env file {}", path.display()))?;
        }
        None => {
            // A missing .env is fine
            dotenvy::dotenv().ok();
        }
    }
    Ok(())
}

async fn open_database(config: &ServerConfig) -> anyhow::Result<DbPool> {
    let pool = create_pool(&config.database_url)
        .await
        .context("Failed to open database")?;
    run_migrations(&pool)
        .await
        .context("Failed to run migrations")?;
    Ok(pool)
}

async fn run(bind: Option<String>) -> anyhow::Result<()> {
    let config = ServerConfig::from_env().map_err(anyhow::Error::msg)?;
    let bind_addr = bind.unwrap_or_else(|| config.bind_addr.clone());

    let db = open_database(&config).await?;

    let encryption_key = match EncryptionKey::from_env() {
        Ok(key) => Some(key),
        Err(e) => {
            tracing::warn!("{}; GitLab installations are disabled", e);
            None
        }
    };

    let cors = match config.dashboard_origin.as_deref() {
        Some(origin) => CorsLayer::new()
            .allow_origin(
                origin
                    .parse::<HeaderValue>()
                    .context("Invalid GITLINK_DASHBOARD_ORIGIN")?,
            )
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE]),
        None => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(Any),
    };

    spawn_session_purge(db.clone());

    let connector = Arc::new(HttpGitLabConnector::from_env());
    let state = AppState::new(db, config, connector, encryption_key);

    let app = routes::app_router(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(cors),
    );

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    tracing::info!("Gitlink server listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    Ok(())
}

fn spawn_session_purge(db: DbPool) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PURGE_INTERVAL);
        loop {
            interval.tick().await;
            match SetupSessionRepo::delete_expired(&db).await {
                Ok(0) => {}
                Ok(n) => tracing::debug!("Purged {} expired setup sessions", n),
                Err(e) => tracing::warn!("Failed to purge expired setup sessions: {}", e),
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
