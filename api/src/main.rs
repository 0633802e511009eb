mod config;
mod constants;
mod domain;
mod logging;
mod models;
mod routes;
mod services;
#[cfg(test)]
mod test_support;

use axum::extract::DefaultBodyLimit;
use reqwest::Client;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use config::AppConfig;
use constants::{HTTP_TIMEOUT_SECS, MAX_PUBLISH_BODY_SIZE};
use domain::PgStore;
use logging::LogFormat;
use services::alerts::AlertDispatcher;
use services::gateway::GatewayClient;
use services::media::MediaPipeline;
use services::publisher::Publisher;
use services::watchdog::Watchdog;

/// Process-wide handles, built once at startup.
/// Storage-backed services are `None` when no database is configured.
#[derive(Default)]
struct AppState {
    publisher: Option<Publisher>,
    watchdog: Option<Watchdog>,
    cron_secret: Option<String>,
}

#[derive(Debug, Error)]
enum StartupError {
    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
    #[error("failed to connect to database: {0}")]
    Database(#[from] sqlx::Error),
    #[error("failed to run migrations: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("server error: {0}")]
    Serve(std::io::Error),
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            logging::init(LogFormat::default());
            tracing::error!("invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    logging::init(config.log_format);

    if let Err(e) = serve(config).await {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

async fn build_state(config: &AppConfig) -> Result<AppState, StartupError> {
    let http = Client::builder()
        .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .build()?;

    let Some(database_url) = config.database_url.as_deref() else {
        tracing::warn!("DATABASE_URL is not set; /publish and /cron/watchdog will answer 500");
        return Ok(AppState {
            cron_secret: config.cron_secret.clone(),
            ..AppState::default()
        });
    };

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(database_url)
        .await?;

    if config.run_migrations {
        sqlx::migrate!().run(&pool).await?;
        tracing::info!("migrations applied");
    }

    let store = Arc::new(PgStore::new(pool));
    let gateway = Arc::new(GatewayClient::new(
        &config.gateway.base_url,
        &config.gateway.api_key,
        http.clone(),
    ));

    let media = MediaPipeline::new(http.clone(), gateway.clone(), config.media_poll);
    let publisher = Publisher::new(store.clone(), store.clone(), gateway, media);

    if config.alert_webhook_url.is_none() {
        tracing::warn!("ALERT_WEBHOOK_URL is not set; watchdog alerts will be skipped");
    }
    let alerts = AlertDispatcher::new(
        http,
        config.alert_webhook_url.clone(),
        config.watchdog.alert_cooldown_minutes,
        store.clone(),
    );
    let watchdog = Watchdog::new(store.clone(), store, alerts, config.watchdog.settings());

    Ok(AppState {
        publisher: Some(publisher),
        watchdog: Some(watchdog),
        cron_secret: config.cron_secret.clone(),
    })
}

async fn serve(config: AppConfig) -> Result<(), StartupError> {
    let state = Arc::new(build_state(&config).await?);

    let app = routes::build_routes(config.publish_rate)
        .layer(DefaultBodyLimit::max(MAX_PUBLISH_BODY_SIZE))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| StartupError::Bind { addr, source })?;

    tracing::info!("listening on http://{}", addr);

    // ConnectInfo feeds the per-IP rate limiter when no proxy header is present
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(StartupError::Serve)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
