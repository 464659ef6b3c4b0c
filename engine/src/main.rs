use axum::http::{header, HeaderValue, Method};
use std::path::Path;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bbus_engine::api::{self, AppState};
use bbus_engine::config::{Config, ServerConfig};
use bbus_engine::providers::{BusApi, HttpFetcher, RequestQuota};
use bbus_engine::services::notifier::BroadcastNotifier;
use bbus_engine::store::KeyValueStore;
use bbus_engine::AlarmEngine;

const NOTIFICATION_CAPACITY: usize = 32;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bbus_engine=debug,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::var("BBUS_CONFIG").unwrap_or_else(|_| "config.yaml".to_string());
    let config = if Path::new(&config_path).exists() {
        info!(path = %config_path, "Loading configuration");
        Config::load(&config_path)?
    } else {
        warn!(path = %config_path, "Config file not found, using defaults");
        Config::default()
    };

    // SQLite will not create missing directories
    if let Some(parent) = config
        .store
        .database_url
        .strip_prefix("sqlite://")
        .and_then(|path| Path::new(path).parent())
        .filter(|parent| !parent.as_os_str().is_empty())
    {
        std::fs::create_dir_all(parent)?;
    }

    let store = KeyValueStore::connect(&config.store.database_url).await?;
    let quota = RequestQuota::new(store, config.api.daily_request_limit);
    let fetcher = HttpFetcher::new(&config.api, quota.clone())?;
    let notifier = BroadcastNotifier::new(NOTIFICATION_CAPACITY);
    let engine = AlarmEngine::new(
        BusApi::new(Arc::new(fetcher)),
        config.alarm.clone(),
        Arc::new(notifier.clone()),
    );

    let state = AppState {
        engine,
        quota,
        notifier,
    };

    let app = api::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&config.server)?);

    info!(bind = %config.server.bind, "Starting BBus alarm engine");
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;

    axum::serve(listener, app).await?;

    Ok(())
}

fn cors_layer(server: &ServerConfig) -> Result<CorsLayer, header::InvalidHeaderValue> {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE]);

    if server.cors_permissive {
        warn!("CORS is permissive, every origin is allowed");
        return Ok(cors.allow_origin(Any));
    }
    if server.cors_origins.is_empty() {
        info!("No CORS origins configured, only same-origin requests are allowed");
        return Ok(cors);
    }

    let origins = server
        .cors_origins
        .iter()
        .map(|origin| origin.parse::<HeaderValue>())
        .collect::<Result<Vec<_>, _>>()?;
    Ok(cors.allow_origin(origins))
}
