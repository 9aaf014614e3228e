use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderValue;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use homestay_backend::config::{CorsConfig, RoleBackend};
use homestay_backend::{
    app, AppState, Config, IdTokenVerifier, IdentityToolkitClient, RestRoleStore, RoleStore, SqliteRoleStore,
};

fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if config.origins.trim() == "*" {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = config
        .origins
        .split(',')
        .filter_map(|o| HeaderValue::from_str(o.trim()).ok())
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

fn role_store(config: &Config) -> Result<Arc<dyn RoleStore>, Box<dyn std::error::Error>> {
    let roles = &config.roles;
    match roles.backend {
        RoleBackend::Sqlite => {
            tracing::info!("Using SQLite role store at {}", roles.database_url);
            Ok(Arc::new(SqliteRoleStore::new(&roles.database_url)?))
        }
        RoleBackend::Rest => {
            let url = roles
                .rest_url
                .as_deref()
                .ok_or("roles.rest_url is required for the rest backend")?;
            let key = roles
                .rest_api_key
                .as_deref()
                .ok_or("roles.rest_api_key is required for the rest backend")?;
            tracing::info!("Using REST role store at {} (table {})", url, roles.table);
            Ok(Arc::new(RestRoleStore::new(url, key, &roles.table)))
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| config.logging.level.clone().into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Homestay auth gateway");

    // Initialize components
    let provider = Arc::new(IdentityToolkitClient::new(&config.identity));
    let store = role_store(&config)?;

    let verifier = match &config.identity.jwt_issuer {
        Some(issuer) => {
            let verifier = IdTokenVerifier::new(issuer, config.identity.jwt_audience.as_deref()).await?;
            tracing::info!("Bearer ID tokens accepted from {}", issuer);
            Some(verifier)
        }
        None => None,
    };

    let state = Arc::new(AppState::new(config.clone(), provider, store, verifier));

    // Sweep expired sessions and idle throttle keys
    let sweep_interval = Duration::from_secs(config.session.sweep_interval_secs.max(1));
    state.registry.spawn_sweeper(sweep_interval);
    {
        let state = state.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            loop {
                ticker.tick().await;
                state.throttle.shrink();
            }
        });
    }

    // Build router
    let app = app(state)
        .layer(cors_layer(&config.cors))
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("Listening on {}", addr);

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
