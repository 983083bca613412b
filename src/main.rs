//! eVaka API gateway

use anyhow::Result;
use std::path::Path;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use evaka_apigw::{
    api::{self, AppState},
    cache::create_cache,
    config::Config,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "evaka_apigw=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting eVaka API gateway...");

    // Load configuration
    let config = Config::load_with_env(Path::new("config.yml"))?;
    tracing::info!("Configuration loaded");

    // Initialize session storage
    let cache = create_cache(&config.cache).await?;
    tracing::info!("Session store initialized: {:?}", config.cache.driver);

    if config.dev_auth.enabled {
        tracing::warn!("Development login is enabled");
    }
    if config.integration.token.is_none() {
        tracing::info!("No integration token configured, integration routes are closed");
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("Backend services at {}", config.service.url);

    // Build router
    let state = AppState::new(config, cache)?;
    let app = api::build_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
