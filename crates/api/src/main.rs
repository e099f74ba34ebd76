//! MCP gateway server

use std::sync::Arc;

use anyhow::Context;
use mcpgw_api::{config::Config, create_router, store::PgAccountStore, telemetry, AppState};
use mcpgw_routing::PgRoutingStore;
use mcpgw_shared::{create_pool, run_migrations};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env().context("Failed to load configuration")?;
    telemetry::init_tracing(config.log_format).context("Failed to initialize logging")?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.bind_address,
        public_url = %config.public_url,
        "Starting MCP gateway"
    );

    let pool = create_pool(&config.database_url, config.database_max_connections)
        .await
        .context("Failed to connect to database")?;
    run_migrations(&pool).await.context("Failed to run migrations")?;
    tracing::info!("Database migrations applied");

    let store = Arc::new(PgAccountStore::new(pool.clone()));
    let routing_store = Arc::new(PgRoutingStore::new(pool));
    let bind_address = config.bind_address.clone();
    let state = AppState::new(config, store, routing_store).context("Failed to build HTTP client")?;

    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", bind_address))?;
    tracing::info!(address = %bind_address, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
