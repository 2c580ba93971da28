//! JobProof API server

use anyhow::Context;
use jobproof_api::{create_router, telemetry, AppState, Config};
use jobproof_shared::{create_migration_pool, create_pool, run_migrations};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init();

    let config = Config::from_env().context("failed to load configuration")?;
    tracing::info!(
        bind_address = %config.bind_address,
        trial_days = config.trial_days,
        provider_timeout_secs = config.provider_timeout_secs,
        "Starting JobProof API"
    );

    {
        let migration_pool = create_migration_pool(&config.database_url)
            .await
            .context("failed to connect for migrations")?;
        run_migrations(&migration_pool)
            .await
            .context("failed to run migrations")?;
        migration_pool.close().await;
    }

    let pool = create_pool(&config.database_url, config.database_max_connections)
        .await
        .context("failed to connect to database")?;

    let bind_address = config.bind_address.clone();
    let app = create_router(AppState::new(config, pool));

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {}", bind_address))?;
    tracing::info!(address = %bind_address, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("Shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
