use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use kestrel_client::{DriverConfig, HeadlessDriver};
use kestrel_core::acquire::DriverIdentityProvider;
use kestrel_core::config::PoolConfig;
use kestrel_core::driver::SiteProfile;
use kestrel_core::scheduler::{SchedulerConfig, TracingSchedulerReporter};
use kestrel_db::{Database, DatabaseConfig};
use kestrel_server::config::ServerConfig;
use kestrel_server::routes;
use kestrel_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("kestrel=info".parse()?))
        .with_target(false)
        .init();

    let server = ServerConfig::from_env()?;
    let pools = PoolConfig::from_env()?;
    let scheduler = SchedulerConfig::from_env()?;
    let profile = Arc::new(SiteProfile::from_env()?);

    let database = match DatabaseConfig::from_env_optional()? {
        Some(config) => {
            let db = Database::connect(&config).await?;
            db.migrate().await?;
            Some(db)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; proxies and categories are kept in memory");
            None
        }
    };

    let driver = HeadlessDriver::launch(&DriverConfig::from_env()?).await?;
    let provider = DriverIdentityProvider::new(driver, profile);

    let state = Arc::new(AppState::new(
        database,
        &pools,
        scheduler,
        provider,
        server.admin_token.clone(),
    )?);
    if state.admin_token.is_none() {
        tracing::warn!("KESTREL_ADMIN_TOKEN not set; admin endpoints are disabled");
    }

    let cancel = CancellationToken::new();
    let background = {
        let scheduler = state.scheduler.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { scheduler.run(cancel, &TracingSchedulerReporter).await })
    };

    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = server.bind_addr();
    tracing::info!("Starting server on {addr}");
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    cancel.cancel();
    background.await?;
    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install CTRL+C handler");
    }
    tracing::info!("Shutdown signal received");
    cancel.cancel();
}
