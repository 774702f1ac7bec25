// src/main.rs

use color_eyre::eyre::{Result, WrapErr};
use tokio::net::TcpListener;
use tracing::info;

mod app;
mod config;
mod core;
mod logging;
mod server;

use app::AppState;
use config::AppConfig;
use crate::core::service::ScanService;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let log_path = logging::initialize_logging()?;
    info!(log = %log_path.display(), version = env!("CARGO_PKG_VERSION"), "GateKeeper starting.");

    let config = AppConfig::load().wrap_err("Failed to load configuration")?;
    let service = ScanService::from_config(&config).wrap_err("Failed to build the scan service")?;
    info!(
        checks = service.checks().len(),
        rules = service.rules().len(),
        target = ?config.target,
        "Configuration loaded."
    );

    let bind = config.server.bind.clone();
    let origins = config.server.allowed_origins.clone();
    let router = server::router(AppState::new(service, config), &origins);

    let listener = TcpListener::bind(&bind)
        .await
        .wrap_err_with(|| format!("Failed to bind {}", bind))?;
    info!(address = %bind, "Listening.");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("GateKeeper stopped.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal.");
    }
}
