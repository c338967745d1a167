//! # dolani-server
//!
//! HTTP daemon for the dolani beacon positioning system.
//!
//! This binary provides:
//! - Continuous BLE scanning with RSSI smoothing and distance estimation
//! - Location resolution of the strongest nearby beacon
//! - REST API for scanner state, beacons and lifecycle control
//! - Structured logging to file and stdout
//!
//! ## Running
//!
//! ```bash
//! # Development
//! cargo run --package dolani-server
//!
//! # Without Bluetooth hardware
//! cargo run --package dolani-server --no-default-features
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use dolani_core::{Config, HttpResolver, LocationStore, Positioning, ScanAdapter};
use dolani_server::api::create_router;
use dolani_server::logging;
use dolani_server::state::{self, AppState};
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init(logging::is_production())?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting dolani-server");

    let config_path = state::config_path();
    let config = state::load_config(&config_path)?;
    info!(path = %config_path.display(), "Configuration loaded");

    #[cfg(feature = "bluetooth")]
    let adapter = dolani_core::BluerAdapter::new()
        .await
        .context("Failed to open Bluetooth adapter")?;

    #[cfg(not(feature = "bluetooth"))]
    let adapter = {
        tracing::warn!("Built without Bluetooth support, using a simulated adapter");
        dolani_core::MockAdapter::powered_on()
    };

    serve(Arc::new(adapter), config).await
}

async fn serve<A: ScanAdapter>(adapter: Arc<A>, config: Config) -> anyhow::Result<()> {
    let resolver =
        HttpResolver::from_settings(&config.resolver).context("Failed to build resolver client")?;
    let location = Arc::new(LocationStore::new());

    let positioning = Positioning::spawn(
        adapter,
        Arc::new(resolver),
        Arc::clone(&location),
        &config,
    )
    .context("Failed to start positioning")?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let app = create_router(AppState::new(config, positioning.clone(), location).shared());

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shutting down positioning");
    positioning
        .shutdown()
        .await
        .context("Failed to stop positioning")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        return std::future::pending().await;
    }
    info!("Shutdown signal received");
}
