//! Wormkey Gateway - edge gateway for wormhole tunnels.
//!
//! Terminates viewer HTTP requests at the public internet and forwards
//! them, over one persistent WebSocket per agent, to the origin server
//! running on the developer's machine.

mod api;
mod config;
mod gate;
mod overlay;
mod pages;
mod policy;
mod proxy;
mod registry;
mod slug;
mod stream;
mod sync;
mod tunnel;
mod util;
mod viewer;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::routing::{get, post};
use axum::Router;
use clap::Parser;
use config::GatewayConfig;
use registry::TunnelRegistry;
use sync::ControlPlaneClient;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Shared handles for every handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<TunnelRegistry>,
    pub sync: Arc<ControlPlaneClient>,
    pub config: Arc<GatewayConfig>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = GatewayConfig::parse();

    let _ = FmtSubscriber::builder()
        .with_max_level(if config.debug {
            Level::DEBUG
        } else {
            Level::INFO
        })
        .with_target(false)
        .try_init();

    info!("Starting wormkey-gateway v{}", env!("CARGO_PKG_VERSION"));

    let sync = ControlPlaneClient::new(config.control_plane.clone());
    if sync.enabled() {
        info!("Control plane: {}", config.control_plane);
    } else {
        info!("Control-plane sync disabled");
    }

    let port = config.port;
    let state = AppState {
        registry: Arc::new(TunnelRegistry::new()),
        sync: Arc::new(sync),
        config: Arc::new(config),
    };

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/tunnel", get(tunnel::tunnel_handler))
        .route("/.wormkey/overlay.js", get(api::overlay_script))
        .route("/.wormkey/owner", get(api::owner_entry))
        .route("/.wormkey/me", get(api::me))
        .route("/.wormkey/urls", get(api::urls))
        .route("/.wormkey/state", get(api::state_snapshot))
        .route("/.wormkey/policy", post(api::update_policy))
        .route("/.wormkey/kick", post(api::kick_viewer))
        .route("/.wormkey/rotate-password", post(api::rotate_password))
        .route("/.wormkey/close", post(api::close_tunnel))
        .fallback(proxy::proxy_handler)
        .with_state(state);

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("listening on {addr}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Shutdown complete");
    Ok(())
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
