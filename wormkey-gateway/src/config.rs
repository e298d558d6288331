//! Gateway configuration.

use clap::Parser;

/// Wormkey Gateway - expose localhost origins through wormhole tunnels.
#[derive(Parser, Debug, Clone)]
#[command(name = "wormkey-gateway")]
#[command(author, version, about, long_about = None)]
pub struct GatewayConfig {
    /// Listen port for all traffic (agents, viewers, owner API)
    #[arg(long, env = "PORT", default_value = "3002")]
    pub port: u16,

    /// Base URL of the control plane; empty disables session sync
    #[arg(long, env = "WORMKEY_CONTROL_PLANE", default_value = "")]
    pub control_plane: String,

    /// Public base URL used when building /s/<slug> links
    #[arg(long, env = "WORMKEY_PUBLIC_BASE_URL")]
    pub public_base_url: Option<String>,

    /// Legacy alias for the public base URL
    #[arg(long, env = "WORMKEY_PUBLIC_BASE")]
    pub public_base: Option<String>,

    /// Enable debug logging
    #[arg(long, env = "WORMKEY_DEBUG")]
    pub debug: bool,
}

impl GatewayConfig {
    /// Resolve the configured public base URL, if any, without a trailing
    /// slash.
    pub fn configured_public_base(&self) -> Option<String> {
        self.public_base_url
            .as_deref()
            .or(self.public_base.as_deref())
            .filter(|base| !base.is_empty())
            .map(|base| base.trim_end_matches('/').to_string())
    }
}
