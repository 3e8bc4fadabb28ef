use std::path::PathBuf;

use clap::Parser;
use nrn_gateway::error::Result;
use nrn_gateway::{gateway, GatewayConfig, Role};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "nrn-gateway")]
#[command(about = "WebSocket gateway for buyer/seller peer-to-peer messaging")]
struct Cli {
    /// Protocol ID for the neuron network
    #[arg(long, env = "NRN_PROTOCOL")]
    protocol: Option<String>,

    /// WebSocket server port
    #[arg(long = "ws-port", env = "NRN_WS_PORT")]
    ws_port: Option<u16>,

    #[arg(long = "ws-host")]
    ws_host: Option<String>,

    #[arg(long, value_enum, env = "NRN_ROLE")]
    role: Option<Role>,

    /// p2p listen multiaddr, repeatable
    #[arg(long)]
    listen: Vec<String>,

    /// peer multiaddr to dial at startup, repeatable
    #[arg(long)]
    bootstrap: Vec<String>,

    #[arg(long = "key-path", env = "NRN_KEY_PATH")]
    key_path: Option<String>,

    /// JSON config file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Cli {
    fn into_config(self) -> Result<GatewayConfig> {
        let mut config = match &self.config {
            Some(path) => GatewayConfig::from_file(path)?,
            None => GatewayConfig::default(),
        };
        if let Some(protocol) = self.protocol {
            config.protocol = protocol;
        }
        if let Some(port) = self.ws_port {
            config.ws_port = port;
        }
        if let Some(host) = self.ws_host {
            config.ws_host = host;
        }
        if let Some(role) = self.role {
            config.role = role;
        }
        if !self.listen.is_empty() {
            config.p2p.listen = self.listen;
        }
        if !self.bootstrap.is_empty() {
            config.p2p.bootstrap = self.bootstrap;
        }
        if let Some(key_path) = self.key_path {
            config.p2p.key_path = key_path;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,nrn_gateway=info,libp2p=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(true)
        .with_line_number(true)
        .init();

    let config = Cli::parse().into_config()?;
    tracing::info!(
        role = %config.role,
        protocol = %config.protocol,
        ws_port = config.ws_port,
        "launching gateway"
    );

    gateway::run(config).await
}
