use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::domains::Role;
use crate::error::{GatewayError, Result};

pub const DEFAULT_PROTOCOL: &str = "nrn-nodered/v1";
pub const DEFAULT_WS_PORT: u16 = 8080;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct P2pConfig {
    pub listen: Vec<String>,
    pub bootstrap: Vec<String>,
    pub key_path: String,
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            listen: vec!["/ip4/0.0.0.0/tcp/0".to_string()],
            bootstrap: Vec::new(),
            key_path: "./data/node.key".to_string(),
        }
    }
}

/// Timing and sizing knobs for the relay loops.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RelayConfig {
    pub read_deadline_ms: u64,
    pub timeout_backoff_ms: u64,
    pub poll_interval_ms: u64,
    pub read_buffer_size: usize,
    pub channel_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            read_deadline_ms: 5_000,
            timeout_backoff_ms: 50,
            poll_interval_ms: 100,
            read_buffer_size: 1024,
            channel_capacity: 1,
        }
    }
}

impl RelayConfig {
    pub fn read_deadline(&self) -> Duration {
        Duration::from_millis(self.read_deadline_ms)
    }

    pub fn timeout_backoff(&self) -> Duration {
        Duration::from_millis(self.timeout_backoff_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub protocol: String,
    pub ws_host: String,
    pub ws_port: u16,
    pub role: Role,
    pub p2p: P2pConfig,
    pub relay: RelayConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            protocol: DEFAULT_PROTOCOL.to_string(),
            ws_host: "0.0.0.0".to_string(),
            ws_port: DEFAULT_WS_PORT,
            role: Role::default(),
            p2p: P2pConfig::default(),
            relay: RelayConfig::default(),
        }
    }
}

impl GatewayConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| GatewayError::Config(e.to_string()))?;
        let config: GatewayConfig =
            serde_json::from_str(&content).map_err(|e| GatewayError::Config(e.to_string()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.protocol.trim().is_empty() {
            return Err(GatewayError::Config("protocol tag is empty".to_string()));
        }
        if self.relay.read_deadline_ms == 0 {
            return Err(GatewayError::Config(
                "read deadline must be greater than zero".to_string(),
            ));
        }
        if self.relay.read_buffer_size == 0 {
            return Err(GatewayError::Config(
                "read buffer size must be greater than zero".to_string(),
            ));
        }
        if self.relay.channel_capacity == 0 {
            return Err(GatewayError::Config(
                "channel capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn ws_addr(&self) -> String {
        format!("{}:{}", self.ws_host, self.ws_port)
    }
}
