//! Configuration types for hashnet-node.
//! `PeerConfig` drives a single `Peer`; `NodeConfig` is the binary's
//! TOML file (~/.hashnet/config.toml).

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use hashnet_protocol::{
    route_label_bits, PeerId, DEFAULT_MAX_CONNECTIONS, DEFAULT_ROUTE_LABEL_SIZE,
};

use crate::PeerError;

/// Slot numbers must fit a hop field no wider than one byte.
const MAX_CONNECTIONS_LIMIT: usize = u8::MAX as usize;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    /// Hex peer identity. Random when unset.
    #[serde(default)]
    pub identity: Option<String>,
    /// RTT probing period.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Per-call response timeout, also bounds each path-discovery step.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Wire route label width in bytes.
    #[serde(default = "default_route_label_size")]
    pub route_label_size: usize,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            identity: None,
            interval_ms: default_interval_ms(),
            timeout_ms: default_timeout_ms(),
            max_connections: default_max_connections(),
            route_label_size: default_route_label_size(),
        }
    }
}

impl PeerConfig {
    pub fn validate(&self) -> Result<(), PeerError> {
        if self.interval_ms == 0 {
            return Err(PeerError::InvalidConfig("interval_ms must be > 0".into()));
        }
        if self.timeout_ms == 0 {
            return Err(PeerError::InvalidConfig("timeout_ms must be > 0".into()));
        }
        if self.max_connections == 0 || self.max_connections > MAX_CONNECTIONS_LIMIT {
            return Err(PeerError::InvalidConfig(format!(
                "max_connections must be in 1..={MAX_CONNECTIONS_LIMIT}, got {}",
                self.max_connections
            )));
        }
        // Room for at least one hop plus the terminating local field.
        let bits = self.route_label_bits();
        if self.route_label_size * 8 < bits * 2 {
            return Err(PeerError::InvalidConfig(format!(
                "route_label_size {} too small for {bits}-bit hop fields",
                self.route_label_size
            )));
        }
        if let Some(identity) = &self.identity {
            identity.parse::<PeerId>()?;
        }
        Ok(())
    }

    /// Configured identity, or a fresh random one.
    pub fn identity(&self) -> Result<PeerId, PeerError> {
        match &self.identity {
            Some(hex) => Ok(hex.parse()?),
            None => Ok(PeerId::random()),
        }
    }

    pub fn route_label_bits(&self) -> usize {
        route_label_bits(self.max_connections)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NodeConfig {
    #[serde(default)]
    pub peer: PeerConfig,
    #[serde(default)]
    pub network: NetworkSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSection {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default)]
    pub bootnodes: Vec<BootnodeEntry>,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            bootnodes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootnodeEntry {
    pub addr: String,
}

// Default value functions
fn default_interval_ms() -> u64 {
    5000
}
fn default_timeout_ms() -> u64 {
    2000
}
fn default_max_connections() -> usize {
    DEFAULT_MAX_CONNECTIONS
}
fn default_route_label_size() -> usize {
    DEFAULT_ROUTE_LABEL_SIZE
}
fn default_listen_addr() -> String {
    "0.0.0.0:9480".into()
}

impl NodeConfig {
    /// Load config from file, or fall back to defaults if missing.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: NodeConfig = toml::from_str(&content)?;
            config.peer.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }
}
