use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use serde_derive::Deserialize;

pub const DEFAULT_URL: &str = "http://localhost:9998";
pub const DEFAULT_HUB_NAME: &str = "HUB01";
pub const DEFAULT_BROADCAST_ADDRESS: u64 = 0x3FFF;
pub const DEFAULT_LIVENESS_WINDOW: u64 = 300;

#[derive(Deserialize, Debug, Default, Clone)]
pub struct AppConfig {
    pub hub: Option<HubConfig>,
    pub transport: Option<TransportConfig>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct HubConfig {
    pub name: Option<String>,
    pub broadcast_address: Option<u64>,
    /// In hub time units, as carried by clock ticks.
    pub liveness_window: Option<u64>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct TransportConfig {
    pub timeout_seconds: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::de::from_str(&contents)
            .with_context(|| format!("parsing config file {}", path.display()))
    }
}

/// Session parameters of the poll loop with every default filled in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubSettings {
    pub address: u64,
    pub name: String,
    pub broadcast_address: u64,
    pub liveness_window: u64,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl HubSettings {
    pub fn new(address: u64, config: &AppConfig) -> Self {
        let hub = config.hub.clone().unwrap_or_default();
        let transport = config.transport.clone().unwrap_or_default();
        HubSettings {
            address,
            name: hub.name.unwrap_or(DEFAULT_HUB_NAME.to_string()),
            broadcast_address: hub.broadcast_address.unwrap_or(DEFAULT_BROADCAST_ADDRESS),
            liveness_window: hub.liveness_window.unwrap_or(DEFAULT_LIVENESS_WINDOW),
            max_retries: transport.max_retries.unwrap_or(5),
            retry_delay: Duration::from_millis(transport.retry_delay_ms.unwrap_or(500)),
        }
    }
}
