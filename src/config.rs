use serde::Deserialize;
use std::path::Path;

use crate::source::FeedFormat;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Auto-refresh interval in minutes
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,
    /// Upper bound for a single source fetch, in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Whether the user granted notification permission
    #[serde(default)]
    pub notifications: bool,
    pub feeds: Vec<FeedConfig>,
}

fn default_refresh_interval() -> u64 {
    5
}

fn default_request_timeout() -> u64 {
    15
}

fn default_listen_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeedConfig {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub format: FeedFormat,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }
}
