//! Configuration module for dhcpmux
//!
//! This module provides configuration types and parsing for the relay daemon
//! and the capability probe.

mod probe;
mod relay;

pub use probe::ProbeConfig;
pub use relay::RelayConfig;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct Config {
    /// Relay daemon configuration
    #[serde(default)]
    pub relay: RelayConfig,

    /// Capability probe configuration
    #[serde(default)]
    pub probe: ProbeConfig,
}

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

    parse_config(&content)
}

/// Parse configuration from a TOML string
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config =
        toml::from_str(content).with_context(|| "Failed to parse configuration")?;
    config
        .relay
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid relay configuration: {}", e))?;
    Ok(config)
}

/// Where the relay controller reads its settings from on every start
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// Fixed, already loaded settings
    Static(RelayConfig),
    /// TOML file re-read on each start
    File(PathBuf),
}

impl ConfigSource {
    /// Resolve the relay settings
    pub fn load(&self) -> Result<RelayConfig> {
        match self {
            ConfigSource::Static(config) => {
                config
                    .validate()
                    .map_err(|e| anyhow::anyhow!("Invalid relay configuration: {}", e))?;
                Ok(config.clone())
            }
            ConfigSource::File(path) => Ok(load_config(path)?.relay),
        }
    }
}

impl From<RelayConfig> for ConfigSource {
    fn from(config: RelayConfig) -> Self {
        ConfigSource::Static(config)
    }
}
