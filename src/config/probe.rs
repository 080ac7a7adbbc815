//! Probe configuration types

use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_relay_addr() -> String {
    "127.0.0.1:5818".to_string()
}

fn default_timeout_ms() -> u64 {
    3000
}

fn default_retries() -> u32 {
    2
}

/// Settings for the DHCP capability probe
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ProbeConfig {
    /// Relay daemon the probe connects to (e.g., "127.0.0.1:5818")
    #[serde(default = "default_relay_addr")]
    pub relay_addr: String,

    /// Time to wait for a matching reply per attempt, in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Attempts made after the first one
    #[serde(default = "default_retries")]
    pub retries: u32,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        ProbeConfig {
            relay_addr: default_relay_addr(),
            timeout_ms: default_timeout_ms(),
            retries: default_retries(),
        }
    }
}

impl ProbeConfig {
    /// Per-attempt timeout as a [`Duration`]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
