//! Relay configuration types
//!
//! Defines the listener, port and queue settings used by the relay controller.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Default TCP listen address for relay clients
fn default_listen_addr() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 5818)
}

/// Default bind address for the fan-out receiver
fn default_udp_bind_ip() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

/// DHCP server port
fn default_server_port() -> u16 {
    67
}

/// DHCP client port
fn default_client_port() -> u16 {
    68
}

fn default_poll_interval_ms() -> u64 {
    1000
}

/// Largest payload a single UDP datagram can carry
fn default_max_payload() -> u32 {
    65507
}

fn default_outbound_queue() -> usize {
    64
}

fn default_nodelay() -> bool {
    true
}

/// Relay daemon configuration
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// TCP address relay clients connect to
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Local address the fan-out receiver binds
    #[serde(default = "default_udp_bind_ip")]
    pub udp_bind_ip: IpAddr,

    /// Port requests are forwarded to on the target host
    #[serde(default = "default_server_port")]
    pub server_port: u16,

    /// Port the fan-out receiver listens on
    #[serde(default = "default_client_port")]
    pub client_port: u16,

    /// Upper bound, in milliseconds, for noticing a state change
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Largest request payload accepted from a client
    #[serde(default = "default_max_payload")]
    pub max_payload: u32,

    /// Deliveries buffered per session before new ones are dropped
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,

    /// Enable TCP_NODELAY on accepted sessions
    #[serde(default = "default_nodelay")]
    pub nodelay: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            listen_addr: default_listen_addr(),
            udp_bind_ip: default_udp_bind_ip(),
            server_port: default_server_port(),
            client_port: default_client_port(),
            poll_interval_ms: default_poll_interval_ms(),
            max_payload: default_max_payload(),
            outbound_queue: default_outbound_queue(),
            nodelay: default_nodelay(),
        }
    }
}

impl RelayConfig {
    /// Address the fan-out receiver binds
    pub fn receiver_addr(&self) -> SocketAddr {
        SocketAddr::new(self.udp_bind_ip, self.client_port)
    }

    /// Poll interval as a [`Duration`]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_payload == 0 {
            return Err("max_payload must be greater than zero".to_string());
        }
        if self.outbound_queue == 0 {
            return Err("outbound_queue must be greater than zero".to_string());
        }
        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be greater than zero".to_string());
        }
        Ok(())
    }
}
