//! # dhcpmux - DHCP relay multiplexer
//!
//! dhcpmux lets many processes probe DHCP servers at once without each of
//! them having to bind the privileged DHCP client port. Clients connect over
//! TCP and hand the daemon encoded DHCP requests; the daemon forwards each to
//! UDP port 67 on the requested host and broadcasts every response it
//! receives on UDP port 68 back to all connected clients.
//!
//! ## Features
//!
//! - **Single port owner**: one daemon binds UDP/68 for every client
//! - **Broadcast fan-out**: responses go to all live sessions, clients match
//!   them to their own requests
//! - **Explicit lifecycle**: start, stop, pause and resume with observable
//!   status
//! - **Capability probe**: `is_server` checks a host for a DHCP server through
//!   the daemon
//!
//! ## Usage
//!
//! ```rust,ignore
//! use dhcpmux::config::load_config;
//! use dhcpmux::lifecycle::Fiber;
//! use dhcpmux::relay::RelayController;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config("dhcpmux.toml")?;
//!     let controller = RelayController::new(config.relay);
//!
//!     controller.start().await?;
//!     tokio::signal::ctrl_c().await?;
//!     controller.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Wire format
//!
//! ```text
//! client -> relay: [target IPv4][length N][N bytes DHCP request]
//! relay -> client: [source IPv4][length N][N bytes DHCP response]
//! ```
//!
//! A request with target `0.0.0.0` closes the session.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod client;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod protocol;
pub mod relay;
pub mod transport;

// Re-export commonly used items
pub use client::{is_server, RelayClient};
pub use config::{load_config, Config, ConfigSource, ProbeConfig, RelayConfig};
pub use error::{RelayError, RelayResult};
pub use lifecycle::{Fiber, PausableFiber, Status};
pub use protocol::{RelayMessage, RelayRequest};
pub use relay::{ClientSession, FanoutReceiver, RelayController, SessionRegistry};

/// Version of the dhcpmux library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the application
pub const NAME: &str = env!("CARGO_PKG_NAME");
