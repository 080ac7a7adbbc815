//! DHCP relay daemon
//!
//! Clients connect over TCP and send framed DHCP requests. Each request is
//! forwarded over UDP to the requested server. Every response arriving on the
//! DHCP client port is broadcast back to all connected clients.
//!
//! ```text
//!  client ──TCP──▶ ClientSession ──UDP/67──▶ DHCP server
//!  client ◀──TCP── ClientSession ◀── FanoutReceiver ◀──UDP/68── DHCP server
//! ```
//!
//! The [`RelayController`] owns the listener and the [`SessionRegistry`],
//! and starts and stops everything else.

mod controller;
mod receiver;
mod registry;
mod session;

pub use controller::RelayController;
pub use receiver::{FanoutReceiver, DATAGRAM_BUFFER_LEN};
pub use registry::{FanoutReport, SessionId, SessionRegistry, Subscriber};
pub use session::ClientSession;
