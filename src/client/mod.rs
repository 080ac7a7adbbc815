//! Relay client
//!
//! Client half of the relay protocol: connects to a running daemon, sends
//! framed requests and reads back the responses it fans out.

mod probe;

pub use probe::{is_server, is_server_with_defaults};

use crate::protocol::{ClientCodec, RelayMessage, RelayRequest};
use crate::transport::SocketOpts;
use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::debug;

/// Default connection timeout in seconds
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Connection to a relay daemon
pub struct RelayClient {
    framed: Framed<TcpStream, ClientCodec>,
}

impl RelayClient {
    /// Connect to the relay at `addr` (e.g., "127.0.0.1:5818")
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = tokio::time::timeout(
            Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            TcpStream::connect(addr),
        )
        .await
        .with_context(|| format!("Connection timeout to {}", addr))?
        .with_context(|| format!("Failed to connect to {}", addr))?;

        SocketOpts::default().apply(&stream)?;
        debug!("Connected to relay at {}", addr);

        Ok(RelayClient {
            framed: Framed::new(stream, ClientCodec::default()),
        })
    }

    /// Ask the relay to forward `request`
    pub async fn send_request(&mut self, request: RelayRequest) -> Result<()> {
        self.framed
            .send(request)
            .await
            .with_context(|| "Failed to send relay request")
    }

    /// Next fanned-out response; `None` once the relay closed the connection
    pub async fn next_message(&mut self) -> Result<Option<RelayMessage>> {
        match self.framed.next().await {
            Some(msg) => Ok(Some(msg.with_context(|| "Failed to read relay message")?)),
            None => Ok(None),
        }
    }

    /// Send the termination frame and drop the connection
    pub async fn close(mut self) -> Result<()> {
        self.framed
            .send(RelayRequest::sentinel())
            .await
            .with_context(|| "Failed to send termination request")
    }
}
