//! Fan-out receiver
//!
//! Owns the UDP socket bound to the DHCP client port. Every datagram that
//! arrives is handed to all running sessions; there is no transaction key a
//! response could be routed by, so each client decides for itself whether a
//! response belongs to one of its requests.

use super::registry::SessionRegistry;
use crate::error::{RelayError, RelayResult};
use crate::lifecycle::{Fiber, Status, StatusCell};
use crate::protocol::RelayMessage;
use crate::transport::bind_udp;
use async_trait::async_trait;
use bytes::Bytes;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Receive buffer size for a single datagram
pub const DATAGRAM_BUFFER_LEN: usize = 2048;

/// Listener for DHCP responses on the client port
pub struct FanoutReceiver {
    name: String,
    local_addr: SocketAddr,
    status: Arc<StatusCell>,
    registry: SessionRegistry,
    socket: Mutex<Option<UdpSocket>>,
    cancel: CancellationToken,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl FanoutReceiver {
    /// Bind the receiving socket
    ///
    /// Fails with [`RelayError::Bind`] when the port is taken or privileged.
    pub fn bind(addr: SocketAddr, registry: SessionRegistry) -> RelayResult<Self> {
        let socket = bind_udp(addr).map_err(|e| RelayError::bind(addr, e))?;
        let local_addr = socket.local_addr()?;
        debug!("DHCP receiver bound to {}", local_addr);

        Ok(FanoutReceiver {
            name: "DHCPReceiver".to_string(),
            local_addr,
            status: Arc::new(StatusCell::default()),
            registry,
            socket: Mutex::new(Some(socket)),
            cancel: CancellationToken::new(),
            worker: tokio::sync::Mutex::new(None),
        })
    }

    /// Address the receiver is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn take_socket(&self) -> Option<UdpSocket> {
        self.socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

#[async_trait]
impl Fiber for FanoutReceiver {
    fn name(&self) -> &str {
        &self.name
    }

    fn status(&self) -> Status {
        self.status.get()
    }

    async fn start(&self) -> RelayResult<()> {
        let socket = self
            .take_socket()
            .ok_or_else(|| RelayError::AlreadyRunning(self.name.clone()))?;

        self.status.set(Status::Starting);
        let handle = tokio::spawn(receive_loop(
            socket,
            self.registry.clone(),
            self.status.clone(),
            self.cancel.clone(),
        ));
        *self.worker.lock().await = Some(handle);
        Ok(())
    }

    async fn stop(&self) {
        if self.status.get() == Status::Stopped {
            return;
        }
        self.status.set(Status::StopPending);
        self.cancel.cancel();

        // Releases the socket if the receiver was never started.
        drop(self.take_socket());

        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("{}: worker failed to join: {}", self.name, e);
            }
        }

        self.status.set(Status::Stopped);
        info!("{}: stopped", self.name);
    }
}

impl Drop for FanoutReceiver {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn source_ipv4(addr: &SocketAddr) -> Option<Ipv4Addr> {
    match addr.ip() {
        IpAddr::V4(v4) => Some(v4),
        IpAddr::V6(v6) => v6.to_ipv4_mapped(),
    }
}

async fn receive_loop(
    socket: UdpSocket,
    registry: SessionRegistry,
    status: Arc<StatusCell>,
    cancel: CancellationToken,
) {
    if !status.transition(Status::Starting, Status::Running) {
        return;
    }
    info!("DHCP receiver listening on {:?}", socket.local_addr());

    let mut buf = vec![0u8; DATAGRAM_BUFFER_LEN];

    loop {
        let (len, from) = tokio::select! {
            _ = cancel.cancelled() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok(received) => received,
                Err(e) => {
                    if status.get() == Status::Running {
                        error!("Failed to read datagram, I/O error: {}", e);
                    }
                    break;
                }
            },
        };

        let Some(source) = source_ipv4(&from) else {
            debug!("Ignoring datagram from non-IPv4 sender {}", from);
            continue;
        };

        debug!("Received {} byte DHCP response from {}", len, from);
        let msg = RelayMessage::new(source, Bytes::copy_from_slice(&buf[..len]));
        let report = registry.fan_out(&msg);
        debug!(
            "Forwarded response from {} to {} sessions ({} failed, {} pruned)",
            source, report.delivered, report.failed, report.pruned
        );
    }

    drop(socket);
    status.set(Status::Stopped);
}
