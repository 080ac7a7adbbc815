//! Per-connection client session
//!
//! A session owns one accepted TCP connection. Its worker reads request
//! frames and forwards each payload to the requested DHCP server over UDP,
//! and writes back whatever the fan-out receiver hands to [`deliver`].
//!
//! [`deliver`]: Subscriber::deliver

use super::registry::{SessionId, SessionRegistry, Subscriber};
use crate::config::RelayConfig;
use crate::error::{RelayError, RelayResult};
use crate::lifecycle::{Fiber, Status, StatusCell};
use crate::protocol::{RelayCodec, RelayMessage, RelayRequest};
use crate::transport::bind_udp;
use async_trait::async_trait;
use futures::{FutureExt, SinkExt, StreamExt};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Resources moved into the worker on start
struct SessionIo {
    stream: TcpStream,
    outbound_rx: mpsc::Receiver<RelayMessage>,
    registry: SessionRegistry,
}

/// Where a session is in its one-shot lifecycle
enum SessionState {
    Idle(SessionIo),
    Started(JoinHandle<()>),
    Finished,
}

/// One TCP-connected relay client
pub struct ClientSession {
    id: SessionId,
    name: String,
    peer: SocketAddr,
    server_port: u16,
    max_payload: u32,
    status: Arc<StatusCell>,
    outbound_tx: mpsc::Sender<RelayMessage>,
    cancel: CancellationToken,
    state: Mutex<SessionState>,
}

impl ClientSession {
    /// Wrap an accepted connection; nothing runs until [`Fiber::start`]
    ///
    /// When the session stops it removes itself from `registry`.
    pub fn new(
        id: SessionId,
        stream: TcpStream,
        peer: SocketAddr,
        registry: SessionRegistry,
        config: &RelayConfig,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_queue.max(1));
        ClientSession {
            id,
            name: format!("DHCPClient-{}@{}", id, peer),
            peer,
            server_port: config.server_port,
            max_payload: config.max_payload,
            status: Arc::new(StatusCell::default()),
            outbound_tx,
            cancel: CancellationToken::new(),
            state: Mutex::new(SessionState::Idle(SessionIo {
                stream,
                outbound_rx,
                registry,
            })),
        }
    }

    /// Remote address of the connected client
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Fiber for ClientSession {
    fn name(&self) -> &str {
        &self.name
    }

    fn status(&self) -> Status {
        self.status.get()
    }

    async fn start(&self) -> RelayResult<()> {
        // Held until the handle is stored; stop() joins whatever it finds.
        let mut state = self.lock_state();
        let io = match std::mem::replace(&mut *state, SessionState::Finished) {
            SessionState::Idle(io) => io,
            other => {
                *state = other;
                return Err(RelayError::AlreadyRunning(self.name.clone()));
            }
        };

        self.status.set(Status::Starting);

        let worker = SessionWorker {
            id: self.id,
            name: self.name.clone(),
            server_port: self.server_port,
            status: self.status.clone(),
            cancel: self.cancel.clone(),
            registry: io.registry,
        };
        let framed = Framed::new(io.stream, RelayCodec::new(self.max_payload));
        *state = SessionState::Started(tokio::spawn(worker.run(framed, io.outbound_rx)));
        Ok(())
    }

    async fn stop(&self) {
        let previous = std::mem::replace(&mut *self.lock_state(), SessionState::Finished);

        match previous {
            // Never started: release the socket and deregister here.
            SessionState::Idle(io) => {
                self.status.set(Status::Stopped);
                io.registry.remove(self.id);
                debug!("{}: stopped before start", self.name);
            }
            SessionState::Started(handle) => {
                self.cancel.cancel();
                if let Err(e) = handle.await {
                    error!("{}: worker failed to join: {}", self.name, e);
                    self.status.set(Status::Stopped);
                }
            }
            SessionState::Finished => {}
        }
    }
}

impl Subscriber for ClientSession {
    fn id(&self) -> SessionId {
        self.id
    }

    fn deliver(&self, msg: &RelayMessage) -> RelayResult<()> {
        self.outbound_tx.try_send(msg.clone()).map_err(|e| match e {
            TrySendError::Full(_) => RelayError::TransientIo(format!(
                "{}: outbound queue full, dropping response",
                self.name
            )),
            TrySendError::Closed(_) => {
                RelayError::TransientIo(format!("{}: connection closed", self.name))
            }
        })
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// State owned by the spawned session task
struct SessionWorker {
    id: SessionId,
    name: String,
    server_port: u16,
    status: Arc<StatusCell>,
    cancel: CancellationToken,
    registry: SessionRegistry,
}

impl SessionWorker {
    async fn run(
        self,
        framed: Framed<TcpStream, RelayCodec>,
        outbound_rx: mpsc::Receiver<RelayMessage>,
    ) {
        if self.status.transition(Status::Starting, Status::Running) {
            info!("{}: session started", self.name);

            let result = AssertUnwindSafe(self.request_loop(framed, outbound_rx))
                .catch_unwind()
                .await;

            match result {
                Ok(Ok(())) => debug!("{}: session closed", self.name),
                Ok(Err(e)) if e.is_transient() => warn!("{}: closing session: {}", self.name, e),
                Ok(Err(e)) => error!("{}: closing session: {}", self.name, e),
                Err(_) => error!(
                    "{}: {}",
                    self.name,
                    RelayError::Unexpected("session worker panicked".to_string())
                ),
            }
        }

        self.status.set(Status::Stopped);
        self.registry.remove(self.id);
        info!("{}: session stopped", self.name);
    }

    async fn request_loop(
        &self,
        mut framed: Framed<TcpStream, RelayCodec>,
        mut outbound_rx: mpsc::Receiver<RelayMessage>,
    ) -> RelayResult<()> {
        let mut forwarder: Option<UdpSocket> = None;

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    debug!("{}: stop requested", self.name);
                    return Ok(());
                }

                Some(msg) = outbound_rx.recv() => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Ok(()),
                        sent = framed.send(msg) => {
                            // A dead peer is noticed by the next read.
                            if let Err(e) = sent {
                                warn!("{}: failed to write response: {}", self.name, e);
                            }
                        }
                    }
                }

                frame = framed.next() => match frame {
                    None => {
                        debug!("{}: peer closed the connection", self.name);
                        return Ok(());
                    }
                    Some(Err(e)) => return Err(e),
                    Some(Ok(request)) if request.is_sentinel() => {
                        debug!("{}: received termination request", self.name);
                        return Ok(());
                    }
                    Some(Ok(request)) => {
                        if let Err(e) = self.forward(&mut forwarder, &request).await {
                            warn!("{}: {}", self.name, e);
                        }
                    }
                },
            }
        }
    }

    /// Send the request payload to `target:server_port`
    async fn forward(
        &self,
        forwarder: &mut Option<UdpSocket>,
        request: &RelayRequest,
    ) -> RelayResult<()> {
        let socket = match forwarder {
            Some(socket) => socket,
            None => forwarder.insert(open_forwarder()?),
        };

        let dest = SocketAddrV4::new(request.target, self.server_port);
        socket
            .send_to(&request.payload, dest)
            .await
            .map_err(|e| RelayError::TransientIo(format!("failed to send to {}: {}", dest, e)))?;

        debug!(
            "{}: forwarded {} bytes to {}",
            self.name,
            request.payload.len(),
            dest
        );
        Ok(())
    }
}

/// Unbound-address UDP socket used for every request of one session
fn open_forwarder() -> RelayResult<UdpSocket> {
    bind_udp(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))).map_err(|e| {
        RelayError::TransientIo(format!("failed to open forwarding socket: {}", e))
    })
}
