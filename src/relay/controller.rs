//! Relay controller
//!
//! Owns the TCP listener and the session registry, runs the accept loop and
//! drives the daemon lifecycle:
//!
//! ```text
//! START_PENDING ──start()──▶ STARTING ──▶ RUNNING ◀──resume()── PAUSED
//!                               │            │ └─────pause()─────▲
//!                          bind failure   stop()
//!                               ▼            ▼
//!                            STOPPED ◀── STOP_PENDING
//! ```

use super::receiver::FanoutReceiver;
use super::registry::{SessionId, SessionRegistry, Subscriber};
use super::session::ClientSession;
use crate::config::{ConfigSource, RelayConfig};
use crate::error::{RelayError, RelayResult};
use crate::lifecycle::{Fiber, PausableFiber, Status, StatusCell};
use crate::transport::SocketOpts;
use async_trait::async_trait;
use futures::FutureExt;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Pause after a failed accept before trying again
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Resources that only exist while the controller runs
struct RunState {
    local_addr: SocketAddr,
    receiver: FanoutReceiver,
    cancel: CancellationToken,
    worker: JoinHandle<()>,
}

/// The DHCP relay daemon
pub struct RelayController {
    name: String,
    source: ConfigSource,
    status: Arc<StatusCell>,
    registry: SessionRegistry,
    next_id: Arc<AtomicU64>,
    state: Mutex<Option<RunState>>,
}

impl RelayController {
    /// Create a controller; no socket is opened until [`Fiber::start`]
    pub fn new(source: impl Into<ConfigSource>) -> Self {
        RelayController {
            name: "dhcpmux".to_string(),
            source: source.into(),
            status: Arc::new(StatusCell::default()),
            registry: SessionRegistry::new(),
            next_id: Arc::new(AtomicU64::new(1)),
            state: Mutex::new(None),
        }
    }

    /// TCP address the controller listens on while running
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.state.lock().await.as_ref().map(|s| s.local_addr)
    }

    /// UDP address the fan-out receiver listens on while running
    pub async fn receiver_addr(&self) -> Option<SocketAddr> {
        self.state
            .lock()
            .await
            .as_ref()
            .map(|s| s.receiver.local_addr())
    }

    /// Number of registered sessions
    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    /// The shared session registry
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Open the listener and the receiver, closing both on failure
    async fn open(&self, config: &RelayConfig) -> RelayResult<(TcpListener, FanoutReceiver)> {
        debug!("start: listening on {} for incoming client requests", config.listen_addr);
        let listener = TcpListener::bind(config.listen_addr)
            .await
            .map_err(|e| RelayError::bind(config.listen_addr, e))?;

        debug!("start: starting DHCP receiver on {}", config.receiver_addr());
        // On error the listener is dropped, closing it.
        let receiver = FanoutReceiver::bind(config.receiver_addr(), self.registry.clone())?;
        receiver.start().await?;

        Ok((listener, receiver))
    }

    /// Tear down a run: receiver, listener, then every session
    async fn shutdown(&self, run: RunState) {
        self.status.set(Status::StopPending);

        run.receiver.stop().await;

        run.cancel.cancel();
        if let Err(e) = run.worker.await {
            error!(
                "{}",
                RelayError::Unexpected(format!("accept worker failed: {}", e))
            );
        }

        let sessions = self.registry.snapshot();
        debug!("stop: closing {} client sessions", sessions.len());
        futures::future::join_all(sessions.iter().map(|s| s.stop())).await;

        self.registry.clear();
        self.status.set(Status::Stopped);
    }
}

#[async_trait]
impl Fiber for RelayController {
    fn name(&self) -> &str {
        &self.name
    }

    fn status(&self) -> Status {
        self.status.get()
    }

    async fn start(&self) -> RelayResult<()> {
        let mut state = self.state.lock().await;

        if let Some(run) = state.as_ref() {
            if !run.worker.is_finished() {
                return Err(RelayError::AlreadyRunning(self.name.clone()));
            }
        }
        // The worker died on its own; clean up before starting over.
        if let Some(run) = state.take() {
            self.shutdown(run).await;
        }

        debug!("start: DHCP relay daemon starting...");
        self.registry.clear();
        self.status.set(Status::Starting);

        let opened = match self.source.load() {
            Ok(config) => self.open(&config).await.map(|sockets| (config, sockets)),
            Err(e) => {
                error!("Failed to load relay configuration: {:#}", e);
                Err(RelayError::Config(format!("{:#}", e)))
            }
        };
        let (config, (listener, receiver)) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                self.status.set(Status::Stopped);
                return Err(e);
            }
        };

        let local_addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                receiver.stop().await;
                self.status.set(Status::Stopped);
                return Err(e.into());
            }
        };

        let cancel = CancellationToken::new();
        let acceptor = Acceptor {
            config,
            registry: self.registry.clone(),
            status: self.status.clone(),
            cancel: cancel.clone(),
            next_id: self.next_id.clone(),
        };

        self.status.set(Status::Running);
        let worker = tokio::spawn(acceptor.run(listener));

        info!(
            "{} running: accepting clients on {}, receiving DHCP responses on {}",
            self.name,
            local_addr,
            receiver.local_addr()
        );
        *state = Some(RunState {
            local_addr,
            receiver,
            cancel,
            worker,
        });
        Ok(())
    }

    async fn stop(&self) {
        let mut state = self.state.lock().await;
        let Some(run) = state.take() else {
            return;
        };

        info!("{} stopping", self.name);
        self.shutdown(run).await;
        info!("{} stopped", self.name);
    }
}

impl PausableFiber for RelayController {
    fn pause(&self) {
        if self.status.transition(Status::Running, Status::Paused) {
            info!("{} paused", self.name);
        } else {
            debug!("pause ignored in state {}", self.status.get());
        }
    }

    fn resume(&self) {
        if self.status.transition(Status::Paused, Status::Running) {
            info!("{} resumed", self.name);
        } else {
            debug!("resume ignored in state {}", self.status.get());
        }
    }
}

/// State owned by the accept loop task
struct Acceptor {
    config: RelayConfig,
    registry: SessionRegistry,
    status: Arc<StatusCell>,
    cancel: CancellationToken,
    next_id: Arc<AtomicU64>,
}

impl Acceptor {
    async fn run(self, listener: TcpListener) {
        let status = self.status.clone();
        let result = AssertUnwindSafe(self.accept_loop(listener))
            .catch_unwind()
            .await;

        if result.is_err() {
            error!(
                "{}",
                RelayError::Unexpected("accept loop panicked".to_string())
            );
            status.set(Status::Stopped);
        }
    }

    async fn accept_loop(&self, listener: TcpListener) {
        let mut watcher = self.status.subscribe();
        let poll_interval = self.config.poll_interval();

        loop {
            let current = *watcher.borrow_and_update();
            match current {
                Status::Running => {}
                Status::Paused => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        changed = watcher.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                    continue;
                }
                _ => break,
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                changed = watcher.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                accepted = tokio::time::timeout(poll_interval, listener.accept()) => match accepted {
                    Err(_elapsed) => {}
                    Ok(Ok((stream, peer))) => self.spawn_session(stream, peer).await,
                    Ok(Err(e)) => {
                        if self.status.get() == Status::Running {
                            error!("I/O error accepting client connection: {}", e);
                        }
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
            }
        }

        drop(listener);
        debug!("accept loop exited");
    }

    async fn spawn_session(&self, stream: TcpStream, peer: SocketAddr) {
        debug!("got connection request from {}, creating client handler", peer);

        if let Err(e) = SocketOpts::for_session(self.config.nodelay).apply(&stream) {
            warn!("Failed to apply socket options for {}: {}", peer, e);
        }

        let id: SessionId = self.next_id.fetch_add(1, Ordering::Relaxed);
        let session = Arc::new(ClientSession::new(
            id,
            stream,
            peer,
            self.registry.clone(),
            &self.config,
        ));
        self.registry.insert(session.clone());

        if let Err(e) = session.start().await {
            if self.status.get() == Status::Running {
                error!("Failed to start client handler for {}: {}", peer, e);
            }
            self.registry.remove(session.id());
        }
    }
}
