//! Lifecycle state machine shared by the relay components
//!
//! Every long-lived component (controller, fan-out receiver, client session)
//! exposes the same small state machine. The current state lives in a
//! [`StatusCell`], which can be read synchronously from any thread and can
//! also be awaited by a worker that needs to react to a transition.

use crate::error::RelayResult;
use async_trait::async_trait;
use std::fmt;
use tokio::sync::watch;

/// Lifecycle state of a relay component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Constructed, `start()` not called yet
    StartPending,
    /// `start()` called, worker not running yet
    Starting,
    /// Worker is running
    Running,
    /// Accept loop suspended (controller only)
    Paused,
    /// `stop()` called, worker winding down
    StopPending,
    /// Worker finished, resources released
    Stopped,
}

impl Status {
    /// Whether the component still owns a live worker or resources
    pub fn is_active(self) -> bool {
        matches!(self, Status::Starting | Status::Running | Status::Paused)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::StartPending => "START_PENDING",
            Status::Starting => "STARTING",
            Status::Running => "RUNNING",
            Status::Paused => "PAUSED",
            Status::StopPending => "STOP_PENDING",
            Status::Stopped => "STOPPED",
        };
        f.write_str(name)
    }
}

/// Mutex-guarded status value that workers can also wait on
#[derive(Debug)]
pub struct StatusCell {
    tx: watch::Sender<Status>,
}

impl StatusCell {
    /// Create a cell holding `initial`
    pub fn new(initial: Status) -> Self {
        let (tx, _rx) = watch::channel(initial);
        StatusCell { tx }
    }

    /// Current status
    pub fn get(&self) -> Status {
        *self.tx.borrow()
    }

    /// Unconditionally set the status, returning the previous one
    pub fn set(&self, status: Status) -> Status {
        self.tx.send_replace(status)
    }

    /// Set `to` only if the current status is `from`
    ///
    /// Returns `true` when the transition happened.
    pub fn transition(&self, from: Status, to: Status) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == from {
                *current = to;
                true
            } else {
                false
            }
        })
    }

    /// Subscribe to status changes
    pub fn subscribe(&self) -> watch::Receiver<Status> {
        self.tx.subscribe()
    }
}

impl Default for StatusCell {
    fn default() -> Self {
        StatusCell::new(Status::StartPending)
    }
}

/// A long-lived unit of work with an explicit lifecycle
#[async_trait]
pub trait Fiber: Send + Sync {
    /// Name used in diagnostics
    fn name(&self) -> &str;

    /// Current lifecycle state
    fn status(&self) -> Status;

    /// Start the worker
    async fn start(&self) -> RelayResult<()>;

    /// Request the worker to stop and wait for it to wind down
    async fn stop(&self);
}

/// A fiber whose main loop can be suspended without tearing it down
pub trait PausableFiber: Fiber {
    /// Suspend the main loop
    fn pause(&self);

    /// Resume a suspended main loop
    fn resume(&self);
}
