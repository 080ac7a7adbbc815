//! Error types for dhcpmux
//!
//! This module defines the error taxonomy shared by the relay controller,
//! the fan-out receiver and the client sessions.

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Main error type for relay operations
#[derive(Error, Debug)]
pub enum RelayError {
    /// `start()` was called on a component whose worker is still alive
    #[error("Already running: {0}")]
    AlreadyRunning(String),

    /// A listening or receiving socket could not be acquired
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Address that could not be bound
        addr: SocketAddr,
        /// Underlying socket error
        #[source]
        source: io::Error,
    },

    /// Malformed request frame
    #[error("Decode error: {0}")]
    Decode(String),

    /// Failure isolated to a single session or datagram
    #[error("Transient IO error: {0}")]
    TransientIo(String),

    /// Anything else surfacing inside a worker loop
    #[error("Unexpected error: {0}")]
    Unexpected(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl RelayError {
    /// Build a [`RelayError::Bind`] for the given address
    pub fn bind(addr: SocketAddr, source: io::Error) -> Self {
        RelayError::Bind { addr, source }
    }

    /// Whether the error only affects a single session or datagram
    pub fn is_transient(&self) -> bool {
        matches!(self, RelayError::TransientIo(_) | RelayError::Decode(_))
    }
}

/// Result alias for relay operations
pub type RelayResult<T> = std::result::Result<T, RelayError>;
