//! Error types for lifestream-transport.

use std::time::Duration;

use thiserror::Error;

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by `start`/`connect`.
///
/// Failures that happen after an engine is up (inside a receive loop, a
/// session writer, a pool job) are logged and turned into a close or
/// disconnect instead of being returned.
#[derive(Debug, Error)]
pub enum Error {
    /// Address is malformed, or not multicast where multicast is required.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// `connect` called while a connection exists or is being established.
    #[error("client is already connected")]
    AlreadyConnected,

    /// `start` called on a server that is not stopped.
    #[error("server is already running")]
    AlreadyRunning,

    /// Engine family name could not be parsed.
    #[error("unknown engine: {0}")]
    UnknownEngine(String),

    /// Socket or stream failure.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// WebSocket upgrade was refused or broke mid-way.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The executor cannot run the requested operation.
    #[error("runtime unavailable: {0}")]
    Runtime(&'static str),

    /// The handshake did not complete in time.
    #[error("handshake timed out after {0:?}")]
    Timeout(Duration),

    /// A datagram went out truncated. Logged, never returned.
    #[error("could not send complete datagram: expected {expected} bytes, sent {sent}")]
    PartialSend { expected: usize, sent: usize },
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::Handshake(e.to_string())
    }
}
