//! Error types for connection operations.

use thiserror::Error;

/// Error type for connection operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The connection was already destroyed.
    #[error("connection is not active")]
    NotActive,

    /// Framing error (oversized outbound frame or malformed inbound frame).
    #[error("frame error: {0}")]
    Frame(#[from] nylonsock_core::Error),

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] nylonsock_transport::TransportError),

    /// IO error from the readiness multiplexer.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for connection operations.
pub type Result<T> = std::result::Result<T, SessionError>;
