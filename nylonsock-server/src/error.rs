//! Error types for server operations.

use thiserror::Error;

/// Error type for server operations.
#[derive(Debug, Error)]
pub enum ServerError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport error (bind, listen or accept).
    #[error("transport error: {0}")]
    Transport(#[from] nylonsock_transport::TransportError),

    /// A broadcast frame could not be encoded.
    #[error("frame error: {0}")]
    Frame(#[from] nylonsock_core::Error),

    /// Connection error.
    #[error("session error: {0}")]
    Session(#[from] nylonsock_session::SessionError),

    /// The listener was lost when the event loop failed to start.
    #[error("listener unavailable")]
    ListenerUnavailable,
}

/// Result type alias for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;
