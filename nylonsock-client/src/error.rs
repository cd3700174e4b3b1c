//! Error types for client operations.

use thiserror::Error;

/// Error type for client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport error, including `ConnectFailed` when no address candidate
    /// accepted the connection.
    #[error("transport error: {0}")]
    Transport(#[from] nylonsock_transport::TransportError),

    /// Connection error.
    #[error("session error: {0}")]
    Session(#[from] nylonsock_session::SessionError),

    /// The client was stopped.
    #[error("client stopped")]
    Stopped,

    /// Connection closed by server.
    #[error("connection closed")]
    ConnectionClosed,
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
