//! Error types for transport operations.

use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Error type for transport operations.
///
/// Would-block is deliberately absent: a non-blocking read or accept that
/// finds nothing is reported as "nothing ready", never as an error.
#[derive(Debug, Error)]
pub enum TransportError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed the stream gracefully (zero-length read).
    #[error("connection closed by peer")]
    OrderlyClose,

    /// The peer reset the connection.
    #[error("connection reset by peer")]
    PeerReset,

    /// The handle was already released.
    #[error("transport handle released")]
    Released,

    /// Address resolution failed.
    #[error("failed to resolve {target}: {message}")]
    Resolve {
        /// Host and port being resolved.
        target: String,
        /// Error message.
        message: String,
    },

    /// Every resolved address candidate refused the connection.
    #[error("failed to connect to {target} after {attempts} attempt(s): {last_error}")]
    ConnectFailed {
        /// Host and port being connected to.
        target: String,
        /// Number of candidates tried.
        attempts: usize,
        /// Last error observed.
        last_error: String,
    },

    /// Creating, binding or listening on the server socket failed.
    #[error("failed to listen on {addr}: {source}")]
    Listen {
        /// Requested bind address.
        addr: SocketAddr,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// The peer did not drain its receive buffer in time.
    #[error("send timed out after {timeout:?}")]
    SendTimeout {
        /// Configured send timeout.
        timeout: Duration,
    },

    /// Address parse error.
    #[error("address parse error: {0}")]
    AddrParse(#[from] std::net::AddrParseError),
}

impl TransportError {
    /// Creates a listen error.
    pub fn listen(addr: SocketAddr, source: std::io::Error) -> Self {
        Self::Listen { addr, source }
    }

    /// Returns true if the error means the peer is gone.
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::OrderlyClose | Self::PeerReset | Self::Released)
    }
}

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_disconnect() {
        assert!(TransportError::OrderlyClose.is_disconnect());
        assert!(TransportError::PeerReset.is_disconnect());
        assert!(TransportError::Released.is_disconnect());
        assert!(
            !TransportError::Io(std::io::Error::other("boom")).is_disconnect()
        );
    }

    #[test]
    fn test_connect_failed_display() {
        let err = TransportError::ConnectFailed {
            target: "localhost:3490".to_string(),
            attempts: 2,
            last_error: "connection refused".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "failed to connect to localhost:3490 after 2 attempt(s): connection refused"
        );
    }
}
