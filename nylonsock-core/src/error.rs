//! Error types for NylonSock core operations.

use std::fmt;
use thiserror::Error;

/// Which length-prefixed field of a frame an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameField {
    /// The event name.
    Event,
    /// The payload.
    Payload,
}

impl fmt::Display for FrameField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Event => f.write_str("event name"),
            Self::Payload => f.write_str("payload"),
        }
    }
}

/// Core error type for NylonSock operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A locally supplied field does not fit in its 16-bit length prefix.
    #[error("frame too large: {field} of {size} bytes exceeds maximum {max} bytes")]
    FrameTooLarge {
        /// Offending field.
        field: FrameField,
        /// Actual size in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },

    /// An inbound frame violates the wire format.
    #[error("protocol error: {message}")]
    Protocol {
        /// Error message.
        message: String,
    },

    /// A payload could not be converted to the requested type.
    #[error("failed to convert payload into {target}")]
    Convert {
        /// Name of the requested type.
        target: &'static str,
    },

    /// IO error surfaced through the codec traits.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Creates a frame too large error.
    pub fn frame_too_large(field: FrameField, size: usize, max: usize) -> Self {
        Self::FrameTooLarge { field, size, max }
    }

    /// Creates a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }
}

/// Result type alias for NylonSock core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_too_large_display() {
        let err = Error::frame_too_large(FrameField::Payload, 70000, 65535);
        assert_eq!(
            err.to_string(),
            "frame too large: payload of 70000 bytes exceeds maximum 65535 bytes"
        );
    }

    #[test]
    fn test_protocol_display() {
        let err = Error::protocol("bad header");
        assert_eq!(err.to_string(), "protocol error: bad header");
    }
}
