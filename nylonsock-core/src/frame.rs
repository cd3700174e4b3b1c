//! The event frame wire unit.
//!
//! Wire layout (bit-exact, no magic, no version, no checksum):
//!
//! ```text
//! +----------------+------------------+------------------+---------------+
//! | event len u16  | payload len u16  | event name bytes | payload bytes |
//! | (big-endian)   | (big-endian)     |                  |               |
//! +----------------+------------------+------------------+---------------+
//! ```

use crate::error::{Error, FrameField, Result};
use bytes::Bytes;

/// Size of the fixed header: two big-endian `u16` length fields.
pub const HEADER_LEN: usize = 4;

/// Largest event name or payload a frame can carry.
pub const MAX_FIELD_LEN: usize = u16::MAX as usize;

/// One wire unit carrying an event name and a payload.
///
/// Frames are immutable once constructed. Both fields are raw bytes; the
/// event name is usually UTF-8 but the wire format does not require it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Frame {
    event: Bytes,
    payload: Bytes,
}

impl Frame {
    /// Creates a frame, validating both length bounds.
    ///
    /// # Errors
    /// Returns [`Error::FrameTooLarge`] if either field exceeds [`MAX_FIELD_LEN`].
    pub fn new(event: impl Into<Bytes>, payload: impl Into<Bytes>) -> Result<Self> {
        let event = event.into();
        let payload = payload.into();
        check_len(FrameField::Event, event.len(), MAX_FIELD_LEN)?;
        check_len(FrameField::Payload, payload.len(), MAX_FIELD_LEN)?;
        Ok(Self { event, payload })
    }

    /// Builds a frame from parts that were already bounds-checked by the decoder.
    pub(crate) fn from_parts(event: Bytes, payload: Bytes) -> Self {
        Self { event, payload }
    }

    /// Returns the raw event name.
    #[must_use]
    pub fn event(&self) -> &[u8] {
        &self.event
    }

    /// Returns the event name as UTF-8, if it is valid UTF-8.
    #[must_use]
    pub fn event_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.event).ok()
    }

    /// Returns the raw payload.
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Total encoded size of this frame, header included.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.event.len() + self.payload.len()
    }

    /// Splits the frame into its event name and payload.
    #[must_use]
    pub fn into_parts(self) -> (Bytes, Bytes) {
        (self.event, self.payload)
    }
}

pub(crate) fn check_len(field: FrameField, size: usize, max: usize) -> Result<()> {
    if size > max {
        return Err(Error::frame_too_large(field, size, max));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_new() {
        let frame = Frame::new("ping", "42").unwrap();
        assert_eq!(frame.event(), b"ping");
        assert_eq!(frame.event_str(), Some("ping"));
        assert_eq!(frame.payload().as_ref(), b"42");
        assert_eq!(frame.encoded_len(), HEADER_LEN + 6);
    }

    #[test]
    fn test_frame_empty_fields() {
        let frame = Frame::new(Bytes::new(), Bytes::new()).unwrap();
        assert!(frame.event().is_empty());
        assert!(frame.payload().is_empty());
        assert_eq!(frame.encoded_len(), HEADER_LEN);
    }

    #[test]
    fn test_frame_max_field_accepted() {
        let event = vec![b'e'; MAX_FIELD_LEN];
        let payload = vec![b'p'; MAX_FIELD_LEN];
        assert!(Frame::new(event, payload).is_ok());
    }

    #[test]
    fn test_frame_event_too_large() {
        let event = vec![b'e'; MAX_FIELD_LEN + 1];
        let err = Frame::new(event, "x").unwrap_err();
        assert!(matches!(
            err,
            Error::FrameTooLarge {
                field: FrameField::Event,
                size,
                ..
            } if size == MAX_FIELD_LEN + 1
        ));
    }

    #[test]
    fn test_frame_payload_too_large() {
        let payload = vec![0u8; MAX_FIELD_LEN + 1];
        let err = Frame::new("e", payload).unwrap_err();
        assert!(matches!(
            err,
            Error::FrameTooLarge {
                field: FrameField::Payload,
                ..
            }
        ));
    }

    #[test]
    fn test_frame_non_utf8_event() {
        let frame = Frame::new(vec![0xff, 0xfe], "x").unwrap();
        assert_eq!(frame.event_str(), None);
        assert_eq!(frame.event(), &[0xff, 0xfe]);
    }
}
