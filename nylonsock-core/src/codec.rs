//! Event frame codec.
//!
//! Provides length-prefixed framing for event frames over byte streams. The
//! decoder is re-entrant: it never consumes bytes until a whole frame is
//! buffered, so a stream delivered one byte at a time still reassembles.

use crate::error::{Error, FrameField, Result};
use crate::frame::{Frame, HEADER_LEN, MAX_FIELD_LEN, check_len};
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Encodes one frame from raw parts into a fresh buffer.
///
/// Output is `u16be(len(event)) || u16be(len(payload)) || event || payload`.
///
/// # Errors
/// Returns [`Error::FrameTooLarge`] if either part exceeds [`MAX_FIELD_LEN`];
/// no bytes are produced in that case.
pub fn encode(event: &[u8], payload: &[u8]) -> Result<BytesMut> {
    let mut dst = BytesMut::new();
    write_frame(event, payload, MAX_FIELD_LEN, &mut dst)?;
    Ok(dst)
}

fn write_frame(event: &[u8], payload: &[u8], max_payload: usize, dst: &mut BytesMut) -> Result<()> {
    // Validate everything before touching dst
    check_len(FrameField::Event, event.len(), MAX_FIELD_LEN)?;
    check_len(FrameField::Payload, payload.len(), max_payload)?;

    dst.reserve(HEADER_LEN + event.len() + payload.len());
    dst.put_u16(event.len() as u16);
    dst.put_u16(payload.len() as u16);
    dst.put_slice(event);
    dst.put_slice(payload);
    Ok(())
}

/// Length-prefixed codec for event frames.
///
/// Frame format: `[2-byte event len (BE)][2-byte payload len (BE)][event][payload]`
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_payload_len: usize,
}

impl FrameCodec {
    /// Creates a new codec accepting payloads up to `max_payload_len` bytes.
    ///
    /// The limit is clamped to [`MAX_FIELD_LEN`], the largest value the 16-bit
    /// length prefix can express.
    #[must_use]
    pub fn new(max_payload_len: usize) -> Self {
        Self {
            max_payload_len: max_payload_len.min(MAX_FIELD_LEN),
        }
    }

    /// Returns the maximum payload size.
    #[must_use]
    pub fn max_payload_len(&self) -> usize {
        self.max_payload_len
    }

    /// Returns true if `src` already holds at least one complete frame.
    #[must_use]
    pub fn has_frame(&self, src: &[u8]) -> bool {
        match peek_lengths(src) {
            Some((event_len, payload_len)) => src.len() >= HEADER_LEN + event_len + payload_len,
            None => false,
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(MAX_FIELD_LEN)
    }
}

fn peek_lengths(src: &[u8]) -> Option<(usize, usize)> {
    if src.len() < HEADER_LEN {
        return None;
    }
    let event_len = u16::from_be_bytes([src[0], src[1]]) as usize;
    let payload_len = u16::from_be_bytes([src[2], src[3]]) as usize;
    Some((event_len, payload_len))
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        // Need the whole header before anything else is known
        let Some((event_len, payload_len)) = peek_lengths(src) else {
            src.reserve(HEADER_LEN - src.len());
            return Ok(None);
        };

        if payload_len > self.max_payload_len {
            return Err(Error::protocol(format!(
                "payload length {} exceeds maximum {}",
                payload_len, self.max_payload_len
            )));
        }

        let total = HEADER_LEN + event_len + payload_len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let event = src.split_to(event_len).freeze();
        let payload = src.split_to(payload_len).freeze();

        Ok(Some(Frame::from_parts(event, payload)))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<()> {
        write_frame(item.event(), item.payload(), self.max_payload_len, dst)
    }
}

impl Encoder<(&[u8], &[u8])> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, (event, payload): (&[u8], &[u8]), dst: &mut BytesMut) -> Result<()> {
        write_frame(event, payload, self.max_payload_len, dst)
    }
}
