//! # NylonSock Core
//!
//! Core types for event-oriented messaging over stream sockets.
//!
//! This crate provides:
//! - [`Frame`] - one wire unit carrying an event name and a payload
//! - [`FrameCodec`] - length-prefixed framing with partial-read reassembly
//! - [`SockData`] - opaque payload value with scalar conversions
//! - Error types for encoding/decoding operations
//!
//! No I/O happens here; the codec is a pure function of bytes.

pub mod codec;
pub mod data;
pub mod error;
pub mod frame;

pub use codec::{FrameCodec, encode};
pub use data::SockData;
pub use error::{Error, FrameField, Result};
pub use frame::{Frame, HEADER_LEN, MAX_FIELD_LEN};
