//! The byte-stream interface a connection is built on.

use crate::error::Result;
use mio::event::Source;
use std::fmt;
use std::net::SocketAddr;

/// Outcome of a successful non-blocking read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recv {
    /// This many bytes were read (never zero).
    Data(usize),
    /// Nothing is available right now.
    WouldBlock,
}

/// A connected, non-blocking byte stream.
///
/// Implementations must be registrable with a [`crate::Poller`] and must
/// release their OS resources on drop, shutting the stream down before
/// closing it.
pub trait Transport: Source + Send + fmt::Debug {
    /// Writes all of `buf`, retrying partial writes until every byte is sent
    /// or a fatal error occurs.
    ///
    /// # Errors
    /// Returns `PeerReset`, `SendTimeout` or an IO error.
    fn send_all(&mut self, buf: &[u8]) -> Result<()>;

    /// Reads whatever is available into `buf`.
    ///
    /// # Errors
    /// Returns `OrderlyClose` on a zero-length read, `PeerReset` when the peer
    /// reset the stream, or an IO error.
    fn recv(&mut self, buf: &mut [u8]) -> Result<Recv>;

    /// Returns the remote address, if known.
    fn peer_addr(&self) -> Option<SocketAddr>;

    /// Shuts both directions down. Further reads observe end of stream.
    fn shutdown(&mut self);
}
