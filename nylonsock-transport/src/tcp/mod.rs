//! TCP transport module.
//!
//! Provides a non-blocking TCP stream, address-candidate connect and a
//! listener that hands out accepted streams.

pub mod listener;
pub mod stream;

pub use listener::{TcpAcceptor, TcpListenerConfig};
pub use stream::{ConnectConfig, TcpTransport, connect, connect_addrs};
