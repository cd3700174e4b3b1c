//! # NylonSock Transport
//!
//! Byte-stream transport and readiness multiplexing for NylonSock.
//!
//! This crate provides:
//! - [`Transport`] - the stream interface a connection reads and writes through
//! - [`tcp`] - non-blocking TCP streams, address-candidate connect and a listener
//! - [`poller`] - a readiness multiplexer over registered handles
//! - [`platform`] - explicit process-wide socket subsystem lifecycle

pub mod error;
pub mod platform;
pub mod poller;
pub mod tcp;
pub mod transport;

pub use error::{Result, TransportError};
pub use platform::{init, is_initialized, teardown};
pub use poller::{Interest, Poller, ReadySet, Token};
pub use tcp::{ConnectConfig, TcpAcceptor, TcpListenerConfig, TcpTransport, connect, connect_addrs};
pub use transport::{Recv, Transport};
