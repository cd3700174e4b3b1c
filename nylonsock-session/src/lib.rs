//! # NylonSock Session
//!
//! Per-connection event dispatch for NylonSock.
//!
//! This crate provides:
//! - [`Connection`] - one transport handle, its handler table and lifecycle
//! - [`HandlerTable`] - event name to handler mapping (last write wins)
//! - [`DisconnectReason`] - why a connection was destroyed
//!
//! A connection is generic over the application's per-connection state, so
//! handlers receive the concrete state (user name, room, ...) directly.

pub mod connection;
pub mod error;
pub mod handler;

pub use connection::{Connection, DISCONNECT_EVENT, DisconnectReason};
pub use error::{Result, SessionError};
pub use handler::{Handler, HandlerTable, PayloadFn, SignalFn};
