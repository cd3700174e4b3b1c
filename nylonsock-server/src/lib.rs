//! # NylonSock Server
//!
//! Event loop server for NylonSock.
//!
//! This crate provides:
//! - [`ServerBuilder`] with configuration options
//! - [`Server`] running one accept + poll + dispatch loop on a background thread
//! - [`ServerHandle`] for counting, broadcasting and closing from any thread
//! - [`ConnectionRegistry`] holding the live connections
//!
//! All handlers of one server run on its loop thread, one at a time.

pub mod builder;
pub mod error;
mod event_loop;
pub mod registry;

pub use builder::{Server, ServerBuilder, ServerEvent, ServerHandle};
pub use error::{Result, ServerError};
pub use event_loop::{ConnectFn, FilterFn};
pub use registry::{ConnectionRegistry, SharedConnection};
