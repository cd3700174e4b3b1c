//! # NylonSock Client
//!
//! Outbound side of NylonSock.
//!
//! This crate provides:
//! - [`ClientBuilder`] with connection and polling options
//! - [`Client`] owning one connection serviced by a background thread

pub mod builder;
pub mod error;

pub use builder::{Client, ClientBuilder};
pub use error::{ClientError, Result};
