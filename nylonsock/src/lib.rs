//! # NylonSock
//!
//! Named-event messaging over TCP, in the style of socket.io.
//!
//! Peers exchange frames that carry an event name and a payload. Each
//! connection routes inbound frames to the handler registered for that name.
//! A server runs one background loop that accepts connections and services
//! all of them. A client owns one outbound connection.
//!
//! ## Quick Start
//!
//! ```no_run
//! use nylonsock::prelude::*;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server: Server<()> = Server::bind(3490)?;
//! server.on_connect(|conn| {
//!     conn.on("ping", |data, conn| {
//!         let _ = conn.emit("pong", data);
//!     });
//! });
//! server.start()?;
//!
//! let mut client: Client<()> = Client::connect("localhost", 3490)?;
//! client.on("pong", |data, _| println!("pong: {:?}", data));
//! client.start()?;
//! client.emit("ping", 42_i32)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Crate Organization
//!
//! - [`core`] - Frames, codec and payload values
//! - [`transport`] - TCP transport, listener and readiness multiplexer
//! - [`session`] - Per-connection handlers and lifecycle
//! - [`server`] - Event loop server and connection registry
//! - [`client`] - Outbound client

pub mod prelude;

/// Frames, codec and payload values.
pub mod core {
    pub use nylonsock_core::*;
}

/// TCP transport, listener and readiness multiplexer.
pub mod transport {
    pub use nylonsock_transport::*;
}

/// Per-connection handlers and lifecycle.
pub mod session {
    pub use nylonsock_session::*;
}

/// Event loop server.
pub mod server {
    pub use nylonsock_server::*;
}

/// Outbound client.
pub mod client {
    pub use nylonsock_client::*;
}
