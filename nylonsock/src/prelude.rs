//! Prelude module for convenient imports.
//!
//! ```ignore
//! use nylonsock::prelude::*;
//! ```

// Core types
pub use nylonsock_core::{Error as CoreError, Frame, FrameCodec, SockData};

// Transport lifecycle
pub use nylonsock_transport::{TransportError, init, teardown};

// Connection types
pub use nylonsock_session::{Connection, DISCONNECT_EVENT, DisconnectReason, SessionError};

// Server types
pub use nylonsock_server::{
    Server, ServerBuilder, ServerError, ServerEvent, ServerHandle, SharedConnection,
};

// Client types
pub use nylonsock_client::{Client, ClientBuilder, ClientError};
