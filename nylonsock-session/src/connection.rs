//! A single peer connection: event handlers, framing and lifecycle.
//!
//! A connection starts active and ends destroyed. Destruction happens once,
//! either on a terminal read outcome (orderly close, reset, malformed frame,
//! IO failure) or on an explicit [`Connection::close`]. The `"disconnect"`
//! handler, if registered, runs exactly once at that point; afterwards the
//! handler table is cleared and the transport is released.

use crate::error::{Result, SessionError};
use crate::handler::{Handler, HandlerTable};
use bytes::BytesMut;
use nylonsock_core::{FrameCodec, SockData};
use nylonsock_transport::{Interest, Poller, Recv, Token, Transport, TransportError};
use std::fmt;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::codec::{Decoder, Encoder};

/// Reserved event name fired when a connection is destroyed.
///
/// Inbound frames carrying this name are dropped, so only destruction runs
/// the handler.
pub const DISCONNECT_EVENT: &str = "disconnect";

const READ_CHUNK: usize = 4096;
const TRANSPORT_TOKEN: Token = Token(0);

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Why a connection was destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The peer closed the stream.
    OrderlyClose,
    /// The peer reset the stream.
    PeerReset,
    /// The peer sent a frame the codec rejected.
    Protocol,
    /// Any other transport failure.
    TransportError,
    /// Closed locally.
    Closed,
}

impl DisconnectReason {
    fn from_error(err: &SessionError) -> Self {
        match err {
            SessionError::Transport(TransportError::OrderlyClose) => Self::OrderlyClose,
            SessionError::Transport(TransportError::PeerReset) => Self::PeerReset,
            SessionError::Frame(_) => Self::Protocol,
            _ => Self::TransportError,
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::OrderlyClose => "closed by peer",
            Self::PeerReset => "reset by peer",
            Self::Protocol => "protocol error",
            Self::TransportError => "transport error",
            Self::Closed => "closed locally",
        };
        f.write_str(text)
    }
}

/// One peer connection carrying application state `S`.
///
/// Handlers receive `&mut Connection<S>`, so they can emit replies, register
/// further handlers and read or update the state while they run.
pub struct Connection<S = ()> {
    id: u64,
    peer_addr: Option<SocketAddr>,
    transport: Option<Box<dyn Transport>>,
    poller: Option<Poller>,
    handlers: HandlerTable<S>,
    codec: FrameCodec,
    read_buf: BytesMut,
    // Cleared once a read observed would-block; readiness must then be polled
    unread: bool,
    reason: Option<DisconnectReason>,
    state: S,
}

impl<S> Connection<S> {
    /// Wraps a connected transport with the default codec.
    ///
    /// # Errors
    /// Returns IO error if the readiness multiplexer cannot be created.
    pub fn new<T>(transport: T, state: S) -> Result<Self>
    where
        T: Transport + 'static,
    {
        Self::with_codec(transport, state, FrameCodec::default())
    }

    /// Wraps a connected transport using `codec` for both directions.
    ///
    /// # Errors
    /// Returns IO error if the readiness multiplexer cannot be created.
    pub fn with_codec<T>(transport: T, state: S, codec: FrameCodec) -> Result<Self>
    where
        T: Transport + 'static,
    {
        let mut transport: Box<dyn Transport> = Box::new(transport);
        let mut poller = Poller::with_capacity(4)?;
        poller.register(
            transport.as_mut(),
            TRANSPORT_TOKEN,
            Interest::READABLE | Interest::ERROR,
        )?;

        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        let peer_addr = transport.peer_addr();
        tracing::debug!(connection_id = id, ?peer_addr, "connection created");

        Ok(Self {
            id,
            peer_addr,
            transport: Some(transport),
            poller: Some(poller),
            handlers: HandlerTable::new(),
            codec,
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            unread: true,
            reason: None,
            state,
        })
    }

    /// Returns the process-unique connection ID.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the peer address captured when the connection was created.
    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Returns the application state.
    #[must_use]
    pub fn state(&self) -> &S {
        &self.state
    }

    /// Returns the application state mutably.
    pub fn state_mut(&mut self) -> &mut S {
        &mut self.state
    }

    /// Returns true once the connection has been destroyed.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.reason.is_some()
    }

    /// Returns why the connection was destroyed, if it has been.
    #[must_use]
    pub fn disconnect_reason(&self) -> Option<DisconnectReason> {
        self.reason
    }

    /// Returns true if a handler is registered for `event`.
    #[must_use]
    pub fn has_handler(&self, event: &str) -> bool {
        self.handlers.contains(event)
    }

    /// Registers `f` for `event`, replacing any previous handler.
    ///
    /// Registering on a destroyed connection has no effect.
    pub fn on<F>(&mut self, event: impl Into<String>, f: F)
    where
        F: Fn(SockData, &mut Connection<S>) + Send + Sync + 'static,
    {
        self.set_handler(event.into(), Handler::payload(f));
    }

    /// Registers a handler that ignores the payload, replacing any previous
    /// handler for `event`.
    pub fn on_signal<F>(&mut self, event: impl Into<String>, f: F)
    where
        F: Fn(&mut Connection<S>) + Send + Sync + 'static,
    {
        self.set_handler(event.into(), Handler::signal(f));
    }

    fn set_handler(&mut self, event: String, handler: Handler<S>) {
        if self.is_destroyed() {
            tracing::debug!(
                connection_id = self.id,
                "ignoring handler for '{}' on destroyed connection",
                event
            );
            return;
        }
        self.handlers.insert(event, handler);
    }

    /// Sends one frame carrying `event` and `data`.
    ///
    /// Size limits are checked before anything is written, so an oversized
    /// frame leaves the stream untouched and the connection usable.
    ///
    /// # Errors
    /// Returns `NotActive` after destruction, `Frame` if either field is too
    /// large, or a transport error if the send fails.
    pub fn emit(&mut self, event: &str, data: impl Into<SockData>) -> Result<()> {
        let data = data.into();
        let Some(transport) = self.transport.as_mut() else {
            return Err(SessionError::NotActive);
        };

        let mut out = BytesMut::new();
        self.codec
            .encode((event.as_bytes(), data.as_bytes()), &mut out)?;
        transport.send_all(&out)?;

        tracing::trace!(
            connection_id = self.id,
            "sent '{}' ({} payload bytes)",
            event,
            data.len()
        );
        Ok(())
    }

    /// Waits up to `timeout` for one inbound frame and dispatches it.
    ///
    /// At most one frame is dispatched per call. A frame already buffered by
    /// an earlier read is dispatched without waiting. A frame that is only
    /// partly received stays buffered until the remaining bytes arrive.
    /// Terminal read outcomes destroy the connection. Does nothing once the
    /// connection is destroyed.
    ///
    /// Returns true if a frame was dispatched or the connection was destroyed
    /// by this call.
    pub fn update(&mut self, timeout: Duration) -> bool {
        if self.is_destroyed() {
            return false;
        }

        match self.next_frame(timeout) {
            Ok(Some((event, payload))) => {
                self.dispatch(&event, payload);
                true
            }
            Ok(None) => false,
            Err(e) => {
                let reason = DisconnectReason::from_error(&e);
                if reason == DisconnectReason::OrderlyClose {
                    tracing::debug!(connection_id = self.id, "peer closed connection");
                } else {
                    tracing::warn!(connection_id = self.id, "connection failed: {}", e);
                }
                self.destroy(reason);
                true
            }
        }
    }

    /// Destroys the connection locally. Idempotent.
    pub fn close(&mut self) {
        self.destroy(DisconnectReason::Closed);
    }

    fn next_frame(&mut self, timeout: Duration) -> Result<Option<(bytes::Bytes, SockData)>> {
        if let Some(frame) = self.codec.decode(&mut self.read_buf)? {
            let (event, payload) = frame.into_parts();
            return Ok(Some((event, payload.into())));
        }

        if !self.unread {
            let poller = self.poller.as_mut().ok_or(TransportError::Released)?;
            poller.poll(timeout)?;
            if !poller.is_ready(TRANSPORT_TOKEN, Interest::READABLE | Interest::ERROR) {
                return Ok(None);
            }
            self.unread = true;
        }

        self.fill()?;
        Ok(self.codec.decode(&mut self.read_buf)?.map(|frame| {
            let (event, payload) = frame.into_parts();
            (event, payload.into())
        }))
    }

    // Reads until a complete frame is buffered or the stream would block.
    fn fill(&mut self) -> Result<()> {
        let transport = self.transport.as_mut().ok_or(TransportError::Released)?;
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match transport.recv(&mut chunk)? {
                Recv::Data(n) => {
                    self.read_buf.extend_from_slice(&chunk[..n]);
                    if self.codec.has_frame(&self.read_buf) {
                        return Ok(());
                    }
                }
                Recv::WouldBlock => {
                    self.unread = false;
                    return Ok(());
                }
            }
        }
    }

    fn dispatch(&mut self, event: &[u8], payload: SockData) {
        let Ok(name) = std::str::from_utf8(event) else {
            tracing::debug!(connection_id = self.id, "dropping frame with non-UTF-8 event name");
            return;
        };
        if name == DISCONNECT_EVENT {
            tracing::debug!(connection_id = self.id, "dropping inbound '{}' frame", name);
            return;
        }

        match self.handlers.get(name) {
            Some(handler) => self.invoke(name, &handler, payload),
            None => {
                tracing::debug!(connection_id = self.id, "no handler for '{}', frame dropped", name);
            }
        }
    }

    // A panicking handler is logged and otherwise ignored.
    fn invoke(&mut self, name: &str, handler: &Handler<S>, payload: SockData) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler.call(payload, self)));
        if outcome.is_err() {
            tracing::error!(connection_id = self.id, "handler for '{}' panicked", name);
        }
    }

    fn destroy(&mut self, reason: DisconnectReason) {
        if self.is_destroyed() {
            return;
        }
        self.reason = Some(reason);

        if let Some(handler) = self.handlers.get(DISCONNECT_EVENT) {
            self.invoke(DISCONNECT_EVENT, &handler, SockData::new());
        }
        self.handlers.clear();

        if let Some(mut poller) = self.poller.take() {
            poller.forget(TRANSPORT_TOKEN);
        }
        if let Some(mut transport) = self.transport.take() {
            transport.shutdown();
        }
        self.read_buf.clear();

        tracing::info!(
            connection_id = self.id,
            peer = ?self.peer_addr,
            "connection destroyed: {}",
            reason
        );
    }
}

impl<S> Drop for Connection<S> {
    fn drop(&mut self) {
        // Release the stream without running handlers; the owner is gone
        self.handlers.clear();
        self.transport.take();
    }
}

impl<S> fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("handlers", &self.handlers)
            .field("buffered", &self.read_buf.len())
            .field("reason", &self.reason)
            .finish()
    }
}
