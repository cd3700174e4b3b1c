//! Server builder and main server implementation.

use crate::error::{Result, ServerError};
use crate::event_loop::{self, ConnectFn, Deferred, LISTENER_TOKEN, LoopConfig, Shared};
use crate::registry::SharedConnection;
use bytes::BytesMut;
use crossbeam_channel::Receiver;
use nylonsock_core::{FrameCodec, MAX_FIELD_LEN, SockData};
use nylonsock_session::Connection;
use nylonsock_transport::{Interest, Poller, TcpAcceptor, TcpListenerConfig};
use std::fmt;
use std::marker::PhantomData;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio_util::codec::Encoder;

/// Builder for configuring and creating a server.
pub struct ServerBuilder<S = ()> {
    listener: TcpListenerConfig,
    poll_timeout: Duration,
    max_connections: usize,
    max_payload_len: usize,
    event_capacity: usize,
    _state: PhantomData<fn() -> S>,
}

impl<S> ServerBuilder<S>
where
    S: Default + Send + 'static,
{
    /// Creates a new server builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            listener: TcpListenerConfig::default(),
            poll_timeout: Duration::from_millis(10),
            max_connections: 1000,
            max_payload_len: MAX_FIELD_LEN,
            event_capacity: 1024,
            _state: PhantomData,
        }
    }

    /// Listens on every interface at `port`.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.listener.bind_addr.set_port(port);
        self
    }

    /// Sets the bind address.
    #[must_use]
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.listener.bind_addr = addr;
        self
    }

    /// Sets the listen backlog.
    #[must_use]
    pub fn backlog(mut self, backlog: i32) -> Self {
        self.listener = self.listener.backlog(backlog);
        self
    }

    /// Sets TCP_NODELAY for accepted connections.
    #[must_use]
    pub fn tcp_nodelay(mut self, enabled: bool) -> Self {
        self.listener = self.listener.tcp_nodelay(enabled);
        self
    }

    /// Sets how long a send to one connection may wait for the peer to drain
    /// its receive buffer (default 1 s). The loop and any broadcast in
    /// progress wait with it.
    #[must_use]
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.listener = self.listener.send_timeout(timeout);
        self
    }

    /// Sets how long an idle loop pass waits for new connections.
    #[must_use]
    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Sets the maximum number of connections.
    #[must_use]
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the maximum payload size, capped at 65535.
    #[must_use]
    pub fn max_payload_len(mut self, len: usize) -> Self {
        self.max_payload_len = len;
        self
    }

    /// Sets the capacity of the server event queue.
    #[must_use]
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Binds the listener and builds the server. The loop is not started.
    ///
    /// # Errors
    /// Returns `ServerError` if the listener cannot be bound.
    pub fn build(self) -> Result<Server<S>> {
        nylonsock_transport::init()?;

        let mut acceptor = TcpAcceptor::bind(self.listener)?;
        let local_addr = acceptor.local_addr()?;
        let mut poller = Poller::with_capacity(16)?;
        poller.register(&mut acceptor, LISTENER_TOKEN, Interest::READABLE)?;

        let codec = FrameCodec::new(self.max_payload_len);
        let (event_tx, event_rx) = crossbeam_channel::bounded(self.event_capacity.max(1));
        let shared = Arc::new(Shared::new(event_tx, codec));

        let config = LoopConfig {
            poll_timeout: self.poll_timeout,
            max_connections: self.max_connections,
            codec,
        };

        Ok(Server {
            config,
            local_addr,
            listener: Some((acceptor, poller)),
            worker: None,
            handle: ServerHandle { shared, event_rx },
        })
    }
}

impl<S> Default for ServerBuilder<S>
where
    S: Default + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Events emitted by the server.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// A connection was accepted.
    Connected(u64, Option<SocketAddr>),
    /// A destroyed connection was removed from the registry.
    Disconnected(u64),
    /// A listener-level failure. The loop keeps running.
    Error(String),
}

/// A listening server whose event loop runs on one background thread.
///
/// `S` is the per-connection application state; every accepted connection
/// starts with `S::default()`.
pub struct Server<S = ()> {
    config: LoopConfig,
    local_addr: SocketAddr,
    listener: Option<(TcpAcceptor, Poller)>,
    worker: Option<JoinHandle<(TcpAcceptor, Poller)>>,
    handle: ServerHandle<S>,
}

impl<S> Server<S>
where
    S: Default + Send + 'static,
{
    /// Binds a server on every interface at `port` with default settings.
    ///
    /// # Errors
    /// Returns `ServerError` if the listener cannot be bound.
    pub fn bind(port: u16) -> Result<Self> {
        ServerBuilder::new().port(port).build()
    }

    /// Sets the callback run once for each accepted connection, before any
    /// of its frames are dispatched. Replaces any previous callback; only
    /// connections accepted afterwards are affected.
    pub fn on_connect<F>(&self, f: F)
    where
        F: Fn(&mut Connection<S>) + Send + Sync + 'static,
    {
        let callback: Arc<ConnectFn<S>> = Arc::new(f);
        *self.handle.shared.on_connect.write() = Some(callback);
    }

    /// Starts the event loop. Does nothing if it is already running.
    ///
    /// # Errors
    /// Returns IO error if the loop thread cannot be spawned.
    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        let (acceptor, poller) = self
            .listener
            .take()
            .ok_or(ServerError::ListenerUnavailable)?;

        let shared = Arc::clone(&self.handle.shared);
        shared.running.store(true, Ordering::Release);
        let config = self.config;

        let spawned = std::thread::Builder::new()
            .name("nylonsock-server".to_string())
            .spawn(move || event_loop::run(shared, acceptor, poller, config));

        match spawned {
            Ok(worker) => {
                self.worker = Some(worker);
                tracing::info!("server started on {}", self.local_addr);
                Ok(())
            }
            Err(e) => {
                self.handle.shared.running.store(false, Ordering::Release);
                Err(ServerError::Io(e))
            }
        }
    }

    /// Stops the event loop and waits for it to exit. Does nothing if it is
    /// not running. Once this returns the registry is no longer touched by
    /// the loop.
    pub fn stop(&mut self) {
        self.handle.shared.running.store(false, Ordering::Release);
        let Some(worker) = self.worker.take() else {
            return;
        };
        match worker.join() {
            Ok(listener) => self.listener = Some(listener),
            Err(_) => tracing::error!("server loop panicked"),
        }
    }

    /// Returns true while the event loop is running.
    #[must_use]
    pub fn status(&self) -> bool {
        self.worker.is_some()
    }

    /// Returns the address the listener is bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns a cloneable handle to this server.
    #[must_use]
    pub fn handle(&self) -> ServerHandle<S> {
        self.handle.clone()
    }

    /// Number of registered connections.
    #[must_use]
    pub fn count(&self) -> usize {
        self.handle.count()
    }

    /// Broadcasts to every live connection. See [`ServerHandle::emit`].
    ///
    /// # Errors
    /// Returns `Frame` if the frame is too large to encode.
    pub fn emit(&self, event: &str, data: impl Into<SockData>) -> Result<()> {
        self.handle.emit(event, data)
    }

    /// Broadcasts to live connections matching `predicate`. See
    /// [`ServerHandle::emit_if`].
    ///
    /// # Errors
    /// Returns `Frame` if the frame is too large to encode.
    pub fn emit_if<P>(&self, event: &str, data: impl Into<SockData>, predicate: P) -> Result<()>
    where
        P: Fn(&Connection<S>) -> bool + Send + 'static,
    {
        self.handle.emit_if(event, data, predicate)
    }

    /// Returns the connection at `index` in acceptance order.
    #[must_use]
    pub fn connection(&self, index: usize) -> Option<SharedConnection<S>> {
        self.handle.connection(index)
    }
}

impl<S> Drop for Server<S> {
    fn drop(&mut self) {
        self.handle.shared.running.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            tracing::error!("server loop panicked");
        }

        // Handles captured by the callback or by handlers keep the shared
        // state alive, so the connections are released explicitly
        self.handle.shared.on_connect.write().take();
        for conn in self.handle.shared.registry.drain() {
            conn.lock().close();
        }
    }
}

impl<S> fmt::Debug for Server<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.local_addr)
            .field("running", &self.worker.is_some())
            .field("connections", &self.handle.shared.registry.count())
            .finish()
    }
}

/// Handle for using a server from other threads and from handlers.
///
/// Broadcasts and closes requested from inside the event loop are queued and
/// carried out as soon as the loop releases the connection it is servicing.
/// From other threads they run immediately.
///
/// Do not call `emit`, `emit_if` or `close` while holding a connection lock
/// obtained from [`ServerHandle::connection`].
pub struct ServerHandle<S = ()> {
    shared: Arc<Shared<S>>,
    event_rx: Receiver<ServerEvent>,
}

impl<S> ServerHandle<S> {
    /// Number of registered connections.
    #[must_use]
    pub fn count(&self) -> usize {
        self.shared.registry.count()
    }

    /// Returns true while the event loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Returns the connection at `index` in acceptance order.
    #[must_use]
    pub fn connection(&self, index: usize) -> Option<SharedConnection<S>> {
        self.shared.registry.get(index)
    }

    /// Broadcasts to every live connection.
    ///
    /// Connections are written one after another. A peer that stops reading
    /// holds the broadcast up for at most the configured send timeout.
    ///
    /// # Errors
    /// Returns `Frame` if the frame is too large to encode. Nothing is sent in
    /// that case. Per-connection send failures are logged, not returned.
    pub fn emit(&self, event: &str, data: impl Into<SockData>) -> Result<()> {
        self.broadcast(event, data.into(), None)
    }

    /// Broadcasts to live connections for which `predicate` returns true.
    ///
    /// # Errors
    /// Returns `Frame` if the frame is too large to encode.
    pub fn emit_if<P>(&self, event: &str, data: impl Into<SockData>, predicate: P) -> Result<()>
    where
        P: Fn(&Connection<S>) -> bool + Send + 'static,
    {
        self.broadcast(event, data.into(), Some(Box::new(predicate)))
    }

    /// Closes the connection with the given ID, firing its disconnect handler.
    pub fn close(&self, id: u64) {
        self.shared.submit(Deferred::Close(id));
    }

    /// Polls for server events.
    pub fn poll_events(&self) -> impl Iterator<Item = ServerEvent> + '_ {
        std::iter::from_fn(|| self.event_rx.try_recv().ok())
    }

    fn broadcast(
        &self,
        event: &str,
        data: SockData,
        filter: Option<Box<event_loop::FilterFn<S>>>,
    ) -> Result<()> {
        // Reject oversized frames up front rather than once per connection
        let mut codec = self.shared.codec;
        codec.encode((event.as_bytes(), data.as_bytes()), &mut BytesMut::new())?;

        self.shared.submit(Deferred::Broadcast {
            event: event.to_string(),
            data,
            filter,
        });
        Ok(())
    }
}

impl<S> Clone for ServerHandle<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            event_rx: self.event_rx.clone(),
        }
    }
}

impl<S> fmt::Debug for ServerHandle<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerHandle")
            .field("running", &self.is_running())
            .field("connections", &self.count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback() -> ServerBuilder<()> {
        ServerBuilder::new().bind("127.0.0.1:0".parse().unwrap())
    }

    #[test]
    fn test_server_builder_defaults() {
        let builder = ServerBuilder::<()>::new();
        assert_eq!(builder.listener.bind_addr.port(), 3490);
        assert_eq!(builder.poll_timeout, Duration::from_millis(10));
        assert_eq!(builder.max_connections, 1000);
        assert_eq!(builder.max_payload_len, MAX_FIELD_LEN);
        assert_eq!(builder.event_capacity, 1024);
        assert_eq!(builder.listener.send_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_server_builder_setters() {
        let builder = ServerBuilder::<()>::default()
            .port(4000)
            .backlog(8)
            .tcp_nodelay(false)
            .send_timeout(Duration::from_millis(200))
            .poll_timeout(Duration::from_millis(5))
            .max_connections(2)
            .max_payload_len(512)
            .event_capacity(16);
        assert_eq!(builder.listener.bind_addr.port(), 4000);
        assert_eq!(builder.listener.backlog, 8);
        assert!(!builder.listener.tcp_nodelay);
        assert_eq!(builder.listener.send_timeout, Duration::from_millis(200));
        assert_eq!(builder.poll_timeout, Duration::from_millis(5));
        assert_eq!(builder.max_connections, 2);
        assert_eq!(builder.max_payload_len, 512);
        assert_eq!(builder.event_capacity, 16);
    }

    #[test]
    fn test_build_binds_listener() {
        let server = loopback().build().unwrap();
        assert_ne!(server.local_addr().port(), 0);
        assert!(!server.status());
        assert_eq!(server.count(), 0);
        assert!(server.connection(0).is_none());
    }

    #[test]
    fn test_build_fails_on_taken_port() {
        let first = loopback().build().unwrap();
        let err = ServerBuilder::<()>::new()
            .bind(first.local_addr())
            .build()
            .unwrap_err();
        assert!(matches!(err, ServerError::Transport(_)));
    }

    #[test]
    fn test_start_stop_idempotent() {
        let mut server = loopback().build().unwrap();
        let handle = server.handle();

        server.start().unwrap();
        server.start().unwrap();
        assert!(server.status());
        assert!(handle.is_running());

        server.stop();
        server.stop();
        assert!(!server.status());
        assert!(!handle.is_running());

        server.start().unwrap();
        assert!(server.status());
    }

    #[test]
    fn test_emit_too_large_rejected() {
        let server = loopback().max_payload_len(4).build().unwrap();
        let err = server.emit("event", "more than four").unwrap_err();
        assert!(matches!(err, ServerError::Frame(_)));
        server.emit("event", "four").unwrap();
    }

    #[test]
    fn test_server_event_clone_debug() {
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let event = ServerEvent::Connected(1, Some(addr));
        let debug_str = format!("{:?}", event.clone());
        assert!(debug_str.contains("Connected"));

        let debug_str2 = format!("{:?}", ServerEvent::Disconnected(1));
        assert!(debug_str2.contains("Disconnected"));

        let debug_str3 = format!("{:?}", ServerEvent::Error("test error".to_string()));
        assert!(debug_str3.contains("test error"));
    }

    #[test]
    fn test_handle_debug() {
        let server = loopback().build().unwrap();
        let debug_str = format!("{:?}", server.handle());
        assert!(debug_str.contains("ServerHandle"));
        assert!(format!("{:?}", server).contains("local_addr"));
    }
}
