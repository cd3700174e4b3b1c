//! Client builder and main client implementation.

use crate::error::{ClientError, Result};
use nylonsock_core::{FrameCodec, MAX_FIELD_LEN, SockData};
use nylonsock_session::Connection;
use nylonsock_transport::ConnectConfig;
use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const STOPPED: u8 = 2;

/// Builder for configuring and creating a client.
#[derive(Debug, Clone)]
pub struct ClientBuilder {
    host: String,
    port: u16,
    connect: ConnectConfig,
    poll_timeout: Duration,
    max_payload_len: usize,
}

impl ClientBuilder {
    /// Creates a new client builder for `host:port`.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect: ConnectConfig::default(),
            poll_timeout: Duration::from_millis(50),
            max_payload_len: MAX_FIELD_LEN,
        }
    }

    /// Sets the connection timeout for each address candidate.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect = self.connect.connect_timeout(timeout);
        self
    }

    /// Sets TCP_NODELAY option.
    #[must_use]
    pub fn tcp_nodelay(mut self, enabled: bool) -> Self {
        self.connect = self.connect.tcp_nodelay(enabled);
        self
    }

    /// Sets how long a send may wait on a full socket buffer.
    #[must_use]
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.connect = self.connect.send_timeout(timeout);
        self
    }

    /// Sets how long each loop iteration waits for inbound data.
    #[must_use]
    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Sets the maximum payload size, capped at 65535.
    #[must_use]
    pub fn max_payload_len(mut self, len: usize) -> Self {
        self.max_payload_len = len;
        self
    }

    /// Connects with default connection state.
    ///
    /// # Errors
    /// Returns `Transport` if the host cannot be resolved or no resolved
    /// address accepts the connection.
    pub fn build<S>(self) -> Result<Client<S>>
    where
        S: Default + Send + 'static,
    {
        self.build_with(S::default())
    }

    /// Connects with the given connection state.
    ///
    /// # Errors
    /// Returns `Transport` if the host cannot be resolved or no resolved
    /// address accepts the connection.
    pub fn build_with<S>(self, state: S) -> Result<Client<S>>
    where
        S: Send + 'static,
    {
        nylonsock_transport::init()?;

        let transport = nylonsock_transport::connect(&self.host, self.port, &self.connect)?;
        let conn = Connection::with_codec(transport, state, FrameCodec::new(self.max_payload_len))?;
        tracing::info!(
            connection_id = conn.id(),
            "connected to {}:{}",
            self.host,
            self.port
        );

        Ok(Client {
            conn: Arc::new(Mutex::new(conn)),
            state: Arc::new(AtomicU8::new(IDLE)),
            worker: None,
            poll_timeout: self.poll_timeout,
        })
    }
}

/// One outbound connection serviced by a background thread.
///
/// Handlers may be registered before [`Client::start`]. After [`Client::stop`],
/// or once the server closes the link, `on` and `emit` are refused.
pub struct Client<S = ()> {
    conn: Arc<Mutex<Connection<S>>>,
    state: Arc<AtomicU8>,
    worker: Option<JoinHandle<()>>,
    poll_timeout: Duration,
}

impl<S> Client<S>
where
    S: Default + Send + 'static,
{
    /// Connects to `host:port` with default settings.
    ///
    /// # Errors
    /// Returns `Transport` if no resolved address accepts the connection.
    pub fn connect(host: &str, port: u16) -> Result<Self> {
        ClientBuilder::new(host, port).build()
    }
}

impl<S> Client<S>
where
    S: Send + 'static,
{
    /// Starts the update loop. Does nothing if it is already running.
    ///
    /// # Errors
    /// Returns `ConnectionClosed` if the connection is already gone, or IO
    /// error if the thread cannot be spawned.
    pub fn start(&mut self) -> Result<()> {
        if self.status() {
            return Ok(());
        }
        // The loop may have ended on its own when the link closed
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            tracing::error!("client loop panicked");
        }
        if self.conn.lock().is_destroyed() {
            return Err(ClientError::ConnectionClosed);
        }

        self.state.store(RUNNING, Ordering::Release);
        let conn = Arc::clone(&self.conn);
        let state = Arc::clone(&self.state);
        let poll_timeout = self.poll_timeout;

        let spawned = std::thread::Builder::new()
            .name("nylonsock-client".to_string())
            .spawn(move || run(&conn, &state, poll_timeout));

        match spawned {
            Ok(worker) => {
                self.worker = Some(worker);
                Ok(())
            }
            Err(e) => {
                self.state.store(STOPPED, Ordering::Release);
                Err(ClientError::Io(e))
            }
        }
    }
}

impl<S> Client<S> {
    /// Stops the update loop and waits for it to exit. Idempotent.
    pub fn stop(&mut self) {
        self.state.store(STOPPED, Ordering::Release);
        let Some(worker) = self.worker.take() else {
            return;
        };
        if worker.thread().id() == std::thread::current().id() {
            return;
        }
        if worker.join().is_err() {
            tracing::error!("client loop panicked");
        }
    }

    /// Returns true while the update loop is running.
    #[must_use]
    pub fn status(&self) -> bool {
        self.state.load(Ordering::Acquire) == RUNNING
    }

    /// Returns true once the connection has been destroyed.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.conn.lock().is_destroyed()
    }

    fn is_stopped(&self) -> bool {
        self.state.load(Ordering::Acquire) == STOPPED
    }

    /// Registers a payload handler. Ignored once the client is stopped.
    pub fn on<F>(&self, event: impl Into<String>, f: F)
    where
        F: Fn(SockData, &mut Connection<S>) + Send + Sync + 'static,
    {
        if self.is_stopped() {
            tracing::debug!("client stopped, handler not registered");
            return;
        }
        self.conn.lock().on(event, f);
    }

    /// Registers a signal handler. Ignored once the client is stopped.
    pub fn on_signal<F>(&self, event: impl Into<String>, f: F)
    where
        F: Fn(&mut Connection<S>) + Send + Sync + 'static,
    {
        if self.is_stopped() {
            tracing::debug!("client stopped, handler not registered");
            return;
        }
        self.conn.lock().on_signal(event, f);
    }

    /// Sends one frame to the server.
    ///
    /// # Errors
    /// Returns `Stopped` once the client is stopped, or `Session` if the frame
    /// is too large or the send fails.
    pub fn emit(&self, event: &str, data: impl Into<SockData>) -> Result<()> {
        if self.is_stopped() {
            return Err(ClientError::Stopped);
        }
        self.conn.lock().emit(event, data)?;
        Ok(())
    }

    /// Runs `f` with exclusive access to the connection.
    ///
    /// Must not be called from inside one of this client's handlers.
    pub fn with_connection<R>(&self, f: impl FnOnce(&mut Connection<S>) -> R) -> R {
        f(&mut *self.conn.lock())
    }
}

impl<S> Drop for Client<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<S> fmt::Debug for Client<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("running", &self.status())
            .field("poll_timeout", &self.poll_timeout)
            .finish()
    }
}

// Services the connection until stopped or the link goes away.
fn run<S>(conn: &Mutex<Connection<S>>, state: &AtomicU8, poll_timeout: Duration) {
    tracing::debug!("client loop started");
    while state.load(Ordering::Acquire) == RUNNING {
        let mut guard = conn.lock();
        guard.update(poll_timeout);
        let destroyed = guard.is_destroyed();
        // Let a waiting emit in before the next poll
        MutexGuard::unlock_fair(guard);

        if destroyed {
            tracing::info!("connection closed, client loop stopping");
            state.store(STOPPED, Ordering::Release);
        }
    }
    tracing::debug!("client loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn listener() -> (std::net::TcpListener, u16) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    fn wait_for(done: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(3);
        while !done() {
            assert!(Instant::now() < deadline, "timed out");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_client_builder_defaults() {
        let builder = ClientBuilder::new("localhost", 3490);
        assert_eq!(builder.host, "localhost");
        assert_eq!(builder.port, 3490);
        assert_eq!(builder.poll_timeout, Duration::from_millis(50));
        assert_eq!(builder.max_payload_len, MAX_FIELD_LEN);
        assert_eq!(builder.connect.connect_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_client_builder_setters() {
        let builder = ClientBuilder::new("localhost", 1)
            .connect_timeout(Duration::from_millis(100))
            .tcp_nodelay(false)
            .send_timeout(Duration::from_secs(1))
            .poll_timeout(Duration::from_millis(5))
            .max_payload_len(64);
        assert_eq!(builder.connect.connect_timeout, Duration::from_millis(100));
        assert!(!builder.connect.tcp_nodelay);
        assert_eq!(builder.connect.send_timeout, Duration::from_secs(1));
        assert_eq!(builder.poll_timeout, Duration::from_millis(5));
        assert_eq!(builder.max_payload_len, 64);
    }

    #[test]
    fn test_connect_failed() {
        let (listener, port) = listener();
        drop(listener);

        let err = Client::<()>::connect("127.0.0.1", port).unwrap_err();
        assert!(matches!(
            err,
            ClientError::Transport(nylonsock_transport::TransportError::ConnectFailed { .. })
        ));
    }

    #[test]
    fn test_emit_before_start() {
        let (listener, port) = listener();
        let client = Client::<()>::connect("127.0.0.1", port).unwrap();
        let (mut peer, _) = listener.accept().unwrap();

        client.emit("hi", 7_u8).unwrap();
        let mut buf = [0u8; 7];
        peer.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, &[0, 2, 0, 1, b'h', b'i', b'7']);
        assert!(!client.status());
    }

    #[test]
    fn test_loop_dispatches_and_stops_on_close() {
        let (listener, port) = listener();
        let mut client = ClientBuilder::new("127.0.0.1", port)
            .poll_timeout(Duration::from_millis(10))
            .build::<()>()
            .unwrap();
        let (mut peer, _) = listener.accept().unwrap();

        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        client.on("tick", move |_, _| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        client.start().unwrap();
        client.start().unwrap();
        assert!(client.status());

        let frame = nylonsock_core::encode(b"tick", b"").unwrap();
        peer.write_all(&frame).unwrap();
        wait_for(|| hits.load(Ordering::SeqCst) == 1);

        drop(peer);
        wait_for(|| !client.status());
        assert!(client.is_destroyed());
        assert!(matches!(client.emit("late", ""), Err(ClientError::Stopped)));
        assert!(matches!(client.start(), Err(ClientError::ConnectionClosed)));
    }

    #[test]
    fn test_stop_refuses_on_and_emit() {
        let (listener, port) = listener();
        let mut client = Client::<()>::connect("127.0.0.1", port).unwrap();
        let _peer = listener.accept().unwrap();

        client.start().unwrap();
        client.stop();
        client.stop();
        assert!(!client.status());
        assert!(!client.is_destroyed());

        client.on("ignored", |_, _| {});
        assert!(!client.with_connection(|conn| conn.has_handler("ignored")));
        assert!(matches!(client.emit("x", ""), Err(ClientError::Stopped)));

        // A live connection can be serviced again
        client.start().unwrap();
        assert!(client.status());
    }

    #[test]
    fn test_state_access() {
        let (listener, port) = listener();
        let client = ClientBuilder::new("127.0.0.1", port)
            .build_with(String::from("lobby"))
            .unwrap();
        let _peer = listener.accept().unwrap();

        client.with_connection(|conn| conn.state_mut().push_str("-2"));
        assert_eq!(client.with_connection(|conn| conn.state().clone()), "lobby-2");
    }
}
