//! The accept + poll + dispatch loop and the state it shares with handles.

use crate::builder::ServerEvent;
use crate::registry::{ConnectionRegistry, SharedConnection};
use crossbeam_channel::Sender;
use nylonsock_core::{FrameCodec, SockData};
use nylonsock_session::Connection;
use nylonsock_transport::{Interest, Poller, TcpAcceptor, TcpTransport, Token, Transport};
use parking_lot::{Mutex, RwLock};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, ThreadId};
use std::time::Duration;

pub(crate) const LISTENER_TOKEN: Token = Token(0);

/// Callback run for each accepted connection.
pub type ConnectFn<S> = dyn Fn(&mut Connection<S>) + Send + Sync;

/// Predicate selecting broadcast recipients.
pub type FilterFn<S> = dyn Fn(&Connection<S>) -> bool + Send;

/// Source of accepted transports.
pub(crate) trait Accept {
    type Stream: Transport + 'static;

    /// Returns `Ok(None)` when nothing is pending.
    fn accept(&mut self) -> nylonsock_transport::Result<Option<Self::Stream>>;
}

impl Accept for TcpAcceptor {
    type Stream = TcpTransport;

    fn accept(&mut self) -> nylonsock_transport::Result<Option<TcpTransport>> {
        TcpAcceptor::accept(self)
    }
}

/// A broadcast or close requested while the loop thread holds a connection.
pub(crate) enum Deferred<S> {
    Broadcast {
        event: String,
        data: SockData,
        filter: Option<Box<FilterFn<S>>>,
    },
    Close(u64),
}

/// Loop settings fixed at build time.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LoopConfig {
    pub poll_timeout: Duration,
    pub max_connections: usize,
    pub codec: FrameCodec,
}

/// State shared between the loop thread and every [`crate::ServerHandle`].
pub(crate) struct Shared<S> {
    pub registry: ConnectionRegistry<S>,
    pub running: AtomicBool,
    pub on_connect: RwLock<Option<Arc<ConnectFn<S>>>>,
    pub events: Sender<ServerEvent>,
    pub codec: FrameCodec,
    loop_thread: Mutex<Option<ThreadId>>,
    deferred: Mutex<Vec<Deferred<S>>>,
}

impl<S> Shared<S> {
    pub fn new(events: Sender<ServerEvent>, codec: FrameCodec) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            running: AtomicBool::new(false),
            on_connect: RwLock::new(None),
            events,
            codec,
            loop_thread: Mutex::new(None),
            deferred: Mutex::new(Vec::new()),
        }
    }

    /// Returns true when called from inside the event loop (a handler or the
    /// connect callback), where a connection lock is already held.
    pub fn on_loop_thread(&self) -> bool {
        *self.loop_thread.lock() == Some(thread::current().id())
    }

    pub fn publish(&self, event: ServerEvent) {
        // A full queue means nobody is draining events
        let _ = self.events.try_send(event);
    }

    /// Runs `work` now, or queues it until the loop releases the current
    /// connection.
    pub fn submit(&self, work: Deferred<S>) {
        if self.on_loop_thread() {
            self.deferred.lock().push(work);
        } else {
            self.execute(work);
        }
    }

    fn flush_deferred(&self) {
        loop {
            let pending = std::mem::take(&mut *self.deferred.lock());
            if pending.is_empty() {
                return;
            }
            for work in pending {
                self.execute(work);
            }
        }
    }

    fn execute(&self, work: Deferred<S>) {
        match work {
            Deferred::Broadcast {
                event,
                data,
                filter,
            } => self.deliver(&event, &data, filter.as_deref()),
            Deferred::Close(id) => {
                if let Some(conn) = self.registry.find(id) {
                    conn.lock().close();
                }
            }
        }
    }

    fn deliver(&self, event: &str, data: &SockData, filter: Option<&FilterFn<S>>) {
        for conn in self.registry.snapshot() {
            let mut conn = conn.lock();
            if conn.is_destroyed() || filter.is_some_and(|keep| !keep(&*conn)) {
                continue;
            }
            if let Err(e) = conn.emit(event, data.clone()) {
                tracing::debug!(
                    connection_id = conn.id(),
                    "broadcast of '{}' failed: {}",
                    event,
                    e
                );
            }
        }
    }
}

/// Runs until `shared.running` is cleared, then hands the listener back.
pub(crate) fn run<S>(
    shared: Arc<Shared<S>>,
    mut acceptor: TcpAcceptor,
    mut poller: Poller,
    config: LoopConfig,
) -> (TcpAcceptor, Poller)
where
    S: Default + Send + 'static,
{
    *shared.loop_thread.lock() = Some(thread::current().id());
    tracing::info!("server loop started");

    // Connections may have queued while the loop was not running
    let mut accept_pending = true;
    let mut busy = false;

    while shared.running.load(Ordering::Acquire) {
        let timeout = if busy {
            Duration::ZERO
        } else {
            config.poll_timeout
        };
        match poller.poll(timeout) {
            Ok(_) => {
                accept_pending |= poller.is_ready(LISTENER_TOKEN, Interest::READABLE);
            }
            Err(e) => {
                tracing::error!("listener poll failed: {}", e);
                shared.publish(ServerEvent::Error(e.to_string()));
                thread::sleep(config.poll_timeout);
            }
        }

        if accept_pending {
            accept_pending = accept_all(&shared, &mut acceptor, &config);
        }
        busy = service(&shared);
    }

    *shared.loop_thread.lock() = None;
    shared.flush_deferred();
    tracing::info!("server loop stopped");
    (acceptor, poller)
}

// Accepts until the listener would block. Returns true if accepting stopped
// early on an error and should be retried on the next pass.
fn accept_all<S, A>(shared: &Shared<S>, acceptor: &mut A, config: &LoopConfig) -> bool
where
    S: Default + Send + 'static,
    A: Accept,
{
    loop {
        let transport = match acceptor.accept() {
            Ok(Some(transport)) => transport,
            Ok(None) => return false,
            Err(e) => {
                tracing::error!("accept failed: {}", e);
                shared.publish(ServerEvent::Error(e.to_string()));
                return true;
            }
        };

        if shared.registry.count() >= config.max_connections {
            tracing::warn!(
                "max connections ({}) reached, dropping connection",
                config.max_connections
            );
            continue;
        }

        match Connection::with_codec(transport, S::default(), config.codec) {
            Ok(conn) => {
                let id = conn.id();
                let peer = conn.peer_addr();
                let conn = shared.registry.insert(conn);
                tracing::info!(connection_id = id, ?peer, "accepted connection");
                shared.publish(ServerEvent::Connected(id, peer));
                notify_connect(shared, &conn);
            }
            Err(e) => {
                tracing::error!("failed to set up accepted connection: {}", e);
                shared.publish(ServerEvent::Error(e.to_string()));
            }
        }
    }
}

fn notify_connect<S>(shared: &Shared<S>, conn: &SharedConnection<S>) {
    let callback = shared.on_connect.read().clone();
    if let Some(callback) = callback {
        let mut guard = conn.lock();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback(&mut *guard)));
        if outcome.is_err() {
            tracing::error!(connection_id = guard.id(), "connect callback panicked");
        }
    }
    shared.flush_deferred();
}

// One non-blocking update per connection, then reap. Returns true if any
// connection did work.
fn service<S>(shared: &Shared<S>) -> bool {
    let mut busy = false;
    let mut destroyed = false;

    for conn in shared.registry.snapshot() {
        {
            let mut guard = conn.lock();
            busy |= guard.update(Duration::ZERO);
            destroyed |= guard.is_destroyed();
        }
        shared.flush_deferred();
    }

    if destroyed {
        for id in shared.registry.reap() {
            shared.publish(ServerEvent::Disconnected(id));
        }
    }
    busy
}
