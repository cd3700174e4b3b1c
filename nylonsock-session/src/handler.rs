//! Event handler table for routing inbound frames by event name.

use crate::connection::Connection;
use nylonsock_core::SockData;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Handler receiving the frame payload and the connection it arrived on.
pub type PayloadFn<S> = dyn Fn(SockData, &mut Connection<S>) + Send + Sync;

/// Handler that ignores the payload.
pub type SignalFn<S> = dyn Fn(&mut Connection<S>) + Send + Sync;

/// A registered event handler.
pub enum Handler<S> {
    /// Called with the frame payload.
    Payload(Arc<PayloadFn<S>>),
    /// Called without a payload.
    Signal(Arc<SignalFn<S>>),
}

impl<S> Handler<S> {
    /// Wraps a payload handler.
    pub fn payload<F>(f: F) -> Self
    where
        F: Fn(SockData, &mut Connection<S>) + Send + Sync + 'static,
    {
        Self::Payload(Arc::new(f))
    }

    /// Wraps a signal handler.
    pub fn signal<F>(f: F) -> Self
    where
        F: Fn(&mut Connection<S>) + Send + Sync + 'static,
    {
        Self::Signal(Arc::new(f))
    }

    /// Invokes the handler. A signal handler drops `data`.
    pub fn call(&self, data: SockData, conn: &mut Connection<S>) {
        match self {
            Self::Payload(f) => f(data, conn),
            Self::Signal(f) => f(conn),
        }
    }
}

impl<S> Clone for Handler<S> {
    fn clone(&self) -> Self {
        match self {
            Self::Payload(f) => Self::Payload(Arc::clone(f)),
            Self::Signal(f) => Self::Signal(Arc::clone(f)),
        }
    }
}

impl<S> fmt::Debug for Handler<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Payload(_) => f.write_str("Handler::Payload"),
            Self::Signal(_) => f.write_str("Handler::Signal"),
        }
    }
}

/// Mapping from event name to handler. Registering a name again replaces
/// the previous handler.
pub struct HandlerTable<S> {
    handlers: HashMap<String, Handler<S>>,
}

impl<S> HandlerTable<S> {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registers `handler` for `event`, returning the handler it replaced.
    pub fn insert(&mut self, event: impl Into<String>, handler: Handler<S>) -> Option<Handler<S>> {
        self.handlers.insert(event.into(), handler)
    }

    /// Returns a clone of the handler for `event`.
    ///
    /// The clone shares the closure, so the caller may invoke it while the
    /// table itself is mutated.
    #[must_use]
    pub fn get(&self, event: &str) -> Option<Handler<S>> {
        self.handlers.get(event).cloned()
    }

    /// Removes the handler for `event`.
    pub fn remove(&mut self, event: &str) -> Option<Handler<S>> {
        self.handlers.remove(event)
    }

    /// Returns true if a handler is registered for `event`.
    #[must_use]
    pub fn contains(&self, event: &str) -> bool {
        self.handlers.contains_key(event)
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns true if no handlers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Removes every handler.
    pub fn clear(&mut self) {
        self.handlers.clear();
    }
}

impl<S> Default for HandlerTable<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> fmt::Debug for HandlerTable<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}
