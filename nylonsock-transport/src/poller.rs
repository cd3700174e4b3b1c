//! Readiness multiplexer.
//!
//! Wraps a set of registered handles and reports which of them are ready,
//! bounded by a timeout. Backed by the OS selector through `mio`.
//!
//! Readiness is edge-triggered: a handle is reported once per transition
//! to ready, so a reader must keep reading until it observes would-block
//! before relying on the next poll to wake it again.

use mio::event::Source;
use mio::{Events, Poll};
use std::collections::HashMap;
use std::io;
use std::ops::{BitAnd, BitOr, BitOrAssign};
use std::time::Duration;

pub use mio::Token;

const DEFAULT_EVENTS_CAPACITY: usize = 64;

/// Set of readiness conditions a caller is interested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interest(u8);

impl Interest {
    /// Data (or end of stream) can be read.
    pub const READABLE: Self = Self(0b001);
    /// The handle can accept writes.
    pub const WRITABLE: Self = Self(0b010);
    /// An error or hang-up condition is pending.
    pub const ERROR: Self = Self(0b100);

    /// Returns true if every bit of `other` is set in `self`.
    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns true if at least one bit is shared with `other`.
    #[must_use]
    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Returns true if no bits are set.
    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    // The OS selector always reports errors; error-only interest still
    // needs a read registration to be woken.
    fn to_mio(self) -> mio::Interest {
        if self.contains(Self::WRITABLE) && self.intersects(Self::READABLE | Self::ERROR) {
            mio::Interest::READABLE | mio::Interest::WRITABLE
        } else if self.contains(Self::WRITABLE) {
            mio::Interest::WRITABLE
        } else {
            mio::Interest::READABLE
        }
    }

    fn from_event(event: &mio::event::Event) -> Self {
        let mut observed = Self::default();
        if event.is_readable() || event.is_read_closed() {
            observed |= Self::READABLE;
        }
        if event.is_writable() {
            observed |= Self::WRITABLE;
        }
        if event.is_error() || event.is_read_closed() || event.is_write_closed() {
            observed |= Self::ERROR;
        }
        observed
    }
}

impl BitOr for Interest {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for Interest {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Interest {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

/// Handles found ready by one [`Poller::poll`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadySet {
    entries: Vec<(Token, Interest)>,
}

impl ReadySet {
    /// Returns true if nothing was ready.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of ready handles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if `token` was reported ready for any interest.
    #[must_use]
    pub fn contains(&self, token: Token) -> bool {
        self.entries.iter().any(|(t, _)| *t == token)
    }

    /// Iterates over ready handles and their satisfied interests.
    pub fn iter(&self) -> impl Iterator<Item = (Token, Interest)> + '_ {
        self.entries.iter().copied()
    }
}

/// Readiness multiplexer over registered transport handles.
pub struct Poller {
    poll: Poll,
    events: Events,
    interests: HashMap<Token, Interest>,
    ready: HashMap<Token, Interest>,
}

impl Poller {
    /// Creates an empty multiplexer.
    ///
    /// # Errors
    /// Returns IO error if the OS selector cannot be created.
    pub fn new() -> io::Result<Self> {
        Self::with_capacity(DEFAULT_EVENTS_CAPACITY)
    }

    /// Creates an empty multiplexer reporting up to `capacity` events per poll.
    ///
    /// # Errors
    /// Returns IO error if the OS selector cannot be created.
    pub fn with_capacity(capacity: usize) -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(capacity.max(1)),
            interests: HashMap::new(),
            ready: HashMap::new(),
        })
    }

    /// Registers `source` under `token`. Registering the same token again
    /// merges the new interest into the existing one.
    ///
    /// # Errors
    /// Returns IO error if the OS selector rejects the registration.
    pub fn register<S>(&mut self, source: &mut S, token: Token, interest: Interest) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        match self.interests.get(&token).copied() {
            Some(existing) => {
                let merged = existing | interest;
                self.poll
                    .registry()
                    .reregister(source, token, merged.to_mio())?;
                self.interests.insert(token, merged);
            }
            None => {
                self.poll
                    .registry()
                    .register(source, token, interest.to_mio())?;
                self.interests.insert(token, interest);
            }
        }
        Ok(())
    }

    /// Removes `source` from the set.
    ///
    /// # Errors
    /// Returns IO error if the OS selector rejects the deregistration.
    pub fn deregister<S>(&mut self, source: &mut S, token: Token) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        self.forget(token);
        self.poll.registry().deregister(source)
    }

    /// Drops all bookkeeping for `token` without touching the OS selector.
    ///
    /// Used when the underlying handle has already been closed, which
    /// removes it from the selector implicitly.
    pub fn forget(&mut self, token: Token) {
        self.interests.remove(&token);
        self.ready.remove(&token);
    }

    /// Waits up to `timeout` for registered handles to become ready.
    ///
    /// A zero timeout polls without blocking. With nothing registered this
    /// returns an empty set immediately.
    ///
    /// # Errors
    /// Returns IO error if the OS selector fails.
    pub fn poll(&mut self, timeout: Duration) -> io::Result<ReadySet> {
        self.ready.clear();
        if self.interests.is_empty() {
            return Ok(ReadySet::default());
        }

        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(ReadySet::default()),
            Err(e) => return Err(e),
        }

        for event in self.events.iter() {
            let token = event.token();
            // Stale events for handles removed since registration are dropped
            let Some(&wanted) = self.interests.get(&token) else {
                continue;
            };
            let satisfied = Interest::from_event(event) & wanted;
            if !satisfied.is_empty() {
                *self.ready.entry(token).or_default() |= satisfied;
            }
        }

        Ok(ReadySet {
            entries: self.ready.iter().map(|(t, i)| (*t, *i)).collect(),
        })
    }

    /// Returns true if the most recent poll found `token` ready for `interest`.
    #[must_use]
    pub fn is_ready(&self, token: Token, interest: Interest) -> bool {
        self.ready
            .get(&token)
            .is_some_and(|observed| observed.intersects(interest))
    }

    /// Number of registered handles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.interests.len()
    }

    /// Returns true if no handles are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.interests.is_empty()
    }
}

impl std::fmt::Debug for Poller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller")
            .field("registered", &self.interests.len())
            .field("ready", &self.ready.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::net::{TcpListener, TcpStream};
    use std::io::Write;
    use std::time::Instant;

    fn pair() -> (TcpStream, std::net::TcpStream) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        (TcpStream::from_std(server), client)
    }

    #[test]
    fn test_interest_ops() {
        let both = Interest::READABLE | Interest::WRITABLE;
        assert!(both.contains(Interest::READABLE));
        assert!(both.contains(Interest::WRITABLE));
        assert!(!both.contains(Interest::ERROR));
        assert!(both.intersects(Interest::WRITABLE | Interest::ERROR));
        assert!((both & Interest::ERROR).is_empty());
        assert!(Interest::default().is_empty());
    }

    #[test]
    fn test_empty_poll_returns_immediately() {
        let mut poller = Poller::new().unwrap();
        let start = Instant::now();
        let ready = poller.poll(Duration::from_secs(5)).unwrap();
        assert!(ready.is_empty());
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_timeout_with_nothing_ready() {
        let mut poller = Poller::new().unwrap();
        let (mut server, _client) = pair();
        let token = Token(1);
        poller
            .register(&mut server, token, Interest::READABLE)
            .unwrap();

        let ready = poller.poll(Duration::from_millis(20)).unwrap();
        assert!(ready.is_empty());
        assert!(!poller.is_ready(token, Interest::READABLE));
    }

    #[test]
    fn test_readable_after_write() {
        let mut poller = Poller::new().unwrap();
        let (mut server, mut client) = pair();
        let token = Token(7);
        poller
            .register(&mut server, token, Interest::READABLE)
            .unwrap();

        client.write_all(b"hi").unwrap();

        let ready = poller.poll(Duration::from_secs(2)).unwrap();
        assert!(ready.contains(token));
        assert_eq!(ready.len(), 1);
        assert!(poller.is_ready(token, Interest::READABLE));
        assert!(!poller.is_ready(token, Interest::WRITABLE));
    }

    #[test]
    fn test_register_merges_interest() {
        let mut poller = Poller::new().unwrap();
        let (mut server, _client) = pair();
        let token = Token(3);
        poller
            .register(&mut server, token, Interest::READABLE)
            .unwrap();
        poller
            .register(&mut server, token, Interest::WRITABLE)
            .unwrap();
        assert_eq!(poller.len(), 1);

        // A fresh socket has send capacity
        let ready = poller.poll(Duration::from_secs(2)).unwrap();
        assert!(ready.contains(token));
        assert!(poller.is_ready(token, Interest::WRITABLE));
    }

    #[test]
    fn test_deregister_reflected() {
        let mut poller = Poller::new().unwrap();
        let (mut server, mut client) = pair();
        let token = Token(9);
        poller
            .register(&mut server, token, Interest::READABLE)
            .unwrap();
        poller.deregister(&mut server, token).unwrap();
        assert!(poller.is_empty());

        client.write_all(b"late").unwrap();
        let ready = poller.poll(Duration::from_millis(50)).unwrap();
        assert!(ready.is_empty());
        assert!(!poller.is_ready(token, Interest::READABLE));
    }

    #[test]
    fn test_listener_readable_on_connect() {
        let mut poller = Poller::new().unwrap();
        let mut listener = TcpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();
        let token = Token(0);
        poller
            .register(&mut listener, token, Interest::READABLE)
            .unwrap();

        let _client = std::net::TcpStream::connect(addr).unwrap();
        let ready = poller.poll(Duration::from_secs(2)).unwrap();
        assert!(ready.contains(token));
    }
}
