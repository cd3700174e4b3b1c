//! Non-blocking TCP listener.

use super::stream::TcpTransport;
use crate::error::{Result, TransportError};
use mio::event::Source;
use mio::{Interest, Registry, Token};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

/// Configuration for the TCP listener.
#[derive(Debug, Clone)]
pub struct TcpListenerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Listen backlog.
    pub backlog: i32,
    /// Enable SO_REUSEADDR.
    pub reuse_address: bool,
    /// Enable TCP_NODELAY on accepted streams.
    pub tcp_nodelay: bool,
    /// Send timeout applied to accepted streams. A server sends while holding
    /// the connection, so this bounds how long one slow reader can stall it.
    pub send_timeout: Duration,
}

impl Default for TcpListenerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), 3490),
            backlog: 100,
            reuse_address: true,
            tcp_nodelay: true,
            send_timeout: Duration::from_secs(1),
        }
    }
}

impl TcpListenerConfig {
    /// Creates a new listener config with the specified bind address.
    #[must_use]
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    /// Creates a config listening on every interface (IPv6 dual-stack) at `port`.
    #[must_use]
    pub fn for_port(port: u16) -> Self {
        Self::new(SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), port))
    }

    /// Sets the listen backlog.
    #[must_use]
    pub fn backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog;
        self
    }

    /// Sets SO_REUSEADDR.
    #[must_use]
    pub fn reuse_address(mut self, enabled: bool) -> Self {
        self.reuse_address = enabled;
        self
    }

    /// Sets TCP_NODELAY for accepted streams.
    #[must_use]
    pub fn tcp_nodelay(mut self, enabled: bool) -> Self {
        self.tcp_nodelay = enabled;
        self
    }

    /// Sets the send timeout for accepted streams.
    #[must_use]
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }
}

/// Listening socket producing [`TcpTransport`]s.
#[derive(Debug)]
pub struct TcpAcceptor {
    listener: mio::net::TcpListener,
    config: TcpListenerConfig,
}

impl TcpAcceptor {
    /// Creates, binds and listens according to `config`.
    ///
    /// Binding the unspecified IPv6 address accepts IPv4 peers too; if the
    /// host has no IPv6 support the unspecified IPv4 address is used instead.
    ///
    /// # Errors
    /// Returns `Listen` if socket creation, bind or listen fails.
    pub fn bind(config: TcpListenerConfig) -> Result<Self> {
        let addr = config.bind_addr;
        let socket = match open_socket(addr, &config) {
            Ok(socket) => socket,
            Err(e) if is_any_v6(addr) => {
                tracing::debug!("IPv6 listener unavailable ({}), falling back to IPv4", e);
                let fallback = SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), addr.port());
                open_socket(fallback, &config).map_err(|e| TransportError::listen(fallback, e))?
            }
            Err(e) => return Err(TransportError::listen(addr, e)),
        };

        let listener = mio::net::TcpListener::from_std(socket.into());
        tracing::info!("listening on {}", listener.local_addr()?);

        Ok(Self { listener, config })
    }

    /// Accepts one pending connection.
    ///
    /// # Returns
    /// `Ok(None)` if no connection is pending.
    ///
    /// # Errors
    /// Returns IO error if accept fails for a reason other than would-block.
    pub fn accept(&mut self) -> Result<Option<TcpTransport>> {
        loop {
            return match self.listener.accept() {
                Ok((stream, addr)) => {
                    stream.set_nodelay(self.config.tcp_nodelay)?;
                    Ok(Some(TcpTransport::from_accepted(
                        stream,
                        addr,
                        self.config.send_timeout,
                    )))
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => Err(TransportError::Io(e)),
            };
        }
    }

    /// Returns the local address the listener is bound to.
    ///
    /// # Errors
    /// Returns IO error if the address cannot be queried.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Returns the listener configuration.
    #[must_use]
    pub fn config(&self) -> &TcpListenerConfig {
        &self.config
    }
}

fn is_any_v6(addr: SocketAddr) -> bool {
    addr.is_ipv6() && addr.ip().is_unspecified()
}

fn open_socket(addr: SocketAddr, config: &TcpListenerConfig) -> io::Result<Socket> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    if is_any_v6(addr) {
        socket.set_only_v6(false)?;
    }
    socket.set_reuse_address(config.reuse_address)?;
    socket.bind(&addr.into())?;
    socket.listen(config.backlog)?;
    socket.set_nonblocking(true)?;
    Ok(socket)
}

impl Source for TcpAcceptor {
    fn register(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        self.listener.register(registry, token, interests)
    }

    fn reregister(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        self.listener.reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        self.listener.deregister(registry)
    }
}
