//! Non-blocking TCP stream transport and outbound connect.

use crate::error::{Result, TransportError};
use crate::transport::{Recv, Transport};
use mio::event::Source;
use mio::{Interest, Registry, Token};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, ToSocketAddrs};
use std::time::{Duration, Instant};

const SEND_BACKOFF: Duration = Duration::from_micros(200);

/// Configuration for outbound TCP connections.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// Timeout for each address candidate.
    pub connect_timeout: Duration,
    /// Enable TCP_NODELAY.
    pub tcp_nodelay: bool,
    /// How long `send_all` waits for a full send buffer to drain.
    pub send_timeout: Duration,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            tcp_nodelay: true,
            send_timeout: Duration::from_secs(5),
        }
    }
}

impl ConnectConfig {
    /// Sets the per-candidate connection timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets TCP_NODELAY option.
    #[must_use]
    pub fn tcp_nodelay(mut self, enabled: bool) -> Self {
        self.tcp_nodelay = enabled;
        self
    }

    /// Sets the send timeout.
    #[must_use]
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }
}

/// A connected, non-blocking TCP stream.
///
/// Dropping the transport shuts the stream down and then closes it.
#[derive(Debug)]
pub struct TcpTransport {
    stream: mio::net::TcpStream,
    peer_addr: Option<SocketAddr>,
    send_timeout: Duration,
}

impl TcpTransport {
    /// Wraps a connected std stream, switching it to non-blocking mode.
    ///
    /// # Errors
    /// Returns IO error if socket options cannot be applied.
    pub fn from_std(
        stream: std::net::TcpStream,
        tcp_nodelay: bool,
        send_timeout: Duration,
    ) -> Result<Self> {
        stream.set_nodelay(tcp_nodelay)?;
        stream.set_nonblocking(true)?;
        let peer_addr = stream.peer_addr().ok();
        Ok(Self {
            stream: mio::net::TcpStream::from_std(stream),
            peer_addr,
            send_timeout,
        })
    }

    pub(crate) fn from_accepted(
        stream: mio::net::TcpStream,
        peer_addr: SocketAddr,
        send_timeout: Duration,
    ) -> Self {
        Self {
            stream,
            peer_addr: Some(peer_addr),
            send_timeout,
        }
    }

    /// Returns the local address of the stream.
    ///
    /// # Errors
    /// Returns IO error if the address cannot be queried.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.stream.local_addr()?)
    }
}

fn classify(err: io::Error) -> TransportError {
    match err.kind() {
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => TransportError::PeerReset,
        _ => TransportError::Io(err),
    }
}

impl Transport for TcpTransport {
    fn send_all(&mut self, mut buf: &[u8]) -> Result<()> {
        let started = Instant::now();
        while !buf.is_empty() {
            match self.stream.write(buf) {
                Ok(0) => return Err(TransportError::Io(io::ErrorKind::WriteZero.into())),
                Ok(n) => buf = &buf[n..],
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if started.elapsed() >= self.send_timeout {
                        return Err(TransportError::SendTimeout {
                            timeout: self.send_timeout,
                        });
                    }
                    std::thread::sleep(SEND_BACKOFF);
                }
                Err(e) => return Err(classify(e)),
            }
        }
        Ok(())
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<Recv> {
        loop {
            return match self.stream.read(buf) {
                Ok(0) if !buf.is_empty() => Err(TransportError::OrderlyClose),
                Ok(n) => Ok(Recv::Data(n)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(Recv::WouldBlock),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => Err(classify(e)),
            };
        }
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    fn shutdown(&mut self) {
        if let Err(e) = self.stream.shutdown(Shutdown::Both)
            && e.kind() != io::ErrorKind::NotConnected
        {
            tracing::debug!("shutdown of {:?} failed: {}", self.peer_addr, e);
        }
    }
}

impl Source for TcpTransport {
    fn register(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        self.stream.register(registry, token, interests)
    }

    fn reregister(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        self.stream.reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        self.stream.deregister(registry)
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Resolves `host:port` and connects to the first candidate that accepts.
///
/// # Errors
/// Returns `Resolve` if the name cannot be resolved and `ConnectFailed` if
/// every resolved candidate fails.
pub fn connect(host: &str, port: u16, config: &ConnectConfig) -> Result<TcpTransport> {
    let target = format!("{}:{}", host, port);
    let candidates: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| TransportError::Resolve {
            target: target.clone(),
            message: e.to_string(),
        })?
        .collect();

    connect_candidates(&target, &candidates, config)
}

/// Connects to the first of `candidates` that accepts, in order.
///
/// # Errors
/// Returns `ConnectFailed` if every candidate fails (or none are given).
pub fn connect_addrs(candidates: &[SocketAddr], config: &ConnectConfig) -> Result<TcpTransport> {
    let target = candidates
        .first()
        .map_or_else(|| "<no address>".to_string(), ToString::to_string);
    connect_candidates(&target, candidates, config)
}

fn connect_candidates(
    target: &str,
    candidates: &[SocketAddr],
    config: &ConnectConfig,
) -> Result<TcpTransport> {
    let mut last_error = String::from("no address candidates");

    for addr in candidates {
        // A failed attempt's socket is released before the next one is tried
        match std::net::TcpStream::connect_timeout(addr, config.connect_timeout) {
            Ok(stream) => {
                tracing::debug!("connected to {} via {}", target, addr);
                return TcpTransport::from_std(stream, config.tcp_nodelay, config.send_timeout);
            }
            Err(e) => {
                tracing::debug!("connect to {} failed: {}", addr, e);
                last_error = e.to_string();
            }
        }
    }

    Err(TransportError::ConnectFailed {
        target: target.to_string(),
        attempts: candidates.len(),
        last_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected() -> (TcpTransport, std::net::TcpStream) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let transport = connect_addrs(&[addr], &ConnectConfig::default()).unwrap();
        let (peer, _) = listener.accept().unwrap();
        (transport, peer)
    }

    fn recv_blocking(transport: &mut TcpTransport, buf: &mut [u8]) -> Result<usize> {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            match transport.recv(buf)? {
                Recv::Data(n) => return Ok(n),
                Recv::WouldBlock if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(1));
                }
                Recv::WouldBlock => panic!("timed out waiting for data"),
            }
        }
    }

    #[test]
    fn test_connect_config_default() {
        let config = ConnectConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert!(config.tcp_nodelay);
        assert_eq!(config.send_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_connect_config_builder() {
        let config = ConnectConfig::default()
            .connect_timeout(Duration::from_millis(250))
            .tcp_nodelay(false)
            .send_timeout(Duration::from_secs(1));
        assert_eq!(config.connect_timeout, Duration::from_millis(250));
        assert!(!config.tcp_nodelay);
        assert_eq!(config.send_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_send_and_recv() {
        let (mut transport, mut peer) = connected();

        transport.send_all(b"hello").unwrap();
        let mut buf = [0u8; 5];
        peer.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        peer.write_all(b"world").unwrap();
        let mut buf = [0u8; 16];
        let n = recv_blocking(&mut transport, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"world");
    }

    #[test]
    fn test_recv_would_block() {
        let (mut transport, _peer) = connected();
        let mut buf = [0u8; 8];
        assert_eq!(transport.recv(&mut buf).unwrap(), Recv::WouldBlock);
    }

    #[test]
    fn test_recv_orderly_close() {
        let (mut transport, peer) = connected();
        drop(peer);
        let mut buf = [0u8; 8];
        let err = recv_blocking(&mut transport, &mut buf).unwrap_err();
        assert!(matches!(err, TransportError::OrderlyClose));
    }

    #[test]
    fn test_recv_peer_reset() {
        let (mut transport, peer) = connected();
        // A zero linger turns close into a reset
        socket2::SockRef::from(&peer)
            .set_linger(Some(Duration::ZERO))
            .unwrap();
        drop(peer);

        let mut buf = [0u8; 8];
        let err = recv_blocking(&mut transport, &mut buf).unwrap_err();
        assert!(matches!(err, TransportError::PeerReset));
        assert!(err.is_disconnect());
    }

    #[test]
    fn test_peer_addr_known() {
        let (transport, peer) = connected();
        assert_eq!(transport.peer_addr(), Some(peer.local_addr().unwrap()));
    }

    #[test]
    fn test_connect_falls_back_to_next_candidate() {
        // Grab a port that nothing listens on
        let dead = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let dead_addr = dead.local_addr().unwrap();
        drop(dead);

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let live_addr = listener.local_addr().unwrap();

        let transport = connect_addrs(&[dead_addr, live_addr], &ConnectConfig::default()).unwrap();
        assert_eq!(transport.peer_addr(), Some(live_addr));
    }

    #[test]
    fn test_connect_all_candidates_fail() {
        let dead = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let dead_addr = dead.local_addr().unwrap();
        drop(dead);

        let err = connect_addrs(&[dead_addr], &ConnectConfig::default()).unwrap_err();
        assert!(matches!(err, TransportError::ConnectFailed { attempts: 1, .. }));
    }

    #[test]
    fn test_connect_no_candidates() {
        let err = connect_addrs(&[], &ConnectConfig::default()).unwrap_err();
        assert!(matches!(err, TransportError::ConnectFailed { attempts: 0, .. }));
    }

    #[test]
    fn test_connect_by_name() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let transport = connect("127.0.0.1", port, &ConnectConfig::default()).unwrap();
        assert!(transport.local_addr().is_ok());
    }
}
