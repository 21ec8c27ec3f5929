//! Transport adapters — duplex byte connections to peer agents.
//!
//! A [`Transport`] accepts inbound connections and owns no message
//! semantics. Two variants are provided: [`TcpTransport`] for real
//! networking and [`MemoryTransport`] (with its [`MemoryConnector`]) for
//! in-process pipes. The listener core behaves identically against either.

use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::debug;

/// A duplex byte connection. Blanket-implemented so `TcpStream` and
/// `tokio::io::DuplexStream` both qualify.
pub trait Connection: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + 'static> Connection for T {}

/// Boxed connection handed to the listener core.
pub type BoxedConn = Box<dyn Connection>;

/// Accepts inbound duplex connections from peer agents.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Wait for the next inbound connection. Returns the connection and a
    /// human-readable remote address for logging.
    async fn accept(&mut self) -> io::Result<(BoxedConn, String)>;

    /// The address this transport is reachable at.
    fn local_addr(&self) -> String;
}

/// TCP transport over a bound listener.
pub struct TcpTransport {
    listener: TcpListener,
    local_addr: std::net::SocketAddr,
}

impl TcpTransport {
    /// Bind the listen address. A bind failure here is fatal for startup.
    pub async fn bind(addr: std::net::SocketAddr) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// The actual bound socket address (useful when binding port 0).
    pub fn socket_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }

    /// Dial a remote listener.
    pub async fn connect(addr: std::net::SocketAddr) -> io::Result<BoxedConn> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn accept(&mut self) -> io::Result<(BoxedConn, String)> {
        let (stream, addr) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        debug!(remote = %addr, "accepted TCP connection");
        Ok((Box::new(stream), addr.to_string()))
    }

    fn local_addr(&self) -> String {
        self.local_addr.to_string()
    }
}

/// Buffer size for in-memory duplex pipes.
const MEMORY_PIPE_CAPACITY: usize = 64 * 1024;

/// In-process transport for tests: connections are `tokio::io::duplex`
/// pipe pairs pushed through a channel by the paired [`MemoryConnector`].
pub struct MemoryTransport {
    incoming: mpsc::Receiver<BoxedConn>,
}

/// Dialer half of a [`MemoryTransport`] pair.
#[derive(Clone)]
pub struct MemoryConnector {
    dial: mpsc::Sender<BoxedConn>,
}

impl MemoryTransport {
    /// Create a transport and its connector.
    pub fn new() -> (Self, MemoryConnector) {
        let (tx, rx) = mpsc::channel(16);
        (Self { incoming: rx }, MemoryConnector { dial: tx })
    }
}

impl MemoryConnector {
    /// Open a new in-process connection to the paired transport.
    pub async fn connect(&self) -> io::Result<BoxedConn> {
        let (near, far) = tokio::io::duplex(MEMORY_PIPE_CAPACITY);
        self.dial
            .send(Box::new(far))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::ConnectionRefused, "listener gone"))?;
        Ok(Box::new(near))
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn accept(&mut self) -> io::Result<(BoxedConn, String)> {
        match self.incoming.recv().await {
            Some(conn) => Ok((conn, "memory".to_string())),
            None => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "all connectors dropped",
            )),
        }
    }

    fn local_addr(&self) -> String {
        "memory".to_string()
    }
}
