//! Per-destination connection reuse.
//!
//! The pool keeps at most one idle connection per [`Destination`]. A caller
//! checks a connection out with [`ConnectionPool::acquire`], which removes it
//! from its slot, so an in-use connection is owned by exactly one request.
//! Fully-read connections go back with [`ConnectionPool::release`].
//!
//! Before an idle connection is handed out, the raw socket is probed without
//! blocking. Pending bytes or EOF mean the peer closed the connection or
//! pushed data we never asked for; either way the connection is dropped and a
//! new one is opened.
//!
//! # Thread Safety
//!
//! `ConnectionPool` is `Send + Sync`. Slots live in a `DashMap`, so two
//! concurrent calls to one destination never share a socket: the second one
//! finds the slot empty and opens its own connection.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use dashmap::DashMap;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadBuf};
use tokio::net::TcpStream;
use tokio::sync::OnceCell;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tracing::{debug, instrument};

use super::Destination;
use super::constants::READ_CHUNK_SIZE;
use super::tls;

/// Plain or TLS-wrapped socket.
#[derive(Debug)]
pub enum Stream {
    /// Unencrypted TCP.
    Plain(TcpStream),
    /// TLS over TCP.
    Tls(Box<TlsStream<TcpStream>>),
}

impl Stream {
    fn tcp(&self) -> &TcpStream {
        match self {
            Self::Plain(tcp) => tcp,
            Self::Tls(tls) => tls.get_ref().0,
        }
    }
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(tcp) => Pin::new(tcp).poll_read(cx, buf),
            Self::Tls(tls) => Pin::new(tls.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(tcp) => Pin::new(tcp).poll_write(cx, buf),
            Self::Tls(tls) => Pin::new(tls.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(tcp) => Pin::new(tcp).poll_flush(cx),
            Self::Tls(tls) => Pin::new(tls.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(tcp) => Pin::new(tcp).poll_shutdown(cx),
            Self::Tls(tls) => Pin::new(tls.as_mut()).poll_shutdown(cx),
        }
    }
}

/// An open connection checked out of the pool.
#[derive(Debug)]
pub struct Connection {
    destination: Destination,
    io: BufReader<Stream>,
    reusable: bool,
    served: u32,
}

impl Connection {
    fn new(destination: Destination, stream: Stream) -> Self {
        Self {
            destination,
            io: BufReader::with_capacity(READ_CHUNK_SIZE, stream),
            reusable: true,
            served: 0,
        }
    }

    /// Destination this connection talks to.
    #[must_use]
    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Number of responses fully read on this connection.
    #[must_use]
    pub fn served(&self) -> u32 {
        self.served
    }

    pub(crate) fn io(&mut self) -> &mut BufReader<Stream> {
        &mut self.io
    }

    pub(crate) async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.io.get_mut().write_all(data).await
    }

    pub(crate) async fn flush(&mut self) -> io::Result<()> {
        self.io.get_mut().flush().await
    }

    /// Prevents this connection from going back to the pool.
    pub(crate) fn mark_broken(&mut self) {
        self.reusable = false;
    }

    pub(crate) fn finish_response(&mut self) {
        self.served += 1;
    }

    /// Non-blocking liveness probe.
    ///
    /// Reusable only if nothing is buffered and a read on the raw socket
    /// would block.
    fn is_alive(&self) -> bool {
        if !self.reusable || !self.io.buffer().is_empty() {
            return false;
        }
        let mut probe = [0u8; 1];
        match self.io.get_ref().tcp().try_read(&mut probe) {
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => true,
            Ok(0) => {
                debug!(destination = %self.destination, "peer closed idle connection");
                false
            }
            Ok(_) => {
                debug!(destination = %self.destination, "unsolicited data on idle connection");
                false
            }
            Err(error) => {
                debug!(destination = %self.destination, %error, "idle connection probe failed");
                false
            }
        }
    }
}

/// Idle connections keyed by destination.
pub struct ConnectionPool {
    idle: DashMap<Destination, Connection>,
    tls: OnceCell<TlsConnector>,
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("idle_count", &self.idle_count())
            .field("tls_ready", &self.tls.initialized())
            .finish_non_exhaustive()
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionPool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self {
            idle: DashMap::new(),
            tls: OnceCell::new(),
        }
    }

    /// Checks out a live connection to `destination`, opening one if needed.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if connecting or the TLS handshake fails, or
    /// `TimedOut` if either exceeds `connect_timeout`.
    #[instrument(skip(self), fields(destination = %destination))]
    pub async fn acquire(
        &self,
        destination: &Destination,
        connect_timeout: Duration,
    ) -> io::Result<Connection> {
        if let Some((_, connection)) = self.idle.remove(destination) {
            if connection.is_alive() {
                debug!(served = connection.served, "reusing pooled connection");
                return Ok(connection);
            }
            debug!("discarding stale pooled connection");
        }

        let stream = timeout(connect_timeout, self.connect(destination))
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect to {destination} timed out after {connect_timeout:?}"),
                )
            })??;
        debug!("opened new connection");
        Ok(Connection::new(destination.clone(), stream))
    }

    async fn connect(&self, destination: &Destination) -> io::Result<Stream> {
        let tcp = TcpStream::connect((destination.host(), destination.port())).await?;
        tcp.set_nodelay(true)?;
        if !destination.is_secure() {
            return Ok(Stream::Plain(tcp));
        }
        let connector = self
            .tls
            .get_or_try_init(|| async { tls::build_connector() })
            .await?;
        let name = tls::server_name(destination.host())?;
        let tls = connector.connect(name, tcp).await?;
        Ok(Stream::Tls(Box::new(tls)))
    }

    /// Returns a connection to its slot, replacing any idle one.
    ///
    /// Connections marked broken are closed instead.
    pub fn release(&self, connection: Connection) {
        if !connection.reusable {
            debug!(destination = %connection.destination, "closing non-reusable connection");
            return;
        }
        let destination = connection.destination.clone();
        if self.idle.insert(destination, connection).is_some() {
            debug!("replaced idle connection");
        }
    }

    /// Number of idle connections held.
    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.idle.len()
    }

    /// Closes every idle connection.
    pub fn close_all(&self) {
        let count = self.idle.len();
        self.idle.clear();
        debug!(count, "closed all pooled connections");
    }
}
