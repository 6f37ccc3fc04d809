//! TCP client and acceptor transports over `std::net`.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tracing::{debug, instrument, trace};

use super::error::TransportError;
use super::transport::{Connector, Transport};
use crate::metrics::Metrics;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_ACCEPT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_READ_BUFFER: usize = 4096;
const ACCEPT_POLL: Duration = Duration::from_millis(10);

/// TCP client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TcpConfig {
    /// Host name or IP literal.
    pub host: String,
    /// Remote port.
    pub port: u16,
    /// Upper bound for each connection attempt.
    pub connect_timeout: Duration,
    /// Socket write timeout. `None` lets a write to a peer that stopped
    /// reading block indefinitely, and a pending `disconnect` with it.
    pub write_timeout: Option<Duration>,
    /// Disable Nagle's algorithm.
    pub nodelay: bool,
    /// Maximum bytes returned by a single read.
    pub read_buffer_size: usize,
}

impl TcpConfig {
    /// Configuration for `host:port` with default timeouts.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            write_timeout: Some(DEFAULT_WRITE_TIMEOUT),
            nodelay: true,
            read_buffer_size: DEFAULT_READ_BUFFER,
        }
    }

    /// Override the connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Override the write timeout.
    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }
}

impl From<SocketAddr> for TcpConfig {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl Connector for TcpConfig {
    fn open(&self) -> Result<Box<dyn Transport>, TransportError> {
        Ok(Box::new(TcpTransport::connect(self)?))
    }

    fn endpoint(&self) -> String {
        format!("tcp://{}:{}", self.host, self.port)
    }
}

/// Connected TCP stream.
#[derive(Debug)]
pub struct TcpTransport {
    stream: Option<TcpStream>,
    endpoint: String,
    nonblocking: bool,
    read_buffer_size: usize,
}

impl TcpTransport {
    /// Connect to the configured host, trying every resolved address.
    #[instrument(level = "debug", skip(config), fields(host = %config.host, port = config.port))]
    pub fn connect(config: &TcpConfig) -> Result<Self, TransportError> {
        let addrs: Vec<SocketAddr> = (config.host.as_str(), config.port)
            .to_socket_addrs()
            .map_err(|err| {
                TransportError::InvalidAddress(format!("{}:{}: {err}", config.host, config.port))
            })?
            .collect();

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, config.connect_timeout) {
                Ok(stream) => {
                    return Self::from_stream(
                        stream,
                        format!("tcp://{addr}"),
                        config.write_timeout,
                        config.nodelay,
                        config.read_buffer_size,
                    );
                }
                Err(err) => {
                    debug!(%addr, error = %err, "connect attempt failed");
                    last_err = Some(err);
                }
            }
        }

        Err(last_err.map_or_else(
            || TransportError::InvalidAddress(format!("{}:{}", config.host, config.port)),
            TransportError::IoFailure,
        ))
    }

    fn from_stream(
        stream: TcpStream,
        endpoint: String,
        write_timeout: Option<Duration>,
        nodelay: bool,
        read_buffer_size: usize,
    ) -> Result<Self, TransportError> {
        stream.set_nonblocking(false)?;
        stream.set_nodelay(nodelay)?;
        stream.set_write_timeout(write_timeout)?;
        Metrics::record_transport_open();
        debug!(%endpoint, "tcp transport open");
        Ok(Self {
            stream: Some(stream),
            endpoint,
            nonblocking: false,
            read_buffer_size: read_buffer_size.max(1),
        })
    }

    /// Address of the remote peer, while open.
    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.stream.as_ref().and_then(|s| s.peer_addr().ok())
    }

    fn stream(&mut self, nonblocking: bool) -> Result<&mut TcpStream, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
        if self.nonblocking != nonblocking {
            stream.set_nonblocking(nonblocking)?;
            self.nonblocking = nonblocking;
        }
        Ok(stream)
    }
}

impl Transport for TcpTransport {
    fn read(&mut self, timeout: Option<Duration>) -> Result<Bytes, TransportError> {
        let timeout = timeout.filter(|t| !t.is_zero());
        let mut buf = BytesMut::zeroed(self.read_buffer_size);
        let stream = self.stream(timeout.is_none())?;
        if timeout.is_some() {
            stream.set_read_timeout(timeout)?;
        }

        match stream.read(&mut buf) {
            Ok(0) => {
                debug!(endpoint = %self.endpoint, "peer closed connection");
                self.close();
                Err(TransportError::Closed)
            }
            Ok(n) => {
                trace!(len = n, "tcp read");
                buf.truncate(n);
                Ok(buf.freeze())
            }
            Err(err) if timeout.is_none() && err.kind() == io::ErrorKind::WouldBlock => {
                Ok(Bytes::new())
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => Ok(Bytes::new()),
            Err(err) => Err(TransportError::from_io(err)),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let stream = self.stream(false)?;
        stream.write_all(data).map_err(TransportError::from_io)?;
        trace!(len = data.len(), "tcp write");
        Ok(data.len())
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
            Metrics::record_transport_close();
            debug!(endpoint = %self.endpoint, "tcp transport closed");
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Listening socket configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AcceptorConfig {
    /// Local address to bind.
    pub bind: SocketAddr,
    /// How long [`TcpAcceptor::accept`] waits for a client.
    pub accept_timeout: Duration,
    /// Write timeout applied to accepted streams.
    pub write_timeout: Option<Duration>,
    /// Disable Nagle's algorithm on accepted streams.
    pub nodelay: bool,
    /// Maximum bytes returned by a single read.
    pub read_buffer_size: usize,
}

impl AcceptorConfig {
    /// Listen on `bind` with default options.
    #[must_use]
    pub const fn new(bind: SocketAddr) -> Self {
        Self {
            bind,
            accept_timeout: DEFAULT_ACCEPT_TIMEOUT,
            write_timeout: Some(DEFAULT_WRITE_TIMEOUT),
            nodelay: true,
            read_buffer_size: DEFAULT_READ_BUFFER,
        }
    }

    /// Override the accept timeout.
    #[must_use]
    pub const fn with_accept_timeout(mut self, timeout: Duration) -> Self {
        self.accept_timeout = timeout;
        self
    }

    /// Override the write timeout of accepted streams.
    #[must_use]
    pub const fn with_write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }
}

/// Server side endpoint that turns each accepted client into a transport.
#[derive(Debug)]
pub struct TcpAcceptor {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: AcceptorConfig,
}

impl TcpAcceptor {
    /// Bind the listening socket.
    #[instrument(level = "debug", skip(config), fields(bind = %config.bind))]
    pub fn bind(config: AcceptorConfig) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(config.bind)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        debug!(%local_addr, "tcp acceptor listening");
        Ok(Self {
            listener,
            local_addr,
            config,
        })
    }

    /// Bound address; useful when binding port 0.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait up to the accept timeout for the next client.
    #[instrument(level = "debug", skip(self), fields(local = %self.local_addr))]
    pub fn accept(&self) -> Result<TcpTransport, TransportError> {
        let deadline = Instant::now() + self.config.accept_timeout;
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    debug!(%peer, "accepted client");
                    return TcpTransport::from_stream(
                        stream,
                        format!("tcp://{peer}"),
                        self.config.write_timeout,
                        self.config.nodelay,
                        self.config.read_buffer_size,
                    );
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(TransportError::Timeout);
                    }
                    thread::sleep(ACCEPT_POLL.min(deadline - now));
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(TransportError::IoFailure(err)),
            }
        }
    }
}

impl Connector for TcpAcceptor {
    fn open(&self) -> Result<Box<dyn Transport>, TransportError> {
        Ok(Box::new(self.accept()?))
    }

    fn endpoint(&self) -> String {
        format!("tcp-listen://{}", self.local_addr)
    }
}
