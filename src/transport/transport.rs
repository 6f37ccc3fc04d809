//! Transport abstraction over byte-stream endpoints.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;

use super::error::TransportError;
use super::serial::SerialConfig;
use super::socket::TcpConfig;

/// Open byte-stream endpoint, exclusively owned by one session.
///
/// Implementations release their OS resources on [`Transport::close`] and on
/// drop, including after a failed operation.
pub trait Transport: Send + fmt::Debug {
    /// Read whatever is available.
    ///
    /// With `None` or a zero timeout this polls and may return an empty
    /// buffer. With a positive timeout it blocks up to that long and returns
    /// [`TransportError::Timeout`] if nothing arrived.
    fn read(&mut self, timeout: Option<Duration>) -> Result<Bytes, TransportError>;

    /// Write all of `data`, returning the number of bytes written.
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError>;

    /// Release the endpoint. Closing twice is a no-op.
    fn close(&mut self);

    /// Whether the handle is still usable.
    fn is_open(&self) -> bool;

    /// Human-readable endpoint description for logs.
    fn endpoint(&self) -> &str;
}

impl Transport for Box<dyn Transport> {
    fn read(&mut self, timeout: Option<Duration>) -> Result<Bytes, TransportError> {
        (**self).read(timeout)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        (**self).write(data)
    }

    fn close(&mut self) {
        (**self).close();
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn endpoint(&self) -> &str {
        (**self).endpoint()
    }
}

/// Opens transports on demand; sessions call it on every connect.
pub trait Connector: Send + Sync {
    /// Open a fresh transport.
    fn open(&self) -> Result<Box<dyn Transport>, TransportError>;

    /// Endpoint description used in logs and error reports.
    fn endpoint(&self) -> String;
}

impl<F> Connector for F
where
    F: Fn() -> Result<Box<dyn Transport>, TransportError> + Send + Sync,
{
    fn open(&self) -> Result<Box<dyn Transport>, TransportError> {
        self()
    }

    fn endpoint(&self) -> String {
        "custom".to_owned()
    }
}

/// Transport configuration options.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TransportConfig {
    /// TCP client socket.
    Tcp(TcpConfig),
    /// Serial port.
    Serial(SerialConfig),
}

impl From<TcpConfig> for TransportConfig {
    fn from(config: TcpConfig) -> Self {
        Self::Tcp(config)
    }
}

impl From<SerialConfig> for TransportConfig {
    fn from(config: SerialConfig) -> Self {
        Self::Serial(config)
    }
}

impl Connector for TransportConfig {
    fn open(&self) -> Result<Box<dyn Transport>, TransportError> {
        match self {
            Self::Tcp(config) => config.open(),
            Self::Serial(config) => config.open(),
        }
    }

    fn endpoint(&self) -> String {
        match self {
            Self::Tcp(config) => config.endpoint(),
            Self::Serial(config) => config.endpoint(),
        }
    }
}
