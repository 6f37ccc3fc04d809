//! Serial port transport backed by the `serialport` crate.

use std::fmt;
use std::io::{self, Read, Write};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use serialport::{ClearBuffer, SerialPort};
use tracing::{debug, instrument, trace};

use super::error::TransportError;
use super::transport::{Connector, Transport};
use crate::metrics::Metrics;

const DEFAULT_BAUD_RATE: u32 = 115_200;
const DEFAULT_TIMEOUT: Duration = Duration::from_millis(100);
const DEFAULT_READ_BUFFER: usize = 4096;

/// Number of data bits per character.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[allow(missing_docs)]
pub enum DataBits {
    Five,
    Six,
    Seven,
    #[default]
    Eight,
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[allow(missing_docs)]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[allow(missing_docs)]
pub enum StopBits {
    #[default]
    One,
    Two,
}

/// Flow control mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FlowControl {
    /// No flow control.
    #[default]
    None,
    /// XON/XOFF.
    Software,
    /// RTS/CTS.
    Hardware,
}

impl From<DataBits> for serialport::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Five => Self::Five,
            DataBits::Six => Self::Six,
            DataBits::Seven => Self::Seven,
            DataBits::Eight => Self::Eight,
        }
    }
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => Self::None,
            Parity::Odd => Self::Odd,
            Parity::Even => Self::Even,
        }
    }
}

impl From<StopBits> for serialport::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => Self::One,
            StopBits::Two => Self::Two,
        }
    }
}

impl From<FlowControl> for serialport::FlowControl {
    fn from(flow: FlowControl) -> Self {
        match flow {
            FlowControl::None => Self::None,
            FlowControl::Software => Self::Software,
            FlowControl::Hardware => Self::Hardware,
        }
    }
}

/// Serial port configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SerialConfig {
    /// Device path (`/dev/ttyUSB0`) or name (`COM3`).
    pub port: String,
    /// Line speed.
    pub baud_rate: u32,
    /// Character size.
    pub data_bits: DataBits,
    /// Parity mode.
    pub parity: Parity,
    /// Stop bits.
    pub stop_bits: StopBits,
    /// Flow control.
    pub flow_control: FlowControl,
    /// Write timeout.
    pub timeout: Duration,
    /// Maximum bytes returned by a single read.
    pub read_buffer_size: usize,
}

impl SerialConfig {
    /// 8N1 at 115200 baud on `port`.
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: DataBits::default(),
            parity: Parity::default(),
            stop_bits: StopBits::default(),
            flow_control: FlowControl::default(),
            timeout: DEFAULT_TIMEOUT,
            read_buffer_size: DEFAULT_READ_BUFFER,
        }
    }

    /// Override the baud rate.
    #[must_use]
    pub const fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Override the parity mode.
    #[must_use]
    pub const fn with_parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    /// Override the write timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Connector for SerialConfig {
    fn open(&self) -> Result<Box<dyn Transport>, TransportError> {
        Ok(Box::new(SerialTransport::open(self)?))
    }

    fn endpoint(&self) -> String {
        format!("serial://{}@{}", self.port, self.baud_rate)
    }
}

/// List the serial ports present on this system.
pub fn available_ports() -> Result<Vec<String>, TransportError> {
    Ok(serialport::available_ports()?
        .into_iter()
        .map(|info| info.port_name)
        .collect())
}

/// Open serial port.
pub struct SerialTransport {
    port: Option<Box<dyn SerialPort>>,
    endpoint: String,
    write_timeout: Duration,
    current_timeout: Duration,
    read_buffer_size: usize,
}

impl SerialTransport {
    /// Open and configure the port, discarding anything already buffered.
    #[instrument(
        level = "debug",
        skip(config),
        fields(port = %config.port, baud = config.baud_rate)
    )]
    pub fn open(config: &SerialConfig) -> Result<Self, TransportError> {
        let port = serialport::new(config.port.as_str(), config.baud_rate)
            .data_bits(config.data_bits.into())
            .parity(config.parity.into())
            .stop_bits(config.stop_bits.into())
            .flow_control(config.flow_control.into())
            .timeout(config.timeout)
            .open()?;
        port.clear(ClearBuffer::All)?;

        let endpoint = Connector::endpoint(config);
        Metrics::record_transport_open();
        debug!(%endpoint, "serial transport open");
        Ok(Self {
            port: Some(port),
            endpoint,
            write_timeout: config.timeout,
            current_timeout: config.timeout,
            read_buffer_size: config.read_buffer_size.max(1),
        })
    }

    fn port(&mut self, timeout: Duration) -> Result<&mut Box<dyn SerialPort>, TransportError> {
        let port = self.port.as_mut().ok_or(TransportError::Closed)?;
        if self.current_timeout != timeout {
            port.set_timeout(timeout)?;
            self.current_timeout = timeout;
        }
        Ok(port)
    }
}

impl fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialTransport")
            .field("endpoint", &self.endpoint)
            .field("open", &self.port.is_some())
            .finish_non_exhaustive()
    }
}

impl Transport for SerialTransport {
    fn read(&mut self, timeout: Option<Duration>) -> Result<Bytes, TransportError> {
        let mut buf = BytesMut::zeroed(self.read_buffer_size);
        let result = match timeout.filter(|t| !t.is_zero()) {
            Some(timeout) => self.port(timeout)?.read(&mut buf),
            None => {
                let port = self.port.as_mut().ok_or(TransportError::Closed)?;
                let available = port.bytes_to_read()? as usize;
                if available == 0 {
                    return Ok(Bytes::new());
                }
                buf.truncate(available.min(buf.len()));
                port.read(&mut buf)
            }
        };

        match result {
            // A zero-length read means the device went away.
            Ok(0) => {
                self.close();
                Err(TransportError::Closed)
            }
            Ok(n) => {
                trace!(len = n, "serial read");
                buf.truncate(n);
                Ok(buf.freeze())
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => Ok(Bytes::new()),
            Err(err) => Err(TransportError::from_io(err)),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let timeout = self.write_timeout;
        let port = self.port(timeout)?;
        port.write_all(data).map_err(TransportError::from_io)?;
        port.flush().map_err(TransportError::from_io)?;
        trace!(len = data.len(), "serial write");
        Ok(data.len())
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            Metrics::record_transport_close();
            debug!(endpoint = %self.endpoint, "serial transport closed");
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.close();
    }
}
