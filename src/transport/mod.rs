//! Byte-stream transports: TCP, serial and in-memory.

mod error;
mod memory;
mod serial;
mod socket;
mod transport;

pub use error::TransportError;
pub use memory::{MemoryConnector, MemoryTransport};
pub use serial::{
    DataBits, FlowControl, Parity, SerialConfig, SerialTransport, StopBits, available_ports,
};
pub use socket::{AcceptorConfig, TcpAcceptor, TcpConfig, TcpTransport};
pub use transport::{Connector, Transport, TransportConfig};
