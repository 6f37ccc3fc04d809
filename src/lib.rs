//! commlink - mailbox-driven communication over serial ports and sockets
//!
//! The crate connects blocking device I/O to a single-threaded consumer such
//! as a UI loop. Worker threads talk to devices; everything they learn is
//! posted to a mailbox that the consumer drains once per tick.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use commlink::{FramerConfig, MailboxConfig, Session, SessionConfig, TcpConfig, mailbox};
//!
//! let (poster, mut inbox) = mailbox(MailboxConfig::default());
//! let session = Session::new(
//!     TcpConfig::new("192.168.1.20", 5025),
//!     SessionConfig::new("scope", FramerConfig::lines()),
//! )?
//! .with_mailbox(poster);
//!
//! session.connect()?;
//! let reply = session.request(b"*IDN?", Some(Duration::from_millis(500)))?;
//! println!("{}", String::from_utf8_lossy(reply.payload()));
//!
//! for message in inbox.drain_all() {
//!     println!("{:?}", message.body());
//! }
//! # Ok::<(), commlink::Error>(())
//! ```
//!
//! # Components
//!
//! - **Transport** - TCP client/acceptor, serial port and in-memory pipes
//! - **Framer** - delimiter, fixed-length and length-prefixed framing with
//!   XOR or CRC-16/MODBUS checksums
//! - **Session** - request/response with timeout and retry, or background
//!   delivery into a mailbox
//! - **Mailbox** - bounded or unbounded FIFO with overflow policies
//! - **Tasklet** - recurring and one-shot timers that post into a mailbox

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

mod error;
pub mod framing;
pub mod mailbox;
pub mod metrics;
pub mod session;
pub mod tasklet;
pub mod transport;

pub use error::{Error, Result};
pub use framing::{Checksum, Frame, FrameError, Framer, FramerConfig, LengthWidth};
pub use mailbox::{
    Delivery, Fault, FaultKind, Inbox, MailboxConfig, Message, MessageBody, MessageType,
    OverflowPolicy, Poster, Source, mailbox,
};
pub use session::{
    AsyncSession, IntoAsyncError, RetryPolicy, Session, SessionConfig, SessionError, SessionState,
};
pub use tasklet::{Schedule, TaskContext, TaskHandle, Tasklet, TaskletConfig};
pub use transport::{
    Connector, SerialConfig, TcpAcceptor, TcpConfig, Transport, TransportConfig, TransportError,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
