//! In-process transports for loopback wiring and tests.

use std::collections::VecDeque;
use std::io;
use std::sync::Mutex;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tracing::trace;

use super::error::TransportError;
use super::transport::{Connector, Transport};
use crate::metrics::Metrics;

/// One end of an in-memory byte pipe.
///
/// Reads coalesce every chunk already queued, so writes on one side may be
/// observed as a single read on the other.
#[derive(Debug)]
pub struct MemoryTransport {
    tx: Option<Sender<Bytes>>,
    rx: Option<Receiver<Bytes>>,
    endpoint: String,
}

impl MemoryTransport {
    /// Create two connected ends.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::channel();
        let (b_tx, a_rx) = mpsc::channel();
        Metrics::record_transport_open();
        Metrics::record_transport_open();
        (
            Self {
                tx: Some(a_tx),
                rx: Some(a_rx),
                endpoint: "memory://a".to_owned(),
            },
            Self {
                tx: Some(b_tx),
                rx: Some(b_rx),
                endpoint: "memory://b".to_owned(),
            },
        )
    }

    fn collect(&self, first: Bytes) -> Bytes {
        let Some(rx) = self.rx.as_ref() else {
            return first;
        };
        let mut rest = rx.try_iter().peekable();
        if rest.peek().is_none() {
            return first;
        }
        let mut buf = BytesMut::from(&first[..]);
        for chunk in rest {
            buf.extend_from_slice(&chunk);
        }
        buf.freeze()
    }
}

impl Transport for MemoryTransport {
    fn read(&mut self, timeout: Option<Duration>) -> Result<Bytes, TransportError> {
        let rx = self.rx.as_ref().ok_or(TransportError::Closed)?;
        let first = match timeout.filter(|t| !t.is_zero()) {
            None => match rx.try_recv() {
                Ok(chunk) => chunk,
                Err(TryRecvError::Empty) => return Ok(Bytes::new()),
                Err(TryRecvError::Disconnected) => {
                    self.close();
                    return Err(TransportError::Closed);
                }
            },
            Some(timeout) => match rx.recv_timeout(timeout) {
                Ok(chunk) => chunk,
                Err(RecvTimeoutError::Timeout) => return Err(TransportError::Timeout),
                Err(RecvTimeoutError::Disconnected) => {
                    self.close();
                    return Err(TransportError::Closed);
                }
            },
        };
        let data = self.collect(first);
        trace!(len = data.len(), endpoint = %self.endpoint, "memory read");
        Ok(data)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send(Bytes::copy_from_slice(data))
            .map_err(|_| TransportError::Closed)?;
        Ok(data.len())
    }

    fn close(&mut self) {
        let had_tx = self.tx.take().is_some();
        let had_rx = self.rx.take().is_some();
        if had_tx || had_rx {
            Metrics::record_transport_close();
        }
    }

    fn is_open(&self) -> bool {
        self.tx.is_some() && self.rx.is_some()
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Connector handing out pre-built transports in order.
///
/// Once the queue is empty, `open` fails with `ConnectionRefused`.
#[derive(Debug, Default)]
pub struct MemoryConnector {
    queue: Mutex<VecDeque<Box<dyn Transport>>>,
}

impl MemoryConnector {
    /// Connector yielding `transports` one per `open`.
    pub fn new<I>(transports: I) -> Self
    where
        I: IntoIterator,
        I::Item: Transport + 'static,
    {
        Self {
            queue: Mutex::new(
                transports
                    .into_iter()
                    .map(|t| Box::new(t) as Box<dyn Transport>)
                    .collect(),
            ),
        }
    }

    /// Queue another transport.
    pub fn push(&self, transport: impl Transport + 'static) {
        self.queue
            .lock()
            .expect("memory connector mutex poisoned")
            .push_back(Box::new(transport));
    }
}

impl Connector for MemoryConnector {
    fn open(&self) -> Result<Box<dyn Transport>, TransportError> {
        self.queue
            .lock()
            .expect("memory connector mutex poisoned")
            .pop_front()
            .ok_or_else(|| TransportError::IoFailure(io::ErrorKind::ConnectionRefused.into()))
    }

    fn endpoint(&self) -> String {
        "memory".to_owned()
    }
}
