//! Transport-level error types covering socket and serial failures.

use std::io;

use thiserror::Error;

/// Unified error type for transport operations.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Nothing arrived within the requested timeout.
    #[error("transport timed out")]
    Timeout,

    /// The handle is closed, locally or by the peer.
    #[error("transport closed")]
    Closed,

    /// Underlying I/O failure.
    #[error("I/O failure: {0}")]
    IoFailure(#[from] io::Error),

    /// Serial port could not be opened or configured.
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Endpoint address could not be resolved.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

impl TransportError {
    /// Classify an I/O error raised while reading or writing an open handle.
    pub(crate) fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Self::Timeout,
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof => Self::Closed,
            _ => Self::IoFailure(err),
        }
    }

    /// Whether the handle is unusable after this error.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_kinds_are_classified() {
        let timeout = TransportError::from_io(io::Error::from(io::ErrorKind::TimedOut));
        assert!(matches!(timeout, TransportError::Timeout));
        assert!(!timeout.is_fatal());

        let reset = TransportError::from_io(io::Error::from(io::ErrorKind::ConnectionReset));
        assert!(matches!(reset, TransportError::Closed));
        assert!(reset.is_fatal());

        let other = TransportError::from_io(io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(other, TransportError::IoFailure(_)));
    }
}
