//! Framing error types

use thiserror::Error;

/// Reason a buffered frame was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorruptKind {
    /// Stored checksum does not match the computed one
    ChecksumMismatch {
        /// Checksum computed over the received bytes
        expected: u16,
        /// Checksum carried by the frame
        found: u16,
    },
    /// Declared or accumulated frame length exceeds the configured maximum
    Oversized {
        /// Length that was seen
        len: u64,
        /// Configured maximum
        max: usize,
    },
}

/// Framer errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Not enough bytes buffered yet; never reported by [`Framer::feed`](super::Framer::feed)
    #[error("incomplete frame: need at least {needed} more bytes")]
    Incomplete {
        /// Minimum number of additional bytes required
        needed: usize,
    },

    /// Malformed frame; its bytes have been discarded
    #[error("corrupt frame: {0:?}")]
    Corrupt(CorruptKind),

    /// Outbound payload cannot be expressed by the strategy
    #[error("payload too large: {len} bytes (max {max})")]
    PayloadTooLarge {
        /// Payload size
        len: usize,
        /// Maximum allowed
        max: usize,
    },

    /// Fixed-length strategy got a payload of the wrong size
    #[error("payload length mismatch: expected {expected} bytes, got {found}")]
    LengthMismatch {
        /// Configured frame length
        expected: usize,
        /// Supplied payload length
        found: usize,
    },

    /// Outbound payload contains the delimiter and would split on the wire
    #[error("payload contains the frame delimiter")]
    ContainsDelimiter,

    /// Framer configuration cannot work
    #[error("invalid framer configuration: {0}")]
    InvalidConfig(&'static str),
}

impl FrameError {
    /// Whether this error reports a discarded inbound frame.
    #[must_use]
    pub const fn is_corrupt(&self) -> bool {
        matches!(self, Self::Corrupt(_))
    }
}
