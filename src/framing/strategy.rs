//! Structural rules for the supported framing strategies.
//!
//! Each strategy inspects the front of the receive buffer and reports one
//! [`Step`]: a complete frame, a span of bytes to discard, or a request for
//! more input. Strategies never mutate the buffer themselves.

use std::ops::Range;

use bytes::{BufMut, BytesMut};

use super::checksum::{self, ByteOrder, Checksum, LengthWidth};
use super::error::{CorruptKind, FrameError};

/// Outcome of inspecting the receive buffer.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Step {
    /// A validated frame occupies `consumed` bytes; `payload` is its body.
    Frame {
        consumed: usize,
        payload: Range<usize>,
    },
    /// `consumed` bytes are malformed and must be dropped.
    Skip { consumed: usize, kind: CorruptKind },
    /// Like `Skip`, but the frame is still open: input must keep being
    /// dropped until the next boundary.
    Overflow { consumed: usize, kind: CorruptKind },
    /// No complete frame yet.
    NeedMore { needed: usize },
}

/// Frames terminated by a byte sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Delimiter {
    /// Terminator appended after every frame.
    pub terminator: Vec<u8>,
}

/// Frames of a constant size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FixedLength {
    /// Size of every frame in bytes.
    pub len: usize,
}

/// Frames carrying a leading length field and an optional trailing checksum.
///
/// ```text
/// [LENGTH (width)] [PAYLOAD (LENGTH bytes)] [CHECKSUM (0-2 bytes)]
/// ```
///
/// The length counts payload bytes only. The checksum covers the length
/// field and the payload, i.e. every byte transmitted before it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LengthPrefixed {
    /// Width of the length field.
    pub width: LengthWidth,
    /// Byte order of the length field and checksum.
    pub byte_order: ByteOrder,
    /// Trailing checksum.
    pub checksum: Checksum,
}

/// Framing strategy selection.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Strategy {
    /// Terminator-delimited frames.
    Delimiter(Delimiter),
    /// Constant-size frames.
    FixedLength(FixedLength),
    /// Length-prefixed frames.
    LengthPrefixed(LengthPrefixed),
}

impl Strategy {
    pub(crate) fn validate(&self, max_frame_len: usize) -> Result<(), FrameError> {
        if max_frame_len == 0 {
            return Err(FrameError::InvalidConfig("max_frame_len must be positive"));
        }
        match self {
            Self::Delimiter(d) if d.terminator.is_empty() => {
                Err(FrameError::InvalidConfig("delimiter terminator is empty"))
            }
            Self::FixedLength(f) if f.len == 0 => {
                Err(FrameError::InvalidConfig("fixed frame length is zero"))
            }
            Self::FixedLength(f) if f.len > max_frame_len => Err(FrameError::InvalidConfig(
                "fixed frame length exceeds max_frame_len",
            )),
            _ => Ok(()),
        }
    }

    pub(crate) fn decode(&self, buf: &[u8], max_frame_len: usize) -> Step {
        match self {
            Self::Delimiter(d) => d.decode(buf, max_frame_len),
            Self::FixedLength(f) => f.decode(buf),
            Self::LengthPrefixed(l) => l.decode(buf, max_frame_len),
        }
    }

    /// Drop input belonging to an overflowed frame.
    ///
    /// Returns the bytes to discard and whether the frame boundary was found.
    pub(crate) fn resync(&self, buf: &[u8]) -> (usize, bool) {
        match self {
            Self::Delimiter(d) => d.resync(buf),
            Self::FixedLength(_) | Self::LengthPrefixed(_) => (0, true),
        }
    }

    pub(crate) fn encode(
        &self,
        payload: &[u8],
        max_frame_len: usize,
        out: &mut BytesMut,
    ) -> Result<(), FrameError> {
        if payload.len() > max_frame_len {
            return Err(FrameError::PayloadTooLarge {
                len: payload.len(),
                max: max_frame_len,
            });
        }
        match self {
            Self::Delimiter(d) => d.encode(payload, out),
            Self::FixedLength(f) => f.encode(payload, out),
            Self::LengthPrefixed(l) => l.encode(payload, out),
        }
    }
}

impl Delimiter {
    fn decode(&self, buf: &[u8], max_frame_len: usize) -> Step {
        let term = &self.terminator;
        match find(buf, term) {
            Some(end) if end > max_frame_len => Step::Skip {
                consumed: end + term.len(),
                kind: CorruptKind::Oversized {
                    len: end as u64,
                    max: max_frame_len,
                },
            },
            Some(end) => Step::Frame {
                consumed: end + term.len(),
                payload: 0..end,
            },
            // Keep a possible partial terminator at the tail.
            None if buf.len() > max_frame_len + term.len() => Step::Overflow {
                consumed: buf.len() - (term.len() - 1),
                kind: CorruptKind::Oversized {
                    len: buf.len() as u64,
                    max: max_frame_len,
                },
            },
            None => Step::NeedMore { needed: 1 },
        }
    }

    fn resync(&self, buf: &[u8]) -> (usize, bool) {
        let term = &self.terminator;
        match find(buf, term) {
            Some(end) => (end + term.len(), true),
            None => (buf.len().saturating_sub(term.len() - 1), false),
        }
    }

    fn encode(&self, payload: &[u8], out: &mut BytesMut) -> Result<(), FrameError> {
        if find(payload, &self.terminator).is_some() {
            return Err(FrameError::ContainsDelimiter);
        }
        out.reserve(payload.len() + self.terminator.len());
        out.put_slice(payload);
        out.put_slice(&self.terminator);
        Ok(())
    }
}

impl FixedLength {
    fn decode(self, buf: &[u8]) -> Step {
        if buf.len() >= self.len {
            Step::Frame {
                consumed: self.len,
                payload: 0..self.len,
            }
        } else {
            Step::NeedMore {
                needed: self.len - buf.len(),
            }
        }
    }

    fn encode(self, payload: &[u8], out: &mut BytesMut) -> Result<(), FrameError> {
        if payload.len() != self.len {
            return Err(FrameError::LengthMismatch {
                expected: self.len,
                found: payload.len(),
            });
        }
        out.put_slice(payload);
        Ok(())
    }
}

impl LengthPrefixed {
    fn decode(self, buf: &[u8], max_frame_len: usize) -> Step {
        let header = self.width.size();
        if buf.len() < header {
            return Step::NeedMore {
                needed: header - buf.len(),
            };
        }

        let declared = checksum::read_length(self.width, self.byte_order, buf);
        if declared > max_frame_len as u64 {
            // Only the header is known to be bad; resync from the next byte after it.
            return Step::Skip {
                consumed: header,
                kind: CorruptKind::Oversized {
                    len: declared,
                    max: max_frame_len,
                },
            };
        }

        let body_end = header + declared as usize;
        let total = body_end + self.checksum.size();
        if buf.len() < total {
            return Step::NeedMore {
                needed: total - buf.len(),
            };
        }

        if self.checksum != Checksum::None {
            let expected = self.checksum.compute(&buf[..body_end]);
            let found = self.checksum.read(&buf[body_end..total], self.byte_order);
            if expected != found {
                return Step::Skip {
                    consumed: total,
                    kind: CorruptKind::ChecksumMismatch { expected, found },
                };
            }
        }

        Step::Frame {
            consumed: total,
            payload: header..body_end,
        }
    }

    fn encode(self, payload: &[u8], out: &mut BytesMut) -> Result<(), FrameError> {
        let len = payload.len() as u64;
        if len > self.width.max_value() {
            return Err(FrameError::PayloadTooLarge {
                len: payload.len(),
                max: self.width.max_value() as usize,
            });
        }

        let start = out.len();
        out.reserve(self.width.size() + payload.len() + self.checksum.size());
        checksum::put_length(self.width, self.byte_order, len, out);
        out.put_slice(payload);
        let sum = self.checksum.compute(&out[start..]);
        self.checksum.put(sum, self.byte_order, out);
        Ok(())
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() == 1 {
        return haystack.iter().position(|b| *b == needle[0]);
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
