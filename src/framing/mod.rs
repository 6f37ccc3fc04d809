//! Byte-stream framing
//!
//! A [`Framer`] turns the raw chunks returned by a transport into validated
//! [`Frame`]s and performs the inverse framing for outbound payloads.
//!
//! ```rust
//! use commlink::framing::{Framer, FramerConfig};
//!
//! let mut framer = Framer::new(FramerConfig::delimiter(b"\n"))?;
//! let frames: Vec<_> = framer.feed(b"AB\nCD\nE").collect::<Result<_, _>>()?;
//! assert_eq!(frames.len(), 2);
//! assert_eq!(framer.buffered(), 1);
//! # Ok::<(), commlink::framing::FrameError>(())
//! ```

mod checksum;
mod error;
mod strategy;

use bytes::{Bytes, BytesMut};
use tracing::{trace, warn};

use crate::metrics::Metrics;

pub use checksum::{ByteOrder, Checksum, LengthWidth, crc16, xor8};
pub use error::{CorruptKind, FrameError};
pub use strategy::{Delimiter, FixedLength, LengthPrefixed, Strategy};

use strategy::Step;

/// Default upper bound for a single frame (64 KiB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024;

/// Framer configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FramerConfig {
    /// Structural rule used to find frame boundaries.
    pub strategy: Strategy,
    /// Largest payload accepted inbound or produced outbound.
    pub max_frame_len: usize,
}

impl FramerConfig {
    /// Frames terminated by `terminator`.
    #[must_use]
    pub fn delimiter(terminator: impl Into<Vec<u8>>) -> Self {
        Self::from(Strategy::Delimiter(Delimiter {
            terminator: terminator.into(),
        }))
    }

    /// CRLF-terminated text lines.
    #[must_use]
    pub fn lines() -> Self {
        Self::delimiter(b"\r\n".to_vec())
    }

    /// Frames of exactly `len` bytes.
    #[must_use]
    pub fn fixed_length(len: usize) -> Self {
        Self::from(Strategy::FixedLength(FixedLength { len }))
    }

    /// Little-endian length-prefixed frames.
    #[must_use]
    pub fn length_prefixed(width: LengthWidth, checksum: Checksum) -> Self {
        Self::from(Strategy::LengthPrefixed(LengthPrefixed {
            width,
            byte_order: ByteOrder::Little,
            checksum,
        }))
    }

    /// Override the maximum frame length.
    #[must_use]
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    /// Decode a single frame from the front of `buf` without buffering.
    ///
    /// Returns the frame and the number of bytes it occupied.
    ///
    /// # Errors
    ///
    /// [`FrameError::Incomplete`] when `buf` holds no complete frame,
    /// [`FrameError::Corrupt`] when the leading bytes are malformed.
    pub fn decode(&self, buf: &[u8]) -> Result<(Frame, usize), FrameError> {
        match self.strategy.decode(buf, self.max_frame_len) {
            Step::Frame { consumed, payload } => Ok((
                Frame::new(Bytes::copy_from_slice(&buf[payload])),
                consumed,
            )),
            Step::Skip { kind, .. } | Step::Overflow { kind, .. } => {
                Err(FrameError::Corrupt(kind))
            }
            Step::NeedMore { needed } => Err(FrameError::Incomplete { needed }),
        }
    }
}

impl From<Strategy> for FramerConfig {
    fn from(strategy: Strategy) -> Self {
        Self {
            strategy,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl Default for FramerConfig {
    fn default() -> Self {
        Self::lines()
    }
}

/// One complete, validated frame payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Frame {
    payload: Bytes,
}

impl Frame {
    /// Wrap an already-validated payload.
    #[must_use]
    pub const fn new(payload: Bytes) -> Self {
        Self { payload }
    }

    /// Get payload
    #[must_use]
    pub const fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Consume the frame, returning its payload.
    #[must_use]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Check whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.payload
    }
}

/// Streaming framer holding unconsumed bytes between calls.
#[derive(Debug)]
pub struct Framer {
    config: FramerConfig,
    buffer: BytesMut,
    // Set after an oversized unterminated frame until its boundary arrives.
    discarding: bool,
}

impl Framer {
    /// Create a framer from a validated configuration.
    pub fn new(config: FramerConfig) -> Result<Self, FrameError> {
        config.strategy.validate(config.max_frame_len)?;
        Ok(Self {
            config,
            buffer: BytesMut::with_capacity(1024),
            discarding: false,
        })
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &FramerConfig {
        &self.config
    }

    /// Append `bytes` and iterate the frames that are now complete.
    ///
    /// The iterator is lazy: frames left unread when it is dropped stay
    /// buffered and are produced by the next call to `feed` or
    /// [`Framer::next_frame`]. Only [`FrameError::Corrupt`] is ever yielded
    /// as an error.
    pub fn feed(&mut self, bytes: &[u8]) -> Frames<'_> {
        if !bytes.is_empty() {
            trace!(len = bytes.len(), buffered = self.buffer.len(), "framer feed");
            self.buffer.extend_from_slice(bytes);
        }
        Frames { framer: self }
    }

    /// Produce the next buffered frame, if one is complete.
    pub fn next_frame(&mut self) -> Option<Result<Frame, FrameError>> {
        if self.discarding && !self.skip_overflow() {
            return None;
        }
        if self.buffer.is_empty() {
            return None;
        }
        match self
            .config
            .strategy
            .decode(&self.buffer, self.config.max_frame_len)
        {
            Step::Frame { consumed, payload } => {
                let raw = self.buffer.split_to(consumed).freeze();
                Metrics::record_frame_received(payload.len());
                Some(Ok(Frame::new(raw.slice(payload))))
            }
            Step::Skip { consumed, kind } => {
                let _ = self.buffer.split_to(consumed);
                warn!(?kind, discarded = consumed, "discarding corrupt frame");
                Metrics::record_corrupt_frame();
                Some(Err(FrameError::Corrupt(kind)))
            }
            Step::Overflow { consumed, kind } => {
                let _ = self.buffer.split_to(consumed);
                warn!(?kind, discarded = consumed, "frame overflowed, discarding to boundary");
                Metrics::record_corrupt_frame();
                self.discarding = true;
                Some(Err(FrameError::Corrupt(kind)))
            }
            Step::NeedMore { .. } => None,
        }
    }

    /// Drop the rest of an overflowed frame. Returns `true` once its boundary
    /// has been consumed.
    fn skip_overflow(&mut self) -> bool {
        let (consumed, found) = self.config.strategy.resync(&self.buffer);
        let _ = self.buffer.split_to(consumed);
        if consumed > 0 {
            trace!(discarded = consumed, found, "discarding overflowed frame");
        }
        if found {
            self.discarding = false;
        }
        found
    }

    /// Frame `payload` for transmission.
    pub fn encode(&self, payload: &[u8]) -> Result<Bytes, FrameError> {
        let mut out = BytesMut::new();
        self.encode_into(payload, &mut out)?;
        Ok(out.freeze())
    }

    /// Frame `payload`, appending the wire bytes to `out`.
    pub fn encode_into(&self, payload: &[u8], out: &mut BytesMut) -> Result<(), FrameError> {
        self.config
            .strategy
            .encode(payload, self.config.max_frame_len, out)
    }

    /// Number of bytes retained waiting for a complete frame.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drop all retained bytes (e.g. after a reconnect).
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.discarding = false;
    }
}

/// Lazy iterator over the frames completed by a [`Framer::feed`] call.
#[derive(Debug)]
pub struct Frames<'a> {
    framer: &'a mut Framer,
}

impl Iterator for Frames<'_> {
    type Item = Result<Frame, FrameError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.framer.next_frame()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect_ok(frames: Frames<'_>) -> Vec<Bytes> {
        frames.map(|f| f.unwrap().into_payload()).collect()
    }

    #[test]
    fn delimiter_split_anywhere_keeps_tail() {
        let stream = b"AB\nCD\nE";
        for split in 0..=stream.len() {
            let mut framer = Framer::new(FramerConfig::delimiter(b"\n")).unwrap();
            let mut frames = collect_ok(framer.feed(&stream[..split]));
            frames.extend(collect_ok(framer.feed(&stream[split..])));
            assert_eq!(frames, vec![Bytes::from("AB"), Bytes::from("CD")], "split {split}");
            assert_eq!(framer.buffered(), 1);
        }
    }

    #[test]
    fn multi_byte_terminator_split_across_feeds() {
        let mut framer = Framer::new(FramerConfig::lines()).unwrap();
        assert!(framer.feed(b"HTTP/1.0 200 OK\r").next().is_none());
        let frames = collect_ok(framer.feed(b"\nServer: x\r\n\r\n"));
        assert_eq!(
            frames,
            vec![
                Bytes::from("HTTP/1.0 200 OK"),
                Bytes::from("Server: x"),
                Bytes::new()
            ]
        );
    }

    #[test]
    fn fixed_length_emits_while_enough_bytes() {
        let mut framer = Framer::new(FramerConfig::fixed_length(3)).unwrap();
        assert!(framer.feed(b"ab").next().is_none());
        let frames = collect_ok(framer.feed(b"cdefgh"));
        assert_eq!(frames, vec![Bytes::from("abc"), Bytes::from("def")]);
        assert_eq!(framer.buffered(), 2);
    }

    #[test]
    fn length_prefixed_roundtrip_hi() {
        let framer_config = FramerConfig::length_prefixed(LengthWidth::U16, Checksum::None);
        let mut framer = Framer::new(framer_config).unwrap();
        let wire = framer.encode(b"hi").unwrap();
        assert_eq!(&wire[..], &[0x02, 0x00, b'h', b'i']);
        let frames = collect_ok(framer.feed(&wire));
        assert_eq!(frames, vec![Bytes::from("hi")]);
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn corrupt_frame_does_not_block_next_frame() {
        let config = FramerConfig::length_prefixed(LengthWidth::U16, Checksum::Crc16);
        let mut framer = Framer::new(config).unwrap();
        let mut bad = framer.encode(b"first").unwrap().to_vec();
        bad[3] ^= 0x40;
        let good = framer.encode(b"second").unwrap();

        let mut stream = bad;
        stream.extend_from_slice(&good);
        let results: Vec<_> = framer.feed(&stream).collect();

        assert_eq!(results.len(), 2);
        assert!(matches!(
            results[0],
            Err(FrameError::Corrupt(CorruptKind::ChecksumMismatch { .. }))
        ));
        assert_eq!(results[1].as_ref().unwrap().payload(), &Bytes::from("second"));
    }

    #[test]
    fn dropped_iterator_is_restartable() {
        let mut framer = Framer::new(FramerConfig::delimiter(b";")).unwrap();
        let first = framer.feed(b"a;b;c;").next().unwrap().unwrap();
        assert_eq!(first.payload(), &Bytes::from("a"));
        let rest = collect_ok(framer.feed(b""));
        assert_eq!(rest, vec![Bytes::from("b"), Bytes::from("c")]);
    }

    #[test]
    fn oversized_declared_length_is_skipped() {
        let config = FramerConfig::length_prefixed(LengthWidth::U16, Checksum::None)
            .with_max_frame_len(8);
        let mut framer = Framer::new(config).unwrap();
        let good = framer.encode(b"ok").unwrap();
        let mut stream = vec![0xFF, 0x00];
        stream.extend_from_slice(&good);
        let results: Vec<_> = framer.feed(&stream).collect();
        assert!(matches!(
            results[0],
            Err(FrameError::Corrupt(CorruptKind::Oversized { len: 255, max: 8 }))
        ));
        assert_eq!(results[1].as_ref().unwrap().payload(), &Bytes::from("ok"));
    }

    #[test]
    fn oversized_line_is_dropped_through_its_terminator() {
        let config = FramerConfig::delimiter(b"\n").with_max_frame_len(8);
        let mut framer = Framer::new(config).unwrap();
        let first: Vec<_> = framer.feed(b"0123456789AB").collect();
        assert_eq!(
            first,
            vec![Err(FrameError::Corrupt(CorruptKind::Oversized { len: 12, max: 8 }))]
        );

        assert!(framer.feed(b"CDEF").next().is_none());
        assert_eq!(framer.buffered(), 0);
        let second = collect_ok(framer.feed(b"GH\nok\n"));
        assert_eq!(second, vec![Bytes::from("ok")]);
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn reset_ends_overflow_discard() {
        let config = FramerConfig::delimiter(b"\n").with_max_frame_len(4);
        let mut framer = Framer::new(config).unwrap();
        assert!(framer.feed(b"0123456").next().unwrap().is_err());
        framer.reset();
        assert_eq!(collect_ok(framer.feed(b"new\n")), vec![Bytes::from("new")]);
    }

    #[test]
    fn encode_rejects_delimiter_in_payload() {
        let framer = Framer::new(FramerConfig::lines()).unwrap();
        assert_eq!(
            framer.encode(b"a\r\nb").unwrap_err(),
            FrameError::ContainsDelimiter
        );
    }

    #[test]
    fn stateless_decode_reports_incomplete() {
        let config = FramerConfig::fixed_length(4);
        assert_eq!(
            config.decode(b"ab").unwrap_err(),
            FrameError::Incomplete { needed: 2 }
        );
        let (frame, used) = config.decode(b"abcdef").unwrap();
        assert_eq!(frame.payload(), &Bytes::from("abcd"));
        assert_eq!(used, 4);
    }

    #[test]
    fn reset_clears_partial_input() {
        let mut framer = Framer::new(FramerConfig::delimiter(b"\n")).unwrap();
        assert!(framer.feed(b"partial").next().is_none());
        framer.reset();
        assert_eq!(framer.buffered(), 0);
        let frames = collect_ok(framer.feed(b"x\n"));
        assert_eq!(frames, vec![Bytes::from("x")]);
    }

    // Property-based tests
    mod proptests {
        use super::super::{Checksum, FrameError, Framer, FramerConfig, LengthWidth};
        use bytes::BytesMut;
        use proptest::prelude::*;

        fn checksum_strategy() -> impl Strategy<Value = Checksum> {
            prop_oneof![Just(Checksum::None), Just(Checksum::Xor), Just(Checksum::Crc16)]
        }

        fn width_strategy() -> impl Strategy<Value = LengthWidth> {
            prop_oneof![Just(LengthWidth::U8), Just(LengthWidth::U16), Just(LengthWidth::U32)]
        }

        proptest! {
            /// Property: chunking the wire stream arbitrarily never changes the frames produced
            #[test]
            fn prop_chunking_is_transparent(
                payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..200), 1..8),
                width in width_strategy(),
                checksum in checksum_strategy(),
                chunk in 1usize..17,
            ) {
                let mut framer = Framer::new(FramerConfig::length_prefixed(width, checksum)).unwrap();
                let mut wire = BytesMut::new();
                for payload in &payloads {
                    framer.encode_into(payload, &mut wire).unwrap();
                }

                let mut seen = Vec::new();
                for piece in wire.chunks(chunk) {
                    for frame in framer.feed(piece) {
                        seen.push(frame.unwrap().into_payload().to_vec());
                    }
                }

                prop_assert_eq!(seen, payloads);
                prop_assert_eq!(framer.buffered(), 0);
            }

            /// Property: a single flipped payload bit is caught by the CRC
            #[test]
            fn prop_crc_detects_bit_flip(
                payload in prop::collection::vec(any::<u8>(), 1..256),
                bit in 0usize..8,
                position_ratio in 0.0f64..1.0,
            ) {
                let mut framer = Framer::new(
                    FramerConfig::length_prefixed(LengthWidth::U16, Checksum::Crc16),
                ).unwrap();
                let mut wire = framer.encode(&payload).unwrap().to_vec();
                let index = 2 + (payload.len() as f64 * position_ratio) as usize;
                let flip_at = index.min(wire.len() - 3);
                wire[flip_at] ^= 1 << bit;

                let results: Vec<_> = framer.feed(&wire).collect();
                prop_assert_eq!(results.len(), 1);
                prop_assert!(results[0].as_ref().is_err_and(FrameError::is_corrupt));
            }

            /// Property: delimiter framing yields every payload free of the terminator
            #[test]
            fn prop_delimiter_roundtrip(
                lines in prop::collection::vec("[a-z0-9 ]{0,40}", 1..10),
            ) {
                let mut framer = Framer::new(FramerConfig::lines()).unwrap();
                let mut wire = BytesMut::new();
                for line in &lines {
                    framer.encode_into(line.as_bytes(), &mut wire).unwrap();
                }
                let seen: Vec<String> = framer
                    .feed(&wire)
                    .map(|f| String::from_utf8(f.unwrap().into_payload().to_vec()).unwrap())
                    .collect();
                prop_assert_eq!(seen, lines);
            }
        }
    }
}
