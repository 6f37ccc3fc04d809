//! Frame integrity checks and fixed-width integer helpers.

use bytes::{BufMut, BytesMut};
use crc::{CRC_16_MODBUS, Crc};

/// CRC-16/MODBUS (poly 0x8005 reflected, init 0xFFFF).
const CRC16_MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Compute the CRC-16/MODBUS checksum of `data`.
#[must_use]
pub fn crc16(data: &[u8]) -> u16 {
    CRC16_MODBUS.checksum(data)
}

/// XOR every byte of `data` together.
#[must_use]
pub fn xor8(data: &[u8]) -> u8 {
    data.iter().fold(0, |acc, byte| acc ^ byte)
}

/// Byte order used for length fields and checksums on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ByteOrder {
    /// Least significant byte first.
    #[default]
    Little,
    /// Most significant byte first.
    Big,
}

/// Width of a length-prefix field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LengthWidth {
    /// One byte, payloads up to 255 bytes.
    U8,
    /// Two bytes, payloads up to 65535 bytes.
    #[default]
    U16,
    /// Four bytes.
    U32,
}

impl LengthWidth {
    /// Number of bytes the field occupies.
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U16 => 2,
            Self::U32 => 4,
        }
    }

    /// Largest length the field can express.
    #[must_use]
    pub const fn max_value(self) -> u64 {
        match self {
            Self::U8 => u8::MAX as u64,
            Self::U16 => u16::MAX as u64,
            Self::U32 => u32::MAX as u64,
        }
    }
}

/// Trailing checksum appended to length-prefixed frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Checksum {
    /// No checksum.
    #[default]
    None,
    /// One byte XOR of the covered bytes.
    Xor,
    /// CRC-16/MODBUS of the covered bytes.
    Crc16,
}

impl Checksum {
    /// Number of bytes the checksum occupies on the wire.
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            Self::None => 0,
            Self::Xor => 1,
            Self::Crc16 => 2,
        }
    }

    /// Compute the checksum value for `data`.
    #[must_use]
    pub fn compute(self, data: &[u8]) -> u16 {
        match self {
            Self::None => 0,
            Self::Xor => u16::from(xor8(data)),
            Self::Crc16 => crc16(data),
        }
    }

    pub(crate) fn put(self, value: u16, order: ByteOrder, out: &mut BytesMut) {
        match self {
            Self::None => {}
            Self::Xor => out.put_u8(value as u8),
            Self::Crc16 => match order {
                ByteOrder::Little => out.put_u16_le(value),
                ByteOrder::Big => out.put_u16(value),
            },
        }
    }

    /// Read a stored checksum; `bytes` must hold exactly [`Checksum::size`] bytes.
    pub(crate) fn read(self, bytes: &[u8], order: ByteOrder) -> u16 {
        match self {
            Self::None => 0,
            Self::Xor => u16::from(bytes[0]),
            Self::Crc16 => match order {
                ByteOrder::Little => u16::from_le_bytes([bytes[0], bytes[1]]),
                ByteOrder::Big => u16::from_be_bytes([bytes[0], bytes[1]]),
            },
        }
    }
}

pub(crate) fn put_length(width: LengthWidth, order: ByteOrder, len: u64, out: &mut BytesMut) {
    match (width, order) {
        (LengthWidth::U8, _) => out.put_u8(len as u8),
        (LengthWidth::U16, ByteOrder::Little) => out.put_u16_le(len as u16),
        (LengthWidth::U16, ByteOrder::Big) => out.put_u16(len as u16),
        (LengthWidth::U32, ByteOrder::Little) => out.put_u32_le(len as u32),
        (LengthWidth::U32, ByteOrder::Big) => out.put_u32(len as u32),
    }
}

/// Read a length field; `bytes` must hold at least `width.size()` bytes.
pub(crate) fn read_length(width: LengthWidth, order: ByteOrder, bytes: &[u8]) -> u64 {
    match (width, order) {
        (LengthWidth::U8, _) => u64::from(bytes[0]),
        (LengthWidth::U16, ByteOrder::Little) => {
            u64::from(u16::from_le_bytes([bytes[0], bytes[1]]))
        }
        (LengthWidth::U16, ByteOrder::Big) => u64::from(u16::from_be_bytes([bytes[0], bytes[1]])),
        (LengthWidth::U32, ByteOrder::Little) => {
            u64::from(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        }
        (LengthWidth::U32, ByteOrder::Big) => {
            u64::from(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc16_matches_known_vectors() {
        assert_eq!(crc16(b"123456789"), 0x4B37);
        assert_eq!(crc16(b"amaork0123456789"), 0xB251);
        assert_eq!(crc16(&1234u32.to_le_bytes()), 0x9D78);
    }

    #[test]
    fn xor_of_empty_is_zero() {
        assert_eq!(xor8(&[]), 0);
        assert_eq!(xor8(&[0x0F, 0xF0, 0xAA]), 0x55);
    }

    #[test]
    fn length_field_roundtrip_respects_byte_order() {
        let mut out = BytesMut::new();
        put_length(LengthWidth::U16, ByteOrder::Big, 0x0102, &mut out);
        assert_eq!(&out[..], &[0x01, 0x02]);
        assert_eq!(read_length(LengthWidth::U16, ByteOrder::Big, &out), 0x0102);

        out.clear();
        put_length(LengthWidth::U32, ByteOrder::Little, 0x0A0B_0C0D, &mut out);
        assert_eq!(&out[..], &[0x0D, 0x0C, 0x0B, 0x0A]);
        assert_eq!(
            read_length(LengthWidth::U32, ByteOrder::Little, &out),
            0x0A0B_0C0D
        );
    }

    #[test]
    fn crc_is_stored_little_endian_by_default() {
        let mut out = BytesMut::new();
        Checksum::Crc16.put(0xB251, ByteOrder::default(), &mut out);
        assert_eq!(&out[..], &[0x51, 0xB2]);
        assert_eq!(Checksum::Crc16.read(&out, ByteOrder::Little), 0xB251);
    }
}
