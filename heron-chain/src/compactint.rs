//! The Bitcoin variable-length integer ("CompactSize") codec.

use byteorder::{LittleEndian, WriteBytesExt};

use crate::{BitcoinDeserialize, BitcoinSerialize, SerializationError};

/// A variable-length unsigned integer.
///
/// Values below 253 occupy one byte; larger values get a one-byte marker
/// (253, 254, or 255) followed by 2, 4, or 8 little-endian bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactInt(u64);

impl CompactInt {
    pub fn from(value: usize) -> CompactInt {
        CompactInt(value as u64)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// Serialized length, in bytes, of a `CompactInt` holding `value`.
    pub fn size(value: usize) -> usize {
        match value as u64 {
            0..=252 => 1,
            253..=0xffff => 3,
            0x1_0000..=0xffff_ffff => 5,
            _ => 9,
        }
    }
}

impl BitcoinSerialize for CompactInt {
    fn bitcoin_serialize<W: std::io::Write>(&self, mut target: W) -> Result<(), std::io::Error> {
        match self.0 {
            0..=252 => target.write_all(&[self.0 as u8]),
            253..=0xffff => {
                target.write_all(&[253])?;
                target.write_u16::<LittleEndian>(self.0 as u16)
            }
            0x1_0000..=0xffff_ffff => {
                target.write_all(&[254])?;
                target.write_u32::<LittleEndian>(self.0 as u32)
            }
            _ => {
                target.write_all(&[255])?;
                target.write_u64::<LittleEndian>(self.0)
            }
        }
    }
}

impl BitcoinDeserialize for CompactInt {
    fn bitcoin_deserialize<R: std::io::Read>(
        mut reader: R,
    ) -> Result<CompactInt, SerializationError> {
        match u8::bitcoin_deserialize(&mut reader)? {
            tag @ 0..=252 => Ok(CompactInt(tag as u64)),
            253 => Ok(CompactInt(u16::bitcoin_deserialize(&mut reader)? as u64)),
            254 => Ok(CompactInt(u32::bitcoin_deserialize(&mut reader)? as u64)),
            _ => Ok(CompactInt(u64::bitcoin_deserialize(&mut reader)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use proptest::prelude::*;

    use super::*;

    #[test]
    fn boundary_encodings() {
        heron_test::init();

        for &(value, encoding) in &[
            (0u64, &[0u8][..]),
            (252, &[252][..]),
            (253, &[253, 253, 0][..]),
            (0xffff, &[253, 0xff, 0xff][..]),
            (0x1_0000, &[254, 0, 0, 1, 0][..]),
            (0xffff_ffff, &[254, 0xff, 0xff, 0xff, 0xff][..]),
            (0x1_0000_0000, &[255, 0, 0, 0, 0, 1, 0, 0, 0][..]),
        ] {
            let int = CompactInt(value);
            let bytes = int.bitcoin_serialize_to_vec().unwrap();
            assert_eq!(bytes, encoding, "encoding of {}", value);
            assert_eq!(bytes.len(), CompactInt::size(value as usize));
        }
    }

    proptest! {
        #[test]
        fn compact_int_roundtrip(value in any::<u64>()) {
            heron_test::init();

            let int = CompactInt(value);
            let mut bytes = Cursor::new(int.bitcoin_serialize_to_vec()?);
            let other = CompactInt::bitcoin_deserialize(&mut bytes)?;

            prop_assert_eq![int, other];
        }
    }
}
