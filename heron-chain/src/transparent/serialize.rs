//! Serialization impls for inputs, outputs, and outpoints.

use std::io;

use crate::amount::Amount;
use crate::serialization::{BitcoinDeserialize, BitcoinSerialize, SerializationError};
use crate::{block, transaction};

use super::{CoinbaseData, Input, OutPoint, Output, Script, MAX_COINBASE_DATA_LEN};

impl BitcoinSerialize for OutPoint {
    fn bitcoin_serialize<W: io::Write>(&self, mut target: W) -> Result<(), io::Error> {
        self.hash.bitcoin_serialize(&mut target)?;
        self.index.bitcoin_serialize(&mut target)
    }
}

impl BitcoinDeserialize for OutPoint {
    fn bitcoin_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(OutPoint {
            hash: transaction::Hash::bitcoin_deserialize(&mut reader)?,
            index: u32::bitcoin_deserialize(&mut reader)?,
        })
    }
}

/// Serialize `height` the way coinbase data carries it: a minimal script
/// number push.
pub(super) fn height_push(height: block::Height) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(5);
    let mut value = height.0;
    if value == 0 {
        // OP_0
        bytes.push(0x00);
        return bytes;
    }
    let mut digits = Vec::with_capacity(4);
    while value > 0 {
        digits.push((value & 0xff) as u8);
        value >>= 8;
    }
    // Script numbers are signed; a high bit needs a disambiguating zero.
    if digits.last().expect("non-empty") & 0x80 != 0 {
        digits.push(0);
    }
    bytes.push(digits.len() as u8);
    bytes.extend_from_slice(&digits);
    bytes
}

/// Parse the height out of the front of coinbase data, if one is there.
pub(super) fn parse_height(data: &[u8]) -> Option<block::Height> {
    let push_len = *data.first()? as usize;
    if push_len == 0 {
        // OP_0: the empty script number, i.e. the genesis height.
        return Some(block::Height(0));
    }
    if push_len > 5 || data.len() < 1 + push_len {
        return None;
    }
    let digits = &data[1..1 + push_len];
    if digits.last().copied().unwrap_or(0) & 0x80 != 0 {
        // Negative script number: not a height.
        return None;
    }
    let mut value: u64 = 0;
    for (position, digit) in digits.iter().enumerate() {
        value |= (*digit as u64) << (8 * position);
    }
    if value > block::Height::MAX.0 as u64 {
        return None;
    }
    Some(block::Height(value as u32))
}

impl BitcoinSerialize for Input {
    fn bitcoin_serialize<W: io::Write>(&self, mut target: W) -> Result<(), io::Error> {
        match self {
            Input::PrevOut {
                outpoint,
                unlock_script,
                sequence,
            } => {
                outpoint.bitcoin_serialize(&mut target)?;
                unlock_script.bitcoin_serialize(&mut target)?;
                sequence.bitcoin_serialize(&mut target)
            }
            Input::Coinbase {
                data, sequence, ..
            } => {
                OutPoint::null().bitcoin_serialize(&mut target)?;
                data.0.bitcoin_serialize(&mut target)?;
                sequence.bitcoin_serialize(&mut target)
            }
        }
    }
}

impl BitcoinDeserialize for Input {
    fn bitcoin_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        let outpoint = OutPoint::bitcoin_deserialize(&mut reader)?;
        if outpoint.is_null() {
            let data = Vec::<u8>::bitcoin_deserialize(&mut reader)?;
            if data.len() > MAX_COINBASE_DATA_LEN {
                return Err(SerializationError::Parse("coinbase data too long"));
            }
            Ok(Input::Coinbase {
                height: parse_height(&data),
                data: CoinbaseData(data),
                sequence: u32::bitcoin_deserialize(&mut reader)?,
            })
        } else {
            Ok(Input::PrevOut {
                outpoint,
                unlock_script: Script::bitcoin_deserialize(&mut reader)?,
                sequence: u32::bitcoin_deserialize(&mut reader)?,
            })
        }
    }
}

impl BitcoinSerialize for Output {
    fn bitcoin_serialize<W: io::Write>(&self, mut target: W) -> Result<(), io::Error> {
        self.value.bitcoin_serialize(&mut target)?;
        self.lock_script.bitcoin_serialize(&mut target)
    }
}

impl BitcoinDeserialize for Output {
    fn bitcoin_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(Output {
            value: Amount::bitcoin_deserialize(&mut reader)?,
            lock_script: Script::bitcoin_deserialize(&mut reader)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn height_push_round_trips() {
        heron_test::init();

        for &height in &[0u32, 1, 127, 128, 255, 256, 499_999, 16_777_215, 16_777_216] {
            let height = block::Height(height);
            let data = height_push(height);
            assert_eq!(parse_height(&data), Some(height), "height {:?}", height);
        }
    }

    #[test]
    fn coinbase_input_round_trips() {
        heron_test::init();

        let input = Input::new_coinbase(block::Height(227_931), b"/heron/");
        let bytes = input.bitcoin_serialize_to_vec().unwrap();
        let parsed = Input::bitcoin_deserialize(&bytes[..]).unwrap();
        assert_eq!(input, parsed);

        match parsed {
            Input::Coinbase { height, .. } => assert_eq!(height, Some(block::Height(227_931))),
            _ => panic!("round trip changed the input kind"),
        }
    }
}
