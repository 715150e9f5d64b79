use std::{fmt, io};

use serde::{Deserialize, Serialize};

use crate::compactint::CompactInt;
use crate::serialization::{BitcoinDeserialize, BitcoinSerialize, SerializationError};

/// An encoding of a Bitcoin script.
///
/// This is a plain byte container; the interpreter that gives the bytes
/// meaning lives in its own crate.
#[derive(Clone, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Script(pub Vec<u8>);

impl Script {
    /// The serialized length, including the leading length prefix.
    pub fn serialized_size(&self) -> usize {
        CompactInt::size(self.0.len()) + self.0.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("Script").field(&hex::encode(&self.0)).finish()
    }
}

impl BitcoinSerialize for Script {
    fn bitcoin_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        CompactInt::from(self.0.len()).bitcoin_serialize(&mut writer)?;
        writer.write_all(&self.0[..])
    }
}

impl BitcoinDeserialize for Script {
    fn bitcoin_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        use std::io::Read;

        let len = CompactInt::bitcoin_deserialize(&mut reader)?.value();
        let mut bytes = Vec::new();
        reader.take(len).read_to_end(&mut bytes)?;
        if (bytes.len() as u64) < len {
            return Err(SerializationError::Parse("script shorter than its length"));
        }
        Ok(Script(bytes))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use proptest::prelude::*;

    use super::*;

    proptest! {
        #[test]
        fn script_roundtrip(bytes in proptest::collection::vec(any::<u8>(), 0..520)) {
            heron_test::init();

            let script = Script(bytes);
            let mut data = Cursor::new(script.bitcoin_serialize_to_vec()?);
            let other_script = Script::bitcoin_deserialize(&mut data)?;

            prop_assert_eq![script, other_script];
        }
    }
}
