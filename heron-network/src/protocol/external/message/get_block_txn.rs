use heron_chain::block;
use heron_chain::compactint::CompactInt;
use heron_chain::{BitcoinDeserialize, BitcoinSerialize, SerializationError};

/// A `getblocktxn`: asks for the transactions a compact block's short ids
/// elided, by position.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct GetBlockTxn {
    pub block_hash: block::Hash,
    /// Differentially encoded positions on the wire; absolute here.
    pub indexes: Vec<u64>,
}

impl BitcoinSerialize for GetBlockTxn {
    fn bitcoin_serialize<W: std::io::Write>(&self, mut target: W) -> Result<(), std::io::Error> {
        self.block_hash.bitcoin_serialize(&mut target)?;
        CompactInt::from(self.indexes.len()).bitcoin_serialize(&mut target)?;
        let mut previous = 0u64;
        for (position, index) in self.indexes.iter().enumerate() {
            let differential = if position == 0 {
                *index
            } else {
                index - previous - 1
            };
            CompactInt::from(differential as usize).bitcoin_serialize(&mut target)?;
            previous = *index;
        }
        Ok(())
    }
}

impl BitcoinDeserialize for GetBlockTxn {
    fn bitcoin_deserialize<R: std::io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        let block_hash = block::Hash::bitcoin_deserialize(&mut reader)?;
        let count = CompactInt::bitcoin_deserialize(&mut reader)?.value();
        let mut indexes = Vec::with_capacity(count.min(1024) as usize);
        let mut previous = 0u64;
        for position in 0..count {
            let differential = CompactInt::bitcoin_deserialize(&mut reader)?.value();
            let index = if position == 0 {
                differential
            } else {
                previous
                    .checked_add(differential)
                    .and_then(|index| index.checked_add(1))
                    .ok_or(SerializationError::Parse("block txn index overflow"))?
            };
            indexes.push(index);
            previous = index;
        }
        Ok(GetBlockTxn {
            block_hash,
            indexes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn differential_indexes_round_trip() {
        heron_test::init();

        let msg = GetBlockTxn {
            block_hash: block::Hash([0x42; 32]),
            indexes: vec![0, 1, 5, 700],
        };
        let bytes = msg.bitcoin_serialize_to_vec().unwrap();
        assert_eq!(GetBlockTxn::bitcoin_deserialize(&bytes[..]).unwrap(), msg);
    }
}
