use heron_chain::{block, BitcoinDeserialize, BitcoinSerialize, SerializationError};

/// A `getblocks` request: a locator plus an optional stop hash.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct GetBlocks {
    /// The sender's best known block hashes, newest first.
    pub block_locator_hashes: Vec<block::Hash>,
    /// The last hash wanted; `None` (all zeros on the wire) asks for as
    /// many as will fit, up to 500.
    pub stop_hash: Option<block::Hash>,
}

impl BitcoinSerialize for GetBlocks {
    fn bitcoin_serialize<W: std::io::Write>(&self, mut target: W) -> Result<(), std::io::Error> {
        self.block_locator_hashes.bitcoin_serialize(&mut target)?;
        match self.stop_hash {
            Some(hash) => hash.bitcoin_serialize(&mut target),
            None => [0u8; 32].bitcoin_serialize(&mut target),
        }
    }
}

impl BitcoinDeserialize for GetBlocks {
    fn bitcoin_deserialize<R: std::io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        let block_locator_hashes = Vec::bitcoin_deserialize(&mut reader)?;
        let raw_stop_hash = block::Hash::bitcoin_deserialize(&mut reader)?;
        let stop_hash = if raw_stop_hash.is_zero() {
            None
        } else {
            Some(raw_stop_hash)
        };
        Ok(GetBlocks {
            block_locator_hashes,
            stop_hash,
        })
    }
}
