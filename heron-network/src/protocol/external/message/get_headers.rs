use heron_chain::{block, BitcoinDeserialize, BitcoinSerialize, SerializationError};

/// A `getheaders` request; identical in shape to `getblocks`, answered
/// with headers instead of an inventory.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct GetHeaders {
    /// The sender's best known block hashes, newest first.
    pub block_locator_hashes: Vec<block::Hash>,
    /// The last header wanted; `None` asks for the maximum batch (2000).
    pub stop_hash: Option<block::Hash>,
}

impl BitcoinSerialize for GetHeaders {
    fn bitcoin_serialize<W: std::io::Write>(&self, mut target: W) -> Result<(), std::io::Error> {
        self.block_locator_hashes.bitcoin_serialize(&mut target)?;
        match self.stop_hash {
            Some(hash) => hash.bitcoin_serialize(&mut target),
            None => [0u8; 32].bitcoin_serialize(&mut target),
        }
    }
}

impl BitcoinDeserialize for GetHeaders {
    fn bitcoin_deserialize<R: std::io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        let block_locator_hashes = Vec::bitcoin_deserialize(&mut reader)?;
        let raw_stop_hash = block::Hash::bitcoin_deserialize(&mut reader)?;
        let stop_hash = if raw_stop_hash.is_zero() {
            None
        } else {
            Some(raw_stop_hash)
        };
        Ok(GetHeaders {
            block_locator_hashes,
            stop_hash,
        })
    }
}
