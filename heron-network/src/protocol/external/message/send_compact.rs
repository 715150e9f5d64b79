use heron_chain::{BitcoinDeserialize, BitcoinSerialize, SerializationError};

/// A `sendcmpct`: negotiates whether new blocks arrive as compact blocks,
/// and under which protocol version.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct SendCompact {
    /// Announce new blocks with `cmpctblock` rather than `inv`.
    pub announce: bool,
    /// The compact block protocol version; only version 1 exists here.
    pub version: u64,
}

impl BitcoinSerialize for SendCompact {
    fn bitcoin_serialize<W: std::io::Write>(&self, mut target: W) -> Result<(), std::io::Error> {
        self.announce.bitcoin_serialize(&mut target)?;
        self.version.bitcoin_serialize(&mut target)
    }
}

impl BitcoinDeserialize for SendCompact {
    fn bitcoin_deserialize<R: std::io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(SendCompact {
            announce: bool::bitcoin_deserialize(&mut reader)?,
            version: u64::bitcoin_deserialize(&mut reader)?,
        })
    }
}
