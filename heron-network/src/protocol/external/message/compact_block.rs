use std::sync::Arc;

use heron_chain::block::Header;
use heron_chain::compactint::CompactInt;
use heron_chain::transaction::Transaction;
use heron_chain::{BitcoinDeserialize, BitcoinSerialize, SerializationError};

/// A transaction a compact block carries in full, with its position.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PrefilledTransaction {
    /// Position in the block, differentially encoded on the wire.
    pub index: u64,
    pub tx: Arc<Transaction>,
}

impl BitcoinSerialize for PrefilledTransaction {
    fn bitcoin_serialize<W: std::io::Write>(&self, mut target: W) -> Result<(), std::io::Error> {
        CompactInt::from(self.index as usize).bitcoin_serialize(&mut target)?;
        self.tx.bitcoin_serialize(&mut target)
    }
}

impl BitcoinDeserialize for PrefilledTransaction {
    fn bitcoin_deserialize<R: std::io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(PrefilledTransaction {
            index: CompactInt::bitcoin_deserialize(&mut reader)?.value(),
            tx: <Arc<Transaction>>::bitcoin_deserialize(&mut reader)?,
        })
    }
}

/// A `cmpctblock`: the header, short ids for transactions the receiver
/// probably has, and the coinbase (at least) prefilled.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CompactBlock {
    pub header: Header,
    /// Salt for the short id computation.
    pub nonce: u64,
    pub short_ids: Vec<u64>,
    pub prefilled_txns: Vec<PrefilledTransaction>,
}

impl BitcoinSerialize for CompactBlock {
    fn bitcoin_serialize<W: std::io::Write>(&self, mut target: W) -> Result<(), std::io::Error> {
        self.header.bitcoin_serialize(&mut target)?;
        self.nonce.bitcoin_serialize(&mut target)?;
        self.short_ids.bitcoin_serialize(&mut target)?;
        self.prefilled_txns.bitcoin_serialize(&mut target)
    }
}

impl BitcoinDeserialize for CompactBlock {
    fn bitcoin_deserialize<R: std::io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(CompactBlock {
            header: Header::bitcoin_deserialize(&mut reader)?,
            nonce: u64::bitcoin_deserialize(&mut reader)?,
            short_ids: Vec::bitcoin_deserialize(&mut reader)?,
            prefilled_txns: Vec::bitcoin_deserialize(&mut reader)?,
        })
    }
}
