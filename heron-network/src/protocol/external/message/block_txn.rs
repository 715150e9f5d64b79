use std::sync::Arc;

use heron_chain::block;
use heron_chain::transaction::Transaction;
use heron_chain::{BitcoinDeserialize, BitcoinSerialize, SerializationError};

/// A `blocktxn`: the transactions answering a `getblocktxn`, in block
/// order.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct BlockTxn {
    pub block_hash: block::Hash,
    pub transactions: Vec<Arc<Transaction>>,
}

impl BitcoinSerialize for BlockTxn {
    fn bitcoin_serialize<W: std::io::Write>(&self, mut target: W) -> Result<(), std::io::Error> {
        self.block_hash.bitcoin_serialize(&mut target)?;
        self.transactions.bitcoin_serialize(&mut target)
    }
}

impl BitcoinDeserialize for BlockTxn {
    fn bitcoin_deserialize<R: std::io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(BlockTxn {
            block_hash: block::Hash::bitcoin_deserialize(&mut reader)?,
            transactions: Vec::bitcoin_deserialize(&mut reader)?,
        })
    }
}
