//! Block wire-format limits and serialization impls.

use std::io;
use std::sync::Arc;

use crate::transaction::Transaction;
use crate::{BitcoinDeserialize, BitcoinSerialize, SerializationError};

use super::{Block, Header};

/// The absolute parser bound on a serialized block.
///
/// This is a denial-of-service limit, not a consensus rule: the per-fork
/// block size ceiling is enforced during validation, and is always at or
/// below this value.
pub const MAX_BLOCK_BYTES: u64 = 32 * 1024 * 1024;

/// The smallest possible serialized transaction spends one input to zero
/// outputs; anything claiming more transactions than fit at that size is
/// garbage.
const MIN_TRANSACTION_BYTES: u64 = 36 * 4;

impl BitcoinSerialize for Block {
    fn bitcoin_serialize<W: io::Write>(&self, mut target: W) -> Result<(), io::Error> {
        self.header.bitcoin_serialize(&mut target)?;
        self.transactions.bitcoin_serialize(&mut target)
    }
}

impl BitcoinDeserialize for Block {
    fn bitcoin_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        use crate::compactint::CompactInt;

        let header = Header::bitcoin_deserialize(&mut reader)?;

        let mut reader = reader.take(MAX_BLOCK_BYTES - Header::len() as u64);
        let transaction_count = CompactInt::bitcoin_deserialize(&mut reader)?.value();
        if transaction_count > MAX_BLOCK_BYTES / MIN_TRANSACTION_BYTES {
            return Err(SerializationError::Parse(
                "block claims more transactions than its size bound allows",
            ));
        }

        let mut transactions = Vec::with_capacity(transaction_count as usize);
        for _ in 0..transaction_count {
            transactions.push(<Arc<Transaction>>::bitcoin_deserialize(&mut reader)?);
        }

        Ok(Block {
            header,
            transactions,
        })
    }
}
