//! Blocks and block-related structures (heights, headers, merkle trees).

mod hash;
mod header;
mod height;
mod serialize;

pub mod merkle;

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::fmt::DisplayToDebug;
use crate::transaction::Transaction;
use crate::transparent;

pub use hash::Hash;
pub use header::{BlockTimeError, CountedHeader, Header};
pub use height::Height;
pub use serialize::MAX_BLOCK_BYTES;

/// A Bitcoin Cash block: a header and the transactions it commits to.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// The block header, containing block metadata.
    pub header: Header,
    /// The block transactions, coinbase first.
    pub transactions: Vec<Arc<Transaction>>,
}

impl Block {
    /// Compute (or fetch the cached) hash of this block.
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    /// The height recorded in the coinbase input, if the block has one.
    ///
    /// Blocks mined since the height-in-coinbase rule activated always
    /// carry it; older blocks get their height from their chain position
    /// instead.
    pub fn coinbase_height(&self) -> Option<Height> {
        self.transactions
            .get(0)
            .and_then(|tx| tx.inputs.get(0))
            .and_then(|input| match input {
                transparent::Input::Coinbase { height, .. } => *height,
                _ => None,
            })
    }

    /// The serialized size of this block, in bytes.
    pub fn serialized_size(&self) -> usize {
        use crate::compactint::CompactInt;

        Header::len()
            + CompactInt::size(self.transactions.len())
            + self
                .transactions
                .iter()
                .map(|tx| tx.serialized_size())
                .sum::<usize>()
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut fmter = f.debug_struct("Block");
        if let Some(height) = self.coinbase_height() {
            fmter.field("height", &height);
        }
        fmter.field("hash", &DisplayToDebug(self.hash())).finish()
    }
}

impl<'a> From<&'a Block> for Hash {
    fn from(block: &'a Block) -> Hash {
        (&block.header).into()
    }
}
