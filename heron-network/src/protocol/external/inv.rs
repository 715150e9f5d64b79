//! Inventory items.
//!
//! An "inventory vector" on the wire is just a typed hash: a u32 kind code
//! followed by 32 bytes.

use std::io::{Read, Write};

use heron_chain::{
    block, transaction, BitcoinDeserialize, BitcoinSerialize, SerializationError,
};

/// An advertised or requested object.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum InventoryHash {
    /// Kind code 0; may be ignored.
    Error,
    /// A transaction.
    Tx(transaction::Hash),
    /// A block.
    Block(block::Hash),
    /// A block served as a `merkleblock` against the requester's bloom
    /// filter.
    FilteredBlock(block::Hash),
    /// A block served as a compact block.
    CompactBlock(block::Hash),
}

impl From<transaction::Hash> for InventoryHash {
    fn from(hash: transaction::Hash) -> InventoryHash {
        InventoryHash::Tx(hash)
    }
}

impl From<block::Hash> for InventoryHash {
    fn from(hash: block::Hash) -> InventoryHash {
        InventoryHash::Block(hash)
    }
}

impl BitcoinSerialize for InventoryHash {
    fn bitcoin_serialize<W: Write>(&self, mut writer: W) -> Result<(), std::io::Error> {
        let (code, bytes) = match self {
            InventoryHash::Error => (0u32, [0; 32]),
            InventoryHash::Tx(hash) => (1, hash.0),
            InventoryHash::Block(hash) => (2, hash.0),
            InventoryHash::FilteredBlock(hash) => (3, hash.0),
            InventoryHash::CompactBlock(hash) => (4, hash.0),
        };
        code.bitcoin_serialize(&mut writer)?;
        bytes.bitcoin_serialize(&mut writer)
    }
}

impl BitcoinDeserialize for InventoryHash {
    fn bitcoin_deserialize<R: Read>(mut reader: R) -> Result<Self, SerializationError> {
        let code = u32::bitcoin_deserialize(&mut reader)?;
        let bytes = <[u8; 32]>::bitcoin_deserialize(&mut reader)?;
        match code {
            0 => Ok(InventoryHash::Error),
            1 => Ok(InventoryHash::Tx(transaction::Hash(bytes))),
            2 => Ok(InventoryHash::Block(block::Hash(bytes))),
            3 => Ok(InventoryHash::FilteredBlock(block::Hash(bytes))),
            4 => Ok(InventoryHash::CompactBlock(block::Hash(bytes))),
            _ => Err(SerializationError::Parse("invalid inventory code")),
        }
    }
}
