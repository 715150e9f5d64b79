//! The external wire protocol: messages as peers serialize them.

mod codec;
mod command;
mod inv;
mod message;
mod types;

pub use codec::Codec;
pub use command::Command;
pub use inv::InventoryHash;
pub use message::{
    BlockTxn, CompactBlock, GetBlockTxn, GetBlocks, GetHeaders, MerkleBlock, Message,
    RejectReason, SendCompact, Version,
};
pub use types::{Magic, Nonce, PeerServices, ProtocolVersion, Tweak};
