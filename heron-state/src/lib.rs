//! Durable chain state: the block file store, the UTXO set, and the header
//! index for the active chain.
//!
//! Everything here is a plain store handle with an explicit lock
//! discipline; callers construct them with a [`Config`] and thread them
//! through the chain constructor. Nothing is a global.

mod block_file;
mod config;
mod error;
mod headers;
mod utxo;

pub use block_file::{BlockFile, BlockStore, MAX_BLOCKS_PER_FILE};
pub use config::Config;
pub use error::StateError;
pub use headers::{HeaderIndex, HeaderStat};
pub use utxo::{SpentOutput, UtxoSet};

/// Result alias for state operations.
pub type Result<T> = std::result::Result<T, StateError>;
