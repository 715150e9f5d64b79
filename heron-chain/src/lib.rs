//! Core Bitcoin Cash data structures: blocks, transactions, scripts, keys,
//! proof-of-work arithmetic, and the consensus serialization they share.
#![allow(clippy::unit_arg)]

pub mod amount;
pub mod block;
pub mod bloom;
mod cached;
pub mod compactint;
pub mod fmt;
pub mod keys;
pub mod parameters;
pub mod serialization;
pub mod transaction;
pub mod transparent;
pub mod work;

pub use cached::Cached;
pub use serialization::{
    sha256d, BitcoinDeserialize, BitcoinDeserializeInto, BitcoinSerialize, SerializationError,
};
