//! The Bitcoin Cash p2p protocol: typed messages, the wire codec, per-peer
//! state, request scheduling, and the persisted peer list.
//!
//! This crate owns everything between "a TCP byte stream exists" and "a
//! typed, checksum-verified message arrived from a peer in a known state".
//! What to *do* with the messages is the node shell's business.

mod address_book;
pub mod constants;
mod meta_addr;
mod peer;
pub mod protocol;
mod request_table;

pub use address_book::AddressBook;
pub use meta_addr::MetaAddr;
pub use peer::{Misbehavior, Peer, PeerState};
pub use protocol::external::{
    Codec, Command, InventoryHash, Magic, Message, Nonce, PeerServices, ProtocolVersion, Version,
};
pub use request_table::RequestTable;
