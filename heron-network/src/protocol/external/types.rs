//! Small wire-level types.

use std::io;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use heron_chain::parameters::Network;
use heron_chain::{BitcoinDeserialize, BitcoinSerialize, SerializationError};

/// A network magic, the first four bytes of every message header.
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct Magic(pub [u8; 4]);

impl Magic {
    pub const MAINNET: Magic = Magic([0xe3, 0xe1, 0xf3, 0xe8]);
    pub const TESTNET: Magic = Magic([0xf4, 0xe5, 0xf3, 0xf4]);
}

impl From<Network> for Magic {
    fn from(network: Network) -> Magic {
        match network {
            Network::Mainnet => Magic::MAINNET,
            Network::Testnet => Magic::TESTNET,
        }
    }
}

impl std::fmt::Debug for Magic {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_tuple("Magic").field(&hex::encode(self.0)).finish()
    }
}

/// A protocol version number.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
pub struct ProtocolVersion(pub u32);

impl BitcoinSerialize for ProtocolVersion {
    fn bitcoin_serialize<W: io::Write>(&self, target: W) -> Result<(), io::Error> {
        self.0.bitcoin_serialize(target)
    }
}

impl BitcoinDeserialize for ProtocolVersion {
    fn bitcoin_deserialize<R: io::Read>(reader: R) -> Result<Self, SerializationError> {
        Ok(ProtocolVersion(u32::bitcoin_deserialize(reader)?))
    }
}

/// A connection nonce, used to detect self-connections.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Nonce(pub u64);

impl Default for Nonce {
    fn default() -> Self {
        use rand::Rng;
        Nonce(rand::thread_rng().gen())
    }
}

impl BitcoinSerialize for Nonce {
    fn bitcoin_serialize<W: io::Write>(&self, target: W) -> Result<(), io::Error> {
        self.0.bitcoin_serialize(target)
    }
}

impl BitcoinDeserialize for Nonce {
    fn bitcoin_deserialize<R: io::Read>(reader: R) -> Result<Self, SerializationError> {
        Ok(Nonce(u64::bitcoin_deserialize(reader)?))
    }
}

/// A bloom filter tweak, mixed into the filter's hash seeds.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Tweak(pub u32);

bitflags! {
    /// The services a peer advertises in `version` and `addr` messages.
    #[derive(Default, Serialize, Deserialize)]
    pub struct PeerServices: u64 {
        /// Serves the full chain.
        const FULL_NODE = 0x01;
        /// Answers bloom-filtered requests.
        const BLOOM = 0x04;
        /// Witness data (unused here; the flag still appears on the wire).
        const WITNESS = 0x08;
        /// Xthin block relay.
        const XTHIN = 0x10;
        /// Follows the cash rules.
        const CASH = 0x20;
    }
}

impl BitcoinSerialize for PeerServices {
    fn bitcoin_serialize<W: io::Write>(&self, target: W) -> Result<(), io::Error> {
        self.bits().bitcoin_serialize(target)
    }
}

impl BitcoinDeserialize for PeerServices {
    fn bitcoin_deserialize<R: io::Read>(reader: R) -> Result<Self, SerializationError> {
        // Unknown service bits are dropped; we only act on the known ones.
        Ok(PeerServices::from_bits_truncate(u64::bitcoin_deserialize(
            reader,
        )?))
    }
}
