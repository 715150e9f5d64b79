use std::io;
use std::net::SocketAddr;

use chrono::{DateTime, TimeZone, Utc};

use heron_chain::block;
use heron_chain::{BitcoinDeserialize, BitcoinSerialize, SerializationError};

use super::super::types::{Nonce, PeerServices, ProtocolVersion};

/// A `version` message.
///
/// Despite the name this is really a handshake opener, carrying everything
/// a peer declares about itself, not just a version number.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Version {
    /// The protocol version the sender speaks.
    pub version: ProtocolVersion,

    /// The services the sender advertises.
    pub services: PeerServices,

    /// When the message was sent.
    pub timestamp: DateTime<Utc>,

    /// The receiver's address and services, as the sender sees them.
    pub address_recv: (PeerServices, SocketAddr),

    /// The sender's own address and services.
    pub address_from: (PeerServices, SocketAddr),

    /// Random per-connection nonce, for self-connection detection.
    pub nonce: Nonce,

    /// The sender's user agent string.
    pub user_agent: String,

    /// The sender's best block height.
    pub start_height: block::Height,

    /// Whether the receiver should relay transactions to the sender.
    pub relay: bool,
}

impl Version {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        version: ProtocolVersion,
        their_addr: SocketAddr,
        their_services: PeerServices,
        our_services: PeerServices,
        our_addr: SocketAddr,
        nonce: Nonce,
        user_agent: String,
        start_height: block::Height,
        relay: bool,
    ) -> Version {
        // Truncate to five-minute granularity; some peers score clock skew.
        let now = Utc::now().timestamp();
        let timestamp = Utc.timestamp(now - now.rem_euclid(5 * 60), 0);
        Version {
            version,
            services: our_services,
            timestamp,
            address_recv: (their_services, their_addr),
            address_from: (our_services, our_addr),
            nonce,
            user_agent,
            start_height,
            relay,
        }
    }
}

impl BitcoinSerialize for Version {
    fn bitcoin_serialize<W: io::Write>(&self, mut target: W) -> Result<(), io::Error> {
        self.version.bitcoin_serialize(&mut target)?;
        self.services.bitcoin_serialize(&mut target)?;
        // Version timestamps are 8 bytes, unlike headers.
        self.timestamp.timestamp().bitcoin_serialize(&mut target)?;
        self.address_recv.bitcoin_serialize(&mut target)?;
        self.address_from.bitcoin_serialize(&mut target)?;
        self.nonce.bitcoin_serialize(&mut target)?;
        self.user_agent.bitcoin_serialize(&mut target)?;
        self.start_height.0.bitcoin_serialize(&mut target)?;
        self.relay.bitcoin_serialize(&mut target)
    }
}

impl BitcoinDeserialize for Version {
    fn bitcoin_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(Version {
            version: ProtocolVersion::bitcoin_deserialize(&mut reader)?,
            services: PeerServices::bitcoin_deserialize(&mut reader)?,
            timestamp: Utc.timestamp(i64::bitcoin_deserialize(&mut reader)?, 0),
            address_recv: <(PeerServices, SocketAddr)>::bitcoin_deserialize(&mut reader)?,
            address_from: <(PeerServices, SocketAddr)>::bitcoin_deserialize(&mut reader)?,
            nonce: Nonce::bitcoin_deserialize(&mut reader)?,
            user_agent: String::bitcoin_deserialize(&mut reader)?,
            start_height: block::Height(u32::bitcoin_deserialize(&mut reader)?),
            relay: bool::bitcoin_deserialize(&mut reader)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_round_trips() {
        heron_test::init();

        let version = Version::new(
            ProtocolVersion(70_015),
            ([192, 168, 0, 1], 8333).into(),
            PeerServices::FULL_NODE,
            PeerServices::FULL_NODE | PeerServices::CASH,
            ([192, 168, 0, 2], 8333).into(),
            Nonce(0x23293812),
            "/heron:0.1.0/".to_string(),
            block::Height(650_000),
            true,
        );
        let bytes = version.bitcoin_serialize_to_vec().unwrap();
        let parsed = Version::bitcoin_deserialize(&bytes[..]).unwrap();
        assert_eq!(version, parsed);
    }
}
