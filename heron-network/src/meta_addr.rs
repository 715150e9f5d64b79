//! Peer addresses, on the wire and on disk.

use std::io;
use std::net::SocketAddr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use heron_chain::{BitcoinDeserialize, BitcoinSerialize, SerializationError};

use crate::protocol::external::PeerServices;

/// An address entry as carried in `addr` messages: when the peer was last
/// seen, what it serves, and where it listens.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct MetaAddr {
    /// The last time this peer was seen by whoever relayed the entry.
    pub last_seen: DateTime<Utc>,
    /// The services the peer advertises.
    pub services: PeerServices,
    /// The peer's listening address.
    pub addr: SocketAddr,
}

impl BitcoinSerialize for MetaAddr {
    fn bitcoin_serialize<W: io::Write>(&self, mut target: W) -> Result<(), io::Error> {
        self.last_seen.bitcoin_serialize(&mut target)?;
        self.services.bitcoin_serialize(&mut target)?;
        self.addr.bitcoin_serialize(&mut target)
    }
}

impl BitcoinDeserialize for MetaAddr {
    fn bitcoin_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(MetaAddr {
            last_seen: Utc.timestamp(u32::bitcoin_deserialize(&mut reader)? as i64, 0),
            services: PeerServices::bitcoin_deserialize(&mut reader)?,
            addr: SocketAddr::bitcoin_deserialize(&mut reader)?,
        })
    }
}
