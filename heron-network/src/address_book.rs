//! The persisted peer list with per-address behavior scores.
//!
//! Record layout, per peer: magic `NCBLKS01`, var-int user agent length,
//! user agent bytes, score (i32), last seen (u32), services (u64),
//! address (16-byte IPv6 + big-endian port), chain id (u32). Repeat
//! offenders sink below the redial floor and stay un-dialed.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Read, Write};
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use byteorder::{BigEndian, LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::Utc;
use tracing::{debug, info};

use heron_chain::compactint::CompactInt;
use heron_chain::parameters::Network;
use heron_chain::{BitcoinDeserialize, BitcoinSerialize, SerializationError};

use crate::constants::REDIAL_SCORE_FLOOR;
use crate::protocol::external::PeerServices;

const RECORD_MAGIC: &[u8; 8] = b"NCBLKS01";

/// One remembered peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerEntry {
    pub user_agent: String,
    pub score: i32,
    pub last_seen: u32,
    pub services: PeerServices,
    pub addr: SocketAddr,
}

/// Every peer this node has ever talked to, scored.
pub struct AddressBook {
    network: Network,
    path: PathBuf,
    peers: Mutex<HashMap<SocketAddr, PeerEntry>>,
}

impl AddressBook {
    /// Load the book from `dir/peers.dat`, or start empty.
    pub fn open(dir: &Path, network: Network) -> Result<AddressBook, SerializationError> {
        let path = dir.join("peers.dat");
        let mut peers = HashMap::new();

        if path.exists() {
            let mut reader = io::BufReader::new(fs::File::open(&path)?);
            loop {
                match read_record(&mut reader, network) {
                    Ok(Some(entry)) => {
                        peers.insert(entry.addr, entry);
                    }
                    Ok(None) => continue, // other network's record
                    Err(SerializationError::Io(ref error))
                        if error.kind() == io::ErrorKind::UnexpectedEof =>
                    {
                        break
                    }
                    Err(error) => return Err(error),
                }
            }
            info!(count = peers.len(), "loaded peer list");
        }

        Ok(AddressBook {
            network,
            path,
            peers: Mutex::new(peers),
        })
    }

    /// Record a sighting of `addr`, creating it at score zero.
    pub fn saw(&self, addr: SocketAddr, services: PeerServices, user_agent: &str) {
        let mut peers = self.peers.lock().expect("poisoned lock");
        let entry = peers.entry(addr).or_insert(PeerEntry {
            user_agent: String::new(),
            score: 1,
            last_seen: 0,
            services,
            addr,
        });
        entry.user_agent = user_agent.to_string();
        entry.services = services;
        entry.last_seen = Utc::now().timestamp() as u32;
    }

    /// Adjust a peer's score by `delta` (negative for misbehavior).
    pub fn adjust_score(&self, addr: SocketAddr, delta: i32) {
        let mut peers = self.peers.lock().expect("poisoned lock");
        if let Some(entry) = peers.get_mut(&addr) {
            entry.score = entry.score.saturating_add(delta);
            debug!(%addr, score = entry.score, "adjusted peer score");
        }
    }

    pub fn score(&self, addr: &SocketAddr) -> Option<i32> {
        self.peers.lock().expect("poisoned lock").get(addr).map(|e| e.score)
    }

    /// Whether `addr` is worth dialing: unknown, or scored above the
    /// floor.
    pub fn should_dial(&self, addr: &SocketAddr) -> bool {
        match self.score(addr) {
            Some(score) => score > REDIAL_SCORE_FLOOR,
            None => true,
        }
    }

    /// Known-good candidate addresses, best scores first.
    pub fn dial_candidates(&self, limit: usize) -> Vec<SocketAddr> {
        let peers = self.peers.lock().expect("poisoned lock");
        let mut entries: Vec<_> = peers
            .values()
            .filter(|entry| entry.score > REDIAL_SCORE_FLOOR)
            .collect();
        entries.sort_by_key(|entry| std::cmp::Reverse(entry.score));
        entries.into_iter().take(limit).map(|entry| entry.addr).collect()
    }

    pub fn len(&self) -> usize {
        self.peers.lock().expect("poisoned lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Persist every record.
    pub fn save(&self) -> Result<(), SerializationError> {
        let peers = self.peers.lock().expect("poisoned lock");
        let mut writer = io::BufWriter::new(fs::File::create(&self.path)?);
        for entry in peers.values() {
            write_record(&mut writer, entry, self.network)?;
        }
        writer.flush()?;
        Ok(())
    }
}

fn write_record<W: Write>(
    mut writer: W,
    entry: &PeerEntry,
    network: Network,
) -> Result<(), SerializationError> {
    writer.write_all(RECORD_MAGIC)?;
    CompactInt::from(entry.user_agent.len()).bitcoin_serialize(&mut writer)?;
    writer.write_all(entry.user_agent.as_bytes())?;
    writer.write_i32::<LittleEndian>(entry.score)?;
    writer.write_u32::<LittleEndian>(entry.last_seen)?;
    writer.write_u64::<LittleEndian>(entry.services.bits())?;
    let ip = match entry.addr.ip() {
        IpAddr::V4(v4) => v4.to_ipv6_mapped(),
        IpAddr::V6(v6) => v6,
    };
    writer.write_all(&ip.octets())?;
    writer.write_u16::<BigEndian>(entry.addr.port())?;
    writer.write_u32::<LittleEndian>(network.id())?;
    Ok(())
}

/// Read one record; `None` for a record belonging to another network.
fn read_record<R: Read>(
    mut reader: R,
    network: Network,
) -> Result<Option<PeerEntry>, SerializationError> {
    let mut magic = [0u8; 8];
    reader.read_exact(&mut magic)?;
    if &magic != RECORD_MAGIC {
        return Err(SerializationError::Parse("bad peer record magic"));
    }

    let agent_len = CompactInt::bitcoin_deserialize(&mut reader)?.value() as usize;
    if agent_len > 256 {
        return Err(SerializationError::Parse("peer user agent too long"));
    }
    let mut agent = vec![0u8; agent_len];
    reader.read_exact(&mut agent)?;
    let user_agent = String::from_utf8(agent)
        .map_err(|_| SerializationError::Parse("peer user agent is not utf-8"))?;

    let score = reader.read_i32::<LittleEndian>()?;
    let last_seen = reader.read_u32::<LittleEndian>()?;
    let services = PeerServices::from_bits_truncate(reader.read_u64::<LittleEndian>()?);

    let mut octets = [0u8; 16];
    reader.read_exact(&mut octets)?;
    let v6 = Ipv6Addr::from(octets);
    let ip = match v6.to_ipv4() {
        Some(v4) => IpAddr::V4(v4),
        None => IpAddr::V6(v6),
    };
    let port = reader.read_u16::<BigEndian>()?;
    let chain_id = reader.read_u32::<LittleEndian>()?;

    let entry = PeerEntry {
        user_agent,
        score,
        last_seen,
        services,
        addr: SocketAddr::from((ip, port)),
    };
    if chain_id != network.id() {
        return Ok(None);
    }
    Ok(Some(entry))
}

#[cfg(test)]
mod tests {
    use tempdir::TempDir;

    use super::*;

    #[test]
    fn records_survive_a_round_trip() -> color_eyre::Result<()> {
        heron_test::init();

        let dir = TempDir::new("heron-peers")?;
        let addr: SocketAddr = ([10, 1, 2, 3], 8333).into();
        {
            let book = AddressBook::open(dir.path(), Network::Mainnet)?;
            book.saw(addr, PeerServices::FULL_NODE | PeerServices::CASH, "/other:1.0/");
            book.adjust_score(addr, 7);
            book.save()?;
        }

        let book = AddressBook::open(dir.path(), Network::Mainnet)?;
        assert_eq!(book.len(), 1);
        assert_eq!(book.score(&addr), Some(8));
        assert!(book.should_dial(&addr));
        assert_eq!(book.dial_candidates(10), vec![addr]);
        Ok(())
    }

    #[test]
    fn misbehavior_sinks_below_the_redial_floor() -> color_eyre::Result<()> {
        heron_test::init();

        let dir = TempDir::new("heron-peers")?;
        let book = AddressBook::open(dir.path(), Network::Mainnet)?;
        let addr: SocketAddr = ([10, 9, 9, 9], 8333).into();

        book.saw(addr, PeerServices::FULL_NODE, "/shady:0.0/");
        book.adjust_score(addr, -crate::constants::INVALID_ANNOUNCEMENT_PENALTY);
        assert!(!book.should_dial(&addr));
        assert!(book.dial_candidates(10).is_empty());
        Ok(())
    }
}
