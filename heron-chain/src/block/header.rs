use std::io::{self, Write};

use bytes::Buf;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::work::difficulty::CompactDifficulty;
use crate::{cached::Cached, serialization::sha256d};
use crate::{BitcoinDeserialize, BitcoinSerialize, SerializationError};

use super::{merkle, Hash, Height};

/// A block header, containing metadata about a block.
///
/// Headers chain backwards: each one names its parent's hash, all the way to
/// the genesis block. Header identity is the sha256d of the 80 serialized
/// bytes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Header {
    /// The block version, also used for soft-fork signaling.
    pub version: i32,

    /// The hash of the parent block.
    pub previous_block_hash: Hash,

    /// The root of the transaction merkle tree, binding the header to the
    /// block's transactions.
    ///
    /// Because of a flaw in the tree construction (CVE-2012-2459) the root
    /// does not always uniquely bind the transaction list; the duplicate
    /// check during validation closes that gap.
    pub merkle_root: merkle::Root,

    /// When the miner started hashing this header, by its own clock.
    pub time: DateTime<Utc>,

    /// The compact encoding of the target this header's hash must not
    /// exceed.
    pub difficulty_threshold: CompactDifficulty,

    /// Free field miners grind to satisfy the target.
    pub nonce: u32,

    /// The header's own hash, cached at deserialization time.
    /// Not part of the consensus serialization.
    hash: Cached<Hash>,
}

/// An error in a header's declared timestamp.
#[derive(Error, Debug)]
pub enum BlockTimeError {
    #[error("block time {0:?} for {1:?} {2:?} is more than 2 hours in the future ({3:?})")]
    InvalidBlockTime(DateTime<Utc>, Height, Hash, DateTime<Utc>),
}

impl Header {
    /// The serialized length of a header, in bytes.
    pub const fn len() -> usize {
        80
    }

    pub fn new(
        version: i32,
        previous_block_hash: Hash,
        merkle_root: merkle::Root,
        time: DateTime<Utc>,
        difficulty_threshold: CompactDifficulty,
        nonce: u32,
    ) -> Header {
        Header {
            version,
            previous_block_hash,
            merkle_root,
            time,
            difficulty_threshold,
            nonce,
            hash: Cached::new(),
        }
    }

    /// This header's hash, cached after the first computation.
    pub fn hash(&self) -> Hash {
        match self.hash.value() {
            Some(hash) => hash,
            None => Hash::from(self),
        }
    }

    /// Check the two-hour future-time bound against the local clock `now`.
    ///
    /// Non-deterministic by design; a header rejected now may be accepted
    /// later.
    pub fn time_is_valid_at(
        &self,
        now: DateTime<Utc>,
        height: Height,
        hash: Hash,
    ) -> Result<(), BlockTimeError> {
        let two_hours_in_the_future = now
            .checked_add_signed(Duration::hours(2))
            .expect("two hours from now does not overflow");
        if self.time <= two_hours_in_the_future {
            Ok(())
        } else {
            Err(BlockTimeError::InvalidBlockTime(
                self.time,
                height,
                hash,
                two_hours_in_the_future,
            ))
        }
    }

    /// Deserialize a header from a `Buf`, hashing the raw bytes as they go
    /// by so the hash cache is populated without a reserialization.
    pub fn deserialize_from_buf<B: Buf>(mut src: B) -> Result<Self, SerializationError> {
        if src.remaining() < Header::len() {
            return Err(SerializationError::Parse("not enough bytes in block header"));
        }
        // Zero-copy when the underlying storage is Bytes/BytesMut.
        let raw = src.copy_to_bytes(Header::len());
        let mut hash_writer = sha256d::Writer::default();
        hash_writer
            .write_all(&raw[..])
            .expect("sha256d writers are infallible");
        let own_hash = Hash(hash_writer.finish());

        let mut raw = io::Cursor::new(raw);
        Ok(Header {
            version: i32::bitcoin_deserialize(&mut raw)?,
            previous_block_hash: Hash::bitcoin_deserialize(&mut raw)?,
            merkle_root: merkle::Root::bitcoin_deserialize(&mut raw)?,
            time: <DateTime<Utc>>::bitcoin_deserialize(&mut raw)?,
            difficulty_threshold: CompactDifficulty::bitcoin_deserialize(&mut raw)?,
            nonce: u32::bitcoin_deserialize(&mut raw)?,
            hash: Cached::from(own_hash),
        })
    }
}

impl BitcoinSerialize for Header {
    fn bitcoin_serialize<W: io::Write>(&self, mut target: W) -> Result<(), io::Error> {
        self.version.bitcoin_serialize(&mut target)?;
        self.previous_block_hash.bitcoin_serialize(&mut target)?;
        self.merkle_root.bitcoin_serialize(&mut target)?;
        self.time.bitcoin_serialize(&mut target)?;
        self.difficulty_threshold.bitcoin_serialize(&mut target)?;
        self.nonce.bitcoin_serialize(&mut target)
    }
}

impl BitcoinDeserialize for Header {
    fn bitcoin_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        let mut raw = [0u8; 80];
        reader.read_exact(&mut raw)?;
        Header::deserialize_from_buf(&raw[..])
    }
}

/// A header paired with the transaction count of its block, as carried in
/// the p2p `headers` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountedHeader {
    pub header: Header,
    pub transaction_count: usize,
}

impl BitcoinSerialize for CountedHeader {
    fn bitcoin_serialize<W: io::Write>(&self, mut target: W) -> Result<(), io::Error> {
        self.header.bitcoin_serialize(&mut target)?;
        crate::compactint::CompactInt::from(self.transaction_count).bitcoin_serialize(&mut target)
    }
}

impl BitcoinDeserialize for CountedHeader {
    fn bitcoin_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(CountedHeader {
            header: Header::bitcoin_deserialize(&mut reader)?,
            transaction_count: crate::compactint::CompactInt::bitcoin_deserialize(&mut reader)?
                .value() as usize,
        })
    }
}
