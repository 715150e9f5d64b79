//! The bloom filter SPV clients load to subscribe to matching transactions.

use serde::{Deserialize, Serialize};

use crate::serialization::BitcoinSerialize;
use crate::transaction::Transaction;
use crate::transparent;

/// The maximum filter bit-field size, in bytes.
pub const MAX_FILTER_SIZE: usize = 36_000;

/// The maximum number of hash functions a filter may request.
pub const MAX_HASH_FUNCS: u32 = 50;

/// Never update the filter from matched transactions.
pub const UPDATE_NONE: u8 = 0;
/// Insert the outpoints of every matched output.
pub const UPDATE_ALL: u8 = 1;
/// Insert outpoints only for pay-to-public-key and bare multisig outputs.
pub const UPDATE_P2PUBKEY_ONLY: u8 = 2;

const MURMUR_SEED_FACTOR: u32 = 0xfba4_c795;

/// A peer-supplied probabilistic subscription filter.
///
/// The filter is a bit field probed at `hash_funcs` positions per element
/// using seeded murmur3. False positives are expected and harmless; false
/// negatives never happen.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BloomFilter {
    filter: Vec<u8>,
    hash_funcs: u32,
    tweak: u32,
    flags: u8,
}

/// A rejected `filterload` request.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum BloomFilterError {
    #[error("filter bit field larger than {MAX_FILTER_SIZE} bytes")]
    FilterTooLarge,
    #[error("filter requests more than {MAX_HASH_FUNCS} hash functions")]
    TooManyHashFuncs,
}

impl BloomFilter {
    /// Build a filter from the fields of a `filterload` message.
    pub fn from_wire(
        filter: Vec<u8>,
        hash_funcs: u32,
        tweak: u32,
        flags: u8,
    ) -> Result<BloomFilter, BloomFilterError> {
        if filter.len() > MAX_FILTER_SIZE {
            return Err(BloomFilterError::FilterTooLarge);
        }
        if hash_funcs > MAX_HASH_FUNCS {
            return Err(BloomFilterError::TooManyHashFuncs);
        }
        Ok(BloomFilter {
            filter,
            hash_funcs,
            tweak,
            flags,
        })
    }

    /// An empty filter that matches nothing.
    pub fn empty() -> BloomFilter {
        BloomFilter {
            filter: Vec::new(),
            hash_funcs: 0,
            tweak: 0,
            flags: UPDATE_NONE,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.filter.iter().all(|byte| *byte == 0)
    }

    fn bit_position(&self, seed_index: u32, data: &[u8]) -> usize {
        let seed = seed_index
            .wrapping_mul(MURMUR_SEED_FACTOR)
            .wrapping_add(self.tweak);
        murmur3(seed, data) as usize % (self.filter.len() * 8)
    }

    /// Set the bits for `data` (a `filteradd` element).
    pub fn insert(&mut self, data: &[u8]) {
        if self.filter.is_empty() {
            return;
        }
        for seed_index in 0..self.hash_funcs {
            let position = self.bit_position(seed_index, data);
            self.filter[position / 8] |= 1 << (position % 8);
        }
    }

    /// Whether `data` probably was inserted.
    pub fn contains(&self, data: &[u8]) -> bool {
        if self.filter.is_empty() {
            return false;
        }
        (0..self.hash_funcs).all(|seed_index| {
            let position = self.bit_position(seed_index, data);
            self.filter[position / 8] & (1 << (position % 8)) != 0
        })
    }

    pub fn contains_outpoint(&self, outpoint: &transparent::OutPoint) -> bool {
        let serialized = outpoint
            .bitcoin_serialize_to_vec()
            .expect("outpoints serialize to vecs infallibly");
        self.contains(&serialized)
    }

    /// Whether `transaction` is relevant to this filter's subscriber: its id,
    /// a pushed element of any output's lock script, a spent outpoint, or a
    /// pushed element of any unlock script matches.
    ///
    /// Per the update flags, matching output outpoints are inserted so later
    /// transactions spending them also match.
    pub fn matches_transaction(&mut self, transaction: &Transaction) -> bool {
        if self.filter.is_empty() {
            return false;
        }

        let hash = transaction.hash();
        let mut matched = self.contains(&hash.0);

        for (index, output) in transaction.outputs.iter().enumerate() {
            let mut data_matched = false;
            for element in script_pushes(output.lock_script.as_bytes()) {
                if !element.is_empty() && self.contains(element) {
                    data_matched = true;
                }
            }
            if data_matched {
                matched = true;
                if self.flags == UPDATE_ALL {
                    let outpoint = transparent::OutPoint {
                        hash,
                        index: index as u32,
                    };
                    let serialized = outpoint
                        .bitcoin_serialize_to_vec()
                        .expect("outpoints serialize to vecs infallibly");
                    self.insert(&serialized);
                }
            }
        }
        if matched {
            return true;
        }

        for input in transaction.inputs.iter() {
            if let Some(outpoint) = input.outpoint() {
                if self.contains_outpoint(&outpoint) {
                    return true;
                }
            }
            if let Some(script) = input.unlock_script() {
                for element in script_pushes(script.as_bytes()) {
                    if !element.is_empty() && self.contains(element) {
                        return true;
                    }
                }
            }
        }
        false
    }
}

/// Iterate the data elements pushed by a script, ignoring everything else.
///
/// Only the push opcodes matter here; filters match against pushed data,
/// never opcodes, so a parse failure just ends the scan.
fn script_pushes(script: &[u8]) -> Vec<&[u8]> {
    let mut pushes = Vec::new();
    let mut cursor = 0usize;
    while cursor < script.len() {
        let opcode = script[cursor];
        cursor += 1;
        let len = match opcode {
            1..=75 => opcode as usize,
            // OP_PUSHDATA1/2/4
            76 => match script.get(cursor) {
                Some(len) => {
                    cursor += 1;
                    *len as usize
                }
                None => return pushes,
            },
            77 => match script.get(cursor..cursor + 2) {
                Some(bytes) => {
                    cursor += 2;
                    u16::from_le_bytes([bytes[0], bytes[1]]) as usize
                }
                None => return pushes,
            },
            78 => match script.get(cursor..cursor + 4) {
                Some(bytes) => {
                    cursor += 4;
                    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize
                }
                None => return pushes,
            },
            _ => continue,
        };
        match script.get(cursor..cursor + len) {
            Some(data) => {
                pushes.push(data);
                cursor += len;
            }
            None => return pushes,
        }
    }
    pushes
}

/// The 32-bit murmur3 hash, as the filter wire protocol specifies it.
fn murmur3(seed: u32, data: &[u8]) -> u32 {
    const C1: u32 = 0xcc9e_2d51;
    const C2: u32 = 0x1b87_3593;

    let mut hash = seed;

    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        hash = (hash ^ k).rotate_left(13).wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let remainder = chunks.remainder();
    if !remainder.is_empty() {
        let mut k = 0u32;
        for (position, byte) in remainder.iter().enumerate() {
            k |= (*byte as u32) << (8 * position);
        }
        k = k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        hash ^= k;
    }

    hash ^= data.len() as u32;
    hash ^= hash >> 16;
    hash = hash.wrapping_mul(0x85eb_ca6b);
    hash ^= hash >> 13;
    hash = hash.wrapping_mul(0xc2b2_ae35);
    hash ^ (hash >> 16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn murmur3_reference_vectors() {
        heron_test::init();

        // From the murmur3 reference implementation.
        assert_eq!(murmur3(0, b""), 0);
        assert_eq!(murmur3(0, b"\x00"), 0x514e28b7);
        assert_eq!(murmur3(0x9747b28c, b"aaaa"), 0x5a97808a);
    }

    #[test]
    fn insert_then_contains() {
        heron_test::init();

        let mut filter = BloomFilter::from_wire(vec![0u8; 16], 5, 0xdeadbeef, UPDATE_NONE)
            .unwrap();
        assert!(!filter.contains(b"element"));
        filter.insert(b"element");
        assert!(filter.contains(b"element"));
        assert!(!filter.contains(b"another"));
    }

    #[test]
    fn oversized_filters_are_rejected() {
        heron_test::init();

        assert_eq!(
            BloomFilter::from_wire(vec![0; MAX_FILTER_SIZE + 1], 1, 0, UPDATE_NONE),
            Err(BloomFilterError::FilterTooLarge)
        );
        assert_eq!(
            BloomFilter::from_wire(vec![0; 8], MAX_HASH_FUNCS + 1, 0, UPDATE_NONE),
            Err(BloomFilterError::TooManyHashFuncs)
        );
    }

    #[test]
    fn script_push_extraction_skips_opcodes() {
        heron_test::init();

        // OP_DUP OP_HASH160 <3 bytes> OP_EQUALVERIFY
        let script = [0x76, 0xa9, 0x03, 0xaa, 0xbb, 0xcc, 0x88];
        let pushes = script_pushes(&script);
        assert_eq!(pushes, vec![&[0xaa, 0xbb, 0xcc][..]]);
    }
}
