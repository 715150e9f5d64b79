//! The block transaction merkle tree, and the partial trees served to SPV
//! clients.
//!
//! Trees are never materialized as linked nodes: a full tree is a vector of
//! levels, and parent/child relations are index arithmetic. Level `h` has
//! `width(h) = (n + 2^h - 1) / 2^h` entries; the parent of `(h, pos)` is
//! `(h + 1, pos / 2)`. An odd trailing entry is paired with itself when
//! hashing.

use std::io;
use std::iter::FromIterator;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::compactint::CompactInt;
use crate::serialization::{sha256d, BitcoinDeserialize, BitcoinSerialize, SerializationError};
use crate::transaction;

/// The root of a block's transaction merkle tree.
///
/// The root of a single-transaction block is that transaction's id.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Root(pub [u8; 32]);

impl std::fmt::Debug for Root {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let mut reversed_bytes = self.0;
        reversed_bytes.reverse();
        f.debug_tuple("merkle::Root")
            .field(&hex::encode(reversed_bytes))
            .finish()
    }
}

fn hash_pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut preimage = [0u8; 64];
    preimage[..32].copy_from_slice(left);
    preimage[32..].copy_from_slice(right);
    sha256d::digest(&preimage)
}

/// One reduction step: hash adjacent pairs, pairing an odd tail with itself.
fn next_level(level: &[[u8; 32]]) -> Vec<[u8; 32]> {
    level
        .chunks(2)
        .map(|pair| hash_pair(&pair[0], pair.get(1).unwrap_or(&pair[0])))
        .collect()
}

impl FromIterator<transaction::Hash> for Root {
    fn from_iter<I>(hashes: I) -> Self
    where
        I: IntoIterator<Item = transaction::Hash>,
    {
        let mut level: Vec<[u8; 32]> = hashes.into_iter().map(|hash| hash.0).collect();
        if level.is_empty() {
            return Root([0; 32]);
        }
        while level.len() > 1 {
            level = next_level(&level);
        }
        Root(level[0])
    }
}

impl BitcoinSerialize for Root {
    fn bitcoin_serialize<W: io::Write>(&self, target: W) -> Result<(), io::Error> {
        self.0.bitcoin_serialize(target)
    }
}

impl BitcoinDeserialize for Root {
    fn bitcoin_deserialize<R: io::Read>(reader: R) -> Result<Self, SerializationError> {
        Ok(Root(<[u8; 32]>::bitcoin_deserialize(reader)?))
    }
}

/// A failure while reconstructing a partial merkle tree.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PartialMerkleError {
    #[error("partial tree claims zero transactions")]
    NoTransactions,
    #[error("partial tree claims more transactions than a block can hold")]
    TooManyTransactions,
    #[error("ran out of flag bits during traversal")]
    BitsExhausted,
    #[error("ran out of hashes during traversal")]
    HashesExhausted,
    #[error("traversal finished with unconsumed hashes")]
    UnusedHashes,
    #[error("traversal finished with unconsumed flag bits")]
    UnusedBits,
    #[error("right subtree duplicates left subtree")]
    DuplicateSubtree,
}

/// A merkle tree pruned down to the transactions matching a bloom filter.
///
/// The builder walks the full tree in pre-order, emitting one flag bit per
/// visited node (does any descendant leaf match?) and the hash of every node
/// whose subtree is not descended into, plus the hashes of matching leaves.
/// [`PartialMerkleTree::extract_matches`] is the exact inverse: it re-derives
/// the root and the list of matching transaction ids, and a tree that does
/// not parse back bit-for-bit is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialMerkleTree {
    /// The number of transactions in the full block.
    transaction_count: u32,
    /// Pruned-subtree and matching-leaf hashes, in traversal order.
    hashes: Vec<transaction::Hash>,
    /// Pre-order traversal flags, unpacked.
    flags: Vec<bool>,
}

/// The maximum number of transactions a partial tree may claim. Bounded by
/// the smallest possible transaction in the largest supported block.
const MAX_PARTIAL_TREE_TRANSACTIONS: u32 =
    (super::serialize::MAX_BLOCK_BYTES / 60) as u32;

impl PartialMerkleTree {
    /// Build a partial tree over `tx_hashes`, keeping leaves where `matches`
    /// is set.
    ///
    /// `tx_hashes` and `matches` must be the same length, one entry per
    /// transaction in block order.
    pub fn build(tx_hashes: &[transaction::Hash], matches: &[bool]) -> PartialMerkleTree {
        assert_eq!(tx_hashes.len(), matches.len());

        // Precompute every level so traversal is pure index arithmetic.
        let mut levels: Vec<Vec<[u8; 32]>> =
            vec![tx_hashes.iter().map(|hash| hash.0).collect()];
        while levels.last().expect("at least one level").len() > 1 {
            levels.push(next_level(levels.last().expect("at least one level")));
        }

        let mut tree = PartialMerkleTree {
            transaction_count: tx_hashes.len() as u32,
            hashes: Vec::new(),
            flags: Vec::new(),
        };
        if !tx_hashes.is_empty() {
            tree.build_subtree(&levels, matches, levels.len() - 1, 0);
        }
        tree
    }

    fn width(&self, height: usize) -> usize {
        (self.transaction_count as usize + (1 << height) - 1) >> height
    }

    fn build_subtree(
        &mut self,
        levels: &[Vec<[u8; 32]>],
        matches: &[bool],
        height: usize,
        pos: usize,
    ) {
        let leaf_range = (pos << height)..((pos + 1) << height).min(matches.len());
        let any_match = matches[leaf_range].iter().any(|matched| *matched);
        self.flags.push(any_match);

        if height == 0 || !any_match {
            // Leaf, or an untouched subtree summarized by its root hash.
            self.hashes.push(transaction::Hash(levels[height][pos]));
        } else {
            self.build_subtree(levels, matches, height - 1, pos * 2);
            if pos * 2 + 1 < levels[height - 1].len() {
                self.build_subtree(levels, matches, height - 1, pos * 2 + 1);
            }
        }
    }

    /// Recompute the root and the matched transaction ids.
    ///
    /// Every claimed hash and flag bit must be consumed exactly; SPV callers
    /// then compare the returned root against the block header.
    pub fn extract_matches(
        &self,
    ) -> Result<(Root, Vec<transaction::Hash>), PartialMerkleError> {
        if self.transaction_count == 0 {
            return Err(PartialMerkleError::NoTransactions);
        }
        if self.transaction_count > MAX_PARTIAL_TREE_TRANSACTIONS {
            return Err(PartialMerkleError::TooManyTransactions);
        }

        let mut height = 0;
        while self.width(height) > 1 {
            height += 1;
        }

        let mut state = ExtractState {
            tree: self,
            next_bit: 0,
            next_hash: 0,
            matched: Vec::new(),
        };
        let root = state.traverse(height, 0)?;

        if state.next_hash != self.hashes.len() {
            return Err(PartialMerkleError::UnusedHashes);
        }
        // Byte-packing pads the flag stream to a byte boundary; the padding
        // must stay within the final byte and be all zero.
        let consumed = state.next_bit;
        if (consumed + 7) / 8 != (self.flags.len() + 7) / 8
            || self.flags[consumed..].iter().any(|bit| *bit)
        {
            return Err(PartialMerkleError::UnusedBits);
        }
        Ok((Root(root), state.matched))
    }
}

struct ExtractState<'a> {
    tree: &'a PartialMerkleTree,
    next_bit: usize,
    next_hash: usize,
    matched: Vec<transaction::Hash>,
}

impl<'a> ExtractState<'a> {
    fn take_bit(&mut self) -> Result<bool, PartialMerkleError> {
        let bit = self
            .tree
            .flags
            .get(self.next_bit)
            .copied()
            .ok_or(PartialMerkleError::BitsExhausted)?;
        self.next_bit += 1;
        Ok(bit)
    }

    fn take_hash(&mut self) -> Result<[u8; 32], PartialMerkleError> {
        let hash = self
            .tree
            .hashes
            .get(self.next_hash)
            .ok_or(PartialMerkleError::HashesExhausted)?;
        self.next_hash += 1;
        Ok(hash.0)
    }

    fn traverse(&mut self, height: usize, pos: usize) -> Result<[u8; 32], PartialMerkleError> {
        let any_match = self.take_bit()?;

        if height == 0 || !any_match {
            let hash = self.take_hash()?;
            if height == 0 && any_match {
                self.matched.push(transaction::Hash(hash));
            }
            return Ok(hash);
        }

        let left = self.traverse(height - 1, pos * 2)?;
        let right = if pos * 2 + 1 < self.tree.width(height - 1) {
            let right = self.traverse(height - 1, pos * 2 + 1)?;
            // A distinct right child equal to the left one would let an
            // attacker mutate the transaction list without changing the
            // root (CVE-2012-2459).
            if right == left {
                return Err(PartialMerkleError::DuplicateSubtree);
            }
            right
        } else {
            left
        };
        Ok(hash_pair(&left, &right))
    }
}

impl BitcoinSerialize for PartialMerkleTree {
    fn bitcoin_serialize<W: io::Write>(&self, mut target: W) -> Result<(), io::Error> {
        self.transaction_count.bitcoin_serialize(&mut target)?;
        self.hashes.bitcoin_serialize(&mut target)?;

        // Flags pack LSB-first into bytes.
        let mut packed = vec![0u8; (self.flags.len() + 7) / 8];
        for (position, flag) in self.flags.iter().enumerate() {
            if *flag {
                packed[position / 8] |= 1 << (position % 8);
            }
        }
        packed.bitcoin_serialize(&mut target)
    }
}

impl BitcoinDeserialize for PartialMerkleTree {
    fn bitcoin_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        let transaction_count = u32::bitcoin_deserialize(&mut reader)?;
        let hashes = <Vec<transaction::Hash>>::bitcoin_deserialize(&mut reader)?;

        let byte_count = CompactInt::bitcoin_deserialize(&mut reader)?.value() as usize;
        let mut flags = Vec::with_capacity(byte_count.saturating_mul(8).min(1 << 16));
        for _ in 0..byte_count {
            let byte = u8::bitcoin_deserialize(&mut reader)?;
            for bit in 0..8 {
                flags.push(byte & (1 << bit) != 0);
            }
        }

        Ok(PartialMerkleTree {
            transaction_count,
            hashes,
            flags,
        })
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn leaf(fill: u8) -> transaction::Hash {
        transaction::Hash([fill; 32])
    }

    #[test]
    fn root_of_single_transaction_is_its_id() {
        heron_test::init();

        let id = leaf(0x11);
        let root = Root::from_iter(vec![id]);
        assert_eq!(root.0, id.0);
    }

    #[test]
    fn odd_level_pairs_tail_with_itself() {
        heron_test::init();

        let leaves = vec![leaf(1), leaf(2), leaf(3)];
        let ab = hash_pair(&leaves[0].0, &leaves[1].0);
        let cc = hash_pair(&leaves[2].0, &leaves[2].0);
        let expected = hash_pair(&ab, &cc);

        assert_eq!(Root::from_iter(leaves).0, expected);
    }

    #[test]
    fn partial_tree_round_trips_through_the_wire_format() {
        heron_test::init();

        let leaves: Vec<_> = (0..7u8).map(leaf).collect();
        let matches = [false, true, false, false, true, false, false];
        let tree = PartialMerkleTree::build(&leaves, &matches);

        let bytes = tree.bitcoin_serialize_to_vec().unwrap();
        let parsed = PartialMerkleTree::bitcoin_deserialize(&bytes[..]).unwrap();
        let (root, matched) = parsed.extract_matches().unwrap();

        assert_eq!(root, Root::from_iter(leaves.clone()));
        assert_eq!(matched, vec![leaves[1], leaves[4]]);
    }

    #[test]
    fn tampered_partial_tree_is_rejected() {
        heron_test::init();

        let leaves: Vec<_> = (0..4u8).map(leaf).collect();
        let tree = PartialMerkleTree::build(&leaves, &[true, false, false, false]);

        let mut extra = tree.clone();
        extra.hashes.push(leaf(0xee));
        assert_eq!(
            extra.extract_matches().unwrap_err(),
            PartialMerkleError::UnusedHashes
        );

        let mut truncated = tree;
        truncated.hashes.pop();
        assert_eq!(
            truncated.extract_matches().unwrap_err(),
            PartialMerkleError::HashesExhausted
        );
    }

    proptest! {
        #[test]
        fn partial_tree_extraction_inverts_construction(
            count in 1usize..32,
            match_seed in any::<u64>(),
        ) {
            heron_test::init();

            let leaves: Vec<_> = (0..count).map(|i| leaf(i as u8)).collect();
            let matches: Vec<bool> =
                (0..count).map(|i| (match_seed >> (i % 64)) & 1 == 1).collect();

            let tree = PartialMerkleTree::build(&leaves, &matches);
            let (root, matched) = tree.extract_matches()?;

            prop_assert_eq!(root, Root::from_iter(leaves.iter().copied()));
            let expected: Vec<_> = leaves
                .iter()
                .zip(matches.iter())
                .filter(|(_, matched)| **matched)
                .map(|(leaf, _)| *leaf)
                .collect();
            prop_assert_eq!(matched, expected);
        }
    }
}
