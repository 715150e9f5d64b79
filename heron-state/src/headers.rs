//! The header index for the active chain.
//!
//! One [`HeaderStat`] per accepted height: the derived facts (time,
//! version, target bits, accumulated work) that retargeting, soft-fork
//! tracking, and best-chain selection read constantly, without touching the
//! block files.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use heron_chain::block::{self, Header, Height};
use heron_chain::work::difficulty::{CompactDifficulty, Work};

use crate::{Result, StateError};

/// Derived per-header facts on the active chain.
#[derive(Clone, Debug)]
pub struct HeaderStat {
    pub hash: block::Hash,
    pub version: i32,
    pub time: DateTime<Utc>,
    pub bits: CompactDifficulty,
    /// Total work of the chain up to and including this header.
    pub accumulated_work: Work,
}

/// The active chain's headers, indexed by height and hash.
#[derive(Default)]
pub struct HeaderIndex {
    stats: Vec<HeaderStat>,
    height_by_hash: HashMap<block::Hash, Height>,
}

impl HeaderIndex {
    pub fn new() -> HeaderIndex {
        HeaderIndex::default()
    }

    /// Append `header`, which must extend the current tip (or be the
    /// genesis header of an empty index).
    pub fn push(&mut self, header: &Header) -> Result<Height> {
        match self.stats.last() {
            Some(tip) if header.previous_block_hash != tip.hash => {
                return Err(StateError::HeaderDoesNotConnect);
            }
            None if !header.previous_block_hash.is_zero() => {
                return Err(StateError::HeaderDoesNotConnect);
            }
            _ => {}
        }

        let work = header
            .difficulty_threshold
            .to_expanded()
            .ok_or(StateError::InvalidDifficulty)?
            .to_work();
        let accumulated = self
            .stats
            .last()
            .map(|tip| tip.accumulated_work)
            .unwrap_or_else(Work::zero)
            + work;

        let height = Height(self.stats.len() as u32);
        let hash = header.hash();
        self.stats.push(HeaderStat {
            hash,
            version: header.version,
            time: header.time,
            bits: header.difficulty_threshold,
            accumulated_work: accumulated,
        });
        self.height_by_hash.insert(hash, height);
        Ok(height)
    }

    /// The height of the current tip, if the index is non-empty.
    pub fn tip_height(&self) -> Option<Height> {
        match self.stats.len() {
            0 => None,
            length => Some(Height(length as u32 - 1)),
        }
    }

    pub fn tip(&self) -> Option<&HeaderStat> {
        self.stats.last()
    }

    pub fn stat_at(&self, height: Height) -> Option<&HeaderStat> {
        self.stats.get(height.0 as usize)
    }

    pub fn height_of(&self, hash: &block::Hash) -> Option<Height> {
        self.height_by_hash.get(hash).copied()
    }

    pub fn contains(&self, hash: &block::Hash) -> bool {
        self.height_by_hash.contains_key(hash)
    }

    /// The chain's total accumulated work.
    pub fn accumulated_work(&self) -> Work {
        self.stats
            .last()
            .map(|tip| tip.accumulated_work)
            .unwrap_or_else(Work::zero)
    }

    /// Drop every header above `height`.
    pub fn truncate_above(&mut self, height: Height) {
        let keep = (height.0 + 1) as usize;
        if keep >= self.stats.len() {
            return;
        }
        for stat in self.stats.drain(keep..) {
            self.height_by_hash.remove(&stat.hash);
        }
    }

    /// How many of the trailing `window` headers carry a version of at
    /// least `min_version`; the soft-fork activation counter.
    pub fn version_count_at_least(&self, window: usize, min_version: i32) -> usize {
        let start = self.stats.len().saturating_sub(window);
        self.stats[start..]
            .iter()
            .filter(|stat| stat.version >= min_version)
            .count()
    }

    /// A block locator for `getheaders`: the tip, then hashes at doubling
    /// gaps back to genesis.
    pub fn locator(&self) -> Vec<block::Hash> {
        let mut hashes = Vec::new();
        let tip = match self.tip_height() {
            Some(tip) => tip.0 as i64,
            None => return hashes,
        };
        let mut height = tip;
        let mut step = 1i64;
        while height > 0 {
            hashes.push(self.stats[height as usize].hash);
            if hashes.len() >= 10 {
                step *= 2;
            }
            height -= step;
        }
        hashes.push(self.stats[0].hash);
        hashes
    }
}

#[cfg(test)]
mod tests {
    use heron_chain::block::merkle;
    use heron_chain::parameters::{genesis_block, Network};
    use heron_chain::work::difficulty::PROOF_OF_WORK_LIMIT_BITS;

    use super::*;

    fn chain_of(length: u32) -> HeaderIndex {
        let genesis = genesis_block(Network::Mainnet);
        let mut index = HeaderIndex::new();
        index.push(&genesis.header).unwrap();
        for _ in 1..length {
            let tip = index.tip().unwrap();
            let header = Header::new(
                4,
                tip.hash,
                merkle::Root([0x44; 32]),
                tip.time,
                CompactDifficulty::new(PROOF_OF_WORK_LIMIT_BITS),
                0,
            );
            index.push(&header).unwrap();
        }
        index
    }

    #[test]
    fn work_accumulates_across_heights() {
        heron_test::init();

        let index = chain_of(3);
        assert_eq!(index.tip_height(), Some(Height(2)));

        let per_header = CompactDifficulty::new(PROOF_OF_WORK_LIMIT_BITS)
            .to_expanded()
            .unwrap()
            .to_work();
        let expected = per_header + per_header + per_header;
        assert_eq!(index.accumulated_work(), expected);
    }

    #[test]
    fn disconnected_headers_are_refused() {
        heron_test::init();

        let mut index = chain_of(2);
        let stray = Header::new(
            4,
            block::Hash([0xaa; 32]),
            merkle::Root([0; 32]),
            index.tip().unwrap().time,
            CompactDifficulty::new(PROOF_OF_WORK_LIMIT_BITS),
            0,
        );
        assert!(matches!(
            index.push(&stray),
            Err(StateError::HeaderDoesNotConnect)
        ));
    }

    #[test]
    fn truncate_forgets_hashes() {
        heron_test::init();

        let mut index = chain_of(5);
        let dropped = index.stat_at(Height(4)).unwrap().hash;
        index.truncate_above(Height(2));
        assert_eq!(index.tip_height(), Some(Height(2)));
        assert_eq!(index.height_of(&dropped), None);
    }

    #[test]
    fn locator_starts_at_tip_and_ends_at_genesis() {
        heron_test::init();

        let index = chain_of(40);
        let locator = index.locator();
        assert_eq!(locator[0], index.tip().unwrap().hash);
        assert_eq!(*locator.last().unwrap(), index.stat_at(Height(0)).unwrap().hash);
        assert!(locator.len() < 40);
    }
}
