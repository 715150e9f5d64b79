//! The chain state machine.
//!
//! Headers are admitted against proof-of-work, retarget, and version
//! rules; bodies are validated against the UTXO set and committed; and
//! when a competing branch accumulates more work than the active chain,
//! the machine reverts to the fork point and applies the branch, undoing
//! the whole switch if any branch block turns out invalid.
//!
//! One write lock guards all chain mutation. Writers hold it for the
//! duration of a block commit; the UTXO journal for a height is durable
//! before the stored block count (the tip pointer) advances past it.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use heron_chain::block::{self, Block, Header, Height};
use heron_chain::parameters::{ForkSet, Network};
use heron_chain::transaction::Transaction;
use heron_chain::work::difficulty::{
    retarget, CompactDifficulty, Work, PROOF_OF_WORK_LIMIT_BITS, RETARGET_INTERVAL,
};
use heron_state::{BlockStore, Config, HeaderIndex, StateError, UtxoSet};

use crate::block::{check, check_and_apply, BlockStats, CheckOptions};
use crate::error::ChainError;
use crate::forks::Forks;

/// Construction switches.
///
/// Defaults are the consensus rules; tests relax proof of work because
/// mining real 2^32-work headers in a unit test is not a thing.
#[derive(Clone, Copy, Debug)]
pub struct ChainOptions {
    /// Enforce the difficulty filter (`hash <= target`) on admitted
    /// headers.
    pub check_proof_of_work: bool,
    /// Run script verification during block validation.
    pub verify_scripts: bool,
}

impl Default for ChainOptions {
    fn default() -> Self {
        ChainOptions {
            check_proof_of_work: true,
            verify_scripts: true,
        }
    }
}

/// The outcome of a `add_headers` call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeadersOutcome {
    /// Headers newly admitted, on the active chain or a branch.
    pub accepted: usize,
    /// Headers already known.
    pub known: usize,
    /// Headers discarded for want of a known parent.
    pub orphaned: usize,
}

/// The outcome of an `add_block` call.
#[derive(Debug)]
pub enum BlockOutcome {
    /// The block extended the active chain.
    Committed { height: Height, stats: BlockStats },
    /// The block was stored, awaiting earlier blocks or the rest of its
    /// branch.
    Stored,
    /// The block is already on the chain.
    AlreadyKnown,
    /// The block completed a heavier branch and the chain switched to it.
    Reorged {
        fork_height: Height,
        old_tip: Height,
        new_tip: Height,
        /// Transactions from the replaced blocks, for mempool
        /// reinsertion where still valid.
        returned_transactions: Vec<Arc<Transaction>>,
    },
}

/// A candidate branch: headers diverging from the active chain.
struct Branch {
    /// The height of the last block shared with the active chain.
    fork_height: Height,
    headers: Vec<Header>,
    /// Downloaded bodies, by hash.
    bodies: HashMap<block::Hash, Arc<Block>>,
}

impl Branch {
    fn tip_hash(&self) -> block::Hash {
        self.headers
            .last()
            .expect("branches are never empty")
            .hash()
    }

    fn contains(&self, hash: &block::Hash) -> bool {
        self.headers.iter().any(|header| header.hash() == *hash)
    }

    fn is_complete(&self) -> bool {
        self.headers
            .iter()
            .all(|header| self.bodies.contains_key(&header.hash()))
    }

    /// Work of the branch alone, above the fork point.
    fn work(&self) -> Work {
        self.headers
            .iter()
            .filter_map(|header| header.difficulty_threshold.to_expanded())
            .map(|target| target.to_work())
            .sum()
    }
}

struct ChainInner {
    headers: HeaderIndex,
    forks: Forks,
    branches: Vec<Branch>,
    /// Bodies for accepted headers above the stored tip, waiting their
    /// turn.
    pending_bodies: HashMap<block::Hash, Arc<Block>>,
    /// Hashes proven invalid; never accepted again.
    blacklist: HashSet<block::Hash>,
}

/// The canonical chain: stores plus the state machine over them.
pub struct Chain {
    network: Network,
    options: ChainOptions,
    purge_depth: u32,
    store: Arc<BlockStore>,
    utxo: Arc<UtxoSet>,
    inner: RwLock<ChainInner>,
}

impl Chain {
    /// Open the chain with default (full consensus) options.
    pub fn new(config: &Config) -> Result<Chain, ChainError> {
        Chain::with_options(config, ChainOptions::default())
    }

    /// Open the chain, replaying stored blocks into the UTXO set where its
    /// tables are behind the block files, and applying the genesis block
    /// to an empty store.
    pub fn with_options(config: &Config, options: ChainOptions) -> Result<Chain, ChainError> {
        let network = config.network;
        let store = Arc::new(BlockStore::open(config)?);
        let (utxo, utxo_height) = UtxoSet::open(config)?;
        let utxo = Arc::new(utxo);

        let chain = Chain {
            network,
            options,
            purge_depth: config.purge_depth,
            store,
            utxo,
            inner: RwLock::new(ChainInner {
                headers: HeaderIndex::new(),
                forks: Forks::new(network),
                branches: Vec::new(),
                pending_bodies: HashMap::new(),
                blacklist: HashSet::new(),
            }),
        };

        {
            let mut inner = chain.inner.write().expect("poisoned lock");
            let inner = &mut *inner;

            // Rebuild the header index and fork schedule from the stored
            // chain.
            let stored = chain.store.block_count();
            for height in 0..stored {
                let header = chain.store.header_at(Height(height))?;
                inner.forks.update_at_boundary(&inner.headers, Height(height));
                inner.headers.push(&header)?;
            }

            // Bring the UTXO set up to the stored tip. Tables saved above
            // the stored blocks (a crash between revert and save) roll
            // back first.
            if let Some(saved) = utxo_height {
                if saved.0 >= stored {
                    chain.utxo.revert(Height(stored))?;
                }
            }
            let replay_from = utxo_height.map(|h| (h.0 + 1).min(stored)).unwrap_or(0);
            if replay_from < stored {
                info!(
                    from = replay_from,
                    to = stored - 1,
                    "replaying blocks into the UTXO set"
                );
            }
            let replay_options = CheckOptions {
                verify_scripts: false,
            };
            for height in replay_from..stored {
                let height = Height(height);
                let block = chain.store.block_at(height)?;
                let forks = inner.forks.active_set(height);
                check_and_apply(&block, height, &forks, &chain.utxo, &replay_options)
                    .map_err(ChainError::Invalid)?;
                chain.utxo.commit(height)?;
            }

            // A brand new store gets the genesis block.
            if stored == 0 {
                let genesis = heron_chain::parameters::genesis_block(network).clone();
                chain.apply_next_block(inner, Arc::new(genesis))?;
                info!(network = %network, "initialized chain at genesis");
            }
        }
        Ok(chain)
    }

    /// The store handle, for `getdata` service.
    pub fn store(&self) -> &Arc<BlockStore> {
        &self.store
    }

    /// The UTXO set handle, for mempool admission lookups.
    pub fn utxo(&self) -> &Arc<UtxoSet> {
        &self.utxo
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// The active tip: the highest committed block.
    pub fn tip(&self) -> (Height, block::Hash) {
        let height = Height(self.store.block_count().saturating_sub(1));
        let hash = self
            .store
            .hash_at(height)
            .unwrap_or_else(|_| block::Hash::zero());
        (height, hash)
    }

    /// The height of the best accepted *header*, which may be above the
    /// committed tip while bodies download.
    pub fn header_height(&self) -> Height {
        self.inner
            .read()
            .expect("poisoned lock")
            .headers
            .tip_height()
            .unwrap_or(Height(0))
    }

    pub fn accumulated_work(&self) -> Work {
        self.inner
            .read()
            .expect("poisoned lock")
            .headers
            .accumulated_work()
    }

    /// A block locator for `getheaders` requests.
    pub fn locator(&self) -> Vec<block::Hash> {
        self.inner.read().expect("poisoned lock").headers.locator()
    }

    /// The fork rule snapshot at `height`.
    pub fn fork_set(&self, height: Height) -> ForkSet {
        self.inner
            .read()
            .expect("poisoned lock")
            .forks
            .active_set(height)
    }

    pub fn is_blacklisted(&self, hash: &block::Hash) -> bool {
        self.inner
            .read()
            .expect("poisoned lock")
            .blacklist
            .contains(hash)
    }

    /// Whether `hash` names a known header (active, branch, or stored).
    pub fn contains_header(&self, hash: &block::Hash) -> bool {
        let inner = self.inner.read().expect("poisoned lock");
        inner.headers.contains(hash)
            || inner.branches.iter().any(|branch| branch.contains(hash))
    }

    /// Bodies to fetch: accepted headers above the committed tip, then
    /// missing branch bodies, oldest first.
    pub fn needed_blocks(&self, limit: usize) -> Vec<block::Hash> {
        let inner = self.inner.read().expect("poisoned lock");
        let mut needed = Vec::new();

        let stored = self.store.block_count();
        if let Some(tip) = inner.headers.tip_height() {
            for height in stored..=tip.0 {
                if needed.len() >= limit {
                    return needed;
                }
                if let Some(stat) = inner.headers.stat_at(Height(height)) {
                    if !inner.pending_bodies.contains_key(&stat.hash) {
                        needed.push(stat.hash);
                    }
                }
            }
        }

        for branch in inner.branches.iter() {
            for header in branch.headers.iter() {
                if needed.len() >= limit {
                    return needed;
                }
                let hash = header.hash();
                if !branch.bodies.contains_key(&hash) {
                    needed.push(hash);
                }
            }
        }
        needed
    }

    /// Admit a batch of headers, in order.
    ///
    /// Invalid headers fail the whole call (the announcing peer is
    /// penalized); unknown-parent headers are merely discarded.
    pub fn add_headers(&self, headers: &[Header]) -> Result<HeadersOutcome, ChainError> {
        let mut inner = self.inner.write().expect("poisoned lock");
        let inner = &mut *inner;
        let mut outcome = HeadersOutcome::default();

        for header in headers {
            let hash = header.hash();
            if inner.blacklist.contains(&hash) {
                return Err(ChainError::Blacklisted);
            }
            if inner.headers.contains(&hash)
                || inner.branches.iter().any(|branch| branch.contains(&hash))
            {
                outcome.known += 1;
                continue;
            }

            let active_tip = inner
                .headers
                .tip()
                .map(|stat| stat.hash)
                .unwrap_or_else(block::Hash::zero);

            if header.previous_block_hash == active_tip {
                let height = Height(inner.headers.tip_height().map(|h| h.0 + 1).unwrap_or(0));
                if let Err(error) = self.check_header_context(inner, header, height) {
                    inner.blacklist.insert(hash);
                    return Err(error);
                }
                inner.headers.push(header)?;
                let headers = &inner.headers;
                inner.forks.update_at_boundary(headers, Height(height.0 + 1));
                outcome.accepted += 1;
                continue;
            }

            if self.admit_branch_header(inner, header)? {
                outcome.accepted += 1;
            } else {
                outcome.orphaned += 1;
            }
        }

        metrics::gauge!(
            "chain.header.height",
            inner.headers.tip_height().map(|h| h.0).unwrap_or(0) as _
        );
        Ok(outcome)
    }

    /// Context checks for a header extending the active chain.
    fn check_header_context(
        &self,
        inner: &ChainInner,
        header: &Header,
        height: Height,
    ) -> Result<(), ChainError> {
        use crate::error::BlockError;

        let hash = header.hash();

        let expected = self.expected_target_bits(&inner.headers, height, header.time);
        let testnet_min_difficulty = self.network == Network::Testnet
            && header.difficulty_threshold.bits() == PROOF_OF_WORK_LIMIT_BITS;
        if !testnet_min_difficulty {
            check::target_bits_are_valid(header, expected, height).map_err(ChainError::Invalid)?;
        }

        if self.options.check_proof_of_work {
            check::difficulty_is_valid(header, self.network, height, &hash)
                .map_err(ChainError::Invalid)?;
        } else if header.difficulty_threshold.to_expanded().is_none() {
            return Err(ChainError::Invalid(BlockError::InvalidDifficulty(
                height, hash,
            )));
        }

        let forks = inner.forks.active_set(height);
        check::version_is_valid(header, &forks, height).map_err(ChainError::Invalid)?;
        check::time_is_valid_at(header, Utc::now()).map_err(ChainError::Invalid)?;
        Ok(())
    }

    /// The target bits required at `height`, given the active header
    /// stats.
    ///
    /// Retargets use the closing interval's first and last timestamps.
    /// Both endpoints are inside the interval, so the span covers one
    /// fewer inter-block gap than it divides by; that off-by-one is
    /// consensus and stays.
    fn expected_target_bits(
        &self,
        headers: &HeaderIndex,
        height: Height,
        _time: DateTime<Utc>,
    ) -> CompactDifficulty {
        if height.0 == 0 {
            return CompactDifficulty::new(PROOF_OF_WORK_LIMIT_BITS);
        }
        let parent = match headers.stat_at(Height(height.0 - 1)) {
            Some(parent) => parent,
            None => return CompactDifficulty::new(PROOF_OF_WORK_LIMIT_BITS),
        };
        if height.0 % RETARGET_INTERVAL == 0 {
            let first = headers
                .stat_at(Height(height.0 - RETARGET_INTERVAL))
                .expect("interval start below the parent exists");
            retarget(parent.bits, first.time, parent.time, self.network)
        } else {
            parent.bits
        }
    }

    /// Admit a header whose parent is not the active tip. Returns false
    /// for unknown parents (the header is discarded).
    fn admit_branch_header(
        &self,
        inner: &mut ChainInner,
        header: &Header,
    ) -> Result<bool, ChainError> {
        use crate::error::BlockError;

        // Branch headers get structural checks now; exact retarget
        // matching is enforced when the branch is applied.
        let expanded = match header.difficulty_threshold.to_expanded() {
            Some(expanded) => expanded,
            None => {
                return Err(ChainError::Invalid(BlockError::InvalidDifficulty(
                    Height(0),
                    header.hash(),
                )))
            }
        };
        if self.options.check_proof_of_work && header.hash() > expanded {
            return Err(ChainError::Invalid(BlockError::DifficultyFilter(
                Height(0),
                header.hash(),
            )));
        }

        // Extending an existing branch?
        if let Some(branch) = inner
            .branches
            .iter_mut()
            .find(|branch| branch.tip_hash() == header.previous_block_hash)
        {
            branch.headers.push(*header);
            return Ok(true);
        }

        // Forking off the active chain below the tip?
        if let Some(fork_height) = inner.headers.height_of(&header.previous_block_hash) {
            inner.branches.push(Branch {
                fork_height,
                headers: vec![*header],
                bodies: HashMap::new(),
            });
            debug!(fork = fork_height.0, "opened candidate branch");
            return Ok(true);
        }

        Ok(false)
    }

    /// Hand the chain a downloaded block body.
    pub fn add_block(&self, block: Arc<Block>) -> Result<BlockOutcome, ChainError> {
        let hash = block.hash();
        let mut inner = self.inner.write().expect("poisoned lock");
        let inner = &mut *inner;

        if inner.blacklist.contains(&hash) {
            return Err(ChainError::Blacklisted);
        }

        let stored = self.store.block_count();

        // Already committed?
        if let Some(height) = inner.headers.height_of(&hash) {
            if height.0 < stored {
                return Ok(BlockOutcome::AlreadyKnown);
            }
            // An accepted header waiting on its body.
            if height.0 == stored {
                let outcome = self.apply_next_block(inner, block)?;
                self.drain_pending(inner)?;
                return Ok(outcome);
            }
            inner.pending_bodies.insert(hash, block);
            return Ok(BlockOutcome::Stored);
        }

        // A block for a candidate branch?
        if let Some(index) = inner
            .branches
            .iter()
            .position(|branch| branch.contains(&hash))
        {
            inner.branches[index].bodies.insert(hash, block);
            return self.maybe_reorg(inner, index);
        }

        // Unsolicited block: admit its header first if it connects.
        let active_tip = inner
            .headers
            .tip()
            .map(|stat| stat.hash)
            .unwrap_or_else(block::Hash::zero);
        if block.header.previous_block_hash == active_tip {
            let height = Height(inner.headers.tip_height().map(|h| h.0 + 1).unwrap_or(0));
            if let Err(error) = self.check_header_context(inner, &block.header, height) {
                inner.blacklist.insert(hash);
                return Err(error);
            }
            inner.headers.push(&block.header)?;
            let headers = &inner.headers;
            inner.forks.update_at_boundary(headers, Height(height.0 + 1));
            let outcome = self.apply_next_block(inner, block)?;
            self.drain_pending(inner)?;
            return Ok(outcome);
        }
        if self.admit_branch_header(inner, &block.header)? {
            let index = inner
                .branches
                .iter()
                .position(|branch| branch.contains(&hash))
                .expect("header was just admitted to a branch");
            inner.branches[index].bodies.insert(hash, block);
            return self.maybe_reorg(inner, index);
        }

        Err(ChainError::OrphanHeader)
    }

    /// Validate and commit the body for the next height. The header must
    /// already be accepted at exactly the stored tip height.
    fn apply_next_block(
        &self,
        inner: &mut ChainInner,
        block: Arc<Block>,
    ) -> Result<BlockOutcome, ChainError> {
        let height = Height(self.store.block_count());
        let hash = block.hash();

        // Genesis arrives before its header can be in the index.
        if inner.headers.tip_height().is_none() {
            inner.headers.push(&block.header)?;
        }

        let forks = inner.forks.active_set(height);
        let options = CheckOptions {
            verify_scripts: self.options.verify_scripts,
        };
        let stats = match check_and_apply(&block, height, &forks, &self.utxo, &options) {
            Ok(stats) => stats,
            Err(error) => {
                // Roll back the partial spends, blacklist, and truncate the
                // accepted header so the chain can take a competitor.
                self.utxo.revert(height)?;
                inner.blacklist.insert(hash);
                inner
                    .headers
                    .truncate_above(Height(height.0.saturating_sub(1)));
                let headers = &inner.headers;
                inner
                    .pending_bodies
                    .retain(|pending, _| headers.contains(pending));
                warn!(height = height.0, %hash, "block failed validation");
                return Err(ChainError::Invalid(error));
            }
        };

        // Durability order: journal first, then the tip pointer moves.
        self.utxo.commit(height)?;
        self.store.append(height, &block)?;
        self.utxo.purge(self.purge_depth, height);

        metrics::counter!("chain.block.committed", 1);
        metrics::gauge!("chain.block.height", height.0 as _);
        debug!(height = height.0, %hash, "committed block");

        Ok(BlockOutcome::Committed { height, stats })
    }

    /// Commit any pending bodies that have become next in line.
    ///
    /// An invalid pending body stops the drain (it is already
    /// blacklisted); only store failures propagate.
    fn drain_pending(&self, inner: &mut ChainInner) -> Result<(), ChainError> {
        loop {
            let next_height = Height(self.store.block_count());
            let next_hash = match inner.headers.stat_at(next_height) {
                Some(stat) => stat.hash,
                None => return Ok(()),
            };
            let block = match inner.pending_bodies.remove(&next_hash) {
                Some(block) => block,
                None => return Ok(()),
            };
            match self.apply_next_block(inner, block) {
                Ok(_) => {}
                Err(ChainError::Invalid(_)) => return Ok(()),
                Err(error) => return Err(error),
            }
        }
    }

    /// Switch to branch `index` if it is complete and outworks the active
    /// chain above the fork point.
    fn maybe_reorg(
        &self,
        inner: &mut ChainInner,
        index: usize,
    ) -> Result<BlockOutcome, ChainError> {
        let fork_height = inner.branches[index].fork_height;
        let branch_work = inner.branches[index].work();

        let active_work_above_fork = {
            let total = inner.headers.accumulated_work();
            let at_fork = inner
                .headers
                .stat_at(fork_height)
                .map(|stat| stat.accumulated_work)
                .unwrap_or_else(Work::zero);
            // Work is monotone along a chain, so this never underflows;
            // compare by re-adding instead of subtracting.
            (total, at_fork)
        };
        let heavier = active_work_above_fork.1 + branch_work > active_work_above_fork.0;

        if !heavier || !inner.branches[index].is_complete() {
            return Ok(BlockOutcome::Stored);
        }

        self.reorg(inner, index)
    }

    /// Execute the switch: revert to the fork point, apply the branch, and
    /// undo everything if any branch block is invalid.
    fn reorg(&self, inner: &mut ChainInner, index: usize) -> Result<BlockOutcome, ChainError> {
        let branch = inner.branches.swap_remove(index);
        let fork_height = branch.fork_height;
        let old_tip = Height(self.store.block_count().saturating_sub(1));

        info!(
            fork = fork_height.0,
            old_tip = old_tip.0,
            branch_len = branch.headers.len(),
            "reorganizing to a heavier branch"
        );

        // Keep the replaced blocks so the switch is reversible.
        let mut old_blocks = Vec::new();
        for height in (fork_height.0 + 1)..=old_tip.0 {
            old_blocks.push(Arc::new(self.store.block_at(Height(height))?));
        }

        self.rewind_to(inner, fork_height)?;

        // Apply the branch, block by block.
        let mut applied = 0usize;
        let mut failure = None;
        for header in branch.headers.iter() {
            let hash = header.hash();
            let body = branch
                .bodies
                .get(&hash)
                .expect("reorg only starts on complete branches")
                .clone();

            let height = Height(self.store.block_count());
            if let Err(error) = self.check_header_context(inner, header, height) {
                inner.blacklist.insert(hash);
                failure = Some(error);
                break;
            }
            inner.headers.push(header)?;
            inner
                .forks
                .update_at_boundary(&inner.headers, Height(height.0 + 1));
            match self.apply_next_block(inner, body) {
                Ok(_) => applied += 1,
                Err(error) => {
                    failure = Some(error);
                    break;
                }
            }
        }

        if let Some(error) = failure {
            // The branch died mid-apply: restore the original chain
            // wholesale.
            warn!(applied, "branch failed during reorg, restoring old chain");
            self.rewind_to(inner, fork_height)?;
            let replay_options = CheckOptions {
                verify_scripts: false,
            };
            for old_block in old_blocks {
                let height = Height(self.store.block_count());
                inner.headers.push(&old_block.header)?;
                inner
                    .forks
                    .update_at_boundary(&inner.headers, Height(height.0 + 1));
                let forks = inner.forks.active_set(height);
                check_and_apply(&old_block, height, &forks, &self.utxo, &replay_options)
                    .map_err(ChainError::Invalid)?;
                self.utxo.commit(height)?;
                self.store.append(height, &old_block)?;
            }
            return Err(error);
        }

        // The old blocks become a candidate branch of their own, and their
        // transactions go back toward the mempool.
        let mut returned_transactions = Vec::new();
        for old_block in old_blocks.iter() {
            for tx in old_block.transactions.iter().skip(1) {
                returned_transactions.push(tx.clone());
            }
        }
        if !old_blocks.is_empty() {
            inner.branches.push(Branch {
                fork_height,
                headers: old_blocks.iter().map(|b| b.header).collect(),
                bodies: old_blocks
                    .iter()
                    .map(|b| (b.hash(), b.clone()))
                    .collect(),
            });
        }

        let new_tip = Height(self.store.block_count().saturating_sub(1));
        metrics::counter!("chain.reorg.count", 1);
        Ok(BlockOutcome::Reorged {
            fork_height,
            old_tip,
            new_tip,
            returned_transactions,
        })
    }

    /// Revert all state above `height`: UTXO set, block files, header
    /// index, and fork activations.
    fn rewind_to(&self, inner: &mut ChainInner, height: Height) -> Result<(), ChainError> {
        self.utxo.revert(Height(height.0 + 1))?;
        self.store.revert_above(height)?;
        inner.headers.truncate_above(height);
        inner.forks.revert_above(height);
        let headers = &inner.headers;
        inner
            .pending_bodies
            .retain(|hash, _| headers.contains(hash));
        Ok(())
    }

    /// Flush the UTXO tables; call on shutdown.
    pub fn save(&self) -> Result<(), ChainError> {
        let (tip, _) = self.tip();
        self.utxo.save(tip)?;
        Ok(())
    }

    /// Forward a read failure's severity to callers that must halt on
    /// fatal corruption.
    pub fn is_fatal(error: &ChainError) -> bool {
        matches!(error, ChainError::State(state) if StateError::is_fatal(state))
    }
}

#[cfg(test)]
mod tests {
    use std::convert::TryFrom;
    use std::iter::FromIterator;

    use chrono::Duration;
    use tempdir::TempDir;

    use heron_chain::amount::Amount;
    use heron_chain::block::merkle;
    use heron_chain::keys::SecretKey;
    use heron_chain::parameters::genesis_block;
    use heron_chain::transaction::sighash::{signature_hash, SigHashCache, SigHashType};
    use heron_chain::transaction::LockTime;
    use heron_chain::transparent::{Input, OutPoint, Output, Script};
    use heron_chain::work::difficulty::PROOF_OF_WORK_LIMIT_BITS;

    use crate::block::subsidy::block_subsidy;
    use crate::error::BlockError;

    use super::*;

    fn test_chain(dir: &TempDir) -> Chain {
        let config = Config::new(dir.path(), Network::Mainnet);
        Chain::with_options(
            &config,
            ChainOptions {
                check_proof_of_work: false,
                verify_scripts: true,
            },
        )
        .expect("chain opens")
    }

    fn miner_key() -> SecretKey {
        SecretKey::from_slice(&[0x51; 32]).unwrap()
    }

    /// A pay-to-public-key lock script for the test miner.
    fn miner_lock_script() -> Script {
        let pubkey = miner_key().public_key().serialize();
        let mut bytes = vec![pubkey.len() as u8];
        bytes.extend_from_slice(&pubkey);
        bytes.push(0xac); // OP_CHECKSIG
        Script(bytes)
    }

    /// Build a block on `parent` whose coinbase pays the test miner,
    /// carrying `extra` transactions.
    fn make_block(
        parent_hash: block::Hash,
        parent_time: DateTime<Utc>,
        height: Height,
        extra: Vec<Arc<Transaction>>,
        salt: u8,
    ) -> Arc<Block> {
        let coinbase = Arc::new(Transaction::new(
            1,
            vec![Input::new_coinbase(height, &[salt])],
            vec![Output {
                value: block_subsidy(height),
                lock_script: miner_lock_script(),
            }],
            LockTime::unlocked(),
        ));

        let mut transactions = vec![coinbase];
        transactions.extend(extra);
        let root = merkle::Root::from_iter(transactions.iter().map(|tx| tx.hash()));

        let header = Header::new(
            4,
            parent_hash,
            root,
            parent_time + Duration::seconds(600),
            CompactDifficulty::new(PROOF_OF_WORK_LIMIT_BITS),
            0,
        );
        Arc::new(Block {
            header,
            transactions,
        })
    }

    /// Spend output 0 of `source` (a miner coinbase) back to the miner.
    fn spend_coinbase(source: &Transaction, fee: u64) -> Arc<Transaction> {
        let outpoint = OutPoint {
            hash: source.hash(),
            index: 0,
        };
        let send = source.outputs[0].value.satoshis() - fee;
        let mut tx = Transaction::new(
            1,
            vec![Input::PrevOut {
                outpoint,
                unlock_script: Script(Vec::new()),
                sequence: 0xffff_ffff,
            }],
            vec![Output {
                value: Amount::try_from(send).unwrap(),
                lock_script: miner_lock_script(),
            }],
            LockTime::unlocked(),
        );

        let lock = miner_lock_script();
        let digest = signature_hash(
            &tx,
            0,
            lock.as_bytes(),
            source.outputs[0].value,
            SigHashType::ALL,
            &mut SigHashCache::new(),
        )
        .unwrap();
        let mut element = miner_key().sign(&digest).serialize_der();
        element.push(SigHashType::ALL.to_byte());

        let mut unlock = vec![element.len() as u8];
        unlock.extend_from_slice(&element);
        tx.inputs[0] = Input::PrevOut {
            outpoint,
            unlock_script: Script(unlock),
            sequence: 0xffff_ffff,
        };
        Arc::new(tx)
    }

    #[test]
    fn opens_at_the_genesis_block() -> color_eyre::Result<()> {
        heron_test::init();

        let dir = TempDir::new("heron-chain")?;
        let chain = test_chain(&dir);

        let (height, hash) = chain.tip();
        assert_eq!(height, Height(0));
        assert_eq!(hash, heron_chain::parameters::genesis_hash(Network::Mainnet));
        assert_eq!(
            hex::encode(hash.0),
            "6fe28c0ab6f1b372c1a6a246ae63f74f931e8365e15a089c68d6190000000000",
            "internal byte order of the genesis hash"
        );

        // One unspent fifty-coin output, keyed by the coinbase txid.
        let genesis = genesis_block(Network::Mainnet);
        let coinbase = OutPoint {
            hash: genesis.transactions[0].hash(),
            index: 0,
        };
        assert!(chain.utxo().is_unspent(&coinbase));
        assert_eq!(chain.utxo().unspent_value(), 5_000_000_000);
        Ok(())
    }

    #[test]
    fn extends_and_spends_a_mature_coinbase() -> color_eyre::Result<()> {
        heron_test::init();

        let dir = TempDir::new("heron-chain")?;
        let chain = test_chain(&dir);

        // Mine heights 1..=101 so the height-1 coinbase matures.
        let mut parent_hash = chain.tip().1;
        let mut parent_time = genesis_block(Network::Mainnet).header.time;
        let mut first_coinbase = None;
        for height in 1..=101u32 {
            let block = make_block(parent_hash, parent_time, Height(height), vec![], 0);
            if height == 1 {
                first_coinbase = Some(block.transactions[0].clone());
            }
            parent_hash = block.hash();
            parent_time = block.header.time;
            match chain.add_block(block)? {
                BlockOutcome::Committed { height: at, .. } => assert_eq!(at, Height(height)),
                other => panic!("expected commit, got {:?}", other),
            }
        }

        // Height 102 spends it, with a real signature.
        let spend = spend_coinbase(first_coinbase.as_ref().unwrap(), 1000);
        let outpoint = spend.inputs[0].outpoint().unwrap();
        assert!(chain.utxo().is_unspent(&outpoint));

        let block = make_block(parent_hash, parent_time, Height(102), vec![spend.clone()], 0);
        match chain.add_block(block)? {
            BlockOutcome::Committed { height, stats } => {
                assert_eq!(height, Height(102));
                assert_eq!(stats.total_fees.satoshis(), 1000);
                assert_eq!(stats.input_count, 1);
                assert_eq!(stats.spent_age_total, 101);
            }
            other => panic!("expected commit, got {:?}", other),
        }
        assert!(!chain.utxo().is_unspent(&outpoint));
        assert!(chain.utxo().is_unspent(&OutPoint {
            hash: spend.hash(),
            index: 0,
        }));
        Ok(())
    }

    #[test]
    fn premature_coinbase_spends_are_invalid() -> color_eyre::Result<()> {
        heron_test::init();

        let dir = TempDir::new("heron-chain")?;
        let chain = test_chain(&dir);

        let block1 = make_block(
            chain.tip().1,
            genesis_block(Network::Mainnet).header.time,
            Height(1),
            vec![],
            0,
        );
        let coinbase1 = block1.transactions[0].clone();
        let parent_time = block1.header.time;
        let parent_hash = block1.hash();
        chain.add_block(block1)?;

        // Spending a height-1 coinbase at height 2 violates maturity.
        let premature = spend_coinbase(&coinbase1, 0);
        let block2 = make_block(parent_hash, parent_time, Height(2), vec![premature], 0);
        let bad_hash = block2.hash();
        let result = chain.add_block(block2);
        assert!(matches!(
            result,
            Err(ChainError::Invalid(BlockError::Transaction(
                crate::error::TransactionError::ImmatureCoinbaseSpend { .. }
            )))
        ));

        // The block is blacklisted and all state rolled back.
        assert!(chain.is_blacklisted(&bad_hash));
        assert_eq!(chain.tip().0, Height(1));
        assert!(chain
            .utxo()
            .is_unspent(&OutPoint {
                hash: coinbase1.hash(),
                index: 0
            }));
        Ok(())
    }

    #[test]
    fn reorgs_to_a_heavier_branch() -> color_eyre::Result<()> {
        heron_test::init();

        let dir = TempDir::new("heron-chain")?;
        let chain = test_chain(&dir);
        let genesis_hash = chain.tip().1;
        let genesis_time = genesis_block(Network::Mainnet).header.time;

        // Active chain: X1, X2.
        let x1 = make_block(genesis_hash, genesis_time, Height(1), vec![], 1);
        let x2 = make_block(x1.hash(), x1.header.time, Height(2), vec![], 1);
        chain.add_block(x1.clone())?;
        chain.add_block(x2.clone())?;
        assert_eq!(chain.tip().0, Height(2));

        // Competing branch from genesis: Y1, Y2, Y3 -- more accumulated
        // work at equal difficulty.
        let y1 = make_block(genesis_hash, genesis_time, Height(1), vec![], 2);
        let y2 = make_block(y1.hash(), y1.header.time, Height(2), vec![], 2);
        let y3 = make_block(y2.hash(), y2.header.time, Height(3), vec![], 2);

        let outcome = chain.add_headers(&[y1.header, y2.header, y3.header])?;
        assert_eq!(outcome.accepted, 3);

        assert!(matches!(chain.add_block(y1.clone())?, BlockOutcome::Stored));
        assert!(matches!(chain.add_block(y2.clone())?, BlockOutcome::Stored));
        match chain.add_block(y3.clone())? {
            BlockOutcome::Reorged {
                fork_height,
                old_tip,
                new_tip,
                ..
            } => {
                assert_eq!(fork_height, Height(0));
                assert_eq!(old_tip, Height(2));
                assert_eq!(new_tip, Height(3));
            }
            other => panic!("expected reorg, got {:?}", other),
        }

        // Files and UTXO follow the new branch.
        assert_eq!(chain.tip(), (Height(3), y3.hash()));
        assert_eq!(chain.store().hash_at(Height(1))?, y1.hash());
        assert!(chain
            .utxo()
            .contains_transaction(&y1.transactions[0].hash()));
        assert!(!chain
            .utxo()
            .contains_transaction(&x1.transactions[0].hash()));

        // The replaced blocks hang around as a candidate branch.
        assert!(chain.contains_header(&x1.hash()));
        Ok(())
    }

    #[test]
    fn retarget_violations_close_the_header_path() -> color_eyre::Result<()> {
        heron_test::init();

        let dir = TempDir::new("heron-chain")?;
        let chain = test_chain(&dir);

        // A header claiming easier-than-scheduled bits at height 1.
        let genesis = genesis_block(Network::Mainnet);
        let bogus = Header::new(
            4,
            chain.tip().1,
            merkle::Root([0; 32]),
            genesis.header.time + Duration::seconds(600),
            CompactDifficulty::new(0x1c00ffff),
            0,
        );

        let result = chain.add_headers(&[bogus]);
        assert!(matches!(
            result,
            Err(ChainError::Invalid(BlockError::WrongTargetBits { .. }))
        ));
        assert!(chain.is_blacklisted(&bogus.hash()));
        assert_eq!(chain.header_height(), Height(0));
        Ok(())
    }

    #[test]
    fn oversized_coinbase_claims_are_invalid() -> color_eyre::Result<()> {
        heron_test::init();

        let dir = TempDir::new("heron-chain")?;
        let chain = test_chain(&dir);

        let mut block = (*make_block(
            chain.tip().1,
            genesis_block(Network::Mainnet).header.time,
            Height(1),
            vec![],
            0,
        ))
        .clone();
        // Claim double the subsidy.
        let greedy = Transaction::new(
            1,
            vec![Input::new_coinbase(Height(1), &[0])],
            vec![Output {
                value: Amount::try_from(10_000_000_000u64).unwrap(),
                lock_script: miner_lock_script(),
            }],
            LockTime::unlocked(),
        );
        block.transactions[0] = Arc::new(greedy);
        block.header = Header::new(
            block.header.version,
            block.header.previous_block_hash,
            merkle::Root::from_iter(block.transactions.iter().map(|tx| tx.hash())),
            block.header.time,
            block.header.difficulty_threshold,
            block.header.nonce,
        );

        let result = chain.add_block(Arc::new(block));
        assert!(matches!(
            result,
            Err(ChainError::Invalid(BlockError::Subsidy(
                crate::error::SubsidyError::ExcessCoinbaseValue { .. }
            )))
        ));
        assert_eq!(chain.tip().0, Height(0));
        Ok(())
    }

    #[test]
    fn restart_replays_into_the_utxo_set() -> color_eyre::Result<()> {
        heron_test::init();

        let dir = TempDir::new("heron-chain")?;
        let config = Config::new(dir.path(), Network::Mainnet);
        let options = ChainOptions {
            check_proof_of_work: false,
            verify_scripts: true,
        };

        let tip_hash;
        {
            let chain = Chain::with_options(&config, options)?;
            let b1 = make_block(
                chain.tip().1,
                genesis_block(Network::Mainnet).header.time,
                Height(1),
                vec![],
                0,
            );
            let b2 = make_block(b1.hash(), b1.header.time, Height(2), vec![], 0);
            chain.add_block(b1)?;
            chain.add_block(b2.clone())?;
            tip_hash = b2.hash();
            // No save(): the tables on disk stay behind the block files.
        }

        let chain = Chain::with_options(&config, options)?;
        assert_eq!(chain.tip(), (Height(2), tip_hash));
        assert_eq!(chain.utxo().len(), 3, "genesis plus two replayed coinbases");
        Ok(())
    }
}
