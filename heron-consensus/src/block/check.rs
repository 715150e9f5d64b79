//! Consensus check functions.

use std::collections::HashSet;
use std::iter::FromIterator;

use chrono::{DateTime, Duration, Utc};

use heron_chain::block::{merkle, Block, Hash, Header, Height};
use heron_chain::parameters::{ForkSet, Network};
use heron_chain::transaction;
use heron_chain::work::difficulty::{CompactDifficulty, ExpandedDifficulty};

use crate::error::*;

/// Returns `Ok(())` if there is exactly one coinbase transaction in
/// `block`, and it is the first transaction.
pub fn coinbase_is_first(block: &Block) -> Result<(), BlockError> {
    let first = block
        .transactions
        .get(0)
        .ok_or(BlockError::NoTransactions)?;
    let mut rest = block.transactions.iter().skip(1);
    if !first.is_coinbase() {
        return Err(TransactionError::CoinbasePosition.into());
    }
    if rest.any(|tx| tx.contains_coinbase_input()) {
        return Err(TransactionError::CoinbaseInputFound.into());
    }
    Ok(())
}

/// Returns `Ok(())` if `hash` satisfies both the proof-of-work limit for
/// `network` and the header's own claimed target.
///
/// The comparisons are 256-bit integer comparisons; greater values
/// represent *less* work.
pub fn difficulty_is_valid(
    header: &Header,
    network: Network,
    height: Height,
    hash: &Hash,
) -> Result<(), BlockError> {
    let difficulty_threshold = header
        .difficulty_threshold
        .to_expanded()
        .ok_or(BlockError::InvalidDifficulty(height, *hash))?;

    if difficulty_threshold > ExpandedDifficulty::target_difficulty_limit(network) {
        return Err(BlockError::TargetDifficultyLimit(height, *hash));
    }
    if hash > &difficulty_threshold {
        return Err(BlockError::DifficultyFilter(height, *hash));
    }
    Ok(())
}

/// Returns `Ok(())` if the header carries exactly the target bits the
/// retarget schedule requires at `height`.
///
/// On testnet, a block that arrives more than twenty minutes after its
/// parent may fall back to the proof-of-work limit; that carve-out is the
/// caller's to apply when computing `expected`.
pub fn target_bits_are_valid(
    header: &Header,
    expected: CompactDifficulty,
    height: Height,
) -> Result<(), BlockError> {
    if header.difficulty_threshold != expected {
        return Err(BlockError::WrongTargetBits {
            height,
            expected: expected.bits(),
            actual: header.difficulty_threshold.bits(),
        });
    }
    Ok(())
}

/// Returns `Ok(())` if the header's version meets the minimum the active
/// fork set requires.
pub fn version_is_valid(
    header: &Header,
    forks: &ForkSet,
    height: Height,
) -> Result<(), BlockError> {
    let minimum = forks.min_block_version();
    if header.version < minimum {
        return Err(BlockError::VersionTooOld {
            height,
            version: header.version,
            minimum,
        });
    }
    Ok(())
}

/// Returns `Ok(())` if `header.time` is no more than two hours ahead of
/// the local clock `now`.
///
/// Non-deterministic by nature: a header rejected now may be accepted
/// later.
pub fn time_is_valid_at(header: &Header, now: DateTime<Utc>) -> Result<(), BlockError> {
    let cutoff = now
        .checked_add_signed(Duration::hours(2))
        .expect("two hours from now does not overflow");
    if header.time > cutoff {
        return Err(BlockError::TimeTooFarAhead);
    }
    Ok(())
}

/// Check merkle root validity against precomputed `transaction_hashes`.
pub fn merkle_root_validity(
    block: &Block,
    transaction_hashes: &[transaction::Hash],
) -> Result<(), BlockError> {
    let merkle_root = merkle::Root::from_iter(transaction_hashes.iter().cloned());

    if block.header.merkle_root != merkle_root {
        return Err(BlockError::BadMerkleRoot {
            actual: merkle_root,
            expected: block.header.merkle_root,
        });
    }

    // The tree construction is malleable: duplicating trailing
    // transactions can leave the root unchanged (CVE-2012-2459). Distinct
    // hashes close that off, and a duplicate would be a double-spend
    // anyway.
    if transaction_hashes.len() != transaction_hashes.iter().collect::<HashSet<_>>().len() {
        return Err(BlockError::DuplicateTransaction);
    }
    Ok(())
}

/// Returns `Ok(())` if the serialized block fits the active fork set's
/// size ceiling.
pub fn size_is_valid(block: &Block, forks: &ForkSet) -> Result<(), BlockError> {
    let size = block.serialized_size();
    let limit = forks.max_block_size();
    if size as u64 > limit {
        return Err(BlockError::TooLarge { size, limit });
    }
    Ok(())
}

/// Returns `Ok(())` if the coinbase data begins with `height`, where the
/// height-in-coinbase rule is active.
pub fn coinbase_height_is_valid(
    block: &Block,
    height: Height,
    forks: &ForkSet,
) -> Result<(), BlockError> {
    if !forks.height_in_coinbase {
        return Ok(());
    }
    match block.coinbase_height() {
        Some(reported) if reported == height => Ok(()),
        _ => Err(BlockError::MissingCoinbaseHeight),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use heron_chain::parameters::genesis_block;

    use super::*;

    #[test]
    fn genesis_passes_the_context_free_checks() {
        heron_test::init();

        let network = Network::Mainnet;
        let block = genesis_block(network);
        let hash = block.hash();

        coinbase_is_first(block).expect("genesis coinbase is first");
        difficulty_is_valid(&block.header, network, Height(0), &hash)
            .expect("genesis satisfies its own target");

        let hashes: Vec<_> = block.transactions.iter().map(|tx| tx.hash()).collect();
        merkle_root_validity(block, &hashes).expect("genesis merkle root matches");
        size_is_valid(block, &ForkSet::none()).expect("genesis is small");
    }

    #[test]
    fn duplicate_transactions_are_detected() {
        heron_test::init();

        let mut block = genesis_block(Network::Mainnet).clone();
        let tx = block.transactions[0].clone();
        block.transactions.push(Arc::clone(&tx));
        // Recompute the root so only the duplicate check can fail.
        let hashes: Vec<_> = block.transactions.iter().map(|tx| tx.hash()).collect();
        block.header = Header::new(
            block.header.version,
            block.header.previous_block_hash,
            merkle::Root::from_iter(hashes.iter().cloned()),
            block.header.time,
            block.header.difficulty_threshold,
            block.header.nonce,
        );

        assert!(matches!(
            merkle_root_validity(&block, &hashes),
            Err(BlockError::DuplicateTransaction)
        ));
    }

    #[test]
    fn version_minimums_follow_the_fork_set() {
        heron_test::init();

        let block = genesis_block(Network::Mainnet);
        let mut forks = ForkSet::none();
        version_is_valid(&block.header, &forks, Height(0)).expect("version 1 is fine at genesis");

        forks.strict_der = true;
        assert!(matches!(
            version_is_valid(&block.header, &forks, Height(0)),
            Err(BlockError::VersionTooOld { minimum: 3, .. })
        ));
    }
}
