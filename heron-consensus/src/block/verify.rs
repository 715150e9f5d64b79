//! The per-block validation driver.
//!
//! Runs steps in the consensus-critical order: structure, merkle root,
//! pre-insertion of every output into the UTXO set (so intra-block spends
//! resolve), then per-transaction input checking across a worker pool the
//! size of the machine, then the coinbase value check. Workers pull
//! transactions from a shared index; the first failure aborts the rest.
//!
//! On failure the UTXO set has partial spends applied; the caller owns the
//! revert.

use rayon::prelude::*;

use heron_chain::amount::Amount;
use heron_chain::block::{Block, Height};
use heron_chain::parameters::ForkSet;
use heron_chain::transaction::{SigHashCache, Transaction};
use heron_chain::transparent::Input;
use heron_script::Context;
use heron_state::{StateError, UtxoSet};

use crate::block::{check, subsidy};
use crate::error::{BlockError, TransactionError};
use crate::parameters::COINBASE_MATURITY;
use crate::transaction::check as tx_check;

/// Validation switches.
#[derive(Clone, Copy, Debug)]
pub struct CheckOptions {
    /// Run script verification. Disabled when replaying blocks this node
    /// already validated (after a restart).
    pub verify_scripts: bool,
}

impl Default for CheckOptions {
    fn default() -> Self {
        CheckOptions {
            verify_scripts: true,
        }
    }
}

/// Aggregates accumulated while validating a block.
#[derive(Clone, Copy, Debug, Default)]
pub struct BlockStats {
    pub total_fees: Amount,
    pub input_count: usize,
    pub output_count: usize,
    /// Sum over spent outputs of (spend height - creation height).
    pub spent_age_total: u64,
    pub spent_age_samples: usize,
}

struct TxStats {
    fee: Amount,
    input_count: usize,
    spent_age_total: u64,
}

/// Validate `block` at `height` against `utxo`, applying its spends.
///
/// On success every output is inserted and every input's source marked
/// spent at `height`; the journal segment is still pending until the
/// caller commits. On failure the caller must revert `height`.
pub fn check_and_apply(
    block: &Block,
    height: Height,
    forks: &ForkSet,
    utxo: &UtxoSet,
    options: &CheckOptions,
) -> Result<BlockStats, BlockError> {
    // Structure.
    check::coinbase_is_first(block)?;
    check::size_is_valid(block, forks)?;
    check::coinbase_height_is_valid(block, height, forks)?;

    // Merkle commitment.
    let transaction_hashes: Vec<_> = block.transactions.iter().map(|tx| tx.hash()).collect();
    check::merkle_root_validity(block, &transaction_hashes)?;

    // Context-free per-transaction checks.
    for tx in block.transactions.iter().skip(1) {
        tx_check::has_inputs_and_outputs(tx)?;
        tx_check::outpoints_are_unique(tx)?;
        tx_check::is_final(tx, height, block.header.time)?;
    }

    // Outputs become visible before any input checking so payments within
    // the block resolve regardless of checking order.
    utxo.add(&block.transactions, height);

    // Input checking, fanned out over the worker pool.
    let per_transaction: Result<Vec<TxStats>, TransactionError> = block
        .transactions
        .par_iter()
        .enumerate()
        .skip(1)
        .map(|(_, tx)| check_transaction_inputs(tx, height, forks, utxo, options))
        .collect();
    let per_transaction = per_transaction?;

    let mut stats = BlockStats {
        output_count: block
            .transactions
            .iter()
            .map(|tx| tx.outputs.len())
            .sum(),
        ..BlockStats::default()
    };
    for tx_stats in per_transaction {
        stats.total_fees = stats
            .total_fees
            .checked_add(tx_stats.fee)
            .map_err(TransactionError::Value)?;
        stats.input_count += tx_stats.input_count;
        stats.spent_age_total += tx_stats.spent_age_total;
        stats.spent_age_samples += tx_stats.input_count;
    }

    // The coinbase may claim at most subsidy plus what the block collected.
    subsidy::subsidy_is_valid(block, height, stats.total_fees)?;

    metrics::counter!("consensus.block.validated", 1);
    Ok(stats)
}

/// Check one transaction's inputs: spend each source output, enforce
/// coinbase maturity, verify each script, and account the fee.
fn check_transaction_inputs(
    tx: &Transaction,
    height: Height,
    forks: &ForkSet,
    utxo: &UtxoSet,
    options: &CheckOptions,
) -> Result<TxStats, TransactionError> {
    let mut sighash_cache = SigHashCache::new();
    let mut input_value = Amount::zero();
    let mut spent_age_total = 0u64;

    for (input_index, input) in tx.inputs.iter().enumerate() {
        let (outpoint, unlock_script) = match input {
            Input::PrevOut {
                outpoint,
                unlock_script,
                ..
            } => (*outpoint, unlock_script),
            Input::Coinbase { .. } => return Err(TransactionError::CoinbaseInputFound),
        };

        let spent = utxo.spend(outpoint, height).map_err(|error| match error {
            StateError::AlreadySpent(outpoint) | StateError::MissingOutput(outpoint) => {
                TransactionError::MissingOutput(outpoint)
            }
            _ => TransactionError::MissingOutput(outpoint),
        })?;

        if spent.is_coinbase && height.0 < spent.created_height.0 + COINBASE_MATURITY {
            return Err(TransactionError::ImmatureCoinbaseSpend {
                created: spent.created_height,
                spend: height,
            });
        }

        input_value = input_value.checked_add(spent.output.value)?;
        spent_age_total += (height.0 - spent.created_height.0) as u64;

        if options.verify_scripts {
            let ctx = Context {
                transaction: tx,
                input_index,
                value: spent.output.value,
                forks: *forks,
            };
            heron_script::verify(
                unlock_script,
                &spent.output.lock_script,
                &ctx,
                &mut sighash_cache,
            )?;
        }
    }

    let output_value = tx.output_value_sum()?;
    let fee = input_value
        .checked_sub(output_value)
        .map_err(|_| TransactionError::FeeUnderflow)?;

    Ok(TxStats {
        fee,
        input_count: tx.inputs.len(),
        spent_age_total,
    })
}
