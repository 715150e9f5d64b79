//! Consensus error types.
//!
//! `BlockError` and `TransactionError` mean "invalid by consensus": the
//! item is blacklisted and the announcing peer penalized. `ChainError`
//! additionally distinguishes store failures, whose `Corrupt` form is the
//! only fatal kind.

use thiserror::Error;

use heron_chain::amount::AmountError;
use heron_chain::block::{Hash, Height};
use heron_chain::transparent::OutPoint;
use heron_script::ScriptError;
use heron_state::StateError;

#[derive(Error, Debug)]
pub enum BlockError {
    #[error("block has no transactions")]
    NoTransactions,
    #[error("invalid transaction in block: {0}")]
    Transaction(#[from] TransactionError),
    #[error("header {1:?} at {0:?} has an invalid difficulty encoding")]
    InvalidDifficulty(Height, Hash),
    #[error("header {1:?} at {0:?} claims a target above the proof-of-work limit")]
    TargetDifficultyLimit(Height, Hash),
    #[error("hash of header {1:?} at {0:?} does not satisfy its target")]
    DifficultyFilter(Height, Hash),
    #[error("header at {height:?} carries target bits {actual:#010x}, retarget requires {expected:#010x}")]
    WrongTargetBits {
        height: Height,
        expected: u32,
        actual: u32,
    },
    #[error("block version {version} at {height:?} is below the required minimum {minimum}")]
    VersionTooOld {
        height: Height,
        version: i32,
        minimum: i32,
    },
    #[error("merkle root mismatch: computed {actual:?}, header says {expected:?}")]
    BadMerkleRoot {
        actual: heron_chain::block::merkle::Root,
        expected: heron_chain::block::merkle::Root,
    },
    #[error("block contains a duplicate transaction")]
    DuplicateTransaction,
    #[error("block of {size} bytes exceeds the {limit} byte ceiling")]
    TooLarge { size: usize, limit: u64 },
    #[error("coinbase does not carry the block height where required")]
    MissingCoinbaseHeight,
    #[error("header time is too far in the future")]
    TimeTooFarAhead,
    #[error("invalid subsidy: {0}")]
    Subsidy(#[from] SubsidyError),
}

#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("the first transaction must be a coinbase")]
    CoinbasePosition,
    #[error("a non-first transaction has a coinbase input")]
    CoinbaseInputFound,
    #[error("transaction has no inputs")]
    NoInputs,
    #[error("transaction has no outputs")]
    NoOutputs,
    #[error("transaction is larger than the per-transaction limit")]
    Oversize,
    #[error("two inputs spend the same outpoint {0:?}")]
    DuplicateOutPoint(OutPoint),
    #[error("input refers to a missing or spent output {0:?}")]
    MissingOutput(OutPoint),
    #[error("coinbase output created at {created:?} spent at {spend:?}, before maturity")]
    ImmatureCoinbaseSpend { created: Height, spend: Height },
    #[error("transaction's lock time is not yet satisfied")]
    LockTimeNotReached,
    #[error("script rejected the spend: {0}")]
    Script(#[from] ScriptError),
    #[error("value arithmetic failed: {0}")]
    Value(#[from] AmountError),
    #[error("output total exceeds input total")]
    FeeUnderflow,
    #[error("lock script is not a standard template")]
    NonStandard,
}

#[derive(Error, Debug)]
pub enum SubsidyError {
    #[error("block has no coinbase transaction")]
    NoCoinbase,
    #[error("coinbase claims {claimed} satoshis but subsidy plus fees allow {allowed}")]
    ExcessCoinbaseValue { claimed: u64, allowed: u64 },
}

/// An error from the chain state machine.
#[derive(Error, Debug)]
pub enum ChainError {
    /// The block or header is invalid; blacklist it and penalize the peer.
    #[error("invalid block: {0}")]
    Invalid(#[from] BlockError),
    /// The store failed; fatal when `.0.is_fatal()`.
    #[error("state store failure: {0}")]
    State(#[from] StateError),
    /// The block's parent is not known yet.
    #[error("orphan: parent header is unknown")]
    OrphanHeader,
    /// The block hash is on the blacklist from an earlier failure.
    #[error("block was already found invalid")]
    Blacklisted,
}
