//! Soft-fork rules and the snapshot of them that validation consults.

use serde::{Deserialize, Serialize};

/// The block size ceiling before the large-block fork, in bytes.
pub const BLOCK_SIZE_BASE: u64 = 1_000_000;

/// The block size ceiling once the large-block fork activates, in bytes.
pub const BLOCK_SIZE_LARGE: u64 = 8 * 1_000_000;

/// A consensus rule tightening activated by header version signaling.
///
/// Miners signal readiness by raising their block version; once enough of a
/// trailing window signals, the rule becomes mandatory and its signal
/// version becomes the minimum accepted block version.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum SoftFork {
    /// Coinbase data must begin with the block height, and version 1 blocks
    /// are no longer accepted.
    HeightInCoinbase,
    /// Signatures must be canonical DER.
    StrictDer,
    /// `OP_CHECKLOCKTIMEVERIFY` gains its meaning.
    CheckLockTimeVerify,
    /// `OP_CHECKSEQUENCEVERIFY` and sequence-based relative lock times gain
    /// their meaning.
    RelativeLockTime,
    /// The cash fork: signatures must use the replay-protected (fork-id)
    /// sighash, and the block size ceiling rises to [`BLOCK_SIZE_LARGE`].
    LargeBlocks,
}

impl SoftFork {
    /// Every rule, in activation-signal order.
    pub const ALL: [SoftFork; 5] = [
        SoftFork::HeightInCoinbase,
        SoftFork::StrictDer,
        SoftFork::CheckLockTimeVerify,
        SoftFork::RelativeLockTime,
        SoftFork::LargeBlocks,
    ];

    /// The block version miners use to signal support for this rule.
    ///
    /// Once the rule activates, this is also the minimum accepted version.
    pub fn signal_version(&self) -> i32 {
        match self {
            SoftFork::HeightInCoinbase => 2,
            SoftFork::StrictDer => 3,
            SoftFork::CheckLockTimeVerify => 4,
            SoftFork::RelativeLockTime => 5,
            SoftFork::LargeBlocks => 6,
        }
    }
}

/// The set of rules active at some height: the snapshot script and
/// transaction validation consult.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ForkSet {
    pub height_in_coinbase: bool,
    pub strict_der: bool,
    pub check_lock_time_verify: bool,
    pub relative_lock_time: bool,
    /// The large-block rule set: fork-id sighash plus the raised ceiling.
    pub large_blocks: bool,
}

impl ForkSet {
    /// No rules active, as at the genesis block.
    pub fn none() -> ForkSet {
        ForkSet::default()
    }

    /// Every rule active; what a node syncing the present-day chain runs
    /// under almost immediately.
    pub fn all() -> ForkSet {
        ForkSet {
            height_in_coinbase: true,
            strict_der: true,
            check_lock_time_verify: true,
            relative_lock_time: true,
            large_blocks: true,
        }
    }

    pub fn contains(&self, rule: SoftFork) -> bool {
        match rule {
            SoftFork::HeightInCoinbase => self.height_in_coinbase,
            SoftFork::StrictDer => self.strict_der,
            SoftFork::CheckLockTimeVerify => self.check_lock_time_verify,
            SoftFork::RelativeLockTime => self.relative_lock_time,
            SoftFork::LargeBlocks => self.large_blocks,
        }
    }

    pub fn insert(&mut self, rule: SoftFork) {
        match rule {
            SoftFork::HeightInCoinbase => self.height_in_coinbase = true,
            SoftFork::StrictDer => self.strict_der = true,
            SoftFork::CheckLockTimeVerify => self.check_lock_time_verify = true,
            SoftFork::RelativeLockTime => self.relative_lock_time = true,
            SoftFork::LargeBlocks => self.large_blocks = true,
        }
    }

    /// The minimum block version accepted under this rule set.
    pub fn min_block_version(&self) -> i32 {
        SoftFork::ALL
            .iter()
            .filter(|rule| self.contains(**rule))
            .map(|rule| rule.signal_version())
            .max()
            .unwrap_or(1)
    }

    /// The serialized block size ceiling under this rule set, in bytes.
    pub fn max_block_size(&self) -> u64 {
        if self.large_blocks {
            BLOCK_SIZE_LARGE
        } else {
            BLOCK_SIZE_BASE
        }
    }

    /// Whether signatures must use the replay-protected sighash algorithm.
    pub fn requires_fork_id(&self) -> bool {
        self.large_blocks
    }
}
