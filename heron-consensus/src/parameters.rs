//! Consensus constants.

use heron_chain::amount::COIN;
use heron_chain::block::Height;

/// Blocks between subsidy halvings.
pub const HALVING_INTERVAL: Height = Height(210_000);

/// The subsidy of the genesis block, in satoshis: 50 coins.
pub const MAX_BLOCK_SUBSIDY: u64 = 50 * COIN;

/// A coinbase output may not be spent until this many blocks above its
/// creation height.
pub const COINBASE_MATURITY: u32 = 100;

/// The trailing-header window scanned for soft-fork version signals at
/// each retarget boundary.
pub const FORK_SIGNAL_WINDOW: usize = 1000;

/// Signals within the window needed to activate a soft fork.
pub const FORK_ACTIVATION_THRESHOLD: usize = 950;
