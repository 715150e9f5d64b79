//! Transaction inputs, outputs, and the outpoints that join them.

mod address;
mod script;
mod serialize;

use serde::{Deserialize, Serialize};

use crate::amount::Amount;
use crate::compactint::CompactInt;
use crate::{block, transaction};

pub use address::Address;
pub use script::Script;

/// The sequence value that disables all relative and absolute lock times.
pub const SEQUENCE_FINAL: u32 = 0xffff_ffff;

/// When set in a sequence, relative lock time is disabled for that input.
pub const SEQUENCE_LOCKTIME_DISABLE_FLAG: u32 = 1 << 31;

/// When set, a relative lock is measured in 512-second units rather than
/// blocks.
pub const SEQUENCE_LOCKTIME_TYPE_FLAG: u32 = 1 << 22;

/// The bits of a sequence that carry the relative lock value.
pub const SEQUENCE_LOCKTIME_MASK: u32 = 0x0000_ffff;

/// A reference to a particular output of a particular transaction.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize, Hash)]
pub struct OutPoint {
    /// The transaction holding the referenced output.
    pub hash: transaction::Hash,

    /// The index of the referenced output within that transaction; the
    /// first output is 0.
    pub index: u32,
}

impl OutPoint {
    #[inline]
    pub const fn len() -> usize {
        36
    }

    /// The outpoint coinbase inputs carry: an all-zero id and index
    /// `0xffffffff`.
    pub const fn null() -> OutPoint {
        OutPoint {
            hash: transaction::Hash([0; 32]),
            index: u32::MAX,
        }
    }

    pub fn is_null(&self) -> bool {
        self.index == u32::MAX && self.hash.0 == [0; 32]
    }
}

/// Arbitrary data carried by a coinbase input where other inputs carry an
/// unlocking script; includes the block height once the height-in-coinbase
/// rule is active.
#[derive(Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct CoinbaseData(pub(crate) Vec<u8>);

/// The consensus bound on coinbase data length.
pub const MAX_COINBASE_DATA_LEN: usize = 100;

impl CoinbaseData {
    pub fn serialized_size(&self) -> usize {
        CompactInt::size(self.0.len()) + self.0.len()
    }
}

impl AsRef<[u8]> for CoinbaseData {
    fn as_ref(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl std::fmt::Debug for CoinbaseData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CoinbaseData")
            .field(&hex::encode(&self.0))
            .finish()
    }
}

/// A transaction input.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Input {
    /// A spend of a previous transaction's output.
    PrevOut {
        /// The output being spent.
        outpoint: OutPoint,
        /// The script that authorizes spending `outpoint`.
        unlock_script: Script,
        /// The input's sequence number; values below `SEQUENCE_FINAL` make
        /// relative lock times enforceable.
        sequence: u32,
    },
    /// New coins created by the block reward.
    Coinbase {
        /// The block height parsed out of `data`, when present.
        height: Option<block::Height>,
        /// Miner-chosen data, including the serialized height on modern
        /// blocks.
        data: CoinbaseData,
        /// The sequence number.
        sequence: u32,
    },
}

impl Input {
    /// Build a coinbase input whose data begins with `height` in the
    /// serialized form the height-in-coinbase rule expects.
    pub fn new_coinbase(height: block::Height, extra_data: &[u8]) -> Input {
        let mut data = serialize::height_push(height);
        data.extend_from_slice(extra_data);
        data.truncate(MAX_COINBASE_DATA_LEN);
        Input::Coinbase {
            height: Some(height),
            data: CoinbaseData(data),
            sequence: SEQUENCE_FINAL,
        }
    }

    /// The outpoint this input spends; `None` for coinbase inputs.
    pub fn outpoint(&self) -> Option<OutPoint> {
        match self {
            Input::PrevOut { outpoint, .. } => Some(*outpoint),
            Input::Coinbase { .. } => None,
        }
    }

    pub fn sequence(&self) -> u32 {
        match self {
            Input::PrevOut { sequence, .. } | Input::Coinbase { sequence, .. } => *sequence,
        }
    }

    /// The unlocking script; `None` for coinbase inputs, whose "script" is
    /// free data.
    pub fn unlock_script(&self) -> Option<&Script> {
        match self {
            Input::PrevOut { unlock_script, .. } => Some(unlock_script),
            Input::Coinbase { .. } => None,
        }
    }

    /// The serialized length of this input, in bytes.
    pub fn serialized_size(&self) -> usize {
        match self {
            Input::PrevOut { unlock_script, .. } => {
                OutPoint::len() + unlock_script.serialized_size() + 4
            }
            Input::Coinbase { data, .. } => OutPoint::len() + data.serialized_size() + 4,
        }
    }
}

/// A transaction output: a value and the script that locks it.
///
/// The UTXO set the chain maintains is exactly the set of outputs that no
/// accepted transaction has spent.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize, Hash)]
pub struct Output {
    /// The output value, in satoshis.
    pub value: Amount,

    /// The lock script, defining the conditions under which this output can
    /// be spent.
    pub lock_script: Script,
}

impl Output {
    /// The serialized length of this output, in bytes.
    pub fn serialized_size(&self) -> usize {
        8 + self.lock_script.serialized_size()
    }
}
