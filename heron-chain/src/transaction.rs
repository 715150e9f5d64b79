//! Transactions and transaction-related structures.

mod hash;
mod lock_time;
mod serialize;
pub mod sighash;

use serde::{Deserialize, Serialize};

use crate::amount::{Amount, AmountError};
use crate::cached::Cached;
use crate::compactint::CompactInt;
use crate::transparent;

pub use hash::Hash;
pub use lock_time::{LockTime, LOCK_TIME_THRESHOLD};
pub use serialize::MAX_TX_SIZE;
pub use sighash::{SigHashCache, SigHashType};

/// A Bitcoin Cash transaction.
///
/// Identity is the sha256d of the canonical serialization, cached after
/// deserialization. A transaction is a *coinbase* iff its single input
/// carries the null outpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// The transaction version. Versions of 2 and above enable relative
    /// lock times.
    pub version: i32,
    /// The transaction inputs.
    pub inputs: Vec<transparent::Input>,
    /// The transaction outputs.
    pub outputs: Vec<transparent::Output>,
    /// Earliest block height or time this transaction may be mined at.
    pub lock_time: LockTime,
    hash: Cached<Hash>,
}

impl Transaction {
    pub fn new(
        version: i32,
        inputs: Vec<transparent::Input>,
        outputs: Vec<transparent::Output>,
        lock_time: LockTime,
    ) -> Transaction {
        Transaction {
            version,
            inputs,
            outputs,
            lock_time,
            hash: Cached::new(),
        }
    }

    /// Get the id of this transaction.
    pub fn hash(&self) -> Hash {
        if let Some(hash) = self.hash.value() {
            return hash;
        }
        Hash::from(self)
    }

    /// Returns `true` if this transaction is a coinbase transaction.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1
            && matches!(
                self.inputs.get(0),
                Some(transparent::Input::Coinbase { .. })
            )
    }

    /// Whether any input is a coinbase input, regardless of position.
    pub fn contains_coinbase_input(&self) -> bool {
        self.inputs
            .iter()
            .any(|input| matches!(input, transparent::Input::Coinbase { .. }))
    }

    /// The sum of the output values.
    pub fn output_value_sum(&self) -> Result<Amount, AmountError> {
        self.outputs.iter().map(|output| output.value).sum()
    }

    /// The serialized length of this transaction, in bytes.
    pub fn serialized_size(&self) -> usize {
        let mut size = 4 + CompactInt::size(self.inputs.len());
        for input in self.inputs.iter() {
            size += input.serialized_size();
        }
        size += CompactInt::size(self.outputs.len());
        for output in self.outputs.iter() {
            size += output.serialized_size();
        }
        size + 4
    }
}
