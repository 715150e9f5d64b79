//! Transaction check functions.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use heron_chain::block::Height;
use heron_chain::transaction::{Transaction, LOCK_TIME_THRESHOLD, MAX_TX_SIZE};
use heron_chain::transparent::{Input, SEQUENCE_FINAL};
use heron_script::template;

use crate::error::TransactionError;

/// The policy bound on a relayed transaction's serialized size.
pub const MAX_STANDARD_TX_SIZE: usize = 100_000;

/// Returns `Ok(())` if the transaction has at least one input and one
/// output and fits the per-transaction size limit.
pub fn has_inputs_and_outputs(tx: &Transaction) -> Result<(), TransactionError> {
    if tx.inputs.is_empty() {
        return Err(TransactionError::NoInputs);
    }
    if tx.outputs.is_empty() {
        return Err(TransactionError::NoOutputs);
    }
    if tx.serialized_size() as u64 > MAX_TX_SIZE {
        return Err(TransactionError::Oversize);
    }
    Ok(())
}

/// Returns `Ok(())` if no two inputs name the same outpoint.
pub fn outpoints_are_unique(tx: &Transaction) -> Result<(), TransactionError> {
    let mut seen = HashSet::with_capacity(tx.inputs.len());
    for input in tx.inputs.iter() {
        if let Some(outpoint) = input.outpoint() {
            if !seen.insert(outpoint) {
                return Err(TransactionError::DuplicateOutPoint(outpoint));
            }
        }
    }
    Ok(())
}

/// Returns `Ok(())` if the transaction is final at `height`/`block_time`:
/// its lock time has passed, or every input opted out with a final
/// sequence.
pub fn is_final(
    tx: &Transaction,
    height: Height,
    block_time: DateTime<Utc>,
) -> Result<(), TransactionError> {
    let raw = tx.lock_time.raw();
    if raw == 0 {
        return Ok(());
    }
    let threshold = if raw < LOCK_TIME_THRESHOLD {
        height.0 as i64
    } else {
        block_time.timestamp()
    };
    if (raw as i64) < threshold {
        return Ok(());
    }
    if tx
        .inputs
        .iter()
        .all(|input| input.sequence() == SEQUENCE_FINAL)
    {
        return Ok(());
    }
    Err(TransactionError::LockTimeNotReached)
}

/// Returns `Ok(())` if the transaction meets relay policy: standard-sized,
/// standard lock script templates on every output, push-only unlock
/// scripts on every input.
///
/// Policy only. A block may carry transactions this function rejects.
pub fn is_standard(tx: &Transaction) -> Result<(), TransactionError> {
    if tx.serialized_size() > MAX_STANDARD_TX_SIZE {
        return Err(TransactionError::Oversize);
    }
    for output in tx.outputs.iter() {
        if !template::classify(&output.lock_script).is_standard() {
            return Err(TransactionError::NonStandard);
        }
    }
    for input in tx.inputs.iter() {
        if let Input::PrevOut { unlock_script, .. } = input {
            if !heron_script::is_push_only(unlock_script.as_bytes()) {
                return Err(TransactionError::NonStandard);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use heron_chain::transaction::LockTime;
    use heron_chain::transparent::{OutPoint, Script};

    use super::*;

    fn two_input_tx(sequence: u32, lock_time: LockTime) -> Transaction {
        let outpoint = OutPoint {
            hash: heron_chain::transaction::Hash([0x55; 32]),
            index: 0,
        };
        Transaction::new(
            1,
            vec![
                Input::PrevOut {
                    outpoint,
                    unlock_script: Script(vec![0x51]),
                    sequence,
                },
                Input::PrevOut {
                    outpoint,
                    unlock_script: Script(vec![0x51]),
                    sequence,
                },
            ],
            vec![heron_chain::transparent::Output {
                value: heron_chain::amount::Amount::zero(),
                lock_script: Script(vec![0x51]),
            }],
            lock_time,
        )
    }

    #[test]
    fn duplicate_outpoints_within_a_transaction() {
        heron_test::init();

        let tx = two_input_tx(SEQUENCE_FINAL, LockTime::unlocked());
        assert!(matches!(
            outpoints_are_unique(&tx),
            Err(TransactionError::DuplicateOutPoint(_))
        ));
    }

    #[test]
    fn finality_honors_heights_sequences_and_times() {
        heron_test::init();

        let locked = two_input_tx(0, LockTime::Height(Height(100)));
        let time = Utc.timestamp(1_600_000_000, 0);

        assert!(is_final(&locked, Height(101), time).is_ok());
        assert!(matches!(
            is_final(&locked, Height(100), time),
            Err(TransactionError::LockTimeNotReached)
        ));

        // Final sequences void the lock time.
        let opted_out = two_input_tx(SEQUENCE_FINAL, LockTime::Height(Height(100)));
        assert!(is_final(&opted_out, Height(50), time).is_ok());
    }
}
