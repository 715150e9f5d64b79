//! Transaction serialization.

use std::io;

use crate::cached::Cached;
use crate::serialization::{BitcoinDeserialize, BitcoinSerialize, SerializationError};
use crate::transparent;

use super::{LockTime, Transaction};

/// The maximum serialized size of a single transaction, in bytes.
pub const MAX_TX_SIZE: u64 = 1_000_000;

impl BitcoinSerialize for Transaction {
    fn bitcoin_serialize<W: io::Write>(&self, mut target: W) -> Result<(), io::Error> {
        self.version.bitcoin_serialize(&mut target)?;
        self.inputs.bitcoin_serialize(&mut target)?;
        self.outputs.bitcoin_serialize(&mut target)?;
        self.lock_time.bitcoin_serialize(&mut target)
    }
}

/// Deserializes a transaction, calculating and caching its id.
impl BitcoinDeserialize for Transaction {
    fn bitcoin_deserialize<R: io::Read>(src: R) -> Result<Self, SerializationError> {
        // Nothing larger than MAX_TX_SIZE can be valid; stop reading there.
        let mut src = src.take(MAX_TX_SIZE);
        let mut tx = Transaction {
            version: i32::bitcoin_deserialize(&mut src)?,
            inputs: <Vec<transparent::Input>>::bitcoin_deserialize(&mut src)?,
            outputs: <Vec<transparent::Output>>::bitcoin_deserialize(&mut src)?,
            lock_time: LockTime::bitcoin_deserialize(&mut src)?,
            hash: Cached::new(),
        };
        let own_hash = tx.hash();
        tx.hash = Cached::from(own_hash);
        Ok(tx)
    }
}

#[cfg(test)]
mod tests {
    use std::convert::TryFrom;

    use super::*;
    use crate::amount::Amount;
    use crate::block::Height;
    use crate::transparent::{Input, OutPoint, Output, Script};

    fn sample_transaction() -> Transaction {
        Transaction::new(
            1,
            vec![Input::PrevOut {
                outpoint: OutPoint {
                    hash: crate::transaction::Hash([0xab; 32]),
                    index: 1,
                },
                unlock_script: Script(vec![0x51]),
                sequence: 0xfffffffe,
            }],
            vec![Output {
                value: Amount::try_from(4_999_950_000u64).unwrap(),
                lock_script: Script(vec![0x51, 0x87]),
            }],
            LockTime::Height(Height(100)),
        )
    }

    #[test]
    fn transaction_roundtrip_preserves_id() {
        heron_test::init();

        let tx = sample_transaction();
        let bytes = tx.bitcoin_serialize_to_vec().unwrap();
        let parsed = Transaction::bitcoin_deserialize(&bytes[..]).unwrap();

        assert_eq!(tx, parsed);
        assert_eq!(tx.hash(), parsed.hash());
        assert_eq!(bytes.len(), tx.serialized_size());
    }

    #[test]
    fn id_is_sha256d_of_the_encoding() {
        heron_test::init();

        let tx = sample_transaction();
        let bytes = tx.bitcoin_serialize_to_vec().unwrap();
        let digest = crate::sha256d::digest(&bytes);
        assert_eq!(tx.hash().0, digest);
    }
}
