use std::io;

use displaydoc::Display;
use thiserror::Error;

use heron_chain::block::Height;
use heron_chain::transparent::OutPoint;
use heron_chain::SerializationError;

/// An error from the state stores.
///
/// `Io` failures are transient and may be retried once by readers;
/// `Corrupt` is fatal and halts chain progression. Everything else marks
/// the offending item or call invalid without wider damage.
#[derive(Display, Error, Debug)]
pub enum StateError {
    /// disk error: {0}
    Io(#[from] io::Error),
    /// stored data failed to parse: {0}
    Serialization(#[from] SerializationError),
    /// store is corrupt beyond repair: {0}
    Corrupt(&'static str),
    /// output {0:?} is already spent
    AlreadySpent(OutPoint),
    /// output {0:?} is not in the UTXO set
    MissingOutput(OutPoint),
    /// block appended at height {actual:?} but the store expects {expected:?}
    HeightMismatch {
        /// The next height the store will accept.
        expected: Height,
        /// The height the caller supplied.
        actual: Height,
    },
    /// no block stored at height {0:?}
    MissingBlock(Height),
    /// header does not extend the index tip
    HeaderDoesNotConnect,
    /// header difficulty field does not expand to a valid target
    InvalidDifficulty,
}

impl StateError {
    /// Whether this error must halt chain progression.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StateError::Corrupt(_))
    }
}
