use std::io;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::block::Height;
use crate::serialization::{BitcoinDeserialize, BitcoinSerialize, SerializationError};

/// The raw value below which a lock time is a block height rather than a
/// Unix timestamp.
pub const LOCK_TIME_THRESHOLD: u32 = 500_000_000;

/// A transaction's lock time: the earliest block height or time it may be
/// mined at.
///
/// Raw values below 500 000 000 are block heights; everything else is a Unix
/// timestamp. A lock time is only enforced when at least one input has a
/// non-final sequence.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum LockTime {
    /// Unlocked at or after this block height.
    Height(Height),
    /// Unlocked at or after this time.
    Time(DateTime<Utc>),
}

impl LockTime {
    /// The zero lock time: enforceable nowhere, i.e. no lock.
    pub fn unlocked() -> LockTime {
        LockTime::Height(Height(0))
    }

    /// The raw u32 this lock time serializes to.
    pub fn raw(&self) -> u32 {
        match self {
            LockTime::Height(height) => height.0,
            LockTime::Time(time) => time.timestamp() as u32,
        }
    }
}

impl BitcoinSerialize for LockTime {
    fn bitcoin_serialize<W: io::Write>(&self, target: W) -> Result<(), io::Error> {
        self.raw().bitcoin_serialize(target)
    }
}

impl BitcoinDeserialize for LockTime {
    fn bitcoin_deserialize<R: io::Read>(reader: R) -> Result<Self, SerializationError> {
        let raw = u32::bitcoin_deserialize(reader)?;
        if raw < LOCK_TIME_THRESHOLD {
            Ok(LockTime::Height(Height(raw)))
        } else {
            Ok(LockTime::Time(Utc.timestamp(raw as i64, 0)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_splits_heights_from_times() {
        heron_test::init();

        let height = LockTime::bitcoin_deserialize(&(LOCK_TIME_THRESHOLD - 1).to_le_bytes()[..])
            .unwrap();
        assert_eq!(height, LockTime::Height(Height(LOCK_TIME_THRESHOLD - 1)));

        let time =
            LockTime::bitcoin_deserialize(&LOCK_TIME_THRESHOLD.to_le_bytes()[..]).unwrap();
        assert!(matches!(time, LockTime::Time(_)));
        assert_eq!(time.raw(), LOCK_TIME_THRESHOLD);
    }
}
