//! Monetary amounts, in satoshis.

use std::convert::TryFrom;
use std::fmt;
use std::iter::Sum;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{BitcoinDeserialize, BitcoinSerialize, SerializationError};

/// One bitcoin, in satoshis.
pub const COIN: u64 = 100_000_000;

/// The maximum number of satoshis that will ever exist, 21 million coins.
///
/// Used as an overflow bound: no valid output value, fee, or fee sum can
/// exceed it.
pub const MAX_MONEY: u64 = 21_000_000 * COIN;

/// A non-negative quantity of satoshis.
///
/// Fees and subsidies are represented as separate unsigned quantities, so the
/// arithmetic here is all checked-unsigned; there is no negative-fee
/// convention anywhere in this codebase.
#[derive(
    Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
pub struct Amount(u64);

impl Amount {
    pub const fn zero() -> Amount {
        Amount(0)
    }

    /// The quantity in satoshis.
    pub fn satoshis(&self) -> u64 {
        self.0
    }

    pub fn checked_add(self, rhs: Amount) -> Result<Amount, AmountError> {
        match self.0.checked_add(rhs.0) {
            Some(total) if total <= MAX_MONEY => Ok(Amount(total)),
            _ => Err(AmountError::Overflow),
        }
    }

    pub fn checked_sub(self, rhs: Amount) -> Result<Amount, AmountError> {
        self.0
            .checked_sub(rhs.0)
            .map(Amount)
            .ok_or(AmountError::Underflow)
    }
}

/// An invalid monetary amount or amount calculation.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmountError {
    /// The result exceeded [`MAX_MONEY`].
    #[error("amount above the 21 million coin supply cap")]
    Overflow,
    /// A subtraction would have gone negative.
    #[error("amount subtraction went negative")]
    Underflow,
}

impl TryFrom<u64> for Amount {
    type Error = AmountError;

    fn try_from(satoshis: u64) -> Result<Amount, AmountError> {
        if satoshis <= MAX_MONEY {
            Ok(Amount(satoshis))
        } else {
            Err(AmountError::Overflow)
        }
    }
}

impl TryFrom<i64> for Amount {
    type Error = AmountError;

    fn try_from(satoshis: i64) -> Result<Amount, AmountError> {
        if satoshis < 0 {
            return Err(AmountError::Underflow);
        }
        Amount::try_from(satoshis as u64)
    }
}

impl From<Amount> for u64 {
    fn from(amount: Amount) -> u64 {
        amount.0
    }
}

impl Sum<Amount> for Result<Amount, AmountError> {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Self {
        let mut total = Amount::zero();
        for amount in iter {
            total = total.checked_add(amount)?;
        }
        Ok(total)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{:08}", self.0 / COIN, self.0 % COIN)
    }
}

impl BitcoinSerialize for Amount {
    fn bitcoin_serialize<W: std::io::Write>(&self, target: W) -> Result<(), std::io::Error> {
        self.0.bitcoin_serialize(target)
    }
}

impl BitcoinDeserialize for Amount {
    fn bitcoin_deserialize<R: std::io::Read>(reader: R) -> Result<Self, SerializationError> {
        let satoshis = u64::bitcoin_deserialize(reader)?;
        Amount::try_from(satoshis)
            .map_err(|_| SerializationError::Parse("amount above the supply cap"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_stops_at_supply_cap() {
        heron_test::init();

        let almost = Amount::try_from(MAX_MONEY - 1).unwrap();
        let two = Amount::try_from(2u64).unwrap();
        assert_eq!(almost.checked_add(two), Err(AmountError::Overflow));

        let total: Result<Amount, _> = vec![almost, two].into_iter().sum();
        assert_eq!(total, Err(AmountError::Overflow));
    }

    #[test]
    fn display_in_coins() {
        assert_eq!(
            Amount::try_from(50 * COIN).unwrap().to_string(),
            "50.00000000"
        );
        assert_eq!(Amount::try_from(1u64).unwrap().to_string(), "0.00000001");
    }
}
