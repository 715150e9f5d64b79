//! Block difficulty targets, and the work they represent.
//!
//! Difficulty appears in three forms: the compact 32-bit `nBits` encoding
//! carried in block headers, the expanded 256-bit target a header hash must
//! not exceed, and the work value `2^256 / (target + 1)` whose running sum
//! selects the active chain.

use std::cmp::Ordering;
use std::iter::Sum;
use std::ops::{Add, AddAssign};
use std::{fmt, io};

use chrono::{DateTime, Utc};
use primitive_types::U256;
use serde::{Deserialize, Serialize};

use crate::{block, parameters::Network, BitcoinDeserialize, BitcoinSerialize, SerializationError};

/// The number of blocks between difficulty retargets.
pub const RETARGET_INTERVAL: u32 = 2016;

/// The intended time span of one retarget interval: two weeks, in seconds.
pub const POW_TARGET_TIMESPAN: i64 = 14 * 24 * 60 * 60;

/// The compact `nBits` encoding of the easiest allowed target on both
/// networks.
pub const PROOF_OF_WORK_LIMIT_BITS: u32 = 0x1d00ffff;

/// A difficulty target in the compact `nBits` floating-point encoding.
///
/// The high byte is a base-256 exponent, the low three bytes a mantissa.
/// Negative encodings (mantissa sign bit set) and zero mantissas never
/// expand to a valid target.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct CompactDifficulty(u32);

impl CompactDifficulty {
    pub fn new(bits: u32) -> CompactDifficulty {
        CompactDifficulty(bits)
    }

    /// The raw `nBits` value, as serialized in a header.
    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Expand to the 256-bit target, or `None` for invalid encodings.
    pub fn to_expanded(&self) -> Option<ExpandedDifficulty> {
        const SIGN_BIT: u32 = 0x0080_0000;

        let exponent = self.0 >> 24;
        let mantissa = self.0 & 0x007f_ffff;
        if mantissa == 0 || self.0 & SIGN_BIT != 0 {
            return None;
        }

        let target = if exponent <= 3 {
            U256::from(mantissa >> (8 * (3 - exponent)))
        } else {
            let shift = 8 * (exponent - 3);
            if shift > 255 - 24 {
                return None;
            }
            U256::from(mantissa) << shift
        };

        if target.is_zero() {
            None
        } else {
            Some(ExpandedDifficulty(target))
        }
    }
}

impl fmt::Debug for CompactDifficulty {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("CompactDifficulty")
            .field(&format_args!("{:#010x}", self.0))
            .finish()
    }
}

impl BitcoinSerialize for CompactDifficulty {
    fn bitcoin_serialize<W: io::Write>(&self, target: W) -> Result<(), io::Error> {
        self.0.bitcoin_serialize(target)
    }
}

impl BitcoinDeserialize for CompactDifficulty {
    fn bitcoin_deserialize<R: io::Read>(reader: R) -> Result<Self, SerializationError> {
        Ok(CompactDifficulty(u32::bitcoin_deserialize(reader)?))
    }
}

/// A fully expanded 256-bit difficulty target.
///
/// A header satisfies proof of work when its hash, read as a little-endian
/// 256-bit integer, is less than or equal to this value. Larger targets
/// represent *less* work.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd)]
pub struct ExpandedDifficulty(U256);

impl ExpandedDifficulty {
    /// The easiest target either network accepts.
    pub fn target_difficulty_limit(_network: Network) -> ExpandedDifficulty {
        CompactDifficulty(PROOF_OF_WORK_LIMIT_BITS)
            .to_expanded()
            .expect("the proof of work limit is a valid compact encoding")
    }

    /// Re-encode in the compact `nBits` form, rounding as the encoding does.
    pub fn to_compact(&self) -> CompactDifficulty {
        let mut size = (self.0.bits() + 7) / 8;
        let mut mantissa = if size <= 3 {
            self.0.low_u64() << (8 * (3 - size))
        } else {
            (self.0 >> (8 * (size - 3))).low_u64()
        };

        // The encoding reserves the mantissa's high bit for sign.
        if mantissa & 0x0080_0000 != 0 {
            mantissa >>= 8;
            size += 1;
        }

        CompactDifficulty(((size as u32) << 24) | (mantissa as u32 & 0x007f_ffff))
    }

    /// The work this target represents: `2^256 / (target + 1)`.
    pub fn to_work(&self) -> Work {
        // 2^256 / (x + 1) == ~x / (x + 1) + 1, avoiding 257-bit arithmetic.
        let divisor = self.0 + U256::one();
        Work((!self.0) / divisor + U256::one())
    }
}

impl fmt::Debug for ExpandedDifficulty {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut bytes = [0u8; 32];
        self.0.to_big_endian(&mut bytes);
        f.debug_tuple("ExpandedDifficulty")
            .field(&hex::encode(bytes))
            .finish()
    }
}

impl From<&block::Hash> for U256 {
    fn from(hash: &block::Hash) -> U256 {
        U256::from_little_endian(&hash.0)
    }
}

impl PartialEq<ExpandedDifficulty> for block::Hash {
    fn eq(&self, other: &ExpandedDifficulty) -> bool {
        U256::from(self) == other.0
    }
}

impl PartialOrd<ExpandedDifficulty> for block::Hash {
    fn partial_cmp(&self, other: &ExpandedDifficulty) -> Option<Ordering> {
        U256::from(self).partial_cmp(&other.0)
    }
}

impl PartialEq<block::Hash> for ExpandedDifficulty {
    fn eq(&self, other: &block::Hash) -> bool {
        other == self
    }
}

impl PartialOrd<block::Hash> for ExpandedDifficulty {
    fn partial_cmp(&self, other: &block::Hash) -> Option<Ordering> {
        other.partial_cmp(self).map(Ordering::reverse)
    }
}

/// A quantity of proof-of-work: a single header's, or a chain's running sum.
///
/// The chain with the largest accumulated `Work` is the active chain.
#[derive(Clone, Copy, Default, Eq, PartialEq, Ord, PartialOrd)]
pub struct Work(U256);

impl Work {
    pub fn zero() -> Work {
        Work(U256::zero())
    }
}

impl Add for Work {
    type Output = Work;

    fn add(self, rhs: Work) -> Work {
        Work(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for Work {
    fn add_assign(&mut self, rhs: Work) {
        *self = *self + rhs;
    }
}

impl Sum for Work {
    fn sum<I: Iterator<Item = Work>>(iter: I) -> Work {
        iter.fold(Work::zero(), Add::add)
    }
}

impl fmt::Debug for Work {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("Work")
            .field(&format_args!("{}", self.0))
            .finish()
    }
}

/// The retarget calculation, run every [`RETARGET_INTERVAL`] blocks.
///
/// `first_time`/`last_time` are the timestamps of the first and last headers
/// of the closing interval. Since both endpoints sit inside the interval,
/// the span covers 2015 inter-block gaps rather than 2016; this off-by-one
/// ships in every deployed implementation and is consensus-critical, so it
/// is preserved here.
pub fn retarget(
    current: CompactDifficulty,
    first_time: DateTime<Utc>,
    last_time: DateTime<Utc>,
    network: Network,
) -> CompactDifficulty {
    let mut timespan = last_time.timestamp() - first_time.timestamp();
    timespan = timespan.clamp(POW_TARGET_TIMESPAN / 4, POW_TARGET_TIMESPAN * 4);

    let current = match current.to_expanded() {
        Some(expanded) => expanded,
        None => return CompactDifficulty(PROOF_OF_WORK_LIMIT_BITS),
    };

    let adjusted = current
        .0
        .checked_mul(U256::from(timespan as u64))
        .map(|product| product / U256::from(POW_TARGET_TIMESPAN as u64))
        .unwrap_or_else(|| ExpandedDifficulty::target_difficulty_limit(network).0);

    let limit = ExpandedDifficulty::target_difficulty_limit(network).0;
    ExpandedDifficulty(adjusted.min(limit)).to_compact()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    /// The genesis target, in both encodings.
    fn limit() -> ExpandedDifficulty {
        ExpandedDifficulty::target_difficulty_limit(Network::Mainnet)
    }

    #[test]
    fn expand_pow_limit() {
        heron_test::init();

        let expanded = CompactDifficulty::new(PROOF_OF_WORK_LIMIT_BITS)
            .to_expanded()
            .expect("limit expands");
        // 0x00000000ffff0000...0000
        let expected = U256::from(0xffffu64) << (8 * 26);
        assert_eq!(expanded.0, expected);
        assert_eq!(
            expanded.to_compact().bits(),
            PROOF_OF_WORK_LIMIT_BITS,
            "compact -> expanded -> compact is stable at the limit"
        );
    }

    #[test]
    fn invalid_compact_encodings() {
        heron_test::init();

        // Zero mantissa, negative mantissa, and oversized exponents.
        assert!(CompactDifficulty::new(0x1d000000).to_expanded().is_none());
        assert!(CompactDifficulty::new(0x1d800001).to_expanded().is_none());
        assert!(CompactDifficulty::new(0xff123456).to_expanded().is_none());
    }

    #[test]
    fn work_of_limit_target() {
        heron_test::init();

        // 2^256 / (2^224ish + 1): the genesis target represents 2^32 /
        // (0xffff+1)-ish work; exact value is 0x100010001.
        let work = limit().to_work();
        assert_eq!(work.0, U256::from(0x0001_0001_0001u64));
    }

    #[test]
    fn retarget_clamps_at_four_times() {
        heron_test::init();

        let bits = CompactDifficulty::new(0x1c0a0b0c);
        let first = Utc.timestamp(1_000_000, 0);

        // A span of 20 weeks clamps to 8: the target quadruples.
        let slow = retarget(bits, first, Utc.timestamp(1_000_000 + 20 * 7 * 86_400, 0),
            Network::Mainnet);
        // A span of one day clamps to 3.5 days: the target quarters.
        let fast = retarget(bits, first, Utc.timestamp(1_000_000 + 86_400, 0), Network::Mainnet);

        let base = bits.to_expanded().unwrap().0;
        assert_eq!(slow.to_expanded().unwrap().0, base * U256::from(4u64));
        assert_eq!(fast.to_expanded().unwrap().0, base / U256::from(4u64));
    }

    #[test]
    fn retarget_never_exceeds_limit() {
        heron_test::init();

        let first = Utc.timestamp(1_000_000, 0);
        let last = Utc.timestamp(1_000_000 + 20 * 7 * 86_400, 0);
        let result = retarget(
            CompactDifficulty::new(PROOF_OF_WORK_LIMIT_BITS),
            first,
            last,
            Network::Mainnet,
        );
        assert_eq!(result.bits(), PROOF_OF_WORK_LIMIT_BITS);
    }

    #[test]
    fn hash_comparison_against_target() {
        heron_test::init();

        let easy = limit();
        let zero_hash = block::Hash([0; 32]);
        let max_hash = block::Hash([0xff; 32]);
        assert!(zero_hash < easy);
        assert!(max_hash > easy);
    }
}
