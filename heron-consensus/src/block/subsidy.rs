//! Block subsidy: the new coins a coinbase may create.

use std::convert::TryFrom;

use heron_chain::amount::Amount;
use heron_chain::block::{Block, Height};

use crate::error::SubsidyError;
use crate::parameters::{HALVING_INTERVAL, MAX_BLOCK_SUBSIDY};

/// The subsidy at `height`: 50 coins, halving every 210 000 blocks, gone
/// after the 64th halving.
pub fn block_subsidy(height: Height) -> Amount {
    let halvings = height.0 / HALVING_INTERVAL.0;
    if halvings >= 64 {
        return Amount::zero();
    }
    Amount::try_from(MAX_BLOCK_SUBSIDY >> halvings as u64)
        .expect("the genesis subsidy is within the supply cap")
}

/// Returns `Ok(())` if the coinbase's total output value stays within
/// subsidy plus the block's collected fees.
///
/// Both quantities are unsigned; a coinbase claiming less than it could is
/// fine (the difference is burned).
pub fn subsidy_is_valid(
    block: &Block,
    height: Height,
    total_fees: Amount,
) -> Result<(), SubsidyError> {
    let coinbase = block.transactions.get(0).ok_or(SubsidyError::NoCoinbase)?;
    if !coinbase.is_coinbase() {
        return Err(SubsidyError::NoCoinbase);
    }

    let claimed = coinbase
        .output_value_sum()
        .map_err(|_| SubsidyError::ExcessCoinbaseValue {
            claimed: u64::MAX,
            allowed: block_subsidy(height).satoshis() + total_fees.satoshis(),
        })?;
    let allowed = block_subsidy(height)
        .checked_add(total_fees)
        .map_err(|_| SubsidyError::ExcessCoinbaseValue {
            claimed: claimed.satoshis(),
            allowed: u64::MAX,
        })?;

    if claimed > allowed {
        return Err(SubsidyError::ExcessCoinbaseValue {
            claimed: claimed.satoshis(),
            allowed: allowed.satoshis(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subsidy_halves_on_schedule() {
        heron_test::init();

        assert_eq!(block_subsidy(Height(0)).satoshis(), 5_000_000_000);
        assert_eq!(block_subsidy(Height(209_999)).satoshis(), 5_000_000_000);
        assert_eq!(block_subsidy(Height(210_000)).satoshis(), 2_500_000_000);
        assert_eq!(
            block_subsidy(Height(HALVING_INTERVAL.0 * 2)).satoshis(),
            1_250_000_000
        );

        // After the 32nd halving a single satoshi remains; after the 33rd,
        // nothing.
        assert_eq!(block_subsidy(Height(HALVING_INTERVAL.0 * 32)).satoshis(), 1);
        assert_eq!(block_subsidy(Height(HALVING_INTERVAL.0 * 33)).satoshis(), 0);
        assert_eq!(block_subsidy(Height(HALVING_INTERVAL.0 * 64)).satoshis(), 0);
    }
}
