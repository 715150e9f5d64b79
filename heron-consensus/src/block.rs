//! Block-level consensus checks and the validation driver.

pub mod check;
pub mod subsidy;
pub mod verify;

pub use verify::{check_and_apply, BlockStats, CheckOptions};
