//! The memory pool of unconfirmed transactions.
//!
//! Three id-keyed sets: *ready* (fully validated, every source output
//! visible), *pending* (valid shape, at least one source output not yet
//! seen), and *validating* (a short-lived guard against re-entrant checks
//! of the same id). An outpoint index across the ready set catches double
//! spends, and three bounded hash FIFOs short-circuit re-announcements of
//! transactions already judged invalid, underpaying, or non-standard.

mod cache;
mod config;
mod error;
mod pool;

pub use cache::HashCache;
pub use config::Config;
pub use error::{AddError, HashStatus};
pub use pool::{Added, Mempool};
