use thiserror::Error;

use heron_chain::transparent::OutPoint;
use heron_consensus::TransactionError;

/// Why a transaction was refused admission.
#[derive(Error, Debug)]
pub enum AddError {
    #[error("transaction is already in the pool or on the chain")]
    AlreadyHave,
    #[error("transaction is already being validated")]
    Validating,
    #[error("transaction was previously judged invalid")]
    KnownInvalid,
    #[error("transaction failed validation: {0}")]
    Invalid(#[from] TransactionError),
    #[error("outpoint {0:?} is already spent by another pool transaction")]
    DoubleSpend(OutPoint),
    #[error("fee rate below the accepted minimum")]
    LowFee,
    #[error("transaction is not standard")]
    NonStandard,
}

/// The pool's verdict on an announced hash, consulted before requesting
/// the body.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum HashStatus {
    /// Never seen; worth requesting.
    Unknown,
    /// Already pooled or confirmed.
    AlreadyHave,
    /// Cached as invalid; do not request again.
    Invalid,
    /// Cached as underpaying.
    LowFee,
    /// Cached as non-standard.
    NonStandard,
}
