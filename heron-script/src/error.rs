use thiserror::Error;

/// The reasons a script can fail to authorize a spend.
///
/// These mark the spending transaction invalid; none of them are node
/// errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("script longer than the 10000 byte limit")]
    ScriptTooLarge,
    #[error("pushed element longer than the 520 byte limit")]
    PushTooLarge,
    #[error("script uses more than 201 non-push opcodes")]
    TooManyOps,
    #[error("stack grew past 1000 elements")]
    StackOverflow,
    #[error("operation needed more stack elements than were present")]
    StackUnderflow,
    #[error("script contains a disabled opcode")]
    DisabledOpcode,
    #[error("script contains an unknown opcode")]
    BadOpcode,
    #[error("push opcode ran past the end of the script")]
    TruncatedPush,
    #[error("push was not minimally encoded")]
    NonMinimalPush,
    #[error("OP_IF without matching OP_ENDIF")]
    UnbalancedConditional,
    #[error("OP_VERIFY failed")]
    VerifyFailed,
    #[error("OP_RETURN executed")]
    OpReturn,
    #[error("OP_EQUALVERIFY failed")]
    EqualVerifyFailed,
    #[error("OP_NUMEQUALVERIFY failed")]
    NumEqualVerifyFailed,
    #[error("numeric operand was not a valid script number")]
    InvalidNumber,
    #[error("numeric operand was negative where a count was expected")]
    NegativeCount,
    #[error("signature encoding was rejected")]
    BadSignature,
    #[error("public key encoding was rejected")]
    BadPublicKey,
    #[error("sighash type byte was rejected under the active forks")]
    BadSigHashType,
    #[error("signature check failed at OP_CHECKSIGVERIFY or OP_CHECKMULTISIGVERIFY")]
    CheckSigVerifyFailed,
    #[error("multisig key or signature count out of range")]
    MultisigCountOutOfRange,
    #[error("lock time check failed")]
    LockTimeFailed,
    #[error("sequence check failed")]
    SequenceFailed,
    #[error("pay-to-script-hash unlock script must be push-only")]
    NonPushUnlock,
    #[error("script finished with a false or empty stack top")]
    EvalFalse,
    #[error("signature hash could not be produced: {0}")]
    SigHash(#[from] heron_chain::transaction::sighash::SigHashError),
}
