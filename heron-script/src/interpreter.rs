//! The script evaluation machine.

use heron_chain::amount::Amount;
use heron_chain::keys::{self, PublicKey, Signature};
use heron_chain::parameters::ForkSet;
use heron_chain::serialization::sha256d;
use heron_chain::transaction::sighash::{signature_hash, SigHashCache, SigHashType};
use heron_chain::transaction::Transaction;
use heron_chain::transparent::{
    Script, SEQUENCE_FINAL, SEQUENCE_LOCKTIME_DISABLE_FLAG, SEQUENCE_LOCKTIME_MASK,
    SEQUENCE_LOCKTIME_TYPE_FLAG,
};
use heron_chain::transaction::LOCK_TIME_THRESHOLD;
use ripemd160::{Digest as RipemdDigest, Ripemd160};
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::num;
use crate::opcodes::*;
use crate::template::{self, Template};
use crate::ScriptError;

/// The longest script the interpreter will evaluate.
const MAX_SCRIPT_SIZE: usize = 10_000;

/// The largest element a push may place on the stack.
const MAX_ELEMENT_SIZE: usize = 520;

/// The most non-push opcodes one script may execute.
const MAX_OPS_PER_SCRIPT: usize = 201;

/// The combined main+alt stack depth limit.
const MAX_STACK_SIZE: usize = 1000;

/// The most public keys one OP_CHECKMULTISIG may name.
const MAX_PUBKEYS_PER_MULTISIG: i64 = 20;

/// Everything a script evaluation needs to know about the spend it is
/// authorizing.
pub struct Context<'a> {
    /// The transaction being verified.
    pub transaction: &'a Transaction,
    /// The input being authorized.
    pub input_index: usize,
    /// The value of the output being spent; committed to by the
    /// replay-protected sighash.
    pub value: Amount,
    /// The fork rules active at the validation height.
    pub forks: ForkSet,
}

impl<'a> Context<'a> {
    fn sequence(&self) -> u32 {
        self.transaction
            .inputs
            .get(self.input_index)
            .map(|input| input.sequence())
            .unwrap_or(SEQUENCE_FINAL)
    }
}

/// Evaluate `unlock_script || lock_script` and decide whether the spend is
/// authorized.
///
/// For pay-to-script-hash lock scripts the unlock script must be push-only,
/// and the deserialized redeem script is evaluated as a third stage against
/// the stack the unlock script left behind.
pub fn verify(
    unlock_script: &Script,
    lock_script: &Script,
    ctx: &Context<'_>,
    cache: &mut SigHashCache,
) -> Result<(), ScriptError> {
    let pay_to_script_hash = matches!(
        template::classify(lock_script),
        Template::PayToScriptHash(_)
    );
    if pay_to_script_hash && !is_push_only(unlock_script.as_bytes()) {
        return Err(ScriptError::NonPushUnlock);
    }

    let mut saved_stack = Vec::new();
    {
        let mut machine = Machine::new(ctx, cache);
        machine.eval(unlock_script.as_bytes())?;
        if pay_to_script_hash {
            saved_stack = machine.stack.clone();
        }
        machine.eval(lock_script.as_bytes())?;
        machine.require_truthy_top()?;
    }

    if pay_to_script_hash {
        let redeem_script = saved_stack.pop().ok_or(ScriptError::StackUnderflow)?;
        let mut machine = Machine::with_stack(ctx, cache, saved_stack);
        machine.eval(&redeem_script)?;
        machine.require_truthy_top()?;
    }

    Ok(())
}

/// Whether `script` consists solely of push operations.
pub fn is_push_only(script: &[u8]) -> bool {
    let mut cursor = 0usize;
    while cursor < script.len() {
        let opcode = script[cursor];
        cursor += 1;
        if opcode > OP_16 {
            return false;
        }
        let len = match opcode {
            1..=75 => opcode as usize,
            OP_PUSHDATA1 => match script.get(cursor) {
                Some(len) => {
                    cursor += 1;
                    *len as usize
                }
                None => return false,
            },
            OP_PUSHDATA2 => match script.get(cursor..cursor + 2) {
                Some(bytes) => {
                    cursor += 2;
                    u16::from_le_bytes([bytes[0], bytes[1]]) as usize
                }
                None => return false,
            },
            OP_PUSHDATA4 => match script.get(cursor..cursor + 4) {
                Some(bytes) => {
                    cursor += 4;
                    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize
                }
                None => return false,
            },
            _ => 0,
        };
        if cursor + len > script.len() {
            return false;
        }
        cursor += len;
    }
    true
}

struct Machine<'a, 'c> {
    stack: Vec<Vec<u8>>,
    alt_stack: Vec<Vec<u8>>,
    ctx: &'a Context<'a>,
    cache: &'c mut SigHashCache,
    /// Minimal pushes and canonical signatures required.
    strict: bool,
}

impl<'a, 'c> Machine<'a, 'c> {
    fn new(ctx: &'a Context<'a>, cache: &'c mut SigHashCache) -> Machine<'a, 'c> {
        Machine::with_stack(ctx, cache, Vec::new())
    }

    fn with_stack(
        ctx: &'a Context<'a>,
        cache: &'c mut SigHashCache,
        stack: Vec<Vec<u8>>,
    ) -> Machine<'a, 'c> {
        Machine {
            stack,
            alt_stack: Vec::new(),
            strict: ctx.forks.strict_der,
            ctx,
            cache,
        }
    }

    fn require_truthy_top(&self) -> Result<(), ScriptError> {
        match self.stack.last() {
            Some(top) if num::cast_to_bool(top) => Ok(()),
            _ => Err(ScriptError::EvalFalse),
        }
    }

    fn push(&mut self, element: Vec<u8>) -> Result<(), ScriptError> {
        if self.stack.len() + self.alt_stack.len() >= MAX_STACK_SIZE {
            return Err(ScriptError::StackOverflow);
        }
        self.stack.push(element);
        Ok(())
    }

    fn push_bool(&mut self, value: bool) -> Result<(), ScriptError> {
        self.push(if value { vec![1] } else { Vec::new() })
    }

    fn push_num(&mut self, value: i64) -> Result<(), ScriptError> {
        self.push(num::encode(value))
    }

    fn pop(&mut self) -> Result<Vec<u8>, ScriptError> {
        self.stack.pop().ok_or(ScriptError::StackUnderflow)
    }

    fn pop_num(&mut self) -> Result<i64, ScriptError> {
        let bytes = self.pop()?;
        num::decode(&bytes, self.strict, 4)
    }

    fn peek(&self, depth: usize) -> Result<&[u8], ScriptError> {
        if depth >= self.stack.len() {
            return Err(ScriptError::StackUnderflow);
        }
        Ok(&self.stack[self.stack.len() - 1 - depth])
    }

    fn eval(&mut self, script: &[u8]) -> Result<(), ScriptError> {
        if script.len() > MAX_SCRIPT_SIZE {
            return Err(ScriptError::ScriptTooLarge);
        }

        let mut pc = 0usize;
        let mut op_count = 0usize;
        let mut code_separator = 0usize;
        // One entry per enclosing OP_IF; execution requires all true.
        let mut exec_stack: Vec<bool> = Vec::new();

        while pc < script.len() {
            let opcode = script[pc];
            pc += 1;
            let executing = exec_stack.iter().all(|branch| *branch);

            if is_disabled(opcode) {
                return Err(ScriptError::DisabledOpcode);
            }
            if opcode == OP_VERIF || opcode == OP_VERNOTIF {
                return Err(ScriptError::BadOpcode);
            }

            // Structural push handling, executed or not.
            if opcode <= OP_PUSHDATA4 {
                let push_len = match opcode {
                    OP_PUSHDATA1 => {
                        let len = *script.get(pc).ok_or(ScriptError::TruncatedPush)? as usize;
                        pc += 1;
                        len
                    }
                    OP_PUSHDATA2 => {
                        let bytes = script
                            .get(pc..pc + 2)
                            .ok_or(ScriptError::TruncatedPush)?;
                        pc += 2;
                        u16::from_le_bytes([bytes[0], bytes[1]]) as usize
                    }
                    OP_PUSHDATA4 => {
                        let bytes = script
                            .get(pc..pc + 4)
                            .ok_or(ScriptError::TruncatedPush)?;
                        pc += 4;
                        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize
                    }
                    direct => direct as usize,
                };
                if push_len > MAX_ELEMENT_SIZE {
                    return Err(ScriptError::PushTooLarge);
                }
                let data = script
                    .get(pc..pc + push_len)
                    .ok_or(ScriptError::TruncatedPush)?;
                pc += push_len;

                if executing {
                    if self.strict {
                        check_minimal_push(opcode, data)?;
                    }
                    self.push(data.to_vec())?;
                }
                continue;
            }

            if opcode == OP_1NEGATE {
                if executing {
                    self.push_num(-1)?;
                }
                continue;
            }
            if (OP_1..=OP_16).contains(&opcode) {
                if executing {
                    self.push_num((opcode - OP_1 + 1) as i64)?;
                }
                continue;
            }

            // Everything from here on counts toward the opcode budget,
            // executed or not.
            op_count += 1;
            if op_count > MAX_OPS_PER_SCRIPT {
                return Err(ScriptError::TooManyOps);
            }

            match opcode {
                OP_IF | OP_NOTIF => {
                    let mut branch = false;
                    if executing {
                        let condition = self.pop()?;
                        branch = num::cast_to_bool(&condition);
                        if opcode == OP_NOTIF {
                            branch = !branch;
                        }
                    }
                    exec_stack.push(branch);
                    continue;
                }
                OP_ELSE => {
                    let top = exec_stack
                        .last_mut()
                        .ok_or(ScriptError::UnbalancedConditional)?;
                    *top = !*top;
                    continue;
                }
                OP_ENDIF => {
                    exec_stack
                        .pop()
                        .ok_or(ScriptError::UnbalancedConditional)?;
                    continue;
                }
                _ => {}
            }

            if !executing {
                continue;
            }

            match opcode {
                OP_NOP => {}

                OP_VER | OP_RESERVED | OP_RESERVED1 | OP_RESERVED2 => {
                    return Err(ScriptError::BadOpcode)
                }

                OP_VERIFY => {
                    let top = self.pop()?;
                    if !num::cast_to_bool(&top) {
                        return Err(ScriptError::VerifyFailed);
                    }
                }
                OP_RETURN => return Err(ScriptError::OpReturn),

                // Stack manipulation.
                OP_TOALTSTACK => {
                    let element = self.pop()?;
                    self.alt_stack.push(element);
                }
                OP_FROMALTSTACK => {
                    let element = self
                        .alt_stack
                        .pop()
                        .ok_or(ScriptError::StackUnderflow)?;
                    self.push(element)?;
                }
                OP_2DROP => {
                    self.pop()?;
                    self.pop()?;
                }
                OP_2DUP => {
                    let first = self.peek(1)?.to_vec();
                    let second = self.peek(0)?.to_vec();
                    self.push(first)?;
                    self.push(second)?;
                }
                OP_3DUP => {
                    let first = self.peek(2)?.to_vec();
                    let second = self.peek(1)?.to_vec();
                    let third = self.peek(0)?.to_vec();
                    self.push(first)?;
                    self.push(second)?;
                    self.push(third)?;
                }
                OP_2OVER => {
                    let first = self.peek(3)?.to_vec();
                    let second = self.peek(2)?.to_vec();
                    self.push(first)?;
                    self.push(second)?;
                }
                OP_2ROT => {
                    if self.stack.len() < 6 {
                        return Err(ScriptError::StackUnderflow);
                    }
                    let len = self.stack.len();
                    let moved: Vec<_> = self.stack.drain(len - 6..len - 4).collect();
                    self.stack.extend(moved);
                }
                OP_2SWAP => {
                    if self.stack.len() < 4 {
                        return Err(ScriptError::StackUnderflow);
                    }
                    let len = self.stack.len();
                    self.stack.swap(len - 4, len - 2);
                    self.stack.swap(len - 3, len - 1);
                }
                OP_IFDUP => {
                    let top = self.peek(0)?.to_vec();
                    if num::cast_to_bool(&top) {
                        self.push(top)?;
                    }
                }
                OP_DEPTH => {
                    let depth = self.stack.len() as i64;
                    self.push_num(depth)?;
                }
                OP_DROP => {
                    self.pop()?;
                }
                OP_DUP => {
                    let top = self.peek(0)?.to_vec();
                    self.push(top)?;
                }
                OP_NIP => {
                    if self.stack.len() < 2 {
                        return Err(ScriptError::StackUnderflow);
                    }
                    let len = self.stack.len();
                    self.stack.remove(len - 2);
                }
                OP_OVER => {
                    let second = self.peek(1)?.to_vec();
                    self.push(second)?;
                }
                OP_PICK | OP_ROLL => {
                    let depth = self.pop_num()?;
                    if depth < 0 {
                        return Err(ScriptError::NegativeCount);
                    }
                    let depth = depth as usize;
                    if depth >= self.stack.len() {
                        return Err(ScriptError::StackUnderflow);
                    }
                    let position = self.stack.len() - 1 - depth;
                    let element = if opcode == OP_ROLL {
                        self.stack.remove(position)
                    } else {
                        self.stack[position].clone()
                    };
                    self.push(element)?;
                }
                OP_ROT => {
                    if self.stack.len() < 3 {
                        return Err(ScriptError::StackUnderflow);
                    }
                    let len = self.stack.len();
                    let element = self.stack.remove(len - 3);
                    self.stack.push(element);
                }
                OP_SWAP => {
                    if self.stack.len() < 2 {
                        return Err(ScriptError::StackUnderflow);
                    }
                    let len = self.stack.len();
                    self.stack.swap(len - 2, len - 1);
                }
                OP_TUCK => {
                    if self.stack.len() < 2 {
                        return Err(ScriptError::StackUnderflow);
                    }
                    let top = self.peek(0)?.to_vec();
                    let len = self.stack.len();
                    self.stack.insert(len - 2, top);
                }
                OP_SIZE => {
                    let size = self.peek(0)?.len() as i64;
                    self.push_num(size)?;
                }

                // Equality.
                OP_EQUAL | OP_EQUALVERIFY => {
                    let rhs = self.pop()?;
                    let lhs = self.pop()?;
                    let equal = lhs == rhs;
                    if opcode == OP_EQUALVERIFY {
                        if !equal {
                            return Err(ScriptError::EqualVerifyFailed);
                        }
                    } else {
                        self.push_bool(equal)?;
                    }
                }

                // Arithmetic. Operands are 4-byte script numbers; results
                // may grow to 5 bytes and still reenter as CLTV operands.
                OP_1ADD => {
                    let value = self.pop_num()?;
                    self.push_num(value + 1)?;
                }
                OP_1SUB => {
                    let value = self.pop_num()?;
                    self.push_num(value - 1)?;
                }
                OP_NEGATE => {
                    let value = self.pop_num()?;
                    self.push_num(-value)?;
                }
                OP_ABS => {
                    let value = self.pop_num()?;
                    self.push_num(value.abs())?;
                }
                OP_NOT => {
                    let value = self.pop_num()?;
                    self.push_bool(value == 0)?;
                }
                OP_0NOTEQUAL => {
                    let value = self.pop_num()?;
                    self.push_bool(value != 0)?;
                }
                OP_ADD => {
                    let rhs = self.pop_num()?;
                    let lhs = self.pop_num()?;
                    self.push_num(lhs + rhs)?;
                }
                OP_SUB => {
                    let rhs = self.pop_num()?;
                    let lhs = self.pop_num()?;
                    self.push_num(lhs - rhs)?;
                }
                OP_BOOLAND => {
                    let rhs = self.pop_num()?;
                    let lhs = self.pop_num()?;
                    self.push_bool(lhs != 0 && rhs != 0)?;
                }
                OP_BOOLOR => {
                    let rhs = self.pop_num()?;
                    let lhs = self.pop_num()?;
                    self.push_bool(lhs != 0 || rhs != 0)?;
                }
                OP_NUMEQUAL | OP_NUMEQUALVERIFY => {
                    let rhs = self.pop_num()?;
                    let lhs = self.pop_num()?;
                    let equal = lhs == rhs;
                    if opcode == OP_NUMEQUALVERIFY {
                        if !equal {
                            return Err(ScriptError::NumEqualVerifyFailed);
                        }
                    } else {
                        self.push_bool(equal)?;
                    }
                }
                OP_NUMNOTEQUAL => {
                    let rhs = self.pop_num()?;
                    let lhs = self.pop_num()?;
                    self.push_bool(lhs != rhs)?;
                }
                OP_LESSTHAN => {
                    let rhs = self.pop_num()?;
                    let lhs = self.pop_num()?;
                    self.push_bool(lhs < rhs)?;
                }
                OP_GREATERTHAN => {
                    let rhs = self.pop_num()?;
                    let lhs = self.pop_num()?;
                    self.push_bool(lhs > rhs)?;
                }
                OP_LESSTHANOREQUAL => {
                    let rhs = self.pop_num()?;
                    let lhs = self.pop_num()?;
                    self.push_bool(lhs <= rhs)?;
                }
                OP_GREATERTHANOREQUAL => {
                    let rhs = self.pop_num()?;
                    let lhs = self.pop_num()?;
                    self.push_bool(lhs >= rhs)?;
                }
                OP_MIN => {
                    let rhs = self.pop_num()?;
                    let lhs = self.pop_num()?;
                    self.push_num(lhs.min(rhs))?;
                }
                OP_MAX => {
                    let rhs = self.pop_num()?;
                    let lhs = self.pop_num()?;
                    self.push_num(lhs.max(rhs))?;
                }
                OP_WITHIN => {
                    let upper = self.pop_num()?;
                    let lower = self.pop_num()?;
                    let value = self.pop_num()?;
                    self.push_bool(lower <= value && value < upper)?;
                }

                // Digests.
                OP_RIPEMD160 => {
                    let data = self.pop()?;
                    self.push(Ripemd160::digest(&data).as_slice().to_vec())?;
                }
                OP_SHA1 => {
                    let data = self.pop()?;
                    self.push(Sha1::digest(&data).as_slice().to_vec())?;
                }
                OP_SHA256 => {
                    let data = self.pop()?;
                    self.push(Sha256::digest(&data).as_slice().to_vec())?;
                }
                OP_HASH160 => {
                    let data = self.pop()?;
                    self.push(keys::hash160(&data).to_vec())?;
                }
                OP_HASH256 => {
                    let data = self.pop()?;
                    self.push(sha256d::digest(&data).to_vec())?;
                }

                OP_CODESEPARATOR => {
                    code_separator = pc;
                }

                OP_CHECKSIG | OP_CHECKSIGVERIFY => {
                    let pubkey = self.pop()?;
                    let signature = self.pop()?;
                    let subscript = &script[code_separator..];
                    let authorized = self.check_signature(&signature, &pubkey, subscript)?;
                    if opcode == OP_CHECKSIGVERIFY {
                        if !authorized {
                            return Err(ScriptError::CheckSigVerifyFailed);
                        }
                    } else {
                        self.push_bool(authorized)?;
                    }
                }

                OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => {
                    let key_count = self.pop_num()?;
                    if !(0..=MAX_PUBKEYS_PER_MULTISIG).contains(&key_count) {
                        return Err(ScriptError::MultisigCountOutOfRange);
                    }
                    op_count += key_count as usize;
                    if op_count > MAX_OPS_PER_SCRIPT {
                        return Err(ScriptError::TooManyOps);
                    }
                    let mut pubkeys = Vec::with_capacity(key_count as usize);
                    for _ in 0..key_count {
                        pubkeys.push(self.pop()?);
                    }
                    pubkeys.reverse();

                    let sig_count = self.pop_num()?;
                    if !(0..=key_count).contains(&sig_count) {
                        return Err(ScriptError::MultisigCountOutOfRange);
                    }
                    let mut signatures = Vec::with_capacity(sig_count as usize);
                    for _ in 0..sig_count {
                        signatures.push(self.pop()?);
                    }
                    signatures.reverse();

                    // The historical extra pop. Removing it would split the
                    // chain, so every implementation keeps it.
                    self.pop()?;

                    let subscript = &script[code_separator..];
                    let mut authorized = true;
                    let mut key_cursor = 0usize;
                    for signature in signatures.iter() {
                        let mut matched = false;
                        while key_cursor < pubkeys.len() {
                            let pubkey = &pubkeys[key_cursor];
                            key_cursor += 1;
                            if self.check_signature(signature, pubkey, subscript)? {
                                matched = true;
                                break;
                            }
                        }
                        if !matched {
                            authorized = false;
                            break;
                        }
                    }

                    if opcode == OP_CHECKMULTISIGVERIFY {
                        if !authorized {
                            return Err(ScriptError::CheckSigVerifyFailed);
                        }
                    } else {
                        self.push_bool(authorized)?;
                    }
                }

                OP_CHECKLOCKTIMEVERIFY => self.check_lock_time()?,
                OP_CHECKSEQUENCEVERIFY => self.check_sequence()?,

                OP_NOP1 | 0xb3..=OP_NOP10 => {}

                _ => return Err(ScriptError::BadOpcode),
            }

            if self.stack.len() + self.alt_stack.len() > MAX_STACK_SIZE {
                return Err(ScriptError::StackOverflow);
            }
        }

        if !exec_stack.is_empty() {
            return Err(ScriptError::UnbalancedConditional);
        }
        Ok(())
    }

    /// The shared signature check behind OP_CHECKSIG and OP_CHECKMULTISIG.
    ///
    /// Encoding violations are hard failures under the strict-signature
    /// rule; otherwise an unparseable signature just evaluates to false,
    /// as old chain data requires.
    fn check_signature(
        &mut self,
        signature_bytes: &[u8],
        pubkey_bytes: &[u8],
        subscript: &[u8],
    ) -> Result<bool, ScriptError> {
        let (ty_byte, der) = match signature_bytes.split_last() {
            Some(split) => split,
            None => return Ok(false),
        };
        let ty = SigHashType::from_byte(*ty_byte);

        // The fork-id bit must match the active rules exactly: that is what
        // makes signatures replay-protected across the fork.
        if self.ctx.forks.requires_fork_id() != ty.has_fork_id() {
            return Err(ScriptError::BadSigHashType);
        }
        if self.strict && !ty.is_defined() {
            return Err(ScriptError::BadSigHashType);
        }

        let signature = match Signature::from_der(der, self.strict) {
            Ok(signature) => signature,
            Err(_) if self.strict => return Err(ScriptError::BadSignature),
            Err(_) => return Ok(false),
        };
        let pubkey = match PublicKey::from_slice(pubkey_bytes) {
            Ok(pubkey) => pubkey,
            Err(_) if self.strict => return Err(ScriptError::BadPublicKey),
            Err(_) => return Ok(false),
        };

        let digest = signature_hash(
            self.ctx.transaction,
            self.ctx.input_index,
            subscript,
            self.ctx.value,
            ty,
            self.cache,
        )?;

        Ok(pubkey.verify(&digest, &signature).is_ok())
    }

    fn check_lock_time(&mut self) -> Result<(), ScriptError> {
        if !self.ctx.forks.check_lock_time_verify {
            return Ok(());
        }

        let operand = self.peek(0)?.to_vec();
        let required = num::decode(&operand, self.strict, 5)?;
        if required < 0 {
            return Err(ScriptError::LockTimeFailed);
        }

        let tx_lock = self.ctx.transaction.lock_time.raw() as i64;
        let threshold = LOCK_TIME_THRESHOLD as i64;
        // Heights only compare against heights, timestamps against
        // timestamps.
        if (required < threshold) != (tx_lock < threshold) {
            return Err(ScriptError::LockTimeFailed);
        }
        if required > tx_lock {
            return Err(ScriptError::LockTimeFailed);
        }
        // A final sequence makes the transaction's lock time void, which
        // would void this check with it.
        if self.ctx.sequence() == SEQUENCE_FINAL {
            return Err(ScriptError::LockTimeFailed);
        }
        Ok(())
    }

    fn check_sequence(&mut self) -> Result<(), ScriptError> {
        if !self.ctx.forks.relative_lock_time {
            return Ok(());
        }

        let operand = self.peek(0)?.to_vec();
        let required = num::decode(&operand, self.strict, 5)?;
        if required < 0 {
            return Err(ScriptError::SequenceFailed);
        }
        // With the disable bit set in the operand, the check is a no-op.
        if required & (SEQUENCE_LOCKTIME_DISABLE_FLAG as i64) != 0 {
            return Ok(());
        }

        if self.ctx.transaction.version < 2 {
            return Err(ScriptError::SequenceFailed);
        }
        let sequence = self.ctx.sequence();
        if sequence & SEQUENCE_LOCKTIME_DISABLE_FLAG != 0 {
            return Err(ScriptError::SequenceFailed);
        }

        let mask = SEQUENCE_LOCKTIME_TYPE_FLAG | SEQUENCE_LOCKTIME_MASK;
        let required_masked = required as u32 & mask;
        let sequence_masked = sequence & mask;
        if (required_masked & SEQUENCE_LOCKTIME_TYPE_FLAG)
            != (sequence_masked & SEQUENCE_LOCKTIME_TYPE_FLAG)
        {
            return Err(ScriptError::SequenceFailed);
        }
        if (required_masked & SEQUENCE_LOCKTIME_MASK) > (sequence_masked & SEQUENCE_LOCKTIME_MASK)
        {
            return Err(ScriptError::SequenceFailed);
        }
        Ok(())
    }
}

/// Reject pushes that should have used a shorter opcode.
fn check_minimal_push(opcode: u8, data: &[u8]) -> Result<(), ScriptError> {
    let minimal = match data.len() {
        0 => opcode == OP_0,
        1 if data[0] >= 1 && data[0] <= 16 => false, // should be OP_1..=OP_16
        1 if data[0] == 0x81 => false,               // should be OP_1NEGATE
        len if len <= 75 => opcode == len as u8,
        len if len <= 255 => opcode == OP_PUSHDATA1,
        len if len <= 65535 => opcode == OP_PUSHDATA2,
        _ => opcode == OP_PUSHDATA4,
    };
    if minimal {
        Ok(())
    } else {
        Err(ScriptError::NonMinimalPush)
    }
}
