//! End-to-end interpreter tests: real keys, real signatures, both sighash
//! algorithms.

use std::convert::TryFrom;

use heron_chain::amount::Amount;
use heron_chain::block::Height;
use heron_chain::keys::{hash160, SecretKey};
use heron_chain::parameters::ForkSet;
use heron_chain::transaction::sighash::{signature_hash, SigHashCache, SigHashType};
use heron_chain::transaction::{LockTime, Transaction};
use heron_chain::transparent::{Input, OutPoint, Output, Script};

use crate::opcodes::*;
use crate::{verify, Context, ScriptError};

fn secret(fill: u8) -> SecretKey {
    SecretKey::from_slice(&[fill; 32]).unwrap()
}

fn spending_transaction(lock_time: LockTime, sequence: u32) -> Transaction {
    Transaction::new(
        2,
        vec![Input::PrevOut {
            outpoint: OutPoint {
                hash: heron_chain::transaction::Hash([0x77; 32]),
                index: 0,
            },
            unlock_script: Script(Vec::new()),
            sequence,
        }],
        vec![Output {
            value: Amount::try_from(4_999_000_000u64).unwrap(),
            lock_script: Script(vec![OP_1]),
        }],
        lock_time,
    )
}

/// Sign input 0 of `tx` against `lock_script`, returning the signature
/// element (DER || sighash byte).
fn sign_input(
    tx: &Transaction,
    lock_script: &Script,
    value: Amount,
    key: &SecretKey,
    ty: SigHashType,
) -> Vec<u8> {
    let digest = signature_hash(
        tx,
        0,
        lock_script.as_bytes(),
        value,
        ty,
        &mut SigHashCache::new(),
    )
    .unwrap();
    let mut element = key.sign(&digest).serialize_der();
    element.push(ty.to_byte());
    element
}

fn push(data: &[u8]) -> Vec<u8> {
    let mut script = vec![data.len() as u8];
    script.extend_from_slice(data);
    script
}

#[test]
fn pay_to_public_key_legacy_signature() {
    heron_test::init();

    let key = secret(0x21);
    let pubkey = key.public_key().serialize();

    let mut lock = push(&pubkey);
    lock.push(OP_CHECKSIG);
    let lock = Script(lock);

    let tx = spending_transaction(LockTime::unlocked(), 0xffff_ffff);
    let value = Amount::try_from(5_000_000_000u64).unwrap();
    let signature = sign_input(&tx, &lock, value, &key, SigHashType::ALL);

    let ctx = Context {
        transaction: &tx,
        input_index: 0,
        value,
        forks: ForkSet::none(),
    };
    let unlock = Script(push(&signature));
    assert_eq!(verify(&unlock, &lock, &ctx, &mut SigHashCache::new()), Ok(()));

    // The wrong key's signature is a clean false, which fails the spend.
    let forged = sign_input(&tx, &lock, value, &secret(0x22), SigHashType::ALL);
    let unlock = Script(push(&forged));
    assert_eq!(
        verify(&unlock, &lock, &ctx, &mut SigHashCache::new()),
        Err(ScriptError::EvalFalse)
    );
}

#[test]
fn pay_to_public_key_hash_with_replay_protection() {
    heron_test::init();

    let key = secret(0x31);
    let pubkey = key.public_key().serialize();

    let mut lock = vec![OP_DUP, OP_HASH160];
    lock.extend_from_slice(&push(&hash160(&pubkey)));
    lock.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
    let lock = Script(lock);

    let tx = spending_transaction(LockTime::unlocked(), 0xffff_ffff);
    let value = Amount::try_from(5_000_000_000u64).unwrap();
    let forks = ForkSet::all();
    assert!(forks.requires_fork_id());

    let ty = SigHashType::ALL.with_fork_id();
    let signature = sign_input(&tx, &lock, value, &key, ty);

    let mut unlock = push(&signature);
    unlock.extend_from_slice(&push(&pubkey));
    let unlock = Script(unlock);

    let ctx = Context {
        transaction: &tx,
        input_index: 0,
        value,
        forks,
    };
    assert_eq!(verify(&unlock, &lock, &ctx, &mut SigHashCache::new()), Ok(()));

    // A pre-fork signature (no fork-id bit) is rejected outright once the
    // fork requires replay protection.
    let legacy_signature = sign_input(&tx, &lock, value, &key, SigHashType::ALL);
    let mut unlock = push(&legacy_signature);
    unlock.extend_from_slice(&push(&pubkey));
    assert_eq!(
        verify(&Script(unlock), &lock, &ctx, &mut SigHashCache::new()),
        Err(ScriptError::BadSigHashType)
    );

    // And the signature does not verify if the committed value changes.
    let ctx_wrong_value = Context {
        transaction: &tx,
        input_index: 0,
        value: Amount::try_from(1u64).unwrap(),
        forks,
    };
    let mut unlock = push(&signature);
    unlock.extend_from_slice(&push(&pubkey));
    assert_eq!(
        verify(
            &Script(unlock),
            &lock,
            &ctx_wrong_value,
            &mut SigHashCache::new()
        ),
        Err(ScriptError::EvalFalse)
    );
}

#[test]
fn pay_to_script_hash_runs_the_redeem_script() {
    heron_test::init();

    let redeem = vec![OP_1];
    let mut lock = vec![OP_HASH160];
    lock.extend_from_slice(&push(&hash160(&redeem)));
    lock.push(OP_EQUAL);
    let lock = Script(lock);

    let tx = spending_transaction(LockTime::unlocked(), 0xffff_ffff);
    let ctx = Context {
        transaction: &tx,
        input_index: 0,
        value: Amount::zero(),
        forks: ForkSet::none(),
    };

    let unlock = Script(push(&redeem));
    assert_eq!(verify(&unlock, &lock, &ctx, &mut SigHashCache::new()), Ok(()));

    // A redeem script that leaves false fails the third stage.
    let false_redeem = vec![OP_0];
    let mut lock = vec![OP_HASH160];
    lock.extend_from_slice(&push(&hash160(&false_redeem)));
    lock.push(OP_EQUAL);
    assert_eq!(
        verify(
            &Script(push(&false_redeem)),
            &Script(lock),
            &ctx,
            &mut SigHashCache::new()
        ),
        Err(ScriptError::EvalFalse)
    );

    // Non-push unlock scripts cannot spend a script hash.
    let mut lock = vec![OP_HASH160];
    lock.extend_from_slice(&push(&hash160(&redeem)));
    lock.push(OP_EQUAL);
    let mut non_push = push(&redeem);
    non_push.push(OP_NOP);
    assert_eq!(
        verify(
            &Script(non_push),
            &Script(lock),
            &ctx,
            &mut SigHashCache::new()
        ),
        Err(ScriptError::NonPushUnlock)
    );
}

#[test]
fn two_of_three_multisig_consumes_the_dummy() {
    heron_test::init();

    let keys = [secret(0x41), secret(0x42), secret(0x43)];
    let pubkeys: Vec<[u8; 33]> = keys.iter().map(|key| key.public_key().serialize()).collect();

    let mut lock = vec![OP_1 + 1]; // OP_2
    for pubkey in pubkeys.iter() {
        lock.extend_from_slice(&push(pubkey));
    }
    lock.push(OP_1 + 2); // OP_3
    lock.push(OP_CHECKMULTISIG);
    let lock = Script(lock);

    let tx = spending_transaction(LockTime::unlocked(), 0xffff_ffff);
    let value = Amount::try_from(5_000_000_000u64).unwrap();

    let first = sign_input(&tx, &lock, value, &keys[0], SigHashType::ALL);
    let third = sign_input(&tx, &lock, value, &keys[2], SigHashType::ALL);

    // Dummy, then signatures in key order.
    let mut unlock = vec![OP_0];
    unlock.extend_from_slice(&push(&first));
    unlock.extend_from_slice(&push(&third));
    let unlock = Script(unlock);

    let ctx = Context {
        transaction: &tx,
        input_index: 0,
        value,
        forks: ForkSet::none(),
    };
    assert_eq!(verify(&unlock, &lock, &ctx, &mut SigHashCache::new()), Ok(()));

    // Signatures out of key order do not verify.
    let mut reversed = vec![OP_0];
    reversed.extend_from_slice(&push(&third));
    reversed.extend_from_slice(&push(&first));
    assert_eq!(
        verify(&Script(reversed), &lock, &ctx, &mut SigHashCache::new()),
        Err(ScriptError::EvalFalse)
    );

    // Without the dummy there is nothing left to pop.
    let mut missing_dummy = push(&first);
    missing_dummy.extend_from_slice(&push(&third));
    assert_eq!(
        verify(&Script(missing_dummy), &lock, &ctx, &mut SigHashCache::new()),
        Err(ScriptError::StackUnderflow)
    );
}

#[test]
fn check_lock_time_verify_thresholds() {
    heron_test::init();

    let mut forks = ForkSet::none();
    forks.check_lock_time_verify = true;

    // Lock script: require height 500, then clean up and succeed.
    let mut lock = push(&crate::num::encode(500));
    lock.extend_from_slice(&[OP_CHECKLOCKTIMEVERIFY, OP_DROP, OP_1]);
    let lock = Script(lock);
    let unlock = Script(Vec::new());

    // Transaction locked at height 600 with a non-final sequence: passes.
    let tx = spending_transaction(LockTime::Height(Height(600)), 0xffff_fffe);
    let ctx = Context {
        transaction: &tx,
        input_index: 0,
        value: Amount::zero(),
        forks,
    };
    assert_eq!(verify(&unlock, &lock, &ctx, &mut SigHashCache::new()), Ok(()));

    // Locked only to height 400: the requirement is unmet.
    let tx = spending_transaction(LockTime::Height(Height(400)), 0xffff_fffe);
    let ctx = Context {
        transaction: &tx,
        input_index: 0,
        value: Amount::zero(),
        forks,
    };
    assert_eq!(
        verify(&unlock, &lock, &ctx, &mut SigHashCache::new()),
        Err(ScriptError::LockTimeFailed)
    );

    // A final sequence voids the lock time, so the check must fail.
    let tx = spending_transaction(LockTime::Height(Height(600)), 0xffff_ffff);
    let ctx = Context {
        transaction: &tx,
        input_index: 0,
        value: Amount::zero(),
        forks,
    };
    assert_eq!(
        verify(&unlock, &lock, &ctx, &mut SigHashCache::new()),
        Err(ScriptError::LockTimeFailed)
    );

    // Before activation the opcode is a plain NOP.
    let ctx = Context {
        transaction: &tx,
        input_index: 0,
        value: Amount::zero(),
        forks: ForkSet::none(),
    };
    assert_eq!(verify(&unlock, &lock, &ctx, &mut SigHashCache::new()), Ok(()));
}

#[test]
fn strict_mode_rejects_non_minimal_pushes() {
    heron_test::init();

    // Pushing 0x01 via OP_PUSHDATA1 instead of a direct push.
    let sloppy = Script(vec![OP_PUSHDATA1, 0x01, 0x07]);
    let lock = Script(vec![OP_DROP, OP_1]);

    let tx = spending_transaction(LockTime::unlocked(), 0xffff_ffff);
    let mut forks = ForkSet::none();
    forks.strict_der = true;
    let ctx = Context {
        transaction: &tx,
        input_index: 0,
        value: Amount::zero(),
        forks,
    };
    assert_eq!(
        verify(&sloppy, &lock, &ctx, &mut SigHashCache::new()),
        Err(ScriptError::NonMinimalPush)
    );

    // The same script is fine before the strict rule.
    let ctx = Context {
        transaction: &tx,
        input_index: 0,
        value: Amount::zero(),
        forks: ForkSet::none(),
    };
    assert_eq!(verify(&sloppy, &lock, &ctx, &mut SigHashCache::new()), Ok(()));
}

#[test]
fn op_return_and_conditionals() {
    heron_test::init();

    let tx = spending_transaction(LockTime::unlocked(), 0xffff_ffff);
    let ctx = Context {
        transaction: &tx,
        input_index: 0,
        value: Amount::zero(),
        forks: ForkSet::none(),
    };

    assert_eq!(
        verify(
            &Script(Vec::new()),
            &Script(vec![OP_RETURN]),
            &ctx,
            &mut SigHashCache::new()
        ),
        Err(ScriptError::OpReturn)
    );

    // IF/ELSE/ENDIF routes execution; the untaken branch's OP_RETURN is
    // inert.
    let branchy = Script(vec![OP_1, OP_IF, OP_1, OP_ELSE, OP_RETURN, OP_ENDIF]);
    assert_eq!(
        verify(&Script(Vec::new()), &branchy, &ctx, &mut SigHashCache::new()),
        Ok(())
    );

    let unbalanced = Script(vec![OP_1, OP_IF, OP_1]);
    assert_eq!(
        verify(
            &Script(Vec::new()),
            &unbalanced,
            &ctx,
            &mut SigHashCache::new()
        ),
        Err(ScriptError::UnbalancedConditional)
    );
}
