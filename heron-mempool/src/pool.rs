//! The pool proper.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use tracing::{debug, trace};

use heron_chain::block::Height;
use heron_chain::parameters::ForkSet;
use heron_chain::transaction::{self, SigHashCache, Transaction};
use heron_chain::transparent::{Input, OutPoint, Output};
use heron_consensus::transaction::check as tx_check;
use heron_consensus::TransactionError;
use heron_script::Context;
use heron_state::UtxoSet;

use crate::cache::HashCache;
use crate::config::Config;
use crate::error::{AddError, HashStatus};

/// Capacity of each verdict cache.
const VERDICT_CACHE_SIZE: usize = 1024;

/// Recursion bound when promoting chains of pending orphans.
const PROMOTION_DEPTH: usize = 10;

/// Where an admitted transaction landed.
#[derive(Debug, PartialEq, Eq)]
pub enum Added {
    /// Fully validated; eligible for relay and block inclusion.
    Ready,
    /// Waiting for at least one parent to arrive.
    Pending,
}

struct PoolEntry {
    tx: Arc<Transaction>,
    fee: u64,
    size: usize,
    added: Instant,
}

impl PoolEntry {
    /// Satoshis per 1000 bytes.
    fn fee_rate(&self) -> u64 {
        self.fee.saturating_mul(1000) / self.size.max(1) as u64
    }
}

struct PendingEntry {
    tx: Arc<Transaction>,
    added: Instant,
}

#[derive(Default)]
struct Inner {
    ready: HashMap<transaction::Hash, PoolEntry>,
    pending: HashMap<transaction::Hash, PendingEntry>,
    validating: HashSet<transaction::Hash>,
    /// Which ready transaction spends each outpoint.
    by_outpoint: HashMap<OutPoint, transaction::Hash>,
    total_size: usize,
}

/// The memory pool. One reader/writer lock guards the sets; the per-peer
/// serialization locks have their own mutex so a peer writing a
/// transaction to the wire never races eviction.
pub struct Mempool {
    config: Config,
    inner: RwLock<Inner>,
    verdicts: Mutex<Verdicts>,
    requested: Mutex<HashMap<transaction::Hash, u8>>,
    node_locks: Mutex<HashMap<u64, HashSet<transaction::Hash>>>,
}

struct Verdicts {
    invalid: HashCache,
    low_fee: HashCache,
    non_standard: HashCache,
}

impl Mempool {
    pub fn new(config: Config) -> Mempool {
        Mempool {
            config,
            inner: RwLock::new(Inner::default()),
            verdicts: Mutex::new(Verdicts {
                invalid: HashCache::new(VERDICT_CACHE_SIZE),
                low_fee: HashCache::new(VERDICT_CACHE_SIZE),
                non_standard: HashCache::new(VERDICT_CACHE_SIZE),
            }),
            requested: Mutex::new(HashMap::new()),
            node_locks: Mutex::new(HashMap::new()),
        }
    }

    /// The pool's verdict on an announced hash, checked before a body is
    /// requested.
    pub fn hash_status(&self, utxo: &UtxoSet, hash: &transaction::Hash) -> HashStatus {
        {
            let verdicts = self.verdicts.lock().expect("poisoned lock");
            if verdicts.invalid.contains(hash) {
                return HashStatus::Invalid;
            }
            if verdicts.low_fee.contains(hash) {
                return HashStatus::LowFee;
            }
            if verdicts.non_standard.contains(hash) {
                return HashStatus::NonStandard;
            }
        }
        let inner = self.inner.read().expect("poisoned lock");
        if inner.ready.contains_key(hash)
            || inner.pending.contains_key(hash)
            || utxo.contains_transaction(hash)
        {
            return HashStatus::AlreadyHave;
        }
        HashStatus::Unknown
    }

    /// Admit `tx`.
    ///
    /// Fully resolved and valid transactions land in the ready set;
    /// transactions missing a parent land in pending. Everything else is
    /// refused with a cached verdict so re-announcements short-circuit.
    pub fn add(
        &self,
        tx: Arc<Transaction>,
        utxo: &UtxoSet,
        forks: &ForkSet,
        height: Height,
    ) -> Result<Added, AddError> {
        let txid = tx.hash();

        {
            let verdicts = self.verdicts.lock().expect("poisoned lock");
            if verdicts.invalid.contains(&txid) {
                return Err(AddError::KnownInvalid);
            }
        }

        // Duplicate and re-entrancy guard.
        {
            let mut inner = self.inner.write().expect("poisoned lock");
            if inner.ready.contains_key(&txid)
                || inner.pending.contains_key(&txid)
                || utxo.contains_transaction(&txid)
            {
                return Err(AddError::AlreadyHave);
            }
            if !inner.validating.insert(txid) {
                return Err(AddError::Validating);
            }
        }

        let result = self.admit(&tx, txid, utxo, forks, height);

        let mut inner = self.inner.write().expect("poisoned lock");
        inner.validating.remove(&txid);
        drop(inner);

        if matches!(result, Ok(Added::Ready)) {
            self.enforce_watermark();
            metrics::gauge!(
                "mempool.size.bytes",
                self.inner.read().expect("poisoned lock").total_size as _
            );
        }
        self.clear_request(&txid);
        result
    }

    fn admit(
        &self,
        tx: &Arc<Transaction>,
        txid: transaction::Hash,
        utxo: &UtxoSet,
        forks: &ForkSet,
        _height: Height,
    ) -> Result<Added, AddError> {
        // Shape and policy.
        if let Err(error) = tx_check::has_inputs_and_outputs(tx)
            .and_then(|_| tx_check::outpoints_are_unique(tx))
        {
            self.remember_invalid(txid);
            return Err(error.into());
        }
        if tx.is_coinbase() {
            self.remember_invalid(txid);
            return Err(AddError::Invalid(TransactionError::CoinbaseInputFound));
        }
        if tx_check::is_standard(tx).is_err() {
            self.verdicts
                .lock()
                .expect("poisoned lock")
                .non_standard
                .insert(txid);
            return Err(AddError::NonStandard);
        }

        // Resolve every input to an output, from the chain or the pool.
        let mut resolved: Vec<Output> = Vec::with_capacity(tx.inputs.len());
        let mut unseen = false;
        {
            let inner = self.inner.read().expect("poisoned lock");
            for input in tx.inputs.iter() {
                let outpoint = match input.outpoint() {
                    Some(outpoint) => outpoint,
                    None => {
                        self.remember_invalid(txid);
                        return Err(AddError::Invalid(TransactionError::CoinbaseInputFound));
                    }
                };
                if let Some(spender) = inner.by_outpoint.get(&outpoint) {
                    if *spender != txid {
                        return Err(AddError::DoubleSpend(outpoint));
                    }
                }
                let chain_output = if utxo.is_unspent(&outpoint) {
                    utxo.get(&outpoint)
                } else {
                    None
                };
                if let Some(output) = chain_output {
                    resolved.push(output);
                } else if let Some(parent) = inner.ready.get(&outpoint.hash) {
                    match parent.tx.outputs.get(outpoint.index as usize) {
                        Some(output) => resolved.push(output.clone()),
                        None => {
                            self.remember_invalid(txid);
                            return Err(AddError::Invalid(TransactionError::MissingOutput(
                                outpoint,
                            )));
                        }
                    }
                } else if utxo.contains_transaction(&outpoint.hash) {
                    // The source exists but the output is gone: spent on
                    // chain.
                    return Err(AddError::DoubleSpend(outpoint));
                } else {
                    unseen = true;
                    resolved.push(Output {
                        value: heron_chain::amount::Amount::zero(),
                        lock_script: Default::default(),
                    });
                }
            }
        }

        if unseen {
            // Valid shape, missing parents: park it.
            let mut inner = self.inner.write().expect("poisoned lock");
            inner.pending.insert(
                txid,
                PendingEntry {
                    tx: tx.clone(),
                    added: Instant::now(),
                },
            );
            trace!(%txid, "parked transaction pending its parents");
            return Ok(Added::Pending);
        }

        // Scripts and value.
        let mut sighash_cache = SigHashCache::new();
        let mut input_value: u64 = 0;
        for (input_index, (input, source)) in
            tx.inputs.iter().zip(resolved.iter()).enumerate()
        {
            let unlock_script = match input {
                Input::PrevOut { unlock_script, .. } => unlock_script,
                Input::Coinbase { .. } => unreachable!("coinbases were rejected above"),
            };
            let ctx = Context {
                transaction: tx,
                input_index,
                value: source.value,
                forks: *forks,
            };
            if let Err(error) =
                heron_script::verify(unlock_script, &source.lock_script, &ctx, &mut sighash_cache)
            {
                self.remember_invalid(txid);
                return Err(AddError::Invalid(error.into()));
            }
            input_value += source.value.satoshis();
        }

        let output_value: u64 = tx.outputs.iter().map(|o| o.value.satoshis()).sum();
        if output_value > input_value {
            self.remember_invalid(txid);
            return Err(AddError::Invalid(TransactionError::FeeUnderflow));
        }
        let fee = input_value - output_value;
        let size = tx.serialized_size();
        let fee_rate = fee.saturating_mul(1000) / size.max(1) as u64;

        let mut minimum = self.config.min_fee_rate;
        if self.inner.read().expect("poisoned lock").total_size > self.config.size_watermark {
            minimum = minimum.max(self.config.low_fee_rate);
        }
        if fee_rate < minimum {
            self.verdicts
                .lock()
                .expect("poisoned lock")
                .low_fee
                .insert(txid);
            return Err(AddError::LowFee);
        }

        // Re-check outpoints under the write lock, then insert.
        let mut inner = self.inner.write().expect("poisoned lock");
        for input in tx.inputs.iter() {
            let outpoint = input.outpoint().expect("checked above");
            if inner.by_outpoint.contains_key(&outpoint) {
                return Err(AddError::DoubleSpend(outpoint));
            }
        }
        for input in tx.inputs.iter() {
            let outpoint = input.outpoint().expect("checked above");
            inner.by_outpoint.insert(outpoint, txid);
        }
        inner.total_size += size;
        inner.ready.insert(
            txid,
            PoolEntry {
                tx: tx.clone(),
                fee,
                size,
                added: Instant::now(),
            },
        );
        debug!(%txid, fee, size, "admitted transaction");
        metrics::counter!("mempool.accepted", 1);
        Ok(Added::Ready)
    }

    fn remember_invalid(&self, txid: transaction::Hash) {
        self.verdicts
            .lock()
            .expect("poisoned lock")
            .invalid
            .insert(txid);
    }

    /// Re-validate pending transactions whose parents have arrived,
    /// recursively so chains of orphans settle, and expire the rest.
    pub fn promote_pending(&self, utxo: &UtxoSet, forks: &ForkSet, height: Height) {
        for _ in 0..PROMOTION_DEPTH {
            let candidates: Vec<Arc<Transaction>> = {
                let inner = self.inner.read().expect("poisoned lock");
                inner
                    .pending
                    .values()
                    .filter(|entry| {
                        entry.tx.inputs.iter().all(|input| match input.outpoint() {
                            Some(outpoint) => {
                                utxo.is_unspent(&outpoint)
                                    || inner.ready.contains_key(&outpoint.hash)
                            }
                            None => false,
                        })
                    })
                    .map(|entry| entry.tx.clone())
                    .collect()
            };
            if candidates.is_empty() {
                break;
            }

            let mut promoted = 0usize;
            for tx in candidates {
                let txid = tx.hash();
                self.inner
                    .write()
                    .expect("poisoned lock")
                    .pending
                    .remove(&txid);
                match self.add(tx, utxo, forks, height) {
                    Ok(Added::Ready) => promoted += 1,
                    Ok(Added::Pending) => {}
                    Err(_) => {}
                }
            }
            if promoted == 0 {
                break;
            }
        }

        if let Some(cutoff) = Instant::now().checked_sub(self.config.pending_expiry) {
            self.expire_pending_before(cutoff);
        }
    }

    /// Drop pending entries older than `cutoff`.
    pub fn expire_pending_before(&self, cutoff: Instant) {
        let mut inner = self.inner.write().expect("poisoned lock");
        inner.pending.retain(|_, entry| entry.added >= cutoff);
    }

    /// Drop ready entries older than `cutoff` (the 24 hour rule, in its
    /// testable form).
    pub fn expire_before(&self, cutoff: Instant) {
        let mut inner = self.inner.write().expect("poisoned lock");
        let expired: Vec<transaction::Hash> = inner
            .ready
            .iter()
            .filter(|(_, entry)| entry.added < cutoff)
            .map(|(txid, _)| *txid)
            .collect();
        for txid in expired {
            remove_entry(&mut inner, &txid);
        }
    }

    /// Periodic maintenance: expiry plus watermark eviction.
    pub fn maintain(&self) {
        if let Some(cutoff) = Instant::now().checked_sub(self.config.pool_expiry) {
            self.expire_before(cutoff);
        }
        self.enforce_watermark();
    }

    /// While above the watermark, evict the cheapest transaction nothing
    /// else depends on, oldest first among ties. Stops when only
    /// depended-upon (or peer-locked) transactions remain.
    fn enforce_watermark(&self) {
        loop {
            let mut inner = self.inner.write().expect("poisoned lock");
            if inner.total_size <= self.config.size_watermark {
                return;
            }

            let locked = self.locked_ids();
            let victim = inner
                .ready
                .iter()
                .filter(|(txid, entry)| {
                    !locked.contains(txid) && !has_dependent(&inner, entry)
                })
                .min_by_key(|(_, entry)| (entry.fee_rate(), entry.added))
                .map(|(txid, _)| *txid);

            match victim {
                Some(txid) => {
                    remove_entry(&mut inner, &txid);
                    debug!(%txid, "evicted under fee pressure");
                    metrics::counter!("mempool.evicted", 1);
                }
                None => return,
            }
        }
    }

    /// Atomically remove every listed id, returning those actually
    /// removed so the caller can announce them as confirmed.
    pub fn pull(&self, txids: &[transaction::Hash]) -> Vec<transaction::Hash> {
        let mut inner = self.inner.write().expect("poisoned lock");
        let mut removed = Vec::new();
        for txid in txids {
            if remove_entry(&mut inner, txid) {
                removed.push(*txid);
            }
        }
        removed
    }

    /// After a block applies, drop entries that now conflict: any input
    /// whose source the chain knows but no longer shows unspent was spent
    /// by the block.
    pub fn finalize(&self, utxo: &UtxoSet) {
        let mut inner = self.inner.write().expect("poisoned lock");
        let conflicted: Vec<transaction::Hash> = inner
            .ready
            .iter()
            .filter(|(_, entry)| {
                entry.tx.inputs.iter().any(|input| match input.outpoint() {
                    Some(outpoint) => {
                        utxo.contains_transaction(&outpoint.hash)
                            && !utxo.is_unspent(&outpoint)
                    }
                    None => false,
                })
            })
            .map(|(txid, _)| *txid)
            .collect();
        for txid in conflicted {
            remove_entry(&mut inner, &txid);
            debug!(%txid, "dropped transaction conflicting with a block");
        }
    }

    pub fn get(&self, txid: &transaction::Hash) -> Option<Arc<Transaction>> {
        let inner = self.inner.read().expect("poisoned lock");
        inner.ready.get(txid).map(|entry| entry.tx.clone())
    }

    pub fn contains(&self, txid: &transaction::Hash) -> bool {
        let inner = self.inner.read().expect("poisoned lock");
        inner.ready.contains_key(txid) || inner.pending.contains_key(txid)
    }

    /// Every ready id, for `mempool` message snapshots.
    pub fn ready_ids(&self) -> Vec<transaction::Hash> {
        let inner = self.inner.read().expect("poisoned lock");
        inner.ready.keys().copied().collect()
    }

    pub fn count(&self) -> usize {
        self.inner.read().expect("poisoned lock").ready.len()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.read().expect("poisoned lock").pending.len()
    }

    pub fn total_size(&self) -> usize {
        self.inner.read().expect("poisoned lock").total_size
    }

    // ---- request accounting -------------------------------------------

    /// Whether an announced id is worth requesting, and if so, count the
    /// attempt. After the configured number of failed fetches the id is
    /// dropped from consideration.
    pub fn note_requested(&self, txid: transaction::Hash) -> bool {
        let mut requested = self.requested.lock().expect("poisoned lock");
        let attempts = requested.entry(txid).or_insert(0);
        if *attempts >= self.config.max_request_attempts {
            return false;
        }
        *attempts += 1;
        true
    }

    /// Forget the request bookkeeping for an id that arrived (or was
    /// given up on).
    pub fn clear_request(&self, txid: &transaction::Hash) {
        self.requested.lock().expect("poisoned lock").remove(txid);
    }

    // ---- per-peer serialization locks ---------------------------------

    /// Pin `txids` while peer `node` serializes them to the wire; pinned
    /// entries are exempt from eviction.
    pub fn lock_for_node(&self, node: u64, txids: &[transaction::Hash]) {
        let mut locks = self.node_locks.lock().expect("poisoned lock");
        locks.entry(node).or_default().extend(txids.iter().copied());
    }

    /// Release everything pinned by `node`.
    pub fn release_node(&self, node: u64) {
        self.node_locks.lock().expect("poisoned lock").remove(&node);
    }

    fn locked_ids(&self) -> HashSet<transaction::Hash> {
        let locks = self.node_locks.lock().expect("poisoned lock");
        locks.values().flatten().copied().collect()
    }
}

/// Whether any other pool transaction spends one of `entry`'s outputs.
fn has_dependent(inner: &Inner, entry: &PoolEntry) -> bool {
    let txid = entry.tx.hash();
    (0..entry.tx.outputs.len() as u32).any(|index| {
        inner.by_outpoint.contains_key(&OutPoint { hash: txid, index })
    })
}

/// Remove `txid` from every set and index. Returns whether it was
/// present.
fn remove_entry(inner: &mut Inner, txid: &transaction::Hash) -> bool {
    if let Some(entry) = inner.ready.remove(txid) {
        inner.total_size = inner.total_size.saturating_sub(entry.size);
        for input in entry.tx.inputs.iter() {
            if let Some(outpoint) = input.outpoint() {
                if inner.by_outpoint.get(&outpoint) == Some(txid) {
                    inner.by_outpoint.remove(&outpoint);
                }
            }
        }
        return true;
    }
    inner.pending.remove(txid).is_some()
}

#[cfg(test)]
mod tests {
    use std::convert::TryFrom;
    use std::time::Duration;

    use tempdir::TempDir;

    use heron_chain::amount::Amount;
    use heron_chain::keys::SecretKey;
    use heron_chain::transaction::sighash::{signature_hash, SigHashType};
    use heron_chain::transaction::LockTime;
    use heron_chain::transparent::Script;
    use heron_state::Config as StateConfig;

    use super::*;

    fn wallet_key() -> SecretKey {
        SecretKey::from_slice(&[0x61; 32]).unwrap()
    }

    fn wallet_lock_script() -> Script {
        let pubkey = wallet_key().public_key().serialize();
        let mut bytes = vec![pubkey.len() as u8];
        bytes.extend_from_slice(&pubkey);
        bytes.push(0xac);
        Script(bytes)
    }

    /// A confirmed funding transaction with `outputs` equal-valued
    /// outputs, loaded into a fresh UTXO set at height 1.
    fn funded_utxo(dir: &TempDir, outputs: u32, each: u64) -> (UtxoSet, Arc<Transaction>) {
        let funding = Arc::new(Transaction::new(
            1,
            vec![Input::PrevOut {
                outpoint: OutPoint {
                    hash: transaction::Hash([0xf0; 32]),
                    index: 0,
                },
                unlock_script: Script(vec![0x51]),
                sequence: 0xffff_ffff,
            }],
            (0..outputs)
                .map(|_| Output {
                    value: Amount::try_from(each).unwrap(),
                    lock_script: wallet_lock_script(),
                })
                .collect(),
            LockTime::unlocked(),
        ));

        let config = StateConfig::new(dir.path(), heron_chain::parameters::Network::Mainnet);
        let (utxo, _) = UtxoSet::open(&config).unwrap();
        utxo.add(&[funding.clone()], Height(1));
        (utxo, funding)
    }

    /// Spend output `index` of `source` paying `send` satoshis (the rest
    /// is fee), signed for the wallet key.
    fn spend(source: &Transaction, index: u32, send: u64) -> Arc<Transaction> {
        let outpoint = OutPoint {
            hash: source.hash(),
            index,
        };
        let mut tx = Transaction::new(
            1,
            vec![Input::PrevOut {
                outpoint,
                unlock_script: Script(Vec::new()),
                sequence: 0xffff_ffff,
            }],
            vec![Output {
                value: Amount::try_from(send).unwrap(),
                lock_script: wallet_lock_script(),
            }],
            LockTime::unlocked(),
        );

        let lock = wallet_lock_script();
        let digest = signature_hash(
            &tx,
            0,
            lock.as_bytes(),
            source.outputs[index as usize].value,
            SigHashType::ALL,
            &mut SigHashCache::new(),
        )
        .unwrap();
        let mut element = wallet_key().sign(&digest).serialize_der();
        element.push(SigHashType::ALL.to_byte());
        let mut unlock = vec![element.len() as u8];
        unlock.extend_from_slice(&element);
        tx.inputs[0] = Input::PrevOut {
            outpoint,
            unlock_script: Script(unlock),
            sequence: 0xffff_ffff,
        };
        Arc::new(tx)
    }

    fn pool() -> Mempool {
        Mempool::new(Config {
            min_fee_rate: 1,
            ..Config::default()
        })
    }

    #[test]
    fn admits_a_signed_spend() -> color_eyre::Result<()> {
        heron_test::init();

        let dir = TempDir::new("heron-mempool")?;
        let (utxo, funding) = funded_utxo(&dir, 1, 100_000);
        let mempool = pool();

        let tx = spend(&funding, 0, 90_000);
        let txid = tx.hash();
        assert_eq!(
            mempool.hash_status(&utxo, &txid),
            HashStatus::Unknown
        );

        let added = mempool
            .add(tx.clone(), &utxo, &ForkSet::none(), Height(2))
            .expect("valid spend is admitted");
        assert_eq!(added, Added::Ready);
        assert_eq!(mempool.count(), 1);
        assert_eq!(mempool.hash_status(&utxo, &txid), HashStatus::AlreadyHave);

        // Re-adding is a duplicate.
        assert!(matches!(
            mempool.add(tx, &utxo, &ForkSet::none(), Height(2)),
            Err(AddError::AlreadyHave)
        ));
        Ok(())
    }

    #[test]
    fn rejects_a_double_spend_and_keeps_the_first() -> color_eyre::Result<()> {
        heron_test::init();

        let dir = TempDir::new("heron-mempool")?;
        let (utxo, funding) = funded_utxo(&dir, 1, 100_000);
        let mempool = pool();

        let first = spend(&funding, 0, 90_000);
        let second = spend(&funding, 0, 80_000); // same outpoint, different tx
        assert_ne!(first.hash(), second.hash());

        mempool
            .add(first.clone(), &utxo, &ForkSet::none(), Height(2))
            .unwrap();
        let result = mempool.add(second, &utxo, &ForkSet::none(), Height(2));
        assert!(matches!(result, Err(AddError::DoubleSpend(_))));

        assert!(mempool.contains(&first.hash()), "the incumbent stays");
        assert_eq!(mempool.count(), 1);
        Ok(())
    }

    #[test]
    fn orphans_park_and_promote_when_the_parent_arrives() -> color_eyre::Result<()> {
        heron_test::init();

        let dir = TempDir::new("heron-mempool")?;
        let (utxo, funding) = funded_utxo(&dir, 1, 100_000);
        let mempool = pool();

        let parent = spend(&funding, 0, 90_000);
        let child = spend(&parent, 0, 80_000);

        // Child first: its parent is nowhere yet.
        let added = mempool
            .add(child.clone(), &utxo, &ForkSet::none(), Height(2))
            .unwrap();
        assert_eq!(added, Added::Pending);
        assert_eq!(mempool.pending_count(), 1);

        mempool
            .add(parent.clone(), &utxo, &ForkSet::none(), Height(2))
            .unwrap();
        mempool.promote_pending(&utxo, &ForkSet::none(), Height(2));

        assert_eq!(mempool.pending_count(), 0);
        assert!(mempool.get(&child.hash()).is_some());
        assert_eq!(mempool.count(), 2);
        Ok(())
    }

    #[test]
    fn low_fees_are_refused_and_cached() -> color_eyre::Result<()> {
        heron_test::init();

        let dir = TempDir::new("heron-mempool")?;
        let (utxo, funding) = funded_utxo(&dir, 1, 100_000);
        let mempool = Mempool::new(Config {
            min_fee_rate: 1_000_000,
            ..Config::default()
        });

        let cheap = spend(&funding, 0, 99_999); // 1 satoshi fee
        let txid = cheap.hash();
        assert!(matches!(
            mempool.add(cheap, &utxo, &ForkSet::none(), Height(2)),
            Err(AddError::LowFee)
        ));
        assert_eq!(mempool.hash_status(&utxo, &txid), HashStatus::LowFee);
        Ok(())
    }

    #[test]
    fn pull_removes_confirmed_transactions() -> color_eyre::Result<()> {
        heron_test::init();

        let dir = TempDir::new("heron-mempool")?;
        let (utxo, funding) = funded_utxo(&dir, 2, 100_000);
        let mempool = pool();

        let a = spend(&funding, 0, 90_000);
        let b = spend(&funding, 1, 90_000);
        mempool.add(a.clone(), &utxo, &ForkSet::none(), Height(2)).unwrap();
        mempool.add(b.clone(), &utxo, &ForkSet::none(), Height(2)).unwrap();

        let stranger = transaction::Hash([0x0f; 32]);
        let removed = mempool.pull(&[a.hash(), stranger]);
        assert_eq!(removed, vec![a.hash()]);
        assert_eq!(mempool.count(), 1);
        assert!(mempool.contains(&b.hash()));

        // The freed outpoint is spendable in the pool again.
        let replacement = spend(&funding, 0, 85_000);
        mempool
            .add(replacement, &utxo, &ForkSet::none(), Height(2))
            .expect("outpoint released by pull");
        Ok(())
    }

    #[test]
    fn eviction_prefers_the_cheapest_childless_entry() -> color_eyre::Result<()> {
        heron_test::init();

        let dir = TempDir::new("heron-mempool")?;
        let (utxo, funding) = funded_utxo(&dir, 2, 100_000);

        let generous = spend(&funding, 0, 50_000);
        let stingy = spend(&funding, 1, 99_000);
        let tiny_watermark = generous.serialized_size() + 10;

        let mempool = Mempool::new(Config {
            min_fee_rate: 1,
            size_watermark: tiny_watermark,
            ..Config::default()
        });

        mempool
            .add(generous.clone(), &utxo, &ForkSet::none(), Height(2))
            .unwrap();
        mempool
            .add(stingy.clone(), &utxo, &ForkSet::none(), Height(2))
            .unwrap();

        // Over the watermark: the low-fee-rate entry goes.
        assert_eq!(mempool.count(), 1);
        assert!(mempool.contains(&generous.hash()));
        assert!(!mempool.contains(&stingy.hash()));
        Ok(())
    }

    #[test]
    fn finalize_drops_entries_conflicting_with_a_block() -> color_eyre::Result<()> {
        heron_test::init();

        let dir = TempDir::new("heron-mempool")?;
        let (utxo, funding) = funded_utxo(&dir, 1, 100_000);
        let mempool = pool();

        let ours = spend(&funding, 0, 90_000);
        mempool.add(ours.clone(), &utxo, &ForkSet::none(), Height(2)).unwrap();

        // A block spends the same outpoint with some other transaction.
        utxo.spend(
            OutPoint {
                hash: funding.hash(),
                index: 0,
            },
            Height(2),
        )
        .unwrap();
        mempool.finalize(&utxo);

        assert!(!mempool.contains(&ours.hash()));
        assert_eq!(mempool.count(), 0);
        Ok(())
    }

    #[test]
    fn expiry_and_request_accounting() -> color_eyre::Result<()> {
        heron_test::init();

        let dir = TempDir::new("heron-mempool")?;
        let (utxo, funding) = funded_utxo(&dir, 1, 100_000);
        let mempool = pool();

        let tx = spend(&funding, 0, 90_000);
        mempool.add(tx.clone(), &utxo, &ForkSet::none(), Height(2)).unwrap();

        // Nothing is older than the future, so everything expires.
        mempool.expire_before(Instant::now() + Duration::from_secs(1));
        assert_eq!(mempool.count(), 0);

        // Three attempts allowed, then the id is dropped.
        let wanted = transaction::Hash([0x77; 32]);
        assert!(mempool.note_requested(wanted));
        assert!(mempool.note_requested(wanted));
        assert!(mempool.note_requested(wanted));
        assert!(!mempool.note_requested(wanted));
        mempool.clear_request(&wanted);
        assert!(mempool.note_requested(wanted));
        Ok(())
    }
}
