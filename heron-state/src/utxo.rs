//! The unspent transaction output set.
//!
//! Entries are keyed by transaction id and bucketed by the id's 16-bit
//! prefix; buckets group into 256 lock shards, always acquired in ascending
//! shard order on multi-shard paths. Every spend appends a journal record
//! `(shard, old height, new height, txid, output index)` for its block
//! height; [`UtxoSet::commit`] makes that height's records durable before
//! the chain advances its tip, and [`UtxoSet::revert`] replays them
//! backwards to restore the exact prior state.

mod journal;

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, RwLock};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::{debug, info};

use heron_chain::block::Height;
use heron_chain::transaction::{self, Transaction};
use heron_chain::transparent::{OutPoint, Output};
use heron_chain::{BitcoinDeserialize, BitcoinSerialize};

use crate::{Config, Result, StateError};

use journal::JournalRecord;

/// The number of lock shards; each covers 256 of the 65 536 id-prefix
/// buckets.
const SHARD_COUNT: usize = 256;

/// The spent-height sentinel meaning "not spent".
const UNSPENT: u32 = u32::MAX;

const TABLE_MAGIC: &[u8; 8] = b"NCUTXO01";

/// One transaction's outputs and their spent heights.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Entry {
    created_height: u32,
    /// Whether the creating transaction was a coinbase; its outputs are
    /// subject to the maturity rule.
    coinbase: bool,
    /// Spent-at height per output, [`UNSPENT`] where still spendable.
    spent: Vec<u32>,
    outputs: Vec<Output>,
}

/// What [`UtxoSet::spend`] hands back: the output plus the facts input
/// validation needs about its origin.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpentOutput {
    pub output: Output,
    /// The height of the block that created the output.
    pub created_height: Height,
    /// Whether the output was created by a coinbase transaction.
    pub is_coinbase: bool,
}

impl Entry {
    fn is_fully_spent(&self) -> bool {
        self.spent.iter().all(|height| *height != UNSPENT)
    }

    fn last_spent_height(&self) -> u32 {
        self.spent.iter().copied().max().unwrap_or(0)
    }
}

#[derive(Default)]
struct Shard {
    entries: HashMap<transaction::Hash, Entry>,
}

/// The persistent, crash-safe record of which outputs are unspent.
pub struct UtxoSet {
    shards: Vec<RwLock<Shard>>,
    outputs_dir: PathBuf,
    /// Journal records for heights not yet committed.
    pending: Mutex<HashMap<u32, Vec<JournalRecord>>>,
    /// The height the on-disk tables were last saved at.
    saved_height: Mutex<Option<u32>>,
}

fn shard_index(txid: &transaction::Hash) -> usize {
    txid.prefix16() as usize % SHARD_COUNT
}

impl UtxoSet {
    /// Open the set under `config.data_dir/outputs`, loading any saved
    /// tables.
    ///
    /// Returns the set and the height its tables were saved at; the chain
    /// replays blocks above that height from the block files.
    pub fn open(config: &Config) -> Result<(UtxoSet, Option<Height>)> {
        let outputs_dir = config.outputs_dir();
        fs::create_dir_all(outputs_dir.join("journal"))?;
        fs::create_dir_all(outputs_dir.join("table"))?;

        let mut shards = Vec::with_capacity(SHARD_COUNT);
        for _ in 0..SHARD_COUNT {
            shards.push(RwLock::new(Shard::default()));
        }
        let set = UtxoSet {
            shards,
            outputs_dir,
            pending: Mutex::new(HashMap::new()),
            saved_height: Mutex::new(None),
        };

        let saved = set.load_tables()?;
        *set.saved_height.lock().expect("poisoned lock") = saved;
        Ok((set, saved.map(Height)))
    }

    /// Insert every output of every transaction, unspent at `height`.
    ///
    /// Outputs must be visible before any later transaction in the same
    /// block tries to spend them, so the whole block is added before any
    /// input checking starts.
    pub fn add(&self, transactions: &[std::sync::Arc<Transaction>], height: Height) {
        // Group per shard, then lock shards in ascending order.
        let mut by_shard: Vec<Vec<(transaction::Hash, Entry)>> = Vec::new();
        by_shard.resize_with(SHARD_COUNT, Vec::new);
        for tx in transactions.iter() {
            let txid = tx.hash();
            let entry = Entry {
                created_height: height.0,
                coinbase: tx.is_coinbase(),
                spent: vec![UNSPENT; tx.outputs.len()],
                outputs: tx.outputs.clone(),
            };
            by_shard[shard_index(&txid)].push((txid, entry));
        }

        for (index, batch) in by_shard.into_iter().enumerate() {
            if batch.is_empty() {
                continue;
            }
            let mut shard = self.shards[index].write().expect("poisoned lock");
            for (txid, entry) in batch {
                shard.entries.insert(txid, entry);
            }
        }
    }

    /// Mark `outpoint` spent at `height` and return the output it locked.
    ///
    /// Fails if the output is absent or already spent; nothing is changed
    /// in that case.
    pub fn spend(&self, outpoint: OutPoint, height: Height) -> Result<SpentOutput> {
        let shard_idx = shard_index(&outpoint.hash);
        let mut shard = self.shards[shard_idx].write().expect("poisoned lock");

        let entry = shard
            .entries
            .get_mut(&outpoint.hash)
            .ok_or(StateError::MissingOutput(outpoint))?;
        let created_height = Height(entry.created_height);
        let is_coinbase = entry.coinbase;
        let spent = entry
            .spent
            .get_mut(outpoint.index as usize)
            .ok_or(StateError::MissingOutput(outpoint))?;
        if *spent != UNSPENT {
            return Err(StateError::AlreadySpent(outpoint));
        }
        *spent = height.0;
        let output = SpentOutput {
            output: entry.outputs[outpoint.index as usize].clone(),
            created_height,
            is_coinbase,
        };
        drop(shard);

        self.pending
            .lock()
            .expect("poisoned lock")
            .entry(height.0)
            .or_default()
            .push(JournalRecord {
                shard: shard_idx as u16,
                old_height: UNSPENT,
                new_height: height.0,
                txid: outpoint.hash,
                output_index: outpoint.index,
            });
        Ok(output)
    }

    pub fn is_unspent(&self, outpoint: &OutPoint) -> bool {
        let shard = self.shards[shard_index(&outpoint.hash)]
            .read()
            .expect("poisoned lock");
        shard
            .entries
            .get(&outpoint.hash)
            .and_then(|entry| entry.spent.get(outpoint.index as usize))
            .map(|height| *height == UNSPENT)
            .unwrap_or(false)
    }

    /// The output `outpoint` refers to, spent or not.
    pub fn get(&self, outpoint: &OutPoint) -> Option<Output> {
        let shard = self.shards[shard_index(&outpoint.hash)]
            .read()
            .expect("poisoned lock");
        shard
            .entries
            .get(&outpoint.hash)
            .and_then(|entry| entry.outputs.get(outpoint.index as usize))
            .cloned()
    }

    /// Whether any output of `txid` is known to the set.
    pub fn contains_transaction(&self, txid: &transaction::Hash) -> bool {
        let shard = self.shards[shard_index(txid)].read().expect("poisoned lock");
        shard.entries.contains_key(txid)
    }

    /// Make the journal for `height` durable. Must return before the chain
    /// advances its tip to `height`.
    pub fn commit(&self, height: Height) -> Result<()> {
        let records = self
            .pending
            .lock()
            .expect("poisoned lock")
            .remove(&height.0)
            .unwrap_or_default();
        journal::write(&self.outputs_dir, height.0, &records)?;
        debug!(height = height.0, spends = records.len(), "committed UTXO journal");
        Ok(())
    }

    /// Undo every spend and insertion at `height` and above.
    ///
    /// Afterwards the set equals its state immediately before block
    /// `height` was applied.
    pub fn revert(&self, height: Height) -> Result<()> {
        // Reverse the journaled spends, newest height first.
        let mut heights: Vec<u32> = journal::heights(&self.outputs_dir)?
            .into_iter()
            .filter(|journaled| *journaled >= height.0)
            .collect();
        {
            let pending = self.pending.lock().expect("poisoned lock");
            heights.extend(pending.keys().copied().filter(|h| *h >= height.0));
        }
        heights.sort_unstable();
        heights.dedup();

        for journaled in heights.into_iter().rev() {
            let mut records = self
                .pending
                .lock()
                .expect("poisoned lock")
                .remove(&journaled)
                .unwrap_or_default();
            let mut durable = journal::read(&self.outputs_dir, journaled)?;
            durable.append(&mut records);

            for record in durable.into_iter().rev() {
                let mut shard = self.shards[record.shard as usize]
                    .write()
                    .expect("poisoned lock");
                if let Some(entry) = shard.entries.get_mut(&record.txid) {
                    if let Some(spent) = entry.spent.get_mut(record.output_index as usize) {
                        *spent = record.old_height;
                    }
                }
            }
            journal::remove(&self.outputs_dir, journaled)?;
        }

        // Drop the entries the reverted blocks created.
        for shard in self.shards.iter() {
            let mut shard = shard.write().expect("poisoned lock");
            shard
                .entries
                .retain(|_, entry| entry.created_height < height.0);
        }

        info!(height = height.0, "reverted UTXO set");
        Ok(())
    }

    /// Evict fully spent entries at least `depth` blocks below `tip`.
    ///
    /// They remain recoverable from the block files if an improbably deep
    /// reorg needs them.
    pub fn purge(&self, depth: u32, tip: Height) -> usize {
        let cutoff = tip.0.saturating_sub(depth);
        let mut evicted = 0usize;
        for shard in self.shards.iter() {
            let mut shard = shard.write().expect("poisoned lock");
            let before = shard.entries.len();
            shard
                .entries
                .retain(|_, entry| !(entry.is_fully_spent() && entry.last_spent_height() < cutoff));
            evicted += before - shard.entries.len();
        }
        if evicted > 0 {
            debug!(evicted, "purged fully spent UTXO entries");
        }
        evicted
    }

    /// The number of entries currently resident.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.read().expect("poisoned lock").entries.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every resident output paying `lock_script`, with its spent height
    /// if spent. A linear scan; this serves the local query channel, not
    /// the hot path.
    pub fn outputs_for_script(
        &self,
        lock_script: &heron_chain::transparent::Script,
    ) -> Vec<(OutPoint, Output, Option<Height>)> {
        let mut found = Vec::new();
        for shard in self.shards.iter() {
            let shard = shard.read().expect("poisoned lock");
            for (txid, entry) in shard.entries.iter() {
                for (output_index, output) in entry.outputs.iter().enumerate() {
                    if &output.lock_script == lock_script {
                        let spent = entry.spent[output_index];
                        found.push((
                            OutPoint {
                                hash: *txid,
                                index: output_index as u32,
                            },
                            output.clone(),
                            if spent == UNSPENT { None } else { Some(Height(spent)) },
                        ));
                    }
                }
            }
        }
        found
    }

    /// Sum of all unspent output values, for supply accounting.
    pub fn unspent_value(&self) -> u64 {
        self.shards
            .iter()
            .map(|shard| {
                let shard = shard.read().expect("poisoned lock");
                shard
                    .entries
                    .values()
                    .map(|entry| {
                        entry
                            .spent
                            .iter()
                            .zip(entry.outputs.iter())
                            .filter(|(height, _)| **height == UNSPENT)
                            .map(|(_, output)| output.value.satoshis())
                            .sum::<u64>()
                    })
                    .sum::<u64>()
            })
            .sum()
    }

    /// Write every shard to its sorted on-disk table, stamped with `height`.
    pub fn save(&self, height: Height) -> Result<()> {
        for (index, shard) in self.shards.iter().enumerate() {
            let shard = shard.read().expect("poisoned lock");
            let path = self.table_path(index);
            let mut file = fs::File::create(&path)?;
            file.write_all(TABLE_MAGIC)?;
            file.write_u32::<LittleEndian>(shard.entries.len() as u32)?;

            let mut entries: Vec<_> = shard.entries.iter().collect();
            entries.sort_by_key(|(txid, _)| txid.0);
            for (txid, entry) in entries {
                txid.bitcoin_serialize(&mut file)?;
                file.write_u32::<LittleEndian>(entry.created_height)?;
                file.write_u8(entry.coinbase as u8)?;
                file.write_u32::<LittleEndian>(entry.outputs.len() as u32)?;
                for (spent, output) in entry.spent.iter().zip(entry.outputs.iter()) {
                    file.write_u32::<LittleEndian>(*spent)?;
                    output.bitcoin_serialize(&mut file)?;
                }
            }
            file.sync_data()?;
        }

        fs::write(
            self.outputs_dir.join("height"),
            format!("{}", height.0),
        )?;
        *self.saved_height.lock().expect("poisoned lock") = Some(height.0);
        info!(height = height.0, entries = self.len(), "saved UTXO tables");
        Ok(())
    }

    fn table_path(&self, shard: usize) -> PathBuf {
        self.outputs_dir.join("table").join(format!("{:02x}.tbl", shard))
    }

    fn load_tables(&self) -> Result<Option<u32>> {
        let height_path = self.outputs_dir.join("height");
        if !height_path.exists() {
            return Ok(None);
        }
        let height: u32 = fs::read_to_string(&height_path)?
            .trim()
            .parse()
            .map_err(|_| StateError::Corrupt("unreadable UTXO height stamp"))?;

        for index in 0..SHARD_COUNT {
            let path = self.table_path(index);
            if !path.exists() {
                continue;
            }
            let mut file = std::io::BufReader::new(fs::File::open(&path)?);
            let mut magic = [0u8; 8];
            std::io::Read::read_exact(&mut file, &mut magic)?;
            if &magic != TABLE_MAGIC {
                return Err(StateError::Corrupt("UTXO table has a bad start string"));
            }
            let count = file.read_u32::<LittleEndian>()?;

            let mut shard = self.shards[index].write().expect("poisoned lock");
            for _ in 0..count {
                let txid = transaction::Hash::bitcoin_deserialize(&mut file)?;
                let created_height = file.read_u32::<LittleEndian>()?;
                let coinbase = file.read_u8()? != 0;
                let output_count = file.read_u32::<LittleEndian>()?;
                let mut spent = Vec::with_capacity(output_count as usize);
                let mut outputs = Vec::with_capacity(output_count as usize);
                for _ in 0..output_count {
                    spent.push(file.read_u32::<LittleEndian>()?);
                    outputs.push(Output::bitcoin_deserialize(&mut file)?);
                }
                shard.entries.insert(
                    txid,
                    Entry {
                        created_height,
                        coinbase,
                        spent,
                        outputs,
                    },
                );
            }
        }
        Ok(Some(height))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempdir::TempDir;

    use heron_chain::parameters::{genesis_block, Network};

    use super::*;

    fn open_set(dir: &TempDir) -> UtxoSet {
        let config = Config::new(dir.path(), Network::Mainnet);
        UtxoSet::open(&config).expect("set opens").0
    }

    fn genesis_txs() -> Vec<Arc<Transaction>> {
        genesis_block(Network::Mainnet).transactions.clone()
    }

    fn genesis_outpoint() -> OutPoint {
        OutPoint {
            hash: genesis_txs()[0].hash(),
            index: 0,
        }
    }

    #[test]
    fn add_spend_and_double_spend() -> color_eyre::Result<()> {
        heron_test::init();

        let dir = TempDir::new("heron-utxo")?;
        let set = open_set(&dir);
        set.add(&genesis_txs(), Height(0));

        let outpoint = genesis_outpoint();
        assert!(set.is_unspent(&outpoint));
        assert_eq!(set.unspent_value(), 50 * 100_000_000);

        let spent = set.spend(outpoint, Height(1))?;
        assert_eq!(spent.output.value.satoshis(), 50 * 100_000_000);
        assert_eq!(spent.created_height, Height(0));
        assert!(spent.is_coinbase);
        assert!(!set.is_unspent(&outpoint));

        // A second spend is refused and changes nothing.
        assert!(matches!(
            set.spend(outpoint, Height(2)),
            Err(StateError::AlreadySpent(_))
        ));

        // Unknown outputs are refused too.
        let missing = OutPoint {
            hash: transaction::Hash([0x99; 32]),
            index: 0,
        };
        assert!(matches!(
            set.spend(missing, Height(1)),
            Err(StateError::MissingOutput(_))
        ));
        Ok(())
    }

    #[test]
    fn revert_restores_the_prior_state() -> color_eyre::Result<()> {
        heron_test::init();

        let dir = TempDir::new("heron-utxo")?;
        let set = open_set(&dir);
        set.add(&genesis_txs(), Height(0));

        let outpoint = genesis_outpoint();
        set.spend(outpoint, Height(1))?;
        set.commit(Height(1))?;
        assert!(!set.is_unspent(&outpoint));

        set.revert(Height(1))?;
        assert!(set.is_unspent(&outpoint), "revert reinstates the spend");

        // Reverting to 0 also drops the entries block 0 created.
        set.revert(Height(0))?;
        assert!(set.is_empty());
        Ok(())
    }

    #[test]
    fn save_and_reload_round_trips() -> color_eyre::Result<()> {
        heron_test::init();

        let dir = TempDir::new("heron-utxo")?;
        let config = Config::new(dir.path(), Network::Mainnet);
        {
            let (set, saved) = UtxoSet::open(&config)?;
            assert_eq!(saved, None);
            set.add(&genesis_txs(), Height(0));
            set.spend(genesis_outpoint(), Height(1))?;
            set.commit(Height(1))?;
            set.save(Height(1))?;
        }

        let (set, saved) = UtxoSet::open(&config)?;
        assert_eq!(saved, Some(Height(1)));
        assert_eq!(set.len(), 1);
        assert!(!set.is_unspent(&genesis_outpoint()));
        assert!(set.get(&genesis_outpoint()).is_some());
        Ok(())
    }

    #[test]
    fn purge_drops_only_old_fully_spent_entries() -> color_eyre::Result<()> {
        heron_test::init();

        let dir = TempDir::new("heron-utxo")?;
        let set = open_set(&dir);
        set.add(&genesis_txs(), Height(0));
        set.spend(genesis_outpoint(), Height(1))?;

        // Too recent to purge.
        assert_eq!(set.purge(100, Height(50)), 0);
        assert_eq!(set.len(), 1);

        // Deep enough.
        assert_eq!(set.purge(100, Height(200)), 1);
        assert!(set.is_empty());
        Ok(())
    }
}
