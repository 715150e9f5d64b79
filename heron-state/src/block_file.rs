//! The append-mostly block file store.
//!
//! Files group 100 blocks by height: block `h` lives in file `h / 100` at
//! slot `h % 100`. Each file is:
//!
//! ```text
//! "NCBLKS01"                      8 bytes
//! CRC-32 of everything below     4 bytes, little endian
//! index: 100 x (hash 32 + data offset u32)
//! block payloads                 appended in slot order
//! ```
//!
//! The CRC is recomputed when a file fills or closes. A file that fails its
//! CRC on open is scanned: every indexed block is reparsed and its header
//! rehashed, the file is truncated to the last good record, and the CRC is
//! rewritten. The chain re-requests whatever was lost.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use lru::LruCache;
use tracing::{info, warn};

use heron_chain::block::{self, Block, Header, Height};
use heron_chain::compactint::CompactInt;
use heron_chain::transaction::Transaction;
use heron_chain::transparent::{Input, Output};
use heron_chain::{BitcoinDeserialize, BitcoinSerialize};

use crate::{Config, Result, StateError};

/// Blocks per file.
pub const MAX_BLOCKS_PER_FILE: u32 = 100;

const START_STRING: &[u8; 8] = b"NCBLKS01";
const CRC_OFFSET: u64 = 8;
const INDEX_OFFSET: u64 = 12;
const INDEX_ITEM_SIZE: u64 = 36;
const DATA_OFFSET: u64 = INDEX_OFFSET + MAX_BLOCKS_PER_FILE as u64 * INDEX_ITEM_SIZE;

/// How many block files stay open at once.
const OPEN_FILE_CACHE: usize = 8;

/// One hundred-block file.
pub struct BlockFile {
    id: u32,
    path: PathBuf,
    file: File,
    /// Filled index slots; always a prefix of the index.
    count: u32,
    /// Where the next payload goes: the current end of the file.
    next_data_offset: u64,
    /// Whether the on-disk CRC is stale.
    modified: bool,
}

impl BlockFile {
    fn path_for(dir: &Path, id: u32) -> PathBuf {
        dir.join(format!("{:08x}.blk", id))
    }

    /// Create an empty file for `id`.
    pub fn create(dir: &Path, id: u32) -> Result<BlockFile> {
        let path = Self::path_for(dir, id);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;

        file.write_all(START_STRING)?;
        file.write_u32::<LittleEndian>(0)?; // CRC placeholder
        let empty_index = vec![0u8; (MAX_BLOCKS_PER_FILE as u64 * INDEX_ITEM_SIZE) as usize];
        file.write_all(&empty_index)?;

        let mut block_file = BlockFile {
            id,
            path,
            file,
            count: 0,
            next_data_offset: DATA_OFFSET,
            modified: true,
        };
        block_file.update_crc()?;
        Ok(block_file)
    }

    /// Open an existing file, repairing it if its CRC does not match.
    pub fn open(dir: &Path, id: u32) -> Result<BlockFile> {
        let path = Self::path_for(dir, id);
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;

        let mut magic = [0u8; 8];
        file.read_exact(&mut magic)?;
        if &magic != START_STRING {
            return Err(StateError::Corrupt("block file has a bad start string"));
        }
        let stored_crc = file.read_u32::<LittleEndian>()?;

        let mut block_file = BlockFile {
            id,
            path,
            file,
            count: 0,
            next_data_offset: DATA_OFFSET,
            modified: false,
        };
        block_file.scan_index()?;

        let actual_crc = block_file.compute_crc()?;
        if actual_crc != stored_crc {
            warn!(
                file = id,
                stored_crc, actual_crc, "block file CRC mismatch, scanning"
            );
            block_file.repair()?;
        }
        Ok(block_file)
    }

    /// Walk the index to find the filled prefix and the data end.
    fn scan_index(&mut self) -> Result<()> {
        self.count = 0;
        for slot in 0..MAX_BLOCKS_PER_FILE {
            let (_, offset) = self.read_index_entry(slot)?;
            if offset == 0 {
                break;
            }
            self.count = slot + 1;
        }
        let end = self.file.seek(SeekFrom::End(0))?;
        self.next_data_offset = end.max(DATA_OFFSET);
        Ok(())
    }

    fn read_index_entry(&mut self, slot: u32) -> Result<(block::Hash, u32)> {
        self.file
            .seek(SeekFrom::Start(INDEX_OFFSET + slot as u64 * INDEX_ITEM_SIZE))?;
        let mut hash = [0u8; 32];
        self.file.read_exact(&mut hash)?;
        let offset = self.file.read_u32::<LittleEndian>()?;
        Ok((block::Hash(hash), offset))
    }

    fn write_index_entry(&mut self, slot: u32, hash: &block::Hash, offset: u32) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(INDEX_OFFSET + slot as u64 * INDEX_ITEM_SIZE))?;
        self.file.write_all(&hash.0)?;
        self.file.write_u32::<LittleEndian>(offset)?;
        Ok(())
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn block_count(&self) -> u32 {
        self.count
    }

    pub fn is_full(&self) -> bool {
        self.count == MAX_BLOCKS_PER_FILE
    }

    /// Append `block` into the next slot.
    pub fn append(&mut self, block: &Block) -> Result<()> {
        if self.is_full() {
            return Err(StateError::Corrupt("append into a full block file"));
        }
        let hash = block.hash();
        let offset = self.next_data_offset;

        self.file.seek(SeekFrom::Start(offset))?;
        let mut payload = Vec::with_capacity(block.serialized_size());
        block
            .bitcoin_serialize(&mut payload)
            .expect("serializing to a vec never fails");
        self.file.write_all(&payload)?;

        self.write_index_entry(self.count, &hash, offset as u32)?;
        self.count += 1;
        self.next_data_offset = offset + payload.len() as u64;
        self.modified = true;

        if self.is_full() {
            self.update_crc()?;
        }
        Ok(())
    }

    fn data_offset(&mut self, slot: u32) -> Result<(block::Hash, u64)> {
        if slot >= self.count {
            return Err(StateError::MissingBlock(Height(
                self.id * MAX_BLOCKS_PER_FILE + slot,
            )));
        }
        let (hash, offset) = self.read_index_entry(slot)?;
        Ok((hash, offset as u64))
    }

    pub fn read_hash(&mut self, slot: u32) -> Result<block::Hash> {
        Ok(self.data_offset(slot)?.0)
    }

    pub fn read_block(&mut self, slot: u32) -> Result<Block> {
        let (_, offset) = self.data_offset(slot)?;
        self.file.seek(SeekFrom::Start(offset))?;
        let mut reader = BufReader::new(&mut self.file);
        Ok(Block::bitcoin_deserialize(&mut reader)?)
    }

    pub fn read_header(&mut self, slot: u32) -> Result<Header> {
        let (_, offset) = self.data_offset(slot)?;
        self.file.seek(SeekFrom::Start(offset))?;
        let mut reader = BufReader::new(&mut self.file);
        Ok(Header::bitcoin_deserialize(&mut reader)?)
    }

    /// Read one output without materializing the whole block: seek to the
    /// block, then parse past the preceding transactions.
    pub fn read_output(&mut self, slot: u32, tx_index: u32, output_index: u32) -> Result<Output> {
        let (_, offset) = self.data_offset(slot)?;
        self.file.seek(SeekFrom::Start(offset))?;
        let mut reader = BufReader::new(&mut self.file);

        Header::bitcoin_deserialize(&mut reader)?;
        let tx_count = CompactInt::bitcoin_deserialize(&mut reader)?.value();
        if tx_index as u64 >= tx_count {
            return Err(StateError::Corrupt("output reference past transaction count"));
        }
        for _ in 0..tx_index {
            Transaction::bitcoin_deserialize(&mut reader)?;
        }

        // Parse the target transaction only as far as the wanted output.
        i32::bitcoin_deserialize(&mut reader)?;
        <Vec<Input>>::bitcoin_deserialize(&mut reader)?;
        let output_count = CompactInt::bitcoin_deserialize(&mut reader)?.value();
        if output_index as u64 >= output_count {
            return Err(StateError::Corrupt("output reference past output count"));
        }
        let mut output = None;
        for _ in 0..=output_index {
            output = Some(Output::bitcoin_deserialize(&mut reader)?);
        }
        Ok(output.expect("loop body runs at least once"))
    }

    /// CRC over everything after the CRC field itself.
    fn compute_crc(&mut self) -> Result<u32> {
        self.file.seek(SeekFrom::Start(INDEX_OFFSET))?;
        let mut hasher = crc32fast::Hasher::new();
        let mut buffer = [0u8; 64 * 1024];
        loop {
            let read = self.file.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
        Ok(hasher.finalize())
    }

    /// Recompute and persist the CRC.
    pub fn update_crc(&mut self) -> Result<()> {
        if !self.modified {
            return Ok(());
        }
        let crc = self.compute_crc()?;
        self.file.seek(SeekFrom::Start(CRC_OFFSET))?;
        self.file.write_u32::<LittleEndian>(crc)?;
        self.file.sync_data()?;
        self.modified = false;
        Ok(())
    }

    /// Reparse every indexed block and truncate to the last good one.
    fn repair(&mut self) -> Result<u32> {
        let mut good = 0u32;
        let mut truncate_at = DATA_OFFSET;
        for slot in 0..self.count {
            let (indexed_hash, offset) = self.read_index_entry(slot)?;
            self.file.seek(SeekFrom::Start(offset as u64))?;
            let mut reader = BufReader::new(&mut self.file);
            match Block::bitcoin_deserialize(&mut reader) {
                Ok(block) if block.hash() == indexed_hash => {
                    good = slot + 1;
                    truncate_at = offset as u64 + block.serialized_size() as u64;
                }
                _ => break,
            }
        }

        // Clear the dead index slots, drop the dead data, rewrite the CRC.
        for slot in good..self.count {
            self.write_index_entry(slot, &block::Hash::zero(), 0)?;
        }
        self.file.set_len(truncate_at)?;
        let dropped = self.count - good;
        self.count = good;
        self.next_data_offset = truncate_at;
        self.modified = true;
        self.update_crc()?;

        info!(
            file = self.id,
            kept = good,
            dropped,
            "Repaired block file by truncating to its last valid block"
        );
        Ok(good)
    }

    /// Rewrite this file keeping only the first `keep` blocks, via a swap
    /// file renamed into place.
    pub fn truncate_to(&mut self, keep: u32) -> Result<()> {
        if keep >= self.count {
            return Ok(());
        }

        let swap_path = self.path.with_extension("swap");
        {
            let mut swap = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(&swap_path)?;
            swap.write_all(START_STRING)?;
            swap.write_u32::<LittleEndian>(0)?;
            let empty_index =
                vec![0u8; (MAX_BLOCKS_PER_FILE as u64 * INDEX_ITEM_SIZE) as usize];
            swap.write_all(&empty_index)?;

            let mut next_offset = DATA_OFFSET;
            for slot in 0..keep {
                let block = self.read_block(slot)?;
                let hash = self.read_hash(slot)?;
                let mut payload = Vec::with_capacity(block.serialized_size());
                block
                    .bitcoin_serialize(&mut payload)
                    .expect("serializing to a vec never fails");
                swap.seek(SeekFrom::Start(next_offset))?;
                swap.write_all(&payload)?;
                swap.seek(SeekFrom::Start(INDEX_OFFSET + slot as u64 * INDEX_ITEM_SIZE))?;
                swap.write_all(&hash.0)?;
                swap.write_u32::<LittleEndian>(next_offset as u32)?;
                next_offset += payload.len() as u64;
            }
            swap.sync_data()?;
        }
        fs::rename(&swap_path, &self.path)?;

        self.file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        self.scan_index()?;
        self.modified = true;
        self.update_crc()?;
        Ok(())
    }
}

impl Drop for BlockFile {
    fn drop(&mut self) {
        // Close recomputes the CRC so a clean shutdown never needs repair.
        let _ = self.update_crc();
    }
}

/// The full block history: a directory of [`BlockFile`]s behind a small
/// open-file LRU.
///
/// The LRU map is guarded by one mutex, checked out entries by their own
/// per-file lock. Multi-file operations take file locks in ascending id
/// order so a reorg cannot deadlock against a reader.
pub struct BlockStore {
    dir: PathBuf,
    cache: Mutex<LruCache<u32, Arc<RwLock<BlockFile>>>>,
    /// Total blocks stored; heights `0..count` are present.
    count: Mutex<u32>,
    /// Height by hash for every stored block, for `getdata` service.
    height_by_hash: Mutex<HashMap<block::Hash, Height>>,
}

impl BlockStore {
    /// Open (or initialize) the store under `config.data_dir/blocks`.
    pub fn open(config: &Config) -> Result<BlockStore> {
        let dir = config.blocks_dir();
        fs::create_dir_all(&dir)?;

        let store = BlockStore {
            dir,
            cache: Mutex::new(LruCache::new(OPEN_FILE_CACHE)),
            count: Mutex::new(0),
            height_by_hash: Mutex::new(HashMap::new()),
        };

        // Files must form a contiguous run of full files plus one tail.
        let mut total = 0u32;
        for id in 0u32.. {
            let path = BlockFile::path_for(&store.dir, id);
            if !path.exists() {
                break;
            }
            let file = store.checkout(id)?;
            let mut file = file.write().expect("poisoned lock");
            let in_file = file.block_count();
            {
                let mut index = store.height_by_hash.lock().expect("poisoned lock");
                for slot in 0..in_file {
                    let height = Height(id * MAX_BLOCKS_PER_FILE + slot);
                    index.insert(file.read_hash(slot)?, height);
                }
            }
            total = id * MAX_BLOCKS_PER_FILE + in_file;
            if !file.is_full() {
                break;
            }
        }
        *store.count.lock().expect("poisoned lock") = total;

        metrics::gauge!("store.block.count", total as _);
        Ok(store)
    }

    fn checkout(&self, id: u32) -> Result<Arc<RwLock<BlockFile>>> {
        let mut cache = self.cache.lock().expect("poisoned lock");
        if let Some(file) = cache.get(&id) {
            return Ok(file.clone());
        }
        let path = BlockFile::path_for(&self.dir, id);
        let file = if path.exists() {
            BlockFile::open(&self.dir, id)?
        } else {
            BlockFile::create(&self.dir, id)?
        };
        let file = Arc::new(RwLock::new(file));
        cache.put(id, file.clone());
        Ok(file)
    }

    /// The number of stored blocks: the next height to append.
    pub fn block_count(&self) -> u32 {
        *self.count.lock().expect("poisoned lock")
    }

    /// Append `block` at `height`, which must be the next height.
    pub fn append(&self, height: Height, block: &Block) -> Result<()> {
        let mut count = self.count.lock().expect("poisoned lock");
        if height.0 != *count {
            return Err(StateError::HeightMismatch {
                expected: Height(*count),
                actual: height,
            });
        }

        let file = self.checkout(height.0 / MAX_BLOCKS_PER_FILE)?;
        file.write().expect("poisoned lock").append(block)?;
        *count += 1;
        self.height_by_hash
            .lock()
            .expect("poisoned lock")
            .insert(block.hash(), height);

        metrics::gauge!("store.block.count", *count as _);
        Ok(())
    }

    pub fn block_at(&self, height: Height) -> Result<Block> {
        self.ensure_stored(height)?;
        let file = self.checkout(height.0 / MAX_BLOCKS_PER_FILE)?;
        let mut file = file.write().expect("poisoned lock");
        file.read_block(height.0 % MAX_BLOCKS_PER_FILE)
    }

    pub fn header_at(&self, height: Height) -> Result<Header> {
        self.ensure_stored(height)?;
        let file = self.checkout(height.0 / MAX_BLOCKS_PER_FILE)?;
        let mut file = file.write().expect("poisoned lock");
        file.read_header(height.0 % MAX_BLOCKS_PER_FILE)
    }

    pub fn hash_at(&self, height: Height) -> Result<block::Hash> {
        self.ensure_stored(height)?;
        let file = self.checkout(height.0 / MAX_BLOCKS_PER_FILE)?;
        let mut file = file.write().expect("poisoned lock");
        file.read_hash(height.0 % MAX_BLOCKS_PER_FILE)
    }

    pub fn output_at(&self, height: Height, tx_index: u32, output_index: u32) -> Result<Output> {
        self.ensure_stored(height)?;
        let file = self.checkout(height.0 / MAX_BLOCKS_PER_FILE)?;
        let mut file = file.write().expect("poisoned lock");
        file.read_output(height.0 % MAX_BLOCKS_PER_FILE, tx_index, output_index)
    }

    /// The stored height of `hash`, if any.
    pub fn height_of(&self, hash: &block::Hash) -> Option<Height> {
        self.height_by_hash
            .lock()
            .expect("poisoned lock")
            .get(hash)
            .copied()
    }

    fn ensure_stored(&self, height: Height) -> Result<()> {
        if height.0 >= self.block_count() {
            return Err(StateError::MissingBlock(height));
        }
        Ok(())
    }

    /// Drop every block above `height`, keeping `0..=height`.
    pub fn revert_above(&self, height: Height) -> Result<()> {
        let mut count = self.count.lock().expect("poisoned lock");
        if height.0 + 1 >= *count {
            return Ok(());
        }

        let keep = height.0 + 1;
        let boundary_id = if keep == 0 { 0 } else { (keep - 1) / MAX_BLOCKS_PER_FILE };
        let last_id = (*count - 1) / MAX_BLOCKS_PER_FILE;

        // Forget the dropped hashes before touching the files.
        {
            let mut index = self.height_by_hash.lock().expect("poisoned lock");
            index.retain(|_, stored| stored.0 < keep);
        }

        // Ascending id order, per the lock discipline.
        for id in boundary_id..=last_id {
            if id == boundary_id {
                let file = self.checkout(id)?;
                let mut file = file.write().expect("poisoned lock");
                file.truncate_to(keep - id * MAX_BLOCKS_PER_FILE)?;
            } else {
                self.remove_file(id)?;
            }
        }

        *count = keep;
        metrics::gauge!("store.block.count", *count as _);
        Ok(())
    }

    /// Delete file `id` outright.
    fn remove_file(&self, id: u32) -> Result<()> {
        self.cache.lock().expect("poisoned lock").pop(&id);
        let path = BlockFile::path_for(&self.dir, id);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs::OpenOptions;
    use std::io::{Seek, SeekFrom, Write};

    use tempdir::TempDir;

    use heron_chain::parameters::{genesis_block, Network};

    use super::*;

    fn test_config(dir: &TempDir) -> Config {
        Config::new(dir.path(), Network::Mainnet)
    }

    fn test_blocks(count: usize) -> Vec<Block> {
        // Structurally valid chain-shaped blocks; PoW is irrelevant here.
        let genesis = genesis_block(Network::Mainnet).clone();
        let mut blocks = vec![genesis.clone()];
        let mut parent = genesis.hash();
        for _ in 1..count {
            let mut block = genesis.clone();
            block.header = Header::new(
                block.header.version,
                parent,
                block.header.merkle_root,
                block.header.time,
                block.header.difficulty_threshold,
                block.header.nonce,
            );
            parent = block.hash();
            blocks.push(block);
        }
        blocks
    }

    #[test]
    fn append_and_read_back() -> color_eyre::Result<()> {
        heron_test::init();

        let dir = TempDir::new("heron-block-store")?;
        let store = BlockStore::open(&test_config(&dir))?;
        let blocks = test_blocks(3);

        for (height, block) in blocks.iter().enumerate() {
            store.append(Height(height as u32), block)?;
        }

        assert_eq!(store.block_count(), 3);
        for (height, block) in blocks.iter().enumerate() {
            let read = store.block_at(Height(height as u32))?;
            assert_eq!(&read, block);
            assert_eq!(store.hash_at(Height(height as u32))?, block.hash());
            assert_eq!(store.height_of(&block.hash()), Some(Height(height as u32)));
        }

        // Out-of-order appends are refused.
        assert!(matches!(
            store.append(Height(7), &blocks[0]),
            Err(StateError::HeightMismatch { .. })
        ));
        Ok(())
    }

    #[test]
    fn read_output_seeks_to_the_right_place() -> color_eyre::Result<()> {
        heron_test::init();

        let dir = TempDir::new("heron-block-store")?;
        let store = BlockStore::open(&test_config(&dir))?;
        let blocks = test_blocks(1);
        store.append(Height(0), &blocks[0])?;

        let output = store.output_at(Height(0), 0, 0)?;
        assert_eq!(output, blocks[0].transactions[0].outputs[0]);
        Ok(())
    }

    #[test]
    fn survives_restart_and_truncation() -> color_eyre::Result<()> {
        heron_test::init();

        let dir = TempDir::new("heron-block-store")?;
        let config = test_config(&dir);
        let blocks = test_blocks(5);
        {
            let store = BlockStore::open(&config)?;
            for (height, block) in blocks.iter().enumerate() {
                store.append(Height(height as u32), block)?;
            }
            store.revert_above(Height(2))?;
            assert_eq!(store.block_count(), 3);
        }

        let store = BlockStore::open(&config)?;
        assert_eq!(store.block_count(), 3);
        assert_eq!(store.block_at(Height(2))?, blocks[2]);
        Ok(())
    }

    #[test]
    fn crc_mismatch_truncates_to_last_good_block() -> color_eyre::Result<()> {
        heron_test::init();

        let dir = TempDir::new("heron-block-store")?;
        let config = test_config(&dir);
        let blocks = test_blocks(3);
        {
            let store = BlockStore::open(&config)?;
            for (height, block) in blocks.iter().enumerate() {
                store.append(Height(height as u32), block)?;
            }
        }

        // Corrupt the tail of the data region: the last block's payload.
        let path = config.blocks_dir().join("00000000.blk");
        {
            let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
            let end = file.seek(SeekFrom::End(0))?;
            file.seek(SeekFrom::Start(end - 64))?;
            file.write_all(&[0xde; 64])?;
        }

        let store = BlockStore::open(&config)?;
        assert_eq!(
            store.block_count(),
            2,
            "the corrupted third block is dropped, the first two survive"
        );
        assert_eq!(store.block_at(Height(1))?, blocks[1]);
        Ok(())
    }
}
