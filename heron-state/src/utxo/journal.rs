//! The write-ahead journal: one append-only file per block height.
//!
//! Record layout, fixed 46 bytes each: shard id (u16), old spent height
//! (u32), new spent height (u32), transaction id (32 bytes), output index
//! (u32), all little endian.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use heron_chain::transaction;

use crate::Result;

/// One journaled spent-height change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(super) struct JournalRecord {
    pub shard: u16,
    pub old_height: u32,
    pub new_height: u32,
    pub txid: transaction::Hash,
    pub output_index: u32,
}

fn path(outputs_dir: &Path, height: u32) -> PathBuf {
    outputs_dir.join("journal").join(format!("{:08x}.log", height))
}

/// Write (and fsync) the journal segment for `height`.
pub(super) fn write(outputs_dir: &Path, height: u32, records: &[JournalRecord]) -> Result<()> {
    let mut file = fs::File::create(path(outputs_dir, height))?;
    for record in records {
        file.write_u16::<LittleEndian>(record.shard)?;
        file.write_u32::<LittleEndian>(record.old_height)?;
        file.write_u32::<LittleEndian>(record.new_height)?;
        file.write_all(&record.txid.0)?;
        file.write_u32::<LittleEndian>(record.output_index)?;
    }
    file.sync_all()?;
    Ok(())
}

/// Read the journal segment for `height`; an absent file is an empty
/// segment.
pub(super) fn read(outputs_dir: &Path, height: u32) -> Result<Vec<JournalRecord>> {
    let path = path(outputs_dir, height);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut file = std::io::BufReader::new(fs::File::open(path)?);
    let mut records = Vec::new();
    loop {
        let shard = match file.read_u16::<LittleEndian>() {
            Ok(shard) => shard,
            Err(error) if error.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(error) => return Err(error.into()),
        };
        let old_height = file.read_u32::<LittleEndian>()?;
        let new_height = file.read_u32::<LittleEndian>()?;
        let mut txid = [0u8; 32];
        file.read_exact(&mut txid)?;
        let output_index = file.read_u32::<LittleEndian>()?;
        records.push(JournalRecord {
            shard,
            old_height,
            new_height,
            txid: transaction::Hash(txid),
            output_index,
        });
    }
    Ok(records)
}

/// Every height with a durable journal segment.
pub(super) fn heights(outputs_dir: &Path) -> Result<Vec<u32>> {
    let mut heights = Vec::new();
    for entry in fs::read_dir(outputs_dir.join("journal"))? {
        let name = entry?.file_name();
        let name = name.to_string_lossy();
        if let Some(stem) = name.strip_suffix(".log") {
            if let Ok(height) = u32::from_str_radix(stem, 16) {
                heights.push(height);
            }
        }
    }
    heights.sort_unstable();
    Ok(heights)
}

/// Drop the journal segment for `height` after it has been reverted.
pub(super) fn remove(outputs_dir: &Path, height: u32) -> Result<()> {
    let path = path(outputs_dir, height);
    if path.exists() {
        fs::remove_file(path)?;
    }
    Ok(())
}
