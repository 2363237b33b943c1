//! Immutable sorted table files.
//!
//! An SSTable is built in one pass from a memtable and never mutated
//! afterwards. The file has three regions:
//!
//! ```text
//! +---------------------------+
//! | data: batches of command  |
//! |       records, key order  |
//! +---------------------------+
//! | sparse index: first key   |
//! |   of each batch -> (start,|
//! |   size) position records  |
//! +---------------------------+
//! | footer (48 bytes)         |
//! +---------------------------+
//! ```
//!
//! Only the sparse index is held in memory; a point query selects the
//! candidate batch range with floor/ceiling lookups and decodes records
//! sequentially from disk, each record self-delimiting via its fixed
//! header.

pub mod meta;

pub use meta::{TableMeta, TABLE_META_SIZE};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::Memtable;
use crate::datafile::{DataFile, Mode};
use crate::error::{Error, Result};
use crate::record::CommandRecord;

/// Disk location of one batch in the data region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchPosition {
    pub start: i64,
    pub size: i64,
}

/// Byte length of an encoded [`BatchPosition`].
const POSITION_SIZE: i32 = 16;

/// A single immutable on-disk table.
pub struct SsTable {
    path: PathBuf,
    file: DataFile,
    meta: TableMeta,
    sparse_index: BTreeMap<String, BatchPosition>,
    min_key: String,
    /// True last key of the table. The sparse index only knows the first
    /// key of each batch, so the tail of the last batch would otherwise be
    /// unreachable through the out-of-range reject.
    max_key: String,
}

impl SsTable {
    /// Builds a new table at `path` from the memtable's records in key
    /// order, then reopens it read-only.
    pub fn build(path: &Path, batch_size: usize, memtable: &Memtable) -> Result<Self> {
        if memtable.is_empty() {
            return Err(Error::Io(
                "cannot build an SSTable from an empty memtable".to_string(),
            ));
        }
        let batch_size = batch_size.max(1);

        let writer = DataFile::open(path, 0, Mode::WriteOnly)?;
        let mut sparse_index = BTreeMap::new();
        let mut batch_buf: Vec<u8> = Vec::new();
        let mut batch_first: Option<String> = None;
        let mut batch_count = 0usize;
        let mut last_key = String::new();

        for (key, record) in memtable.iter() {
            if batch_first.is_none() {
                batch_first = Some(key.clone());
            }
            record.encode(&mut batch_buf);
            batch_count += 1;
            last_key = key;

            if batch_count >= batch_size {
                flush_batch(&writer, &mut sparse_index, &mut batch_first, &mut batch_buf)?;
                batch_count = 0;
            }
        }
        if !batch_buf.is_empty() {
            flush_batch(&writer, &mut sparse_index, &mut batch_first, &mut batch_buf)?;
        }

        let data_size = writer.write_offset() as i64;

        let mut index_buf = Vec::new();
        for (key, pos) in &sparse_index {
            encode_index_entry(&mut index_buf, key, pos);
        }
        let index_start = writer.append(&index_buf)? as i64;

        let meta = TableMeta {
            version: 0,
            batch_size: batch_size as i64,
            data_start: 0,
            data_size,
            index_start,
            index_size: index_buf.len() as i64,
        };
        let mut footer = Vec::new();
        meta.encode(&mut footer);
        writer.append(&footer)?;
        writer.sync()?;
        writer.close()?;

        let file = DataFile::open(path, 0, Mode::ReadOnly)?;
        let min_key = sparse_index
            .keys()
            .next()
            .cloned()
            .unwrap_or_default();

        tracing::debug!(
            path = %path.display(),
            keys = memtable.len(),
            batches = sparse_index.len(),
            "flushed memtable to SSTable"
        );

        Ok(Self {
            path: path.to_path_buf(),
            file,
            meta,
            sparse_index,
            min_key,
            max_key: last_key,
        })
    }

    /// Loads an existing table: footer, then sparse index, then the last
    /// batch to recover the table's true last key.
    pub fn open(path: &Path) -> Result<Self> {
        let file = DataFile::open(path, 0, Mode::ReadOnly)?;
        let size = file.size()?;
        if (size as usize) < TABLE_META_SIZE {
            return Err(Error::CorruptRecord(format!(
                "SSTable {} is smaller than its footer",
                path.display()
            )));
        }

        let mut footer = [0u8; TABLE_META_SIZE];
        file.read_at(&mut footer, size - TABLE_META_SIZE as u64)?;
        let meta = TableMeta::decode(&footer)?;

        let mut index_buf = vec![0u8; meta.index_size as usize];
        file.read_at(&mut index_buf, meta.index_start as u64)?;
        let sparse_index = decode_index(&index_buf)?;

        let (last_first, last_pos) = sparse_index
            .iter()
            .next_back()
            .map(|(k, p)| (k.clone(), *p))
            .ok_or_else(|| {
                Error::CorruptRecord(format!("SSTable {} has an empty index", path.display()))
            })?;

        let mut batch = vec![0u8; last_pos.size as usize];
        file.read_at(&mut batch, last_pos.start as u64)?;
        let mut reader = batch.as_slice();
        let mut max_key = last_first;
        while let Some(record) = CommandRecord::decode_from(&mut reader)? {
            max_key = record.key;
        }

        let min_key = sparse_index
            .keys()
            .next()
            .cloned()
            .unwrap_or_default();

        Ok(Self {
            path: path.to_path_buf(),
            file,
            meta,
            sparse_index,
            min_key,
            max_key,
        })
    }

    /// Point query. Keys outside `[min_key, max_key]` are rejected without
    /// touching the data region; otherwise the batch range selected by
    /// floor/ceiling is scanned sequentially.
    pub fn query(&self, key: &str) -> Result<CommandRecord> {
        if key < self.min_key.as_str() || key > self.max_key.as_str() {
            return Err(Error::KeyNotInSstable);
        }

        let lower = self
            .sparse_index
            .range::<str, _>((std::ops::Bound::Unbounded, std::ops::Bound::Included(key)))
            .next_back()
            .map(|(_, pos)| *pos)
            .ok_or(Error::KeyNotInSstable)?;

        // A key past the last batch's first key has no ceiling; the last
        // batch itself bounds the scan then.
        let upper = self
            .sparse_index
            .range::<str, _>((std::ops::Bound::Included(key), std::ops::Bound::Unbounded))
            .next()
            .map(|(_, pos)| *pos)
            .unwrap_or(lower);

        let start = lower.start as u64;
        let end = (upper.start + upper.size) as u64;
        let mut region = vec![0u8; (end - start) as usize];
        self.file.read_at(&mut region, start)?;

        let mut reader = region.as_slice();
        while let Some(record) = CommandRecord::decode_from(&mut reader)? {
            if record.key == key {
                return Ok(record);
            }
        }
        Err(Error::KeyNotInSstable)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn meta(&self) -> &TableMeta {
        &self.meta
    }

    pub fn min_key(&self) -> &str {
        &self.min_key
    }

    pub fn max_key(&self) -> &str {
        &self.max_key
    }

    pub fn close(&self) -> Result<()> {
        self.file.close()
    }
}

fn flush_batch(
    writer: &DataFile,
    sparse_index: &mut BTreeMap<String, BatchPosition>,
    batch_first: &mut Option<String>,
    batch_buf: &mut Vec<u8>,
) -> Result<()> {
    let start = writer.append(batch_buf)? as i64;
    let first = batch_first
        .take()
        .expect("batch flushed without a first key");
    sparse_index.insert(
        first,
        BatchPosition {
            start,
            size: batch_buf.len() as i64,
        },
    );
    batch_buf.clear();
    Ok(())
}

/// Sparse index entries reuse the variable-key record shape: a fixed pair
/// of sizes, the key bytes, then the 16-byte position payload.
fn encode_index_entry(buf: &mut Vec<u8>, key: &str, pos: &BatchPosition) {
    buf.write_i32::<LittleEndian>(key.len() as i32).unwrap();
    buf.write_i32::<LittleEndian>(POSITION_SIZE).unwrap();
    buf.extend_from_slice(key.as_bytes());
    buf.write_i64::<LittleEndian>(pos.start).unwrap();
    buf.write_i64::<LittleEndian>(pos.size).unwrap();
}

fn decode_index(bytes: &[u8]) -> Result<BTreeMap<String, BatchPosition>> {
    let mut reader = bytes;
    let mut index = BTreeMap::new();

    while !reader.is_empty() {
        let key_size = reader.read_i32::<LittleEndian>()? as usize;
        let val_size = reader.read_i32::<LittleEndian>()?;
        if val_size != POSITION_SIZE {
            return Err(Error::CorruptRecord(format!(
                "sparse index position should be {POSITION_SIZE} bytes, got {val_size}"
            )));
        }
        if reader.len() < key_size + POSITION_SIZE as usize {
            return Err(Error::CorruptRecord(
                "sparse index entry is cut short".to_string(),
            ));
        }

        let key = std::str::from_utf8(&reader[..key_size])
            .map_err(|e| Error::CorruptRecord(format!("sparse index key is not utf-8: {e}")))?
            .to_string();
        reader = &reader[key_size..];

        let start = reader.read_i64::<LittleEndian>()?;
        let size = reader.read_i64::<LittleEndian>()?;
        index.insert(key, BatchPosition { start, size });
    }

    Ok(index)
}
