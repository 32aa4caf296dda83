//! Table construction.
//!
//! The writer consumes records in internal-key order, packs them into data
//! blocks, and finishes the file with the bloom filter, index, footer and
//! footer-length trailer. On successful return from [`TableWriter::finish`]
//! the file is fully synced and readable; a file left behind by a failed
//! build is not a valid table and must be removed by the caller.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use bloomfilter::Bloom;
use byteorder::{LittleEndian, WriteBytesExt};

use super::footer::Footer;
use super::index::Index;
use crate::error::Result;
use crate::key::InternalKey;
use crate::Error;

pub struct TableWriter {
    file: File,
    path: PathBuf,
    block: Vec<u8>,
    block_size: usize,
    index: Index,
    filter: Bloom<[u8]>,
    offset: u64,
    last_key: Option<InternalKey>,
}

impl TableWriter {
    /// Creates a table file at `path`. `estimated_items` sizes the bloom
    /// filter; passing the exact record count keeps the false-positive
    /// rate at the configured target.
    pub fn create(
        path: &Path,
        estimated_items: usize,
        block_size: usize,
        bloom_fp_rate: f64,
    ) -> Result<Self> {
        let file = File::create(path)?;
        let filter = Bloom::new_for_fp_rate(estimated_items.max(1), bloom_fp_rate)
            .map_err(|e| Error::InvalidData(format!("bloom filter sizing failed: {e}")))?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
            block: Vec::with_capacity(block_size),
            block_size,
            index: Index::new(),
            filter,
            offset: 0,
            last_key: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one record. Records must arrive in ascending internal-key
    /// order; the block boundaries and the index depend on it.
    pub fn add(&mut self, key: &InternalKey, value: &[u8]) -> Result<()> {
        self.filter.set(&key.user_key);

        let key_bytes = key.encode();
        self.block.write_u32::<LittleEndian>(key_bytes.len() as u32)?;
        self.block.write_u32::<LittleEndian>(value.len() as u32)?;
        self.block.extend_from_slice(&key_bytes);
        self.block.extend_from_slice(value);
        self.last_key = Some(key.clone());

        if self.block.len() > self.block_size {
            self.emit_block()?;
        }
        Ok(())
    }

    /// Writes the filter, index, footer and trailer, then syncs the file.
    pub fn finish(mut self) -> Result<()> {
        if !self.block.is_empty() {
            self.emit_block()?;
        }

        let filter_bytes = self.filter.as_slice();
        let filter_offset = self.offset;
        self.file.write_all(filter_bytes)?;
        self.offset += filter_bytes.len() as u64;

        let index_bytes: Vec<u8> = (&self.index).try_into()?;
        let index_offset = self.offset;
        self.file.write_all(&index_bytes)?;
        self.offset += index_bytes.len() as u64;

        let footer = Footer {
            index_offset,
            index_size: index_bytes.len() as u64,
            filter_offset,
            filter_size: filter_bytes.len() as u64,
        };
        let footer_bytes = footer.encode();
        self.file.write_all(&footer_bytes)?;

        self.file
            .write_u32::<LittleEndian>(footer_bytes.len() as u32)?;

        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    fn emit_block(&mut self) -> Result<()> {
        let last_key = self
            .last_key
            .take()
            .ok_or_else(|| Error::InvalidData("data block has no last key".to_string()))?;

        self.file.write_all(&self.block)?;
        self.index
            .push(last_key, self.offset, self.block.len() as u64);
        self.offset += self.block.len() as u64;
        self.block.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::OpType;
    use crate::sstable::{BLOOM_FP_RATE, DATA_BLOCK_SIZE};
    use tempfile::TempDir;

    #[test]
    fn test_write_produces_synced_table_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("00001.sst");

        let mut writer =
            TableWriter::create(&path, 3, DATA_BLOCK_SIZE, BLOOM_FP_RATE).expect("create failed");
        for (i, user_key) in [b"apple", b"kiwis", b"mango"].iter().enumerate() {
            writer
                .add(
                    &InternalKey::new(user_key.to_vec(), i as u64 + 1, OpType::Put),
                    b"fruit",
                )
                .expect("add failed");
        }
        writer.finish().expect("finish failed");

        let len = std::fs::metadata(&path).expect("table file missing").len();
        assert!(len > 0, "finished table must not be empty");
    }

    #[test]
    fn test_multiple_blocks_are_emitted() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("00001.sst");

        // A tiny block target forces a boundary every couple of records.
        let mut writer = TableWriter::create(&path, 10, 64, BLOOM_FP_RATE).expect("create failed");
        for i in 0..10u64 {
            let key = format!("key-{i:03}").into_bytes();
            writer
                .add(&InternalKey::new(key, i + 1, OpType::Put), b"padding-value")
                .expect("add failed");
        }
        assert!(
            writer.index.len() > 1,
            "Small block target must produce multiple blocks"
        );
        writer.finish().expect("finish failed");
    }

    #[test]
    fn test_last_record_lands_in_final_block() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("00001.sst");

        let mut writer =
            TableWriter::create(&path, 2, DATA_BLOCK_SIZE, BLOOM_FP_RATE).expect("create failed");
        writer
            .add(&InternalKey::new(b"a".to_vec(), 1, OpType::Put), b"1")
            .expect("add failed");
        writer
            .add(&InternalKey::new(b"b".to_vec(), 2, OpType::Put), b"2")
            .expect("add failed");

        // Nothing exceeded the block target, so the residual flush in
        // finish() must produce exactly one indexed block.
        assert_eq!(writer.index.len(), 0);
        writer.finish().expect("finish failed");
    }
}
