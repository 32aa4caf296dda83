use std::path::PathBuf;

use crate::sstable::{BLOOM_FP_RATE, DATA_BLOCK_SIZE};

/// Approximate memtable size, in bytes, at which a flush is triggered.
pub const MEMTABLE_FLUSH_THRESHOLD: usize = 4096;

/// Configuration for the store engine.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory path for the database.
    pub dir: PathBuf,

    /// Approximate memtable size that triggers a flush (default: 4KB).
    pub memtable_flush_threshold: usize,

    /// Target size for SSTable data blocks (default: 4KB).
    pub data_block_size: usize,

    /// Bloom filter false-positive rate for new SSTables (default: 0.01).
    pub bloom_fp_rate: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./emberdb"),
            memtable_flush_threshold: MEMTABLE_FLUSH_THRESHOLD,
            data_block_size: DATA_BLOCK_SIZE,
            bloom_fp_rate: BLOOM_FP_RATE,
        }
    }
}

impl Config {
    /// Create a new config with the given directory
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    /// Set the memtable flush threshold
    pub fn memtable_flush_threshold(mut self, bytes: usize) -> Self {
        self.memtable_flush_threshold = bytes;
        self
    }

    /// Set the target data block size
    pub fn data_block_size(mut self, bytes: usize) -> Self {
        self.data_block_size = bytes;
        self
    }

    /// Set the bloom filter false-positive rate
    pub fn bloom_fp_rate(mut self, rate: f64) -> Self {
        self.bloom_fp_rate = rate;
        self
    }
}
