//! In-memory sorted tier over a concurrent skip list.
//!
//! The memtable holds recently written versions, keyed by [`InternalKey`],
//! until a flush turns them into an SSTable. `crossbeam-skiplist`'s
//! `SkipMap` provides lock-free concurrent reads and ordered traversal, so
//! committed writes are immediately visible to readers without blocking.
//!
//! Successive writes to the same user key occupy distinct internal keys
//! (their sequence numbers differ), so entries are never overwritten in
//! place and the size counter only grows. Tombstones are stored with an
//! empty value; the operation type lives in the key itself.

use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crossbeam_skiplist::SkipMap;

use crate::error::Result;
use crate::key::{InternalKey, OpType};
use crate::Error;

#[derive(Debug)]
pub struct Memtable {
    data: SkipMap<InternalKey, Vec<u8>>,
    size: AtomicUsize,
    frozen: AtomicBool,
}

impl Memtable {
    pub fn new() -> Self {
        Self {
            data: SkipMap::new(),
            size: AtomicUsize::new(0),
            frozen: AtomicBool::new(false),
        }
    }

    /// Inserts a version. The value must be empty for delete entries.
    pub fn put(&self, key: InternalKey, value: Vec<u8>) -> Result<()> {
        if self.frozen.load(Ordering::SeqCst) {
            return Err(Error::ReadOnly);
        }
        let entry_size = key.user_key.len() + value.len();
        self.data.insert(key, value);
        self.size.fetch_add(entry_size, Ordering::SeqCst);
        Ok(())
    }

    /// Looks up the newest version of `user_key`.
    ///
    /// Returns `Some(Some(value))` for a live write, `Some(None)` for an
    /// observed tombstone, and `None` when no version exists. The outer
    /// `Option` tells the caller whether to keep searching older tiers.
    pub fn get(&self, user_key: &[u8]) -> Option<Option<Vec<u8>>> {
        let probe = InternalKey::probe(user_key);
        let entry = self
            .data
            .range((Bound::Included(probe), Bound::Unbounded))
            .next()?;
        if entry.key().user_key != user_key {
            return None;
        }
        match entry.key().op {
            OpType::Put => Some(Some(entry.value().clone())),
            OpType::Delete => Some(None),
        }
    }

    /// Running total of user-key and value bytes, used as the flush trigger.
    pub fn approximate_size(&self) -> usize {
        self.size.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// freeze prevents further writes to the memtable.
    pub fn freeze(&self) -> Result<()> {
        if self.frozen.swap(true, Ordering::SeqCst) {
            return Err(Error::ReadOnly);
        }
        Ok(())
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::SeqCst)
    }

    /// Forward iteration in internal-key order: all versions, newest first
    /// within each user key. This is the flusher's input.
    pub fn iter(&self) -> impl Iterator<Item = (InternalKey, Vec<u8>)> + '_ {
        self.data
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
    }
}
