//! Block index for table lookups.
//!
//! One entry per data block, recording the block's last internal key and
//! its location in the file. Because blocks are written in key order, the
//! least entry whose last key is >= the probe names the only block that
//! can contain the probed user key.

use std::convert::TryFrom;
use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::Result;
use crate::key::InternalKey;
use crate::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub last_key: InternalKey,
    pub offset: u64,
    pub size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Index {
    entries: Vec<IndexEntry>,
}

impl Index {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Appends an entry. Blocks are pushed in file order, which is also
    /// key order, so the entries stay sorted by `last_key`.
    pub fn push(&mut self, last_key: InternalKey, offset: u64, size: u64) {
        self.entries.push(IndexEntry {
            last_key,
            offset,
            size,
        });
    }

    /// Finds the first block whose last key is >= `probe`, which is the
    /// only block that can contain the probed user key.
    pub fn seek(&self, probe: &InternalKey) -> Option<&IndexEntry> {
        let position = self.entries.partition_point(|entry| entry.last_key < *probe);
        self.entries.get(position)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl TryFrom<&Index> for Vec<u8> {
    type Error = Error;

    fn try_from(index: &Index) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        for entry in &index.entries {
            let key_bytes = entry.last_key.encode();
            buffer.write_u32::<LittleEndian>(key_bytes.len() as u32)?;
            buffer.extend_from_slice(&key_bytes);
            buffer.write_u64::<LittleEndian>(entry.offset)?;
            buffer.write_u64::<LittleEndian>(entry.size)?;
        }
        Ok(buffer)
    }
}

impl TryFrom<&[u8]> for Index {
    type Error = Error;

    fn try_from(buffer: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(buffer);
        let mut entries = Vec::new();

        while (cursor.position() as usize) < buffer.len() {
            let key_len = cursor
                .read_u32::<LittleEndian>()
                .map_err(|e| Error::InvalidData(format!("truncated index entry: {e}")))?
                as usize;
            if key_len > buffer.len() - cursor.position() as usize {
                return Err(Error::InvalidData(format!(
                    "index key length {key_len} exceeds buffer"
                )));
            }

            let mut key_bytes = vec![0u8; key_len];
            cursor
                .read_exact(&mut key_bytes)
                .map_err(|e| Error::InvalidData(format!("truncated index key: {e}")))?;
            let last_key = InternalKey::decode(&key_bytes)?;

            let offset = cursor
                .read_u64::<LittleEndian>()
                .map_err(|e| Error::InvalidData(format!("truncated block offset: {e}")))?;
            let size = cursor
                .read_u64::<LittleEndian>()
                .map_err(|e| Error::InvalidData(format!("truncated block size: {e}")))?;

            entries.push(IndexEntry {
                last_key,
                offset,
                size,
            });
        }

        Ok(Self { entries })
    }
}
