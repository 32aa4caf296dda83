//! Point lookups against a finished table file.

use std::convert::TryFrom;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::Path;

use bloomfilter::Bloom;
use byteorder::{LittleEndian, ReadBytesExt};

use super::footer::{Footer, FOOTER_SIZE};
use super::index::Index;
use super::FOOTER_TRAILER_SIZE;
use crate::error::Result;
use crate::key::{InternalKey, OpType};
use crate::Error;

/// An open table: the file handle plus the filter and index loaded from
/// its tail. Readers are cheap enough to construct per lookup and hold
/// the single file handle for their lifetime.
pub struct TableReader {
    file: std::fs::File,
    index: Index,
    filter: Bloom<[u8]>,
}

impl TableReader {
    /// Opens a table file, bootstrapping from the footer-length trailer at
    /// the end. Every field is bounds-checked against the file length
    /// before anything is read.
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = std::fs::File::open(path)?;
        let file_len = file.metadata()?.len();

        let trailer_size = FOOTER_TRAILER_SIZE as u64;
        if file_len < trailer_size {
            return Err(Error::InvalidData(format!(
                "table file too short for footer trailer: {file_len} bytes"
            )));
        }
        file.seek(SeekFrom::End(-(FOOTER_TRAILER_SIZE as i64)))?;
        let footer_size = file.read_u32::<LittleEndian>()? as u64;

        if footer_size != FOOTER_SIZE as u64 || file_len < trailer_size + footer_size {
            return Err(Error::InvalidData(format!(
                "implausible footer size: {footer_size}"
            )));
        }

        let footer_offset = file_len - trailer_size - footer_size;
        let mut footer_buf = vec![0u8; footer_size as usize];
        file.seek(SeekFrom::Start(footer_offset))?;
        file.read_exact(&mut footer_buf)?;
        let footer = Footer::decode(&footer_buf)?;
        footer.validate(footer_offset)?;

        let mut filter_buf = vec![0u8; footer.filter_size as usize];
        file.seek(SeekFrom::Start(footer.filter_offset))?;
        file.read_exact(&mut filter_buf)?;
        let filter = Bloom::from_slice(&filter_buf)
            .map_err(|e| Error::InvalidData(format!("undecodable bloom filter: {e}")))?;

        let mut index_buf = vec![0u8; footer.index_size as usize];
        file.seek(SeekFrom::Start(footer.index_offset))?;
        file.read_exact(&mut index_buf)?;
        let index = Index::try_from(index_buf.as_slice())?;

        Ok(Self {
            file,
            index,
            filter,
        })
    }

    /// Looks up the newest version of `user_key` in this table.
    ///
    /// Returns `Some(Some(value))` for a live write, `Some(None)` for a
    /// tombstone, and `None` when the table has no version of the key.
    pub fn get(&self, user_key: &[u8]) -> Result<Option<Option<Vec<u8>>>> {
        if !self.filter.check(user_key) {
            return Ok(None);
        }

        let probe = InternalKey::probe(user_key);
        let entry = match self.index.seek(&probe) {
            Some(entry) => entry,
            None => return Ok(None),
        };

        let mut block = vec![0u8; entry.size as usize];
        let mut reader = self.file.try_clone()?;
        reader.seek(SeekFrom::Start(entry.offset))?;
        reader.read_exact(&mut block)?;

        Self::scan_block(&block, user_key)
    }

    /// Walks a block's records forward. The block is sorted, so the first
    /// record matching the user key is its newest version, and a record
    /// with a greater user key proves the key is absent.
    fn scan_block(block: &[u8], user_key: &[u8]) -> Result<Option<Option<Vec<u8>>>> {
        let mut cursor = Cursor::new(block);

        loop {
            let key_len = match cursor.read_u32::<LittleEndian>() {
                Ok(len) => len as usize,
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
                Err(e) => return Err(e.into()),
            };
            let val_len = cursor
                .read_u32::<LittleEndian>()
                .map_err(|e| Error::InvalidData(format!("truncated record header: {e}")))?
                as usize;

            let remaining = block.len().saturating_sub(cursor.position() as usize);
            if key_len.saturating_add(val_len) > remaining {
                return Err(Error::InvalidData(
                    "record extends past block end".to_string(),
                ));
            }

            let mut key_bytes = vec![0u8; key_len];
            cursor
                .read_exact(&mut key_bytes)
                .map_err(|e| Error::InvalidData(format!("truncated record key: {e}")))?;

            let key = match InternalKey::decode(&key_bytes) {
                Ok(key) => key,
                Err(_) => {
                    // Undecodable key: skip its value so the scan keeps moving.
                    cursor.seek(SeekFrom::Current(val_len as i64))?;
                    continue;
                }
            };

            match key.user_key.as_slice().cmp(user_key) {
                std::cmp::Ordering::Equal => {
                    return match key.op {
                        OpType::Delete => Ok(Some(None)),
                        OpType::Put => {
                            let mut value = vec![0u8; val_len];
                            cursor.read_exact(&mut value).map_err(|e| {
                                Error::InvalidData(format!("truncated record value: {e}"))
                            })?;
                            Ok(Some(Some(value)))
                        }
                    };
                }
                // Records are sorted: every later user key is also greater.
                std::cmp::Ordering::Greater => return Ok(None),
                std::cmp::Ordering::Less => {
                    cursor.seek(SeekFrom::Current(val_len as i64))?;
                }
            }
        }
    }
}
