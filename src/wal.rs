//! Write-Ahead Log (WAL) implementation for durability and recovery.
//!
//! Every mutation is appended to the log and synced to disk before it is
//! applied to the memtable, so no acknowledged write is lost across a
//! process crash. On startup the engine replays all log segments to
//! reconstruct the in-memory state.
//!
//! # Record Format
//!
//! Each record is variable-length:
//!
//! ```text
//! +-----------+---------+------------+------------+--------+-------+-------+
//! | crc32:u32 | seq:u64 | key_len:u32| val_len:u32| op:u8  | key   | value |
//! +-----------+---------+------------+------------+--------+-------+-------+
//! |  4 bytes  | 8 bytes |  4 bytes   |  4 bytes   | 1 byte |var len|var len|
//! +-----------+---------+------------+------------+--------+-------+-------+
//! ```
//!
//! - All multi-byte integers are little-endian
//! - The CRC-32/IEEE checksum covers everything after the checksum field
//! - Delete operations use `val_len = 0` with no value data

use std::fs::File;
use std::io::{BufReader, BufWriter, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc::{Crc, CRC_32_ISO_HDLC};

use crate::error::Result;
use crate::key::OpType;
use crate::Error;

pub const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Fixed-width portion of a record following the checksum:
/// sequence (8) + key_len (4) + val_len (4) + op (1).
const RECORD_HEADER_SIZE: usize = 17;

/// A single logical mutation carried by the log.
#[derive(Debug, Clone, PartialEq)]
pub struct WalRecord {
    pub sequence: u64,
    pub op: OpType,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

pub struct Wal {
    inner: Mutex<Inner>,
    path: PathBuf,
}

struct Inner {
    writer: BufWriter<File>,
    file: File,
}

impl std::fmt::Debug for Wal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wal").field("path", &self.path).finish()
    }
}

impl Wal {
    /// Creates or opens the log at `path` for append-only writes. Existing
    /// contents are preserved and appended to.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = File::options().create(true).append(true).open(&path)?;
        let writer = BufWriter::new(file.try_clone()?);

        Ok(Self {
            inner: Mutex::new(Inner { writer, file }),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one record. On successful return the record is durable: the
    /// user-space buffer is flushed and the file is synced before this
    /// method returns. Appends are serialized by an internal mutex.
    pub fn append(&self, record: &WalRecord) -> Result<()> {
        let mut payload =
            Vec::with_capacity(RECORD_HEADER_SIZE + record.key.len() + record.value.len());
        payload.write_u64::<LittleEndian>(record.sequence)?;
        payload.write_u32::<LittleEndian>(record.key.len() as u32)?;
        payload.write_u32::<LittleEndian>(record.value.len() as u32)?;
        payload.push(record.op.as_u8());
        payload.extend_from_slice(&record.key);
        payload.extend_from_slice(&record.value);

        let checksum = CRC32.checksum(&payload);

        let mut inner = self.inner.lock()?;
        inner.writer.write_u32::<LittleEndian>(checksum)?;
        inner.writer.write_all(&payload)?;
        inner.writer.flush()?;
        inner.file.sync_all()?;

        Ok(())
    }

    /// Flushes buffered data and syncs the file.
    pub fn flush(&self) -> Result<()> {
        let mut inner = self.inner.lock()?;
        inner.writer.flush()?;
        inner.file.sync_all()?;
        Ok(())
    }

    /// Replays the log at `path` from the beginning. A nonexistent file
    /// yields an empty iterator; a checksum mismatch or truncated record
    /// yields `Error::InvalidData` from the iterator.
    pub fn replay(path: &Path) -> Result<ReplayIterator> {
        ReplayIterator::open(path)
    }
}

pub struct ReplayIterator {
    // None when the log file does not exist: nothing to recover.
    reader: Option<BufReader<File>>,
}

impl ReplayIterator {
    fn open(path: &Path) -> Result<Self> {
        match File::open(path) {
            Ok(file) => Ok(Self {
                reader: Some(BufReader::new(file)),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self { reader: None }),
            Err(e) => Err(e.into()),
        }
    }

    fn read<R: Read>(reader: &mut R) -> Result<Option<WalRecord>> {
        // EOF at a record boundary is the clean end of the log.
        let stored_crc = match reader.read_u32::<LittleEndian>() {
            Ok(crc) => crc,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut header = [0u8; RECORD_HEADER_SIZE];
        reader
            .read_exact(&mut header)
            .map_err(|e| Error::InvalidData(format!("truncated record header: {e}")))?;

        let mut cursor = Cursor::new(&header[..]);
        let sequence = cursor.read_u64::<LittleEndian>()?;
        let key_len = cursor.read_u32::<LittleEndian>()? as usize;
        let val_len = cursor.read_u32::<LittleEndian>()? as usize;
        let op_byte = cursor.read_u8()?;

        let mut body = vec![0u8; key_len + val_len];
        reader
            .read_exact(&mut body)
            .map_err(|e| Error::InvalidData(format!("truncated record body: {e}")))?;

        let mut payload = Vec::with_capacity(RECORD_HEADER_SIZE + body.len());
        payload.extend_from_slice(&header);
        payload.extend_from_slice(&body);
        let computed_crc = CRC32.checksum(&payload);
        if computed_crc != stored_crc {
            return Err(Error::InvalidData(format!(
                "checksum mismatch: computed {computed_crc:#010x}, stored {stored_crc:#010x}"
            )));
        }

        let op = OpType::from_u8(op_byte)?;
        let value = body.split_off(key_len);
        let key = body;

        Ok(Some(WalRecord {
            sequence,
            op,
            key,
            value,
        }))
    }
}

impl Iterator for ReplayIterator {
    type Item = Result<WalRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let reader = self.reader.as_mut()?;
        match ReplayIterator::read(reader) {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
