//! Internal key format and ordering.
//!
//! Every write is stored under an [`InternalKey`]: the user key plus the
//! sequence number and operation that produced it. The total order sorts
//! user keys ascending and, within one user key, sequence numbers
//! *descending*. The newest version of a key therefore sorts first, which
//! reduces "most recent wins" to "take the first match in sorted order"
//! everywhere a lookup seeks through ordered data.

use std::cmp::Ordering;
use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::Result;
use crate::Error;

/// Operation kind carried by every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpType {
    /// A normal write.
    Put = 0,
    /// A tombstone; the key is deleted as of this sequence.
    Delete = 1,
}

impl OpType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(OpType::Put),
            1 => Ok(OpType::Delete),
            other => Err(Error::InvalidData(format!(
                "unknown operation type: {other}"
            ))),
        }
    }
}

/// A versioned key: the user key plus the sequence number and operation
/// that wrote it. Sequence numbers are unique per write, so two internal
/// keys never collide even when the user key repeats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalKey {
    pub user_key: Vec<u8>,
    pub sequence: u64,
    pub op: OpType,
}

impl InternalKey {
    pub fn new(user_key: Vec<u8>, sequence: u64, op: OpType) -> Self {
        Self {
            user_key,
            sequence,
            op,
        }
    }

    /// The search key for point lookups: it sorts before every real version
    /// of `user_key`, so seeking to the least entry >= the probe lands on
    /// the newest version if one exists.
    pub fn probe(user_key: &[u8]) -> Self {
        Self {
            user_key: user_key.to_vec(),
            sequence: u64::MAX,
            op: OpType::Put,
        }
    }

    /// Serializes the key as `[user_key_len: u32][user_key][sequence: u64][op: u8]`,
    /// little-endian. The encoding is stable; SSTable blocks and index
    /// entries written by this build round-trip through [`InternalKey::decode`].
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + self.user_key.len() + 9);
        buf.write_u32::<LittleEndian>(self.user_key.len() as u32)
            .unwrap();
        buf.extend_from_slice(&self.user_key);
        buf.write_u64::<LittleEndian>(self.sequence).unwrap();
        buf.push(self.op.as_u8());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(buf);
        let key_len = cursor
            .read_u32::<LittleEndian>()
            .map_err(|e| Error::InvalidData(format!("truncated internal key: {e}")))?
            as usize;
        if key_len > buf.len() {
            return Err(Error::InvalidData(format!(
                "internal key length {key_len} exceeds buffer"
            )));
        }

        let mut user_key = vec![0u8; key_len];
        cursor
            .read_exact(&mut user_key)
            .map_err(|e| Error::InvalidData(format!("truncated internal key: {e}")))?;

        let sequence = cursor
            .read_u64::<LittleEndian>()
            .map_err(|e| Error::InvalidData(format!("truncated internal key: {e}")))?;
        let op = OpType::from_u8(
            cursor
                .read_u8()
                .map_err(|e| Error::InvalidData(format!("truncated internal key: {e}")))?,
        )?;

        if (cursor.position() as usize) != buf.len() {
            return Err(Error::InvalidData(
                "trailing bytes after internal key".to_string(),
            ));
        }

        Ok(Self {
            user_key,
            sequence,
            op,
        })
    }
}

impl Ord for InternalKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.user_key
            .cmp(&other.user_key)
            // Higher sequence compares less: the newest version sorts first.
            .then_with(|| other.sequence.cmp(&self.sequence))
            .then_with(|| self.op.as_u8().cmp(&other.op.as_u8()))
    }
}

impl PartialOrd for InternalKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
