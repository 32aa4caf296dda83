//! Footer locating the filter and index blocks inside a table file.

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::Result;
use crate::Error;

/// Four little-endian u64 fields.
pub const FOOTER_SIZE: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Footer {
    pub index_offset: u64,
    pub index_size: u64,
    pub filter_offset: u64,
    pub filter_size: u64,
}

impl Footer {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FOOTER_SIZE);
        buf.write_u64::<LittleEndian>(self.index_offset).unwrap();
        buf.write_u64::<LittleEndian>(self.index_size).unwrap();
        buf.write_u64::<LittleEndian>(self.filter_offset).unwrap();
        buf.write_u64::<LittleEndian>(self.filter_size).unwrap();
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != FOOTER_SIZE {
            return Err(Error::InvalidData(format!(
                "footer must be {FOOTER_SIZE} bytes, got {}",
                buf.len()
            )));
        }
        let mut cursor = Cursor::new(buf);
        Ok(Self {
            index_offset: cursor.read_u64::<LittleEndian>()?,
            index_size: cursor.read_u64::<LittleEndian>()?,
            filter_offset: cursor.read_u64::<LittleEndian>()?,
            filter_size: cursor.read_u64::<LittleEndian>()?,
        })
    }

    /// Checks that both blocks lie inside the first `file_len` bytes.
    pub fn validate(&self, file_len: u64) -> Result<()> {
        let index_end = self.index_offset.checked_add(self.index_size);
        let filter_end = self.filter_offset.checked_add(self.filter_size);
        match (index_end, filter_end) {
            (Some(index_end), Some(filter_end))
                if index_end <= file_len && filter_end <= file_len =>
            {
                Ok(())
            }
            _ => Err(Error::InvalidData(format!(
                "footer block ranges exceed file length {file_len}"
            ))),
        }
    }
}
