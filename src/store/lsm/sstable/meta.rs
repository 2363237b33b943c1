//! SSTable metadata footer.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};

/// Serialized footer length in bytes. The footer sits at the very end of
/// the table file so a reader can locate it with one seek.
pub const TABLE_META_SIZE: usize = 48;

/// Region bounds of an SSTable, all fields little-endian `i64`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TableMeta {
    pub version: i64,
    /// Command records per batch in the data region.
    pub batch_size: i64,
    pub data_start: i64,
    pub data_size: i64,
    pub index_start: i64,
    pub index_size: i64,
}

impl TableMeta {
    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.write_i64::<LittleEndian>(self.version).unwrap();
        buf.write_i64::<LittleEndian>(self.batch_size).unwrap();
        buf.write_i64::<LittleEndian>(self.data_start).unwrap();
        buf.write_i64::<LittleEndian>(self.data_size).unwrap();
        buf.write_i64::<LittleEndian>(self.index_start).unwrap();
        buf.write_i64::<LittleEndian>(self.index_size).unwrap();
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < TABLE_META_SIZE {
            return Err(Error::CorruptRecord(format!(
                "table footer needs {TABLE_META_SIZE} bytes, got {}",
                bytes.len()
            )));
        }

        let mut reader = bytes;
        Ok(TableMeta {
            version: reader.read_i64::<LittleEndian>()?,
            batch_size: reader.read_i64::<LittleEndian>()?,
            data_start: reader.read_i64::<LittleEndian>()?,
            data_size: reader.read_i64::<LittleEndian>()?,
            index_start: reader.read_i64::<LittleEndian>()?,
            index_size: reader.read_i64::<LittleEndian>()?,
        })
    }
}
