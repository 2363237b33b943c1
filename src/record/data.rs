//! Data records for the log-structured hash table engine.
//!
//! ## Layout
//!
//! ```text
//! +-----+--------+----------+----------+----------+-------+---------+
//! | crc | ts     | expiry   | key_size | val_size | key   | value   |
//! | u32 | i64    | i64      | i32      | i32      | bytes | bytes   |
//! +-----+--------+----------+----------+----------+-------+---------+
//! |<------------- 28-byte header, little-endian ->|
//! ```
//!
//! The CRC-32 (IEEE) covers the value bytes only. `ts` and `expiry` are
//! nanoseconds since the Unix epoch; an expiry of zero means the record
//! never expires. A record with an empty value is a tombstone.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc::{Crc, CRC_32_ISO_HDLC};
use std::io::Read;

use crate::clock;
use crate::error::{Error, Result};

/// CRC-32 (IEEE polynomial) used to checksum record values.
pub const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Serialized header length in bytes.
pub const DATA_HEADER_SIZE: usize = 28;

/// Fixed-width header preceding every data record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Header {
    pub crc: u32,
    pub ts: i64,
    pub expiry: i64,
    pub key_size: i32,
    pub val_size: i32,
}

impl Header {
    /// Builds a header for `key`/`value` stamped with the current time and
    /// no expiry.
    pub fn new(key: &str, value: &[u8]) -> Self {
        Header {
            crc: CRC32.checksum(value),
            ts: clock::now_nanos(),
            expiry: 0,
            key_size: key.len() as i32,
            val_size: value.len() as i32,
        }
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        // Writes into a Vec cannot fail.
        buf.write_u32::<LittleEndian>(self.crc).unwrap();
        buf.write_i64::<LittleEndian>(self.ts).unwrap();
        buf.write_i64::<LittleEndian>(self.expiry).unwrap();
        buf.write_i32::<LittleEndian>(self.key_size).unwrap();
        buf.write_i32::<LittleEndian>(self.val_size).unwrap();
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < DATA_HEADER_SIZE {
            return Err(Error::CorruptRecord(format!(
                "data record header needs {DATA_HEADER_SIZE} bytes, got {}",
                bytes.len()
            )));
        }

        let mut reader = bytes;
        Ok(Header {
            crc: reader.read_u32::<LittleEndian>()?,
            ts: reader.read_i64::<LittleEndian>()?,
            expiry: reader.read_i64::<LittleEndian>()?,
            key_size: reader.read_i32::<LittleEndian>()?,
            val_size: reader.read_i32::<LittleEndian>()?,
        })
    }
}

/// A key-value record as stored in a segment file.
#[derive(Debug, Clone, PartialEq)]
pub struct DataRecord {
    pub header: Header,
    pub key: String,
    pub value: Vec<u8>,
}

impl DataRecord {
    pub fn new(key: &str, value: &[u8]) -> Self {
        DataRecord {
            header: Header::new(key, value),
            key: key.to_string(),
            value: value.to_vec(),
        }
    }

    /// A record with an empty value marking a deletion.
    pub fn tombstone(key: &str) -> Self {
        Self::new(key, &[])
    }

    /// Total encoded length, header included.
    pub fn encoded_len(&self) -> usize {
        DATA_HEADER_SIZE + self.key.len() + self.value.len()
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        self.header.encode(buf);
        buf.extend_from_slice(self.key.as_bytes());
        buf.extend_from_slice(&self.value);
    }

    /// Decodes a record from a complete byte slice, as produced by reading
    /// `Meta::record_size` bytes at `Meta::record_offset`.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = Header::decode(bytes)?;
        let key_len = header.key_size as usize;
        let val_len = header.val_size as usize;

        let expected = DATA_HEADER_SIZE + key_len + val_len;
        if bytes.len() < expected {
            return Err(Error::CorruptRecord(format!(
                "data record needs {expected} bytes, got {}",
                bytes.len()
            )));
        }

        let key = std::str::from_utf8(&bytes[DATA_HEADER_SIZE..DATA_HEADER_SIZE + key_len])
            .map_err(|e| Error::CorruptRecord(format!("record key is not utf-8: {e}")))?
            .to_string();
        let value = bytes[DATA_HEADER_SIZE + key_len..expected].to_vec();

        Ok(DataRecord { header, key, value })
    }

    /// Decodes the next record from a sequential reader, as used by segment
    /// replay. Returns `Ok(None)` on a clean end of file; a tear inside a
    /// record fails with [`Error::CorruptRecord`].
    pub fn decode_from<R: Read>(reader: &mut R) -> Result<Option<Self>> {
        let mut header_bytes = [0u8; DATA_HEADER_SIZE];
        match read_exact_or_eof(reader, &mut header_bytes)? {
            ReadOutcome::Eof => return Ok(None),
            ReadOutcome::Short(n) => {
                return Err(Error::CorruptRecord(format!(
                    "torn data record header: {n} of {DATA_HEADER_SIZE} bytes"
                )))
            }
            ReadOutcome::Full => {}
        }

        let header = Header::decode(&header_bytes)?;
        let tail_len = header.key_size as usize + header.val_size as usize;
        let mut tail = vec![0u8; tail_len];
        reader
            .read_exact(&mut tail)
            .map_err(|e| Error::CorruptRecord(format!("torn data record body: {e}")))?;

        let mut full = header_bytes.to_vec();
        full.append(&mut tail);
        Self::decode(&full).map(Some)
    }

    /// True when the record carries an expiry that has already passed.
    pub fn is_expired(&self, now_ns: i64) -> bool {
        self.header.expiry != 0 && now_ns > self.header.expiry
    }

    /// Recomputes the CRC over the value and compares it with the header.
    pub fn is_checksum_valid(&self) -> bool {
        CRC32.checksum(&self.value) == self.header.crc
    }

    /// True when the record marks a deletion.
    pub fn is_tombstone(&self) -> bool {
        self.value.is_empty()
    }
}

pub(crate) enum ReadOutcome {
    Full,
    Short(usize),
    Eof,
}

/// Fills `buf` from the reader, distinguishing a clean EOF at the first byte
/// from a tear partway through.
pub(crate) fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<ReadOutcome> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(ReadOutcome::Eof),
            Ok(0) => return Ok(ReadOutcome::Short(filled)),
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(ReadOutcome::Full)
}
