//! Command records for the LSM engine.
//!
//! The LSM engine logs whole operations rather than bare key-value pairs:
//! a SET carries the value, a DEL is a tombstone occupying a slot so that
//! lookups falling through to older SSTables can stop at the deletion.
//!
//! ## Layout
//!
//! ```text
//! +----------+--------+----------+----------+-------+-------+
//! | cmd_type | expiry | key_size | val_size | key   | value |
//! | u8       | i64    | i32      | i32      | bytes | bytes |
//! +----------+--------+----------+----------+-------+-------+
//! |<----- 17-byte header, little-endian --->|
//! ```
//!
//! Expiry is nanoseconds since the Unix epoch, zero meaning "never".

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Read;

use super::data::{read_exact_or_eof, ReadOutcome};
use crate::error::{Error, Result};

/// Serialized command header length in bytes.
pub const COMMAND_HEADER_SIZE: usize = 17;

/// Kind of operation a command record describes. `Get` exists for wire
/// symmetry but is never written to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandType {
    Get = 0,
    Set = 1,
    Del = 2,
}

impl TryFrom<u8> for CommandType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(CommandType::Get),
            1 => Ok(CommandType::Set),
            2 => Ok(CommandType::Del),
            other => Err(Error::CorruptRecord(format!(
                "unknown command type {other}"
            ))),
        }
    }
}

/// Fixed-width header preceding every command record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommandHeader {
    pub cmd_type: CommandType,
    pub expiry: i64,
    pub key_size: i32,
    pub val_size: i32,
}

impl CommandHeader {
    pub fn new(cmd_type: CommandType, key: &str, value: &[u8]) -> Self {
        CommandHeader {
            cmd_type,
            expiry: 0,
            key_size: key.len() as i32,
            val_size: value.len() as i32,
        }
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.write_u8(self.cmd_type as u8).unwrap();
        buf.write_i64::<LittleEndian>(self.expiry).unwrap();
        buf.write_i32::<LittleEndian>(self.key_size).unwrap();
        buf.write_i32::<LittleEndian>(self.val_size).unwrap();
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < COMMAND_HEADER_SIZE {
            return Err(Error::CorruptRecord(format!(
                "command header needs {COMMAND_HEADER_SIZE} bytes, got {}",
                bytes.len()
            )));
        }

        let mut reader = bytes;
        Ok(CommandHeader {
            cmd_type: CommandType::try_from(reader.read_u8()?)?,
            expiry: reader.read_i64::<LittleEndian>()?,
            key_size: reader.read_i32::<LittleEndian>()?,
            val_size: reader.read_i32::<LittleEndian>()?,
        })
    }
}

/// A logged operation, as stored in the WAL, the memtable, and SSTables.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandRecord {
    pub header: CommandHeader,
    pub key: String,
    pub value: Vec<u8>,
}

impl CommandRecord {
    /// A SET command carrying `value`.
    pub fn set(key: &str, value: &[u8]) -> Self {
        CommandRecord {
            header: CommandHeader::new(CommandType::Set, key, value),
            key: key.to_string(),
            value: value.to_vec(),
        }
    }

    /// A DEL tombstone.
    pub fn del(key: &str) -> Self {
        CommandRecord {
            header: CommandHeader::new(CommandType::Del, key, &[]),
            key: key.to_string(),
            value: Vec::new(),
        }
    }

    /// Total encoded length, header included.
    pub fn encoded_len(&self) -> usize {
        COMMAND_HEADER_SIZE + self.key.len() + self.value.len()
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        self.header.encode(buf);
        buf.extend_from_slice(self.key.as_bytes());
        buf.extend_from_slice(&self.value);
    }

    /// Decodes the next command from a sequential reader; each record is
    /// self-delimiting via its fixed header. Returns `Ok(None)` on a clean
    /// end of input; a tear inside a record fails with
    /// [`Error::CorruptRecord`].
    pub fn decode_from<R: Read>(reader: &mut R) -> Result<Option<Self>> {
        let mut header_bytes = [0u8; COMMAND_HEADER_SIZE];
        match read_exact_or_eof(reader, &mut header_bytes)? {
            ReadOutcome::Eof => return Ok(None),
            ReadOutcome::Short(n) => {
                return Err(Error::CorruptRecord(format!(
                    "torn command header: {n} of {COMMAND_HEADER_SIZE} bytes"
                )))
            }
            ReadOutcome::Full => {}
        }

        let header = CommandHeader::decode(&header_bytes)?;
        let key_len = header.key_size as usize;
        let val_len = header.val_size as usize;

        let mut tail = vec![0u8; key_len + val_len];
        reader
            .read_exact(&mut tail)
            .map_err(|e| Error::CorruptRecord(format!("torn command body: {e}")))?;

        let key = std::str::from_utf8(&tail[..key_len])
            .map_err(|e| Error::CorruptRecord(format!("command key is not utf-8: {e}")))?
            .to_string();
        let value = tail[key_len..].to_vec();

        Ok(Some(CommandRecord { header, key, value }))
    }

    /// True when the command carries an expiry that has already passed.
    pub fn is_expired(&self, now_ns: i64) -> bool {
        self.header.expiry != 0 && now_ns > self.header.expiry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock;

    #[test]
    fn test_header_roundtrip() {
        let header = CommandHeader {
            cmd_type: CommandType::Set,
            expiry: 42,
            key_size: 3,
            val_size: 9,
        };

        let mut buf = Vec::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), COMMAND_HEADER_SIZE);

        let decoded = CommandHeader::decode(&buf).expect("decode failed");
        assert_eq!(header, decoded);
    }

    #[test]
    fn test_set_and_del_roundtrip() {
        let mut buf = Vec::new();
        CommandRecord::set("city", b"kigali").encode(&mut buf);
        CommandRecord::del("city").encode(&mut buf);

        let mut reader = buf.as_slice();
        let set = CommandRecord::decode_from(&mut reader).unwrap().unwrap();
        assert_eq!(set.header.cmd_type, CommandType::Set);
        assert_eq!(set.key, "city");
        assert_eq!(set.value, b"kigali");

        let del = CommandRecord::decode_from(&mut reader).unwrap().unwrap();
        assert_eq!(del.header.cmd_type, CommandType::Del);
        assert!(del.value.is_empty());

        assert!(CommandRecord::decode_from(&mut reader).unwrap().is_none());
    }

    #[test]
    fn test_unknown_command_type_fails() {
        let mut buf = Vec::new();
        CommandRecord::set("k", b"v").encode(&mut buf);
        buf[0] = 7;

        let mut reader = buf.as_slice();
        assert!(matches!(
            CommandRecord::decode_from(&mut reader),
            Err(Error::CorruptRecord(_))
        ));
    }

    #[test]
    fn test_torn_command_fails() {
        let mut buf = Vec::new();
        CommandRecord::set("key", b"value").encode(&mut buf);
        buf.truncate(buf.len() - 1);

        let mut reader = buf.as_slice();
        assert!(matches!(
            CommandRecord::decode_from(&mut reader),
            Err(Error::CorruptRecord(_))
        ));
    }

    #[test]
    fn test_expiry() {
        let mut record = CommandRecord::set("k", b"v");
        let now = clock::now_nanos();
        assert!(!record.is_expired(now));

        record.header.expiry = now - 1;
        assert!(record.is_expired(now));
    }
}
