//! Bincode helpers for structures persisted as self-describing blobs,
//! currently only the hash-table engine's key index. On-disk record headers
//! use hand-rolled little-endian layouts instead (see [`crate::record`]).

use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

use crate::error::Result;

/// Serialize a value into a writer using bincode.
pub fn serialize_into<T: Serialize, W: Write>(writer: W, value: &T) -> Result<()> {
    bincode::serialize_into(writer, value)?;
    Ok(())
}

/// Deserialize a value from a reader using bincode.
pub fn deserialize_from<T: for<'a> Deserialize<'a>, R: Read>(reader: R) -> Result<T> {
    Ok(bincode::deserialize_from(reader)?)
}
