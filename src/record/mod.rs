//! On-disk record formats.
//!
//! Both engines store records as `HEADER || KEY || VALUE` with a fixed-width
//! little-endian header, so readers can parse the header with a single sized
//! read before reading the variable tail. The hash-table engine uses
//! [`data::DataRecord`] (checksummed, timestamped); the LSM engine logs
//! [`command::CommandRecord`]s in its WAL and SSTables.

pub mod command;
pub mod data;

pub use command::{CommandHeader, CommandRecord, CommandType, COMMAND_HEADER_SIZE};
pub use data::{DataRecord, Header, DATA_HEADER_SIZE};
