//! Log-structured merge tree engine.
//!
//! Writes land in a WAL-backed in-memory memtable of command records. When
//! the memtable crosses its entry watermark it rotates into a single
//! immutable slot and is flushed to an SSTable; the WAL is cycled through a
//! `temporary_wal_file` rename so a crash between the rotation and the
//! flush loses nothing.
//!
//! ```text
//!    set/delete ──> current_wal_file ──> active memtable
//!                                             │ rotate at watermark
//!                                       prev_immutable
//!                                             │ flush
//!                                  data_file_<nanots>.sst (oldest..newest)
//! ```
//!
//! Reads fall through active -> prev_immutable -> SSTables newest-first; a
//! DEL record anywhere along the way is definitive and reports the key as
//! missing.

pub mod memtable;
pub mod sstable;
mod store;
pub mod tasks;

pub use memtable::Memtable;
pub use sstable::SsTable;
pub use store::LsmStore;

/// WAL currently receiving writes.
pub(crate) const CURRENT_WAL_FILE: &str = "current_wal_file";

/// WAL parked between memtable rotation and SSTable flush.
pub(crate) const TEMPORARY_WAL_FILE: &str = "temporary_wal_file";

/// Extension shared by all SSTable files.
pub(crate) const SSTABLE_EXTENSION: &str = "sst";

/// SSTable file name for a creation timestamp.
pub(crate) fn sstable_file_name(created_ns: i64) -> String {
    format!("data_file_{created_ns}.sst")
}

/// Parses the creation timestamp out of an SSTable file name.
pub(crate) fn parse_sstable_timestamp(name: &str) -> Option<i64> {
    name.strip_prefix("data_file_")?
        .strip_suffix(".sst")?
        .parse()
        .ok()
}
