//! Log-structured hash table engine (Bitcask style).
//!
//! All live data sits in append-only segment files `wal_file_<id>.db`; an
//! in-memory index maps every live key to the segment and byte range of its
//! current record. Writes append to the single active segment and upsert
//! the index; reads are one index lookup plus one positional read. Old
//! segments are read-only and reclaimed by a periodic merge compaction that
//! rewrites the live set into a fresh segment with id 0.
//!
//! ```text
//!              set/get/delete
//!                    │
//!            ┌───────▼────────┐
//!            │   key index    │ key -> (segment, offset, size)
//!            └───────┬────────┘
//!        ┌───────────┼─────────────────┐
//!  ┌─────▼─────┐ ┌───▼────────┐  ┌─────▼──────┐
//!  │  active   │ │ old seg 2  │  │ old seg 1  │   append-only .db files
//!  │ segment 3 │ │ (read-only)│  │ (read-only)│
//!  └───────────┘ └────────────┘  └────────────┘
//! ```
//!
//! On startup the index is loaded from its persisted file when present and
//! otherwise rebuilt by replaying segments in ascending id order.

pub mod index;
mod maintenance;
mod store;
pub mod tasks;

pub use index::{KeyDir, Meta};
pub use store::LshtStore;

/// Segment file name for a given id.
pub(crate) fn segment_file_name(id: u64) -> String {
    format!("wal_file_{id}.db")
}

/// Extension shared by all segment files.
pub(crate) const SEGMENT_EXTENSION: &str = "db";

/// Scratch file compaction merges into before the rename to id 0.
pub(crate) const MERGE_SCRATCH_FILE: &str = "wal_file.merged.wip";

/// Persisted index file name.
pub(crate) const INDEX_FILE: &str = "index";

/// Segment id reserved for compaction output.
pub(crate) const MERGED_SEGMENT_ID: u64 = 0;
