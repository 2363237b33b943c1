//! Emberdb is an embeddable, persistent key-value store with two pluggable
//! storage engines behind one operation surface:
//!
//! - [`store::lsht::LshtStore`], a Bitcask-style log-structured hash table:
//!   append-only segments, an in-memory key index, size-triggered rotation
//!   and periodic merge compaction.
//! - [`store::lsm::LsmStore`], a log-structured merge tree: WAL-backed
//!   memtable, immutable rotation slot, and sparse-indexed SSTables.
//!
//! Both engines accept opaque byte values under string keys, support
//! optional per-key expiry, and recover their state from on-disk artifacts
//! on reopen. A data directory is owned by a single process at a time,
//! enforced by an advisory file lock.
//!
//! The [`server`] module exposes either engine over a Redis-style wire
//! protocol; the `emberdb-server` binary wires it together.

pub mod clock;
pub mod config;
pub mod datafile;
pub mod encoding;
pub mod error;
pub mod flock;
pub mod record;
pub mod scheduler;
pub mod server;
pub mod store;

pub use config::Config;
pub use error::{Error, Result};
pub use store::{open_store, Engine, Store};
