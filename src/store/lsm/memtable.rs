//! In-memory sorted table of command records.
//!
//! Backed by a concurrent skip list so readers never block each other; the
//! engine's own lock already serializes writers. Keys are ordered by byte
//! order. The stored value is a whole command record rather than bare
//! bytes: a DEL occupies a slot, so a lookup that finds one can stop
//! without consulting older SSTables.

use crossbeam_skiplist::SkipMap;
use std::ops::Bound;

use crate::record::CommandRecord;

/// Ordered map of key to latest command record.
pub struct Memtable {
    entries: SkipMap<String, CommandRecord>,
}

impl Default for Memtable {
    fn default() -> Self {
        Self::new()
    }
}

impl Memtable {
    pub fn new() -> Self {
        Self {
            entries: SkipMap::new(),
        }
    }

    /// Inserts or replaces the record for its key.
    pub fn put(&self, record: CommandRecord) {
        self.entries.insert(record.key.clone(), record);
    }

    /// Latest record for `key`, if any.
    pub fn get(&self, key: &str) -> Option<CommandRecord> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Smallest key in the table.
    pub fn first_key(&self) -> Option<String> {
        self.entries.front().map(|entry| entry.key().clone())
    }

    /// Greatest key in the table.
    pub fn last_key(&self) -> Option<String> {
        self.entries.back().map(|entry| entry.key().clone())
    }

    /// Greatest key less than or equal to `key`.
    pub fn floor(&self, key: &str) -> Option<String> {
        self.entries
            .upper_bound(Bound::Included(key))
            .map(|entry| entry.key().clone())
    }

    /// Smallest key greater than or equal to `key`.
    pub fn ceiling(&self, key: &str) -> Option<String> {
        self.entries
            .lower_bound(Bound::Included(key))
            .map(|entry| entry.key().clone())
    }

    /// In-order iteration over `(key, record)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (String, CommandRecord)> + '_ {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
    }
}
