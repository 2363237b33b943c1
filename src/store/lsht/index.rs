//! In-memory key index for the hash table engine.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::encoding;
use crate::error::{Error, Result};

/// Location of a key's current record.
///
/// `record_offset` is the byte offset the record *starts* at;
/// `record_size` is its total encoded length, header included.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    pub timestamp: i64,
    pub file_id: u64,
    pub record_offset: u64,
    pub record_size: u64,
}

/// Mapping of every live key to its current record location.
///
/// Persisted between runs as a bincode blob; when the file is absent the
/// engine rebuilds the map by replaying segments in ascending id order.
#[derive(Debug, Default, Clone)]
pub struct KeyDir {
    entries: HashMap<String, Meta>,
}

impl KeyDir {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Result<Meta> {
        self.entries.get(key).copied().ok_or(Error::KeyMissing)
    }

    pub fn put(&mut self, key: String, meta: Meta) {
        self.entries.insert(key, meta);
    }

    pub fn remove(&mut self, key: &str) {
        self.entries.remove(key);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Meta)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    /// Serializes the map to `path`, replacing any previous file.
    pub fn persist<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        use std::io::Write;

        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        encoding::serialize_into(&mut writer, &self.entries)?;
        writer.flush()?;
        Ok(())
    }

    /// Loads a previously persisted map from `path`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let entries = encoding::deserialize_from(BufReader::new(file))?;
        Ok(Self { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn meta(file_id: u64, offset: u64, size: u64) -> Meta {
        Meta {
            timestamp: 1,
            file_id,
            record_offset: offset,
            record_size: size,
        }
    }

    #[test]
    fn test_basic_operations() {
        let mut index = KeyDir::new();
        assert!(index.is_empty());
        assert_eq!(index.get("a"), Err(Error::KeyMissing));

        index.put("a".into(), meta(1, 0, 40));
        index.put("b".into(), meta(1, 40, 44));
        assert_eq!(index.len(), 2);
        assert!(index.contains("a"));
        assert_eq!(index.get("a").unwrap().record_size, 40);

        // Later puts overwrite earlier ones.
        index.put("a".into(), meta(2, 0, 48));
        assert_eq!(index.get("a").unwrap().file_id, 2);

        index.remove("a");
        assert_eq!(index.get("a"), Err(Error::KeyMissing));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_persist_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index");

        let mut index = KeyDir::new();
        for i in 0..100u64 {
            index.put(format!("key_{i}"), meta(i % 3, i * 50, 50));
        }
        index.persist(&path).unwrap();

        let loaded = KeyDir::load(&path).unwrap();
        assert_eq!(loaded.len(), 100);
        for i in 0..100u64 {
            assert_eq!(loaded.get(&format!("key_{i}")).unwrap(), index.get(&format!("key_{i}")).unwrap());
        }
    }

    #[test]
    fn test_load_missing_file_fails() {
        let dir = TempDir::new().unwrap();
        assert!(KeyDir::load(dir.path().join("absent")).is_err());
    }
}
