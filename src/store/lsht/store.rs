use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, RwLock};
use std::time::SystemTime;

use super::{index::Meta, segment_file_name, KeyDir, INDEX_FILE, SEGMENT_EXTENSION};
use crate::clock;
use crate::config::Config;
use crate::datafile::{DataFile, Mode};
use crate::error::{Error, Result};
use crate::flock::{FileLock, LOCK_FILE};
use crate::record::{DataRecord, Header, DATA_HEADER_SIZE};
use crate::store::{compile_pattern, parse_int, validate_entry, Store};

/// The log-structured hash table engine.
///
/// A single reader-writer lock covers the index, the active segment and the
/// old-segments map. Reads take the read side; every mutation, rotation and
/// compaction takes the write side.
pub struct LshtStore {
    pub(super) config: Config,
    lock: Mutex<Option<FileLock>>,
    pub(super) inner: RwLock<Inner>,
}

pub(super) struct Inner {
    pub(super) index: KeyDir,
    pub(super) active: DataFile,
    pub(super) old_segments: HashMap<u64, DataFile>,
}

impl LshtStore {
    /// Opens (creating if necessary) the engine over `config.directory`.
    ///
    /// Existing segments are opened read-only; a fresh active segment is
    /// opened at the next unused id (id 0 is reserved for compaction
    /// output). The key index is loaded from its persisted file when
    /// present and otherwise rebuilt by replaying segments in ascending id
    /// order.
    pub fn open(config: Config) -> Result<Self> {
        fs::create_dir_all(&config.directory)?;
        let lock = FileLock::acquire(config.directory.join(LOCK_FILE))?;

        let mut segment_ids = list_segment_ids(&config.directory)?;
        segment_ids.sort_unstable();

        let mut old_segments = HashMap::new();
        for &id in &segment_ids {
            let path = config.directory.join(segment_file_name(id));
            old_segments.insert(id, DataFile::open(path, id, Mode::ReadOnly)?);
        }

        let active_id = segment_ids.last().map(|id| id + 1).unwrap_or(1);
        let active = DataFile::open(
            config.directory.join(segment_file_name(active_id)),
            active_id,
            Mode::ReadWrite,
        )?;

        let index_path = config.directory.join(INDEX_FILE);
        let index = if index_path.exists() {
            KeyDir::load(&index_path)?
        } else {
            rebuild_index(&config.directory, &segment_ids)?
        };

        tracing::info!(
            dir = %config.directory.display(),
            segments = segment_ids.len(),
            active = active_id,
            keys = index.len(),
            "opened log-structured hash table store"
        );

        Ok(Self {
            config,
            lock: Mutex::new(Some(lock)),
            inner: RwLock::new(Inner {
                index,
                active,
                old_segments,
            }),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn index_path(&self) -> PathBuf {
        self.config.directory.join(INDEX_FILE)
    }

    /// Reads and fully validates the record for `key`: present, unexpired,
    /// checksum intact.
    fn get_validated(&self, inner: &Inner, key: &str) -> Result<Vec<u8>> {
        let record = read_record(inner, key)?;

        if record.is_expired(clock::now_nanos()) {
            return Err(Error::KeyExpired);
        }
        if !record.is_checksum_valid() {
            return Err(Error::ChecksumInvalid);
        }

        Ok(record.value)
    }
}

impl Store for LshtStore {
    fn get(&self, key: &str) -> Result<Vec<u8>> {
        let inner = self.inner.read()?;
        self.get_validated(&inner, key)
    }

    fn mget(&self, keys: &[String]) -> Vec<Result<Vec<u8>>> {
        // Deliberately the write side until this path is proven read-only.
        let inner = match self.inner.write() {
            Ok(inner) => inner,
            Err(e) => {
                return keys
                    .iter()
                    .map(|_| Err(Error::Io(e.to_string())))
                    .collect()
            }
        };
        keys.iter()
            .map(|key| self.get_validated(&inner, key))
            .collect()
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        validate_entry(key, value)?;
        let mut inner = self.inner.write()?;
        append_record(&mut inner, SegmentTarget::Active, key, value, 0)
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut inner = self.inner.write()?;

        // The on-disk tombstone survives so a replay-based index rebuild
        // observes the deletion; the in-memory entry goes away now.
        append_record(&mut inner, SegmentTarget::Active, key, &[], 0)?;
        inner.index.remove(key);
        Ok(())
    }

    fn exists(&self, key: &str) -> bool {
        self.inner
            .read()
            .map(|inner| inner.index.contains(key))
            .unwrap_or(false)
    }

    fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let matcher = compile_pattern(pattern)?;
        let inner = self.inner.read()?;
        Ok(inner
            .index
            .keys()
            .filter(|key| matcher.as_ref().map_or(true, |re| re.is_match(key)))
            .cloned()
            .collect())
    }

    fn ttl(&self, key: &str) -> Result<i64> {
        let inner = self.inner.read()?;
        let record = read_record(&inner, key)?;

        if record.header.expiry == 0 {
            return Ok(-1);
        }
        Ok(clock::seconds_until(record.header.expiry).unwrap_or(-1))
    }

    fn expire(&self, key: &str, at: SystemTime) -> Result<()> {
        let mut inner = self.inner.write()?;
        let record = read_record(&inner, key)?;
        append_record(
            &mut inner,
            SegmentTarget::Active,
            key,
            &record.value,
            clock::nanos_since_epoch(at),
        )
    }

    fn setex(&self, key: &str, value: &[u8], ttl_secs: i64) -> Result<()> {
        validate_entry(key, value)?;
        let mut inner = self.inner.write()?;
        append_record(
            &mut inner,
            SegmentTarget::Active,
            key,
            value,
            clock::deadline_nanos(ttl_secs),
        )
    }

    fn persist(&self, key: &str) -> Result<()> {
        let mut inner = self.inner.write()?;
        let record = read_record(&inner, key)?;
        append_record(&mut inner, SegmentTarget::Active, key, &record.value, 0)
    }

    fn incr(&self, key: &str) -> Result<i64> {
        self.add(key, 1)
    }

    fn decr(&self, key: &str) -> Result<i64> {
        self.add(key, -1)
    }

    fn sync(&self) -> Result<()> {
        let inner = self.inner.read()?;
        inner.active.sync()
    }

    fn close(&self) -> Result<()> {
        let inner = self.inner.write()?;

        inner.index.persist(self.index_path())?;
        inner.active.sync()?;
        inner.active.close()?;
        for segment in inner.old_segments.values() {
            segment.close()?;
        }

        if let Some(lock) = self.lock.lock()?.take() {
            lock.release()?;
        }

        tracing::info!(dir = %self.config.directory.display(), "closed store");
        Ok(())
    }
}

impl LshtStore {
    fn add(&self, key: &str, delta: i64) -> Result<i64> {
        let mut inner = self.inner.write()?;
        let current = self.get_validated(&inner, key)?;
        let next = parse_int(&current)? + delta;
        append_record(
            &mut inner,
            SegmentTarget::Active,
            key,
            next.to_string().as_bytes(),
            0,
        )?;
        Ok(next)
    }
}

impl Drop for LshtStore {
    fn drop(&mut self) {
        // Best-effort clean shutdown for embedders that never call close().
        if self.lock.lock().map(|l| l.is_some()).unwrap_or(false) {
            let _ = self.close();
        }
    }
}

/// Which file an internal append goes to: the active segment, or the merge
/// scratch file during compaction.
pub(super) enum SegmentTarget<'a> {
    Active,
    Merge(&'a DataFile),
}

/// Builds a record for `key`/`value`, appends it to the target segment and
/// upserts the index entry with the offset the record started at.
pub(super) fn append_record(
    inner: &mut Inner,
    target: SegmentTarget,
    key: &str,
    value: &[u8],
    expiry_ns: i64,
) -> Result<()> {
    let mut record = DataRecord::new(key, value);
    record.header.expiry = expiry_ns;

    let mut buf = Vec::with_capacity(record.encoded_len());
    record.encode(&mut buf);

    let file = match target {
        SegmentTarget::Active => &inner.active,
        SegmentTarget::Merge(file) => file,
    };
    let offset = file.append(&buf)?;

    inner.index.put(
        key.to_string(),
        Meta {
            timestamp: record.header.ts,
            file_id: file.id(),
            record_offset: offset,
            record_size: buf.len() as u64,
        },
    );
    Ok(())
}

/// Looks `key` up in the index and reads its record from the owning
/// segment. Performs no expiry or checksum validation.
pub(super) fn read_record(inner: &Inner, key: &str) -> Result<DataRecord> {
    let meta = inner.index.get(key)?;
    let file = segment_for(inner, &meta)?;

    // A crash can tear the tail of a segment; read what is actually there
    // and let checksum validation classify a short record.
    let available = file.size()?.saturating_sub(meta.record_offset);
    if (available as usize) < DATA_HEADER_SIZE {
        return Err(Error::CorruptRecord(format!(
            "record at offset {} of segment {} is cut short",
            meta.record_offset,
            meta.file_id
        )));
    }

    let len = meta.record_size.min(available) as usize;
    let mut buf = vec![0u8; len];
    file.read_at(&mut buf, meta.record_offset)?;

    let header = Header::decode(&buf)?;
    let value_offset = buf
        .len()
        .saturating_sub(header.val_size as usize)
        .max(DATA_HEADER_SIZE);

    Ok(DataRecord {
        header,
        key: key.to_string(),
        value: buf[value_offset..].to_vec(),
    })
}

fn segment_for<'a>(inner: &'a Inner, meta: &Meta) -> Result<&'a DataFile> {
    if meta.file_id == inner.active.id() {
        return Ok(&inner.active);
    }
    inner
        .old_segments
        .get(&meta.file_id)
        .ok_or(Error::DataFileNotFound(meta.file_id))
}

/// Segment ids present in the directory, unsorted.
pub(super) fn list_segment_ids(dir: &std::path::Path) -> Result<Vec<u64>> {
    let mut ids = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(SEGMENT_EXTENSION) {
            continue;
        }
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name,
            None => continue,
        };
        if let Some(id) = name
            .strip_prefix("wal_file_")
            .and_then(|rest| rest.strip_suffix(".db"))
            .and_then(|id| id.parse::<u64>().ok())
        {
            ids.push(id);
        }
    }
    Ok(ids)
}

/// Replays segments in ascending id order, letting later records overwrite
/// earlier ones and tombstones drop keys.
fn rebuild_index(dir: &std::path::Path, segment_ids: &[u64]) -> Result<KeyDir> {
    use std::io::BufReader;

    let mut index = KeyDir::new();
    for &id in segment_ids {
        let path = dir.join(segment_file_name(id));
        let mut reader = BufReader::new(fs::File::open(&path)?);
        let mut offset = 0u64;

        loop {
            match DataRecord::decode_from(&mut reader) {
                Ok(Some(record)) => {
                    let len = record.encoded_len() as u64;
                    if record.is_tombstone() {
                        index.remove(&record.key);
                    } else {
                        index.put(
                            record.key,
                            Meta {
                                timestamp: record.header.ts,
                                file_id: id,
                                record_offset: offset,
                                record_size: len,
                            },
                        );
                    }
                    offset += len;
                }
                Ok(None) => break,
                Err(e) => {
                    // A torn tail record is the expected shape of a crash
                    // mid-append; everything before it is intact.
                    tracing::warn!(
                        segment = id,
                        offset,
                        error = %e,
                        "stopping index rebuild at torn record"
                    );
                    break;
                }
            }
        }
    }

    tracing::info!(keys = index.len(), "rebuilt index from segments");
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, SeekFrom, Write};
    use std::time::Duration;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> LshtStore {
        LshtStore::open(Config::new(dir.path())).expect("failed to open store")
    }

    #[test]
    fn test_set_get_delete_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.set("foo", b"bar").unwrap();
        assert_eq!(store.get("foo").unwrap(), b"bar");

        store.delete("foo").unwrap();
        assert_eq!(store.get("foo"), Err(Error::KeyMissing));

        // Deleting an absent key still succeeds.
        store.delete("never-existed").unwrap();
    }

    #[test]
    fn test_validation_errors() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        assert_eq!(store.set("", b"v"), Err(Error::KeyEmpty));
        assert_eq!(store.set("k", b""), Err(Error::ValueEmpty));
    }

    #[test]
    fn test_last_write_wins() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        for i in 0..10 {
            store.set("counter", format!("{i}").as_bytes()).unwrap();
        }
        assert_eq!(store.get("counter").unwrap(), b"9");

        store.delete("counter").unwrap();
        store.set("counter", b"fresh").unwrap();
        assert_eq!(store.get("counter").unwrap(), b"fresh");
    }

    #[test]
    fn test_mget_tags_results_per_key() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.set("a", b"1").unwrap();
        store.set("c", b"3").unwrap();

        let results = store.mget(&["a".into(), "b".into(), "c".into()]);
        assert_eq!(results[0], Ok(b"1".to_vec()));
        assert_eq!(results[1], Err(Error::KeyMissing));
        assert_eq!(results[2], Ok(b"3".to_vec()));
    }

    #[test]
    fn test_exists_and_keys() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.set("user:1", b"ada").unwrap();
        store.set("user:2", b"grace").unwrap();
        store.set("session:9", b"tok").unwrap();

        assert!(store.exists("user:1"));
        assert!(!store.exists("user:3"));

        let mut users = store.keys("^user:").unwrap();
        users.sort();
        assert_eq!(users, vec!["user:1".to_string(), "user:2".to_string()]);

        assert_eq!(store.all_keys().unwrap().len(), 3);
        assert!(matches!(store.keys("["), Err(Error::InvalidPattern(_))));
    }

    #[test]
    fn test_expiry_lifecycle() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.set("k", b"v").unwrap();
        assert_eq!(store.ttl("k").unwrap(), -1);

        // Expire in the near future, then wait it out.
        store
            .expire("k", SystemTime::now() + Duration::from_millis(80))
            .unwrap();
        assert_eq!(store.get("k").unwrap(), b"v");

        std::thread::sleep(Duration::from_millis(160));
        assert_eq!(store.get("k"), Err(Error::KeyExpired));
        assert_eq!(store.ttl("k").unwrap(), -1);
    }

    #[test]
    fn test_setex_and_persist() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.setex("k", b"v", 120).unwrap();
        let ttl = store.ttl("k").unwrap();
        assert!((118..=120).contains(&ttl), "ttl was {ttl}");

        store.persist("k").unwrap();
        assert_eq!(store.ttl("k").unwrap(), -1);
        assert_eq!(store.get("k").unwrap(), b"v");
    }

    #[test]
    fn test_incr_decr() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.set("n", b"41").unwrap();
        assert_eq!(store.incr("n").unwrap(), 42);
        assert_eq!(store.decr("n").unwrap(), 41);
        assert_eq!(store.get("n").unwrap(), b"41");

        store.set("s", b"not a number").unwrap();
        assert_eq!(store.incr("s"), Err(Error::NotAnInteger));
        assert_eq!(store.incr("missing"), Err(Error::KeyMissing));
    }

    #[test]
    fn test_restart_preserves_data() {
        let dir = TempDir::new().unwrap();

        {
            let store = open_store(&dir);
            for i in 0..1000 {
                store
                    .set(&format!("key_{i:04}"), format!("value_{i}").as_bytes())
                    .unwrap();
            }
            store.delete("key_0500").unwrap();
            store.close().unwrap();
        }

        let store = open_store(&dir);
        for i in 0..1000 {
            let key = format!("key_{i:04}");
            if i == 500 {
                assert_eq!(store.get(&key), Err(Error::KeyMissing));
            } else {
                assert_eq!(store.get(&key).unwrap(), format!("value_{i}").as_bytes());
            }
        }
    }

    #[test]
    fn test_restart_without_index_rebuilds_from_segments() {
        let dir = TempDir::new().unwrap();

        {
            let store = open_store(&dir);
            store.set("kept", b"yes").unwrap();
            store.set("updated", b"old").unwrap();
            store.set("updated", b"new").unwrap();
            store.set("dropped", b"gone").unwrap();
            store.delete("dropped").unwrap();
            store.close().unwrap();
        }

        // Force the replay path.
        fs::remove_file(dir.path().join(INDEX_FILE)).unwrap();

        let store = open_store(&dir);
        assert_eq!(store.get("kept").unwrap(), b"yes");
        assert_eq!(store.get("updated").unwrap(), b"new");
        assert_eq!(store.get("dropped"), Err(Error::KeyMissing));
    }

    #[test]
    fn test_second_opener_is_locked_out() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        match LshtStore::open(Config::new(dir.path())) {
            Err(Error::DirectoryLocked(_)) => {}
            other => panic!("expected DirectoryLocked, got {:?}", other.map(|_| ())),
        }

        store.close().unwrap();
        let reopened = LshtStore::open(Config::new(dir.path())).unwrap();
        reopened.close().unwrap();
    }

    #[test]
    fn test_truncated_tail_reports_checksum_error() {
        let dir = TempDir::new().unwrap();

        {
            let store = open_store(&dir);
            store.set("intact", b"first-value").unwrap();
            store.set("torn", b"second-value").unwrap();
            store.close().unwrap();
        }

        // Chop the final byte off the segment holding both records.
        let path = dir.path().join(segment_file_name(1));
        let file = fs::OpenOptions::new().write(true).open(&path).unwrap();
        let len = file.metadata().unwrap().len();
        file.set_len(len - 1).unwrap();
        drop(file);

        let store = open_store(&dir);
        assert_eq!(store.get("torn"), Err(Error::ChecksumInvalid));
        assert_eq!(store.get("intact").unwrap(), b"first-value");
    }

    #[test]
    fn test_corrupted_value_reports_checksum_error() {
        let dir = TempDir::new().unwrap();

        {
            let store = open_store(&dir);
            store.set("k", b"pristine-bytes").unwrap();
            store.close().unwrap();
        }

        // Flip a byte inside the record's value region.
        let path = dir.path().join(segment_file_name(1));
        let mut file = fs::OpenOptions::new().write(true).read(true).open(&path).unwrap();
        file.seek(SeekFrom::End(-3)).unwrap();
        file.write_all(b"X").unwrap();
        drop(file);

        let store = open_store(&dir);
        assert_eq!(store.get("k"), Err(Error::ChecksumInvalid));
    }
}
