use std::collections::BTreeMap;
use std::fs;
use std::io::BufReader;
use std::path::Path;
use std::sync::{Mutex, RwLock};
use std::time::SystemTime;

use super::{
    parse_sstable_timestamp, sstable_file_name, Memtable, SsTable, CURRENT_WAL_FILE,
    SSTABLE_EXTENSION, TEMPORARY_WAL_FILE,
};
use crate::clock;
use crate::config::Config;
use crate::datafile::{sync_dir, DataFile, Mode};
use crate::error::{Error, Result};
use crate::flock::{FileLock, LOCK_FILE};
use crate::record::{CommandRecord, CommandType};
use crate::store::{compile_pattern, parse_int, validate_entry, Store};

/// The log-structured merge tree engine.
///
/// A single reader-writer lock covers the memtables, the SSTable list and
/// the WAL handle. Reads take the read side; every mutation, including the
/// memtable rotation it may trigger, takes the write side.
pub struct LsmStore {
    pub(super) config: Config,
    lock: Mutex<Option<FileLock>>,
    pub(super) inner: RwLock<LsmInner>,
}

pub(super) struct LsmInner {
    pub(super) active: Memtable,
    pub(super) prev_immutable: Option<Memtable>,
    /// Oldest first; reads scan in reverse.
    pub(super) sstables: Vec<SsTable>,
    pub(super) wal: DataFile,
}

impl LsmStore {
    /// Opens (creating if necessary) the engine over `config.directory`.
    ///
    /// The WAL files are replayed into the active memtable (the temporary
    /// WAL first, since its records predate the current one) and SSTables
    /// are loaded in ascending creation order.
    pub fn open(config: Config) -> Result<Self> {
        fs::create_dir_all(&config.directory)?;
        let lock = FileLock::acquire(config.directory.join(LOCK_FILE))?;

        let active = Memtable::new();
        let mut tables_by_ts = BTreeMap::new();
        let mut has_current_wal = false;
        let mut has_temp_wal = false;

        for entry in fs::read_dir(&config.directory)? {
            let path = entry?.path();
            if path.is_dir() {
                tracing::warn!(path = %path.display(), "skipping directory inside the store");
                continue;
            }
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name,
                None => continue,
            };

            match name {
                CURRENT_WAL_FILE => has_current_wal = true,
                TEMPORARY_WAL_FILE => has_temp_wal = true,
                _ if path.extension().and_then(|e| e.to_str()) == Some(SSTABLE_EXTENSION) => {
                    let created_ns = parse_sstable_timestamp(name).ok_or_else(|| {
                        Error::CorruptRecord(format!("unparseable SSTable name: {name}"))
                    })?;
                    tables_by_ts.insert(created_ns, SsTable::open(&path)?);
                }
                _ => {}
            }
        }

        if has_temp_wal {
            replay_wal(&config.directory.join(TEMPORARY_WAL_FILE), &active)?;
        }
        let current_path = config.directory.join(CURRENT_WAL_FILE);
        if has_current_wal {
            let valid_len = replay_wal(&current_path, &active)?;
            let disk_len = fs::metadata(&current_path)?.len();
            if valid_len < disk_len {
                // Drop the torn tail so new appends follow the last whole
                // record instead of landing after the garbage.
                fs::OpenOptions::new()
                    .write(true)
                    .open(&current_path)?
                    .set_len(valid_len)?;
            }
        }

        let wal = DataFile::open(&current_path, 0, Mode::WriteOnly)?;

        let sstables: Vec<SsTable> = tables_by_ts.into_values().collect();
        tracing::info!(
            dir = %config.directory.display(),
            sstables = sstables.len(),
            replayed_keys = active.len(),
            "opened LSM store"
        );

        Ok(Self {
            config,
            lock: Mutex::new(Some(lock)),
            inner: RwLock::new(LsmInner {
                active,
                prev_immutable: None,
                sstables,
                wal,
            }),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Rotates the active memtable if it has reached the entry watermark.
    /// Also runs as a periodic safety net behind the inline check in the
    /// write path.
    pub fn maybe_rotate(&self) -> Result<()> {
        let mut inner = self.inner.write()?;
        if inner.active.len() >= self.config.max_memtable_entries {
            self.rotate(&mut inner)?;
        }
        Ok(())
    }

    /// Moves the active memtable into the immutable slot, cycles the WAL
    /// through `temporary_wal_file`, flushes the immutable memtable to a
    /// new SSTable and finally deletes the parked WAL.
    ///
    /// If the flush fails the memtable stays in the immutable slot and the
    /// parked WAL stays on disk, so neither reads nor crash recovery lose
    /// anything.
    fn rotate(&self, inner: &mut LsmInner) -> Result<()> {
        if inner.active.is_empty() {
            return Ok(());
        }
        // A failed earlier flush leaves the immutable slot occupied and its
        // WAL parked; retry that flush before parking another memtable.
        self.flush_immutable(inner)?;

        let dir = &self.config.directory;
        let current_path = dir.join(CURRENT_WAL_FILE);
        let temp_path = dir.join(TEMPORARY_WAL_FILE);

        inner.prev_immutable = Some(std::mem::take(&mut inner.active));

        inner.wal.sync()?;
        inner.wal.close()?;
        // A temporary WAL can only still exist here if a prior process
        // crashed after the rename; its records were replayed on open.
        if temp_path.exists() {
            fs::remove_file(&temp_path)?;
        }
        fs::rename(&current_path, &temp_path)?;
        inner.wal = DataFile::open(&current_path, 0, Mode::WriteOnly)?;
        sync_dir(dir)?;

        self.flush_immutable(inner)
    }

    /// Builds an SSTable from the immutable memtable, if one is pending,
    /// then clears the slot and deletes the parked WAL it came from.
    fn flush_immutable(&self, inner: &mut LsmInner) -> Result<()> {
        let immutable = match inner.prev_immutable.as_ref() {
            Some(immutable) => immutable,
            None => return Ok(()),
        };

        let dir = &self.config.directory;
        let mut created_ns = clock::now_nanos();
        let mut table_path = dir.join(sstable_file_name(created_ns));
        // Nanosecond timestamps can still collide on coarse clocks; bump
        // until the name is free so a later table always sorts later.
        while table_path.exists() {
            created_ns += 1;
            table_path = dir.join(sstable_file_name(created_ns));
        }

        let table = SsTable::build(&table_path, self.config.sstable_batch_size, immutable)?;
        inner.sstables.push(table);
        inner.prev_immutable = None;

        let temp_path = dir.join(TEMPORARY_WAL_FILE);
        if temp_path.exists() {
            fs::remove_file(&temp_path)?;
        }

        tracing::info!(
            table = %table_path.display(),
            sstables = inner.sstables.len(),
            "flushed memtable to SSTable"
        );
        Ok(())
    }

    /// Appends the command to the WAL, mirrors it into the active memtable
    /// and rotates when the watermark is reached.
    fn log_command(&self, inner: &mut LsmInner, record: CommandRecord) -> Result<()> {
        let mut buf = Vec::with_capacity(record.encoded_len());
        record.encode(&mut buf);
        inner.wal.append(&buf)?;
        inner.active.put(record);

        if inner.active.len() >= self.config.max_memtable_entries {
            self.rotate(inner)?;
        }
        Ok(())
    }

    /// Finds the newest command record for `key`: active memtable, then the
    /// immutable slot, then SSTables newest-first.
    fn lookup(&self, inner: &LsmInner, key: &str) -> Result<CommandRecord> {
        if let Some(record) = inner.active.get(key) {
            return Ok(record);
        }
        if let Some(prev) = &inner.prev_immutable {
            if let Some(record) = prev.get(key) {
                return Ok(record);
            }
        }
        for table in inner.sstables.iter().rev() {
            match table.query(key) {
                Ok(record) => return Ok(record),
                Err(Error::KeyNotInSstable) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(Error::KeyMissing)
    }

    /// Interprets a found command: a DEL is a definitive miss, a SET yields
    /// its value once expiry is checked.
    fn get_validated(&self, inner: &LsmInner, key: &str) -> Result<Vec<u8>> {
        let record = self.lookup(inner, key)?;
        match record.header.cmd_type {
            CommandType::Del => Err(Error::KeyMissing),
            CommandType::Set => {
                if record.is_expired(clock::now_nanos()) {
                    return Err(Error::KeyExpired);
                }
                Ok(record.value)
            }
            CommandType::Get => Err(Error::CorruptRecord(
                "GET command found in the write path".to_string(),
            )),
        }
    }

    fn add(&self, key: &str, delta: i64) -> Result<i64> {
        let mut inner = self.inner.write()?;
        let current = self.get_validated(&inner, key)?;
        let next = parse_int(&current)? + delta;
        self.log_command(
            &mut inner,
            CommandRecord::set(key, next.to_string().as_bytes()),
        )?;
        Ok(next)
    }

    /// Live keys as seen by the in-memory structures: the active memtable
    /// shadows the immutable slot, and DEL records drop keys.
    fn memtable_keys(&self, inner: &LsmInner) -> Vec<String> {
        let mut merged: BTreeMap<String, CommandType> = BTreeMap::new();
        if let Some(prev) = &inner.prev_immutable {
            for (key, record) in prev.iter() {
                merged.insert(key, record.header.cmd_type);
            }
        }
        for (key, record) in inner.active.iter() {
            merged.insert(key, record.header.cmd_type);
        }
        merged
            .into_iter()
            .filter(|(_, cmd)| *cmd == CommandType::Set)
            .map(|(key, _)| key)
            .collect()
    }
}

impl Store for LsmStore {
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
        self.log_command(&mut inner, CommandRecord::set(key, value))
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut inner = self.inner.write()?;
        self.log_command(&mut inner, CommandRecord::del(key))
    }

    fn exists(&self, key: &str) -> bool {
        let inner = match self.inner.read() {
            Ok(inner) => inner,
            Err(_) => return false,
        };

        let found = inner
            .active
            .get(key)
            .or_else(|| inner.prev_immutable.as_ref().and_then(|prev| prev.get(key)));
        matches!(found, Some(record) if record.header.cmd_type == CommandType::Set)
    }

    fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let matcher = compile_pattern(pattern)?;
        let inner = self.inner.read()?;
        Ok(self
            .memtable_keys(&inner)
            .into_iter()
            .filter(|key| matcher.as_ref().map_or(true, |re| re.is_match(key)))
            .collect())
    }

    fn ttl(&self, key: &str) -> Result<i64> {
        let inner = self.inner.read()?;
        let record = self.lookup(&inner, key)?;
        if record.header.cmd_type == CommandType::Del {
            return Err(Error::KeyMissing);
        }
        if record.header.expiry == 0 {
            return Ok(-1);
        }
        Ok(clock::seconds_until(record.header.expiry).unwrap_or(-1))
    }

    fn expire(&self, key: &str, at: SystemTime) -> Result<()> {
        let mut inner = self.inner.write()?;
        let current = self.lookup(&inner, key)?;
        if current.header.cmd_type == CommandType::Del {
            return Err(Error::KeyMissing);
        }

        let mut record = CommandRecord::set(key, &current.value);
        record.header.expiry = clock::nanos_since_epoch(at);
        self.log_command(&mut inner, record)
    }

    fn setex(&self, key: &str, value: &[u8], ttl_secs: i64) -> Result<()> {
        validate_entry(key, value)?;
        let mut inner = self.inner.write()?;

        let mut record = CommandRecord::set(key, value);
        record.header.expiry = clock::deadline_nanos(ttl_secs);
        self.log_command(&mut inner, record)
    }

    fn persist(&self, key: &str) -> Result<()> {
        let mut inner = self.inner.write()?;
        let current = self.lookup(&inner, key)?;
        if current.header.cmd_type == CommandType::Del {
            return Err(Error::KeyMissing);
        }
        self.log_command(&mut inner, CommandRecord::set(key, &current.value))
    }

    fn incr(&self, key: &str) -> Result<i64> {
        self.add(key, 1)
    }

    fn decr(&self, key: &str) -> Result<i64> {
        self.add(key, -1)
    }

    fn sync(&self) -> Result<()> {
        let inner = self.inner.read()?;
        inner.wal.sync()
    }

    fn close(&self) -> Result<()> {
        let inner = self.inner.write()?;

        inner.wal.sync()?;
        inner.wal.close()?;
        for table in &inner.sstables {
            table.close()?;
        }

        if let Some(lock) = self.lock.lock()?.take() {
            lock.release()?;
        }

        tracing::info!(dir = %self.config.directory.display(), "closed store");
        Ok(())
    }
}

impl Drop for LsmStore {
    fn drop(&mut self) {
        // Best-effort clean shutdown for embedders that never call close().
        if self.lock.lock().map(|l| l.is_some()).unwrap_or(false) {
            let _ = self.close();
        }
    }
}

/// Replays a WAL into the memtable, command by command, returning the byte
/// length of the valid prefix. A torn trailing record is the expected shape
/// of a crash mid-append: replay stops there with a warning and keeps
/// everything before it.
fn replay_wal(path: &Path, memtable: &Memtable) -> Result<u64> {
    let mut reader = BufReader::new(fs::File::open(path)?);
    let mut replayed = 0usize;
    let mut valid_len = 0u64;

    loop {
        match CommandRecord::decode_from(&mut reader) {
            Ok(Some(record)) => {
                valid_len += record.encoded_len() as u64;
                memtable.put(record);
                replayed += 1;
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(
                    wal = %path.display(),
                    replayed,
                    error = %e,
                    "stopping WAL replay at torn record"
                );
                break;
            }
        }
    }

    tracing::debug!(wal = %path.display(), replayed, "replayed WAL");
    Ok(valid_len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::TempDir;

    fn small_config(dir: &TempDir, memtable_entries: usize) -> Config {
        Config::new(dir.path())
            .max_memtable_entries(memtable_entries)
            .sstable_batch_size(4)
    }

    fn open_store(dir: &TempDir) -> LsmStore {
        LsmStore::open(small_config(dir, 1024)).expect("failed to open store")
    }

    fn sstable_count(dir: &TempDir) -> usize {
        fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path().extension().and_then(|x| x.to_str()) == Some(SSTABLE_EXTENSION)
            })
            .count()
    }

    #[test]
    fn test_set_get_delete_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.set("foo", b"bar").unwrap();
        assert_eq!(store.get("foo").unwrap(), b"bar");

        store.delete("foo").unwrap();
        assert_eq!(store.get("foo"), Err(Error::KeyMissing));
    }

    #[test]
    fn test_rotation_flushes_to_sstable() {
        let dir = TempDir::new().unwrap();
        let store = LsmStore::open(small_config(&dir, 8)).unwrap();

        for i in 0..8 {
            store.set(&format!("k{i}"), format!("v{i}").as_bytes()).unwrap();
        }

        assert_eq!(sstable_count(&dir), 1);
        assert!(
            !dir.path().join(TEMPORARY_WAL_FILE).exists(),
            "temporary WAL should be deleted after the flush"
        );

        // Every key is still readable through the SSTable.
        for i in 0..8 {
            assert_eq!(
                store.get(&format!("k{i}")).unwrap(),
                format!("v{i}").as_bytes()
            );
        }
    }

    #[test]
    fn test_newer_memtable_shadows_sstable() {
        let dir = TempDir::new().unwrap();
        let store = LsmStore::open(small_config(&dir, 4)).unwrap();

        store.set("k", b"v1").unwrap();
        for i in 0..3 {
            store.set(&format!("pad{i}"), b"x").unwrap();
        }
        assert_eq!(sstable_count(&dir), 1);

        store.set("k", b"v2").unwrap();
        assert_eq!(store.get("k").unwrap(), b"v2");
    }

    #[test]
    fn test_tombstone_shadows_older_sstable() {
        let dir = TempDir::new().unwrap();
        let store = LsmStore::open(small_config(&dir, 4)).unwrap();

        store.set("k", b"v").unwrap();
        for i in 0..3 {
            store.set(&format!("pad{i}"), b"x").unwrap();
        }

        store.delete("k").unwrap();
        for i in 3..6 {
            store.set(&format!("pad{i}"), b"x").unwrap();
        }
        assert_eq!(sstable_count(&dir), 2);

        assert_eq!(store.get("k"), Err(Error::KeyMissing));
        assert_eq!(store.get("pad0").unwrap(), b"x");
    }

    #[test]
    fn test_newest_sstable_wins() {
        let dir = TempDir::new().unwrap();
        let store = LsmStore::open(small_config(&dir, 2)).unwrap();

        store.set("k", b"old").unwrap();
        store.set("pad0", b"x").unwrap();
        store.set("k", b"new").unwrap();
        store.set("pad1", b"x").unwrap();
        assert_eq!(sstable_count(&dir), 2);

        assert_eq!(store.get("k").unwrap(), b"new");
    }

    #[test]
    fn test_wal_replay_on_reopen() {
        let dir = TempDir::new().unwrap();

        {
            let store = open_store(&dir);
            store.set("a", b"1").unwrap();
            store.set("b", b"2").unwrap();
            store.delete("a").unwrap();
            store.close().unwrap();
        }

        let store = open_store(&dir);
        assert_eq!(store.get("a"), Err(Error::KeyMissing));
        assert_eq!(store.get("b").unwrap(), b"2");
    }

    #[test]
    fn test_reopen_with_sstables_and_wal() {
        let dir = TempDir::new().unwrap();

        {
            let store = LsmStore::open(small_config(&dir, 4)).unwrap();
            for i in 0..10 {
                store.set(&format!("k{i}"), format!("v{i}").as_bytes()).unwrap();
            }
            store.close().unwrap();
        }

        let store = LsmStore::open(small_config(&dir, 4)).unwrap();
        for i in 0..10 {
            assert_eq!(
                store.get(&format!("k{i}")).unwrap(),
                format!("v{i}").as_bytes()
            );
        }
    }

    #[test]
    fn test_torn_wal_tail_is_tolerated() {
        let dir = TempDir::new().unwrap();

        {
            let store = open_store(&dir);
            store.set("whole", b"kept").unwrap();
            store.close().unwrap();
        }

        // Append half a record to simulate a crash mid-write.
        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(dir.path().join(CURRENT_WAL_FILE))
            .unwrap();
        file.write_all(&[1, 0, 0]).unwrap();
        drop(file);

        let store = open_store(&dir);
        assert_eq!(store.get("whole").unwrap(), b"kept");
        store.set("after", b"works").unwrap();
        assert_eq!(store.get("after").unwrap(), b"works");
        store.close().unwrap();

        // The torn bytes were truncated away, so the write that followed
        // them survives another replay.
        let store = open_store(&dir);
        assert_eq!(store.get("whole").unwrap(), b"kept");
        assert_eq!(store.get("after").unwrap(), b"works");
    }

    #[test]
    fn test_exists_and_keys_cover_memtables_only() {
        let dir = TempDir::new().unwrap();
        let store = LsmStore::open(small_config(&dir, 4)).unwrap();

        store.set("mem:1", b"v").unwrap();
        store.set("mem:2", b"v").unwrap();
        store.delete("mem:2").unwrap();

        assert!(store.exists("mem:1"));
        assert!(!store.exists("mem:2"), "tombstone hides the key");
        assert!(!store.exists("absent"));

        let keys = store.keys("^mem:").unwrap();
        assert_eq!(keys, vec!["mem:1".to_string()]);
    }

    #[test]
    fn test_expiry_lifecycle() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.set("k", b"v").unwrap();
        assert_eq!(store.ttl("k").unwrap(), -1);

        store
            .expire("k", SystemTime::now() + Duration::from_millis(60))
            .unwrap();
        assert_eq!(store.get("k").unwrap(), b"v");

        std::thread::sleep(Duration::from_millis(140));
        assert_eq!(store.get("k"), Err(Error::KeyExpired));
        assert_eq!(store.ttl("k").unwrap(), -1);

        store.setex("e", b"v", 300).unwrap();
        let ttl = store.ttl("e").unwrap();
        assert!((298..=300).contains(&ttl), "ttl was {ttl}");

        store.persist("e").unwrap();
        assert_eq!(store.ttl("e").unwrap(), -1);
    }

    #[test]
    fn test_incr_decr() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.set("n", b"9").unwrap();
        assert_eq!(store.incr("n").unwrap(), 10);
        assert_eq!(store.decr("n").unwrap(), 9);

        store.set("s", b"words").unwrap();
        assert_eq!(store.incr("s"), Err(Error::NotAnInteger));
    }

    #[test]
    fn test_second_opener_is_locked_out() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        match LsmStore::open(Config::new(dir.path())) {
            Err(Error::DirectoryLocked(_)) => {}
            other => panic!("expected DirectoryLocked, got {:?}", other.map(|_| ())),
        }

        store.close().unwrap();
    }

    #[test]
    fn test_mget_tags_results_per_key() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.set("a", b"1").unwrap();
        store.delete("b").unwrap();

        let results = store.mget(&["a".into(), "b".into(), "c".into()]);
        assert_eq!(results[0], Ok(b"1".to_vec()));
        assert_eq!(results[1], Err(Error::KeyMissing));
        assert_eq!(results[2], Err(Error::KeyMissing));
    }
}
