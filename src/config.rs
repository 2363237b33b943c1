use std::path::PathBuf;
use std::time::Duration;

const KIB: u64 = 1 << 10;
const MIB: u64 = KIB << 10;

/// Configuration shared by both storage engines.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the engine's on-disk artifacts.
    pub directory: PathBuf,

    /// Reserved for a periodic WAL sync loop; no such loop runs today.
    pub sync_write_interval: Duration,

    /// How often the compaction task wakes up (default: 2h).
    pub compact_interval: Duration,

    /// How often the rotation task checks the active file size (default: 1min).
    pub check_file_size_interval: Duration,

    /// Size threshold at which the active segment is rotated (default: 5 MiB).
    pub max_active_file_size: u64,

    /// Entry count at which the active memtable is rotated (default: 1024).
    pub max_memtable_entries: usize,

    /// Command records per SSTable batch (default: 100).
    pub sstable_batch_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./emberdb"),
            sync_write_interval: Duration::from_secs(60),
            compact_interval: Duration::from_secs(2 * 60 * 60),
            check_file_size_interval: Duration::from_secs(60),
            max_active_file_size: 5 * MIB,
            max_memtable_entries: 1024,
            sstable_batch_size: 100,
        }
    }
}

impl Config {
    /// Create a new config rooted at the given directory.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ..Default::default()
        }
    }

    /// Set the compaction interval.
    pub fn compact_interval(mut self, interval: Duration) -> Self {
        self.compact_interval = interval;
        self
    }

    /// Set the active-file size check interval.
    pub fn check_file_size_interval(mut self, interval: Duration) -> Self {
        self.check_file_size_interval = interval;
        self
    }

    /// Set the active segment rotation threshold.
    pub fn max_active_file_size(mut self, size: u64) -> Self {
        self.max_active_file_size = size;
        self
    }

    /// Set the memtable rotation threshold.
    pub fn max_memtable_entries(mut self, entries: usize) -> Self {
        self.max_memtable_entries = entries;
        self
    }

    /// Set the SSTable batch size.
    pub fn sstable_batch_size(mut self, batch_size: usize) -> Self {
        self.sstable_batch_size = batch_size;
        self
    }
}
