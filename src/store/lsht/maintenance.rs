//! Rotation and merge compaction for the hash table engine.

use std::fs;
use std::path::Path;

use super::store::{append_record, read_record, Inner, SegmentTarget};
use super::{
    segment_file_name, LshtStore, INDEX_FILE, MERGED_SEGMENT_ID, MERGE_SCRATCH_FILE,
    SEGMENT_EXTENSION,
};
use crate::clock;
use crate::datafile::{sync_dir, DataFile, Mode};
use crate::error::Result;
use crate::flock::LOCK_FILE;

impl LshtStore {
    /// Retires the active segment into the old set and opens a fresh one at
    /// the next id, once the active file has reached its size threshold.
    pub fn maybe_rotate(&self) -> Result<()> {
        let mut inner = self.inner.write()?;

        if inner.active.size()? < self.config.max_active_file_size {
            return Ok(());
        }

        let current_id = inner.active.id();
        let next_id = current_id + 1;
        let next = DataFile::open(
            self.config.directory.join(segment_file_name(next_id)),
            next_id,
            Mode::ReadWrite,
        )?;

        let retired = std::mem::replace(&mut inner.active, next);
        retired.sync()?;
        inner.old_segments.insert(current_id, retired);

        tracing::info!(retired = current_id, active = next_id, "rotated active segment");
        Ok(())
    }

    /// Runs one compaction cycle: sweep expired keys, merge every live
    /// record into a fresh segment, persist the index, then swap the merged
    /// file in as segment 0 and delete everything else.
    ///
    /// Holds the engine write lock for the whole cycle. A failure while
    /// merging restores the pre-merge index and leaves the previous
    /// segments untouched; the next cycle retries.
    pub fn compact(&self) -> Result<()> {
        let mut inner = self.inner.write()?;

        self.sweep_expired(&mut inner)?;

        let scratch_path = self.config.directory.join(MERGE_SCRATCH_FILE);
        let snapshot = inner.index.clone();
        let merged = match self.merge_live_records(&mut inner, &scratch_path) {
            Ok(merged) => merged,
            Err(e) => {
                inner.index = snapshot;
                let _ = fs::remove_file(&scratch_path);
                tracing::warn!(error = %e, "compaction merge aborted");
                return Err(e);
            }
        };

        inner.index.persist(self.config.directory.join(INDEX_FILE))?;
        self.swap_in_merged(&mut inner, merged)?;

        tracing::info!(keys = inner.index.len(), "compaction finished");
        Ok(())
    }

    /// Deletes every expired key, writing the usual tombstone so replay
    /// observes the expiry.
    fn sweep_expired(&self, inner: &mut Inner) -> Result<()> {
        let now = clock::now_nanos();
        let keys: Vec<String> = inner.index.keys().cloned().collect();

        let mut swept = 0usize;
        for key in keys {
            let record = match read_record(inner, &key) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "skipping unreadable record in expire sweep");
                    continue;
                }
            };

            if record.is_expired(now) {
                append_record(inner, SegmentTarget::Active, &key, &[], 0)?;
                inner.index.remove(&key);
                swept += 1;
            }
        }

        if swept > 0 {
            tracing::info!(swept, "dropped expired keys");
        }
        Ok(())
    }

    /// Rewrites the live record of every indexed key into the scratch file,
    /// pointing the index at the scratch (id 0) as it goes. Records are
    /// read before they are rewritten, so each lookup still resolves
    /// against the pre-merge segment.
    fn merge_live_records(&self, inner: &mut Inner, scratch_path: &Path) -> Result<DataFile> {
        // A scratch left behind by an earlier failed cycle is stale.
        if scratch_path.exists() {
            fs::remove_file(scratch_path)?;
        }
        let merged = DataFile::open(scratch_path, MERGED_SEGMENT_ID, Mode::WriteOnly)?;

        let keys: Vec<String> = inner.index.keys().cloned().collect();
        for key in keys {
            let record = read_record(inner, &key)?;
            append_record(
                inner,
                SegmentTarget::Merge(&merged),
                &key,
                &record.value,
                record.header.expiry,
            )?;
        }

        merged.sync()?;
        merged.close()?;
        Ok(merged)
    }

    /// Closes and deletes every pre-merge segment, renames the scratch file
    /// to segment 0 and reopens it as the active segment. The directory is
    /// fsynced so the rename and deletions are durable.
    fn swap_in_merged(&self, inner: &mut Inner, merged: DataFile) -> Result<()> {
        for segment in inner.old_segments.values() {
            segment.close()?;
        }
        inner.old_segments.clear();

        let dir = &self.config.directory;
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.file_name().and_then(|n| n.to_str()) == Some(LOCK_FILE) {
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) == Some(SEGMENT_EXTENSION) {
                fs::remove_file(&path)?;
            }
        }

        let merged_path = dir.join(segment_file_name(MERGED_SEGMENT_ID));
        fs::rename(merged.path(), &merged_path)?;
        sync_dir(dir)?;

        let old_active = std::mem::replace(
            &mut inner.active,
            DataFile::open(&merged_path, MERGED_SEGMENT_ID, Mode::ReadWrite)?,
        );
        old_active.close()?;
        Ok(())
    }
}
