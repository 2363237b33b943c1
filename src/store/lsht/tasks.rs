//! Background maintenance tasks for the hash table engine.

use std::{sync::Arc, time::Duration};

use super::LshtStore;
use crate::error::Result;
use crate::scheduler::BackgroundTask;

/// Periodically retires the active segment once it crosses the size
/// threshold.
pub struct RotationTask {
    store: Arc<LshtStore>,
}

impl RotationTask {
    pub fn new(store: Arc<LshtStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl BackgroundTask for RotationTask {
    fn name(&self) -> &'static str {
        "segment-rotation"
    }

    fn interval(&self) -> Duration {
        self.store.config().check_file_size_interval
    }

    async fn execute(&self) -> Result<()> {
        self.store.maybe_rotate()
    }
}

/// Periodically sweeps expired keys and merges live records into a single
/// fresh segment.
pub struct CompactionTask {
    store: Arc<LshtStore>,
}

impl CompactionTask {
    pub fn new(store: Arc<LshtStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl BackgroundTask for CompactionTask {
    fn name(&self) -> &'static str {
        "compaction"
    }

    fn interval(&self) -> Duration {
        self.store.config().compact_interval
    }

    async fn execute(&self) -> Result<()> {
        self.store.compact()
    }
}
