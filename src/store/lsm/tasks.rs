//! Background maintenance task for the LSM engine.

use std::{sync::Arc, time::Duration};

use super::LsmStore;
use crate::error::Result;
use crate::scheduler::BackgroundTask;

/// Periodically rotates an over-threshold memtable to its SSTable. The
/// write path already rotates inline; this task is the safety net that
/// catches a memtable left at the watermark by a failed flush.
pub struct FlushTask {
    store: Arc<LsmStore>,
}

impl FlushTask {
    pub fn new(store: Arc<LsmStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl BackgroundTask for FlushTask {
    fn name(&self) -> &'static str {
        "memtable-flush"
    }

    fn interval(&self) -> Duration {
        self.store.config().check_file_size_interval
    }

    async fn execute(&self) -> Result<()> {
        self.store.maybe_rotate()
    }
}
