//! Periodic background-task runner.
//!
//! Each registered task gets its own tokio timer loop. A tick that fires
//! while the previous execution is still running is dropped, not queued, so
//! maintenance work can never pile up behind a slow cycle. Task errors are
//! logged and the next tick retries; shutdown is signalled over a broadcast
//! channel and waits for every loop to exit.

use std::sync::Arc;
use std::sync::RwLock;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::Result;

/// Trait for background tasks that run periodically.
#[async_trait::async_trait]
pub trait BackgroundTask: Send + Sync {
    /// Task name for logging.
    fn name(&self) -> &'static str;

    /// How often to run this task.
    fn interval(&self) -> Duration;

    /// Execute one cycle of the task.
    async fn execute(&self) -> Result<()>;
}

/// Scheduler manages background tasks with graceful shutdown.
pub struct Scheduler {
    tasks: RwLock<Vec<JoinHandle<()>>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Scheduler {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            tasks: RwLock::new(Vec::new()),
            shutdown_tx,
        }
    }

    /// Register a periodic background task.
    pub fn register<T: BackgroundTask + 'static>(&self, task: Arc<T>) -> &Self {
        let handle = self.spawn_timer_loop(task);
        self.tasks.write().unwrap().push(handle);
        self
    }

    fn spawn_timer_loop<T: BackgroundTask + 'static>(&self, task: Arc<T>) -> JoinHandle<()> {
        let interval = task.interval();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick of a tokio interval completes immediately;
            // consume it so the task first runs one interval from now.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = task.execute().await {
                            tracing::error!(
                                task = task.name(),
                                error = %e,
                                "background task cycle failed"
                            );
                        }
                    }

                    _ = shutdown_rx.recv() => {
                        tracing::info!(task = task.name(), "task shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// Graceful shutdown: signal every loop, then wait for them.
    pub async fn shutdown(self) -> Result<()> {
        self.shutdown_tx.send(()).ok();

        let tasks: Vec<JoinHandle<()>> = self.tasks.write().unwrap().drain(..).collect();
        for task in tasks {
            task.await?;
        }

        Ok(())
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
