//! emberdb-server: serves a storage engine over the Redis wire protocol.
//!
//! Configuration comes from environment variables:
//!
//! ```text
//! EMBERDB_DIR     data directory            (default: "./emberdb")
//! EMBERDB_ADDR    listen address            (default: "127.0.0.1:6379")
//! EMBERDB_ENGINE  "lsht" or "lsm"           (default: "lsht")
//! RUST_LOG        tracing filter            (default: "info")
//! ```

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use emberdb::scheduler::Scheduler;
use emberdb::server::Server;
use emberdb::store::lsht::tasks::{CompactionTask, RotationTask};
use emberdb::store::lsht::LshtStore;
use emberdb::store::lsm::tasks::FlushTask;
use emberdb::store::lsm::LsmStore;
use emberdb::{Config, Engine, Result, Store};

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::new(env_or("EMBERDB_DIR", "./emberdb"));
    let addr = env_or("EMBERDB_ADDR", "127.0.0.1:6379");
    let engine: Engine = env_or("EMBERDB_ENGINE", "lsht").parse()?;

    let scheduler = Scheduler::new();
    let store: Arc<dyn Store> = match engine {
        Engine::Lsht => {
            let store = Arc::new(LshtStore::open(config)?);
            scheduler.register(Arc::new(RotationTask::new(store.clone())));
            scheduler.register(Arc::new(CompactionTask::new(store.clone())));
            store
        }
        Engine::Lsm => {
            let store = Arc::new(LsmStore::open(config)?);
            scheduler.register(Arc::new(FlushTask::new(store.clone())));
            store
        }
    };

    let server = Server::new(addr, Arc::clone(&store));
    tokio::select! {
        result = server.serve() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received, shutting down");
        }
    }

    scheduler.shutdown().await?;
    store.close()?;
    Ok(())
}
