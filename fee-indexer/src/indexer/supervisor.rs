//! Runs one engine per chain and contains their failures

use std::sync::Arc;

use futures_util::future::join_all;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::indexer::service::IndexerService;

pub struct Supervisor {
    engines: Vec<Arc<IndexerService>>,
    watchers: Vec<JoinHandle<()>>,
}

impl Supervisor {
    /// Starts every engine and attaches a watcher to each.
    ///
    /// A watcher only logs how its engine ended; a panic in one engine leaves
    /// the others running.
    pub fn start(engines: Vec<Arc<IndexerService>>) -> Self {
        let mut watchers = Vec::with_capacity(engines.len());

        for engine in &engines {
            let Some(handle) = engine.start() else {
                warn!(chain_id = %engine.chain_id(), "engine already running, not supervising twice");
                continue;
            };
            let chain_id = engine.chain_id().to_string();

            watchers.push(tokio::spawn(async move {
                match handle.await {
                    Ok(()) => info!(%chain_id, "engine exited"),
                    Err(e) if e.is_panic() => error!(%chain_id, "engine panicked: {}", e),
                    Err(e) => warn!(%chain_id, "engine task cancelled: {}", e),
                }
            }));
        }

        info!(engines = watchers.len(), "indexing engines started");
        Self { engines, watchers }
    }

    pub fn engines(&self) -> &[Arc<IndexerService>] {
        &self.engines
    }

    /// Stops every engine and waits for their current windows to drain.
    pub async fn shutdown(self) {
        info!("stopping indexing engines");
        for engine in &self.engines {
            engine.stop();
        }
        join_all(self.watchers).await;
        info!("all indexing engines stopped");
    }
}
