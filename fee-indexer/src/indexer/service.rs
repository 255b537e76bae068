//! Per-chain indexing engine

use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{future, stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::ChainConfig;
use crate::database::{FeeStore, MissedHeight};
use crate::error::Result;
use crate::fees::FeeMode;
use crate::indexer::block_fetcher::BlockFetcher;
use crate::indexer::retry::RetryPolicy;
use crate::models::BlockRecord;
use crate::rpc::ChainRpc;

/// Reason stored for heights the node reported as unavailable.
pub const NOT_FOUND_REASON: &str = "not found";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Running,
    Stopping,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub start_height: u64,
    pub batch_size: u64,
    pub concurrency: usize,
    /// Sleep between head checks once caught up.
    pub poll_interval: Duration,
    /// Sleep after a failed head query or commit.
    pub error_backoff: Duration,
    pub retry: RetryPolicy,
    pub fee_mode: FeeMode,
}

impl From<&ChainConfig> for EngineSettings {
    fn from(config: &ChainConfig) -> Self {
        let poll_interval = Duration::from_millis(config.poll_interval_ms);
        Self {
            start_height: config.start_height,
            batch_size: config.batch_size.max(1),
            concurrency: config.concurrency.max(1),
            poll_interval,
            error_backoff: poll_interval,
            retry: RetryPolicy::new(config.retry_attempts, Duration::from_millis(config.retry_delay_ms)),
            fee_mode: config.fee_mode(),
        }
    }
}

/// Heights to fetch next, clamped to the chain head. `None` when caught up.
pub fn next_window(next_height: u64, head: u64, batch_size: u64) -> Option<RangeInclusive<u64>> {
    if next_height > head || batch_size == 0 {
        return None;
    }
    let end = next_height.saturating_add(batch_size - 1).min(head);
    Some(next_height..=end)
}

enum Step {
    CaughtUp { head: u64 },
    Committed { through: u64 },
    Interrupted,
}

struct WindowOutcome {
    records: Vec<BlockRecord>,
    missed: Vec<MissedHeight>,
    last_dispatched: Option<u64>,
}

pub struct IndexerService {
    chain_id: String,
    rpc: Arc<dyn ChainRpc>,
    store: Arc<dyn FeeStore>,
    fetcher: BlockFetcher,
    settings: EngineSettings,
    state: Mutex<EngineState>,
    stop_tx: watch::Sender<bool>,
}

impl IndexerService {
    pub fn new(config: &ChainConfig, rpc: Arc<dyn ChainRpc>, store: Arc<dyn FeeStore>) -> Self {
        Self::with_settings(&config.chain_id, rpc, store, EngineSettings::from(config))
    }

    pub fn with_settings(
        chain_id: &str,
        rpc: Arc<dyn ChainRpc>,
        store: Arc<dyn FeeStore>,
        settings: EngineSettings,
    ) -> Self {
        let fetcher = BlockFetcher::new(chain_id, Arc::clone(&rpc), settings.fee_mode.clone(), settings.retry);
        let (stop_tx, _) = watch::channel(false);

        Self {
            chain_id: chain_id.to_string(),
            rpc,
            store,
            fetcher,
            settings,
            state: Mutex::new(EngineState::Idle),
            stop_tx,
        }
    }

    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    pub fn state(&self) -> EngineState {
        *self.state.lock()
    }

    /// Spawns the indexing loop. Returns `None` if the engine is not idle.
    pub fn start(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        {
            let mut state = self.state.lock();
            if *state != EngineState::Idle {
                debug!(chain_id = %self.chain_id, state = ?*state, "start ignored");
                return None;
            }
            *state = EngineState::Running;
        }
        self.stop_tx.send_replace(false);

        let engine = Arc::clone(self);
        let span = info_span!("engine", chain_id = %self.chain_id);
        Some(tokio::spawn(
            async move {
                let _idle = IdleOnExit(&engine.state);
                engine.run().await;
            }
            .instrument(span),
        ))
    }

    /// Requests a cooperative stop. In-flight fetches are allowed to finish.
    pub fn stop(&self) {
        {
            let mut state = self.state.lock();
            if *state == EngineState::Running {
                *state = EngineState::Stopping;
            }
        }
        self.stop_tx.send_replace(true);
    }

    fn stop_requested(&self) -> bool {
        *self.stop_tx.borrow()
    }

    async fn run(&self) {
        let mut stop_rx = self.stop_tx.subscribe();
        info!(
            batch_size = self.settings.batch_size,
            concurrency = self.settings.concurrency,
            fee_mode = %self.settings.fee_mode,
            "indexing engine started"
        );

        let Some(mut next_height) = self.resume_height(&mut stop_rx).await else {
            info!("indexing engine stopped before resuming");
            return;
        };

        while !self.stop_requested() {
            match self.step(next_height).await {
                Ok(Step::CaughtUp { head }) => {
                    debug!(head, next_height, "caught up with chain head");
                    self.pause(self.settings.poll_interval, &mut stop_rx).await;
                }
                Ok(Step::Committed { through }) => next_height = through + 1,
                Ok(Step::Interrupted) => break,
                Err(e) => {
                    error!(next_height, "indexing iteration failed: {}", e);
                    self.pause(self.settings.error_backoff, &mut stop_rx).await;
                }
            }
        }

        info!(next_height, "indexing engine stopped");
    }

    /// Reads the persisted cursor, retrying until it succeeds or stop is requested.
    async fn resume_height(&self, stop_rx: &mut watch::Receiver<bool>) -> Option<u64> {
        loop {
            match self.store.last_indexed_height(&self.chain_id).await {
                Ok(Some(cursor)) => {
                    info!(cursor, "resuming after committed cursor");
                    return Some(cursor + 1);
                }
                Ok(None) => {
                    info!(start_height = self.settings.start_height, "no cursor found, starting from configured height");
                    return Some(self.settings.start_height);
                }
                Err(e) => {
                    error!("failed to read indexing cursor: {}", e);
                    self.pause(self.settings.error_backoff, stop_rx).await;
                    if self.stop_requested() {
                        return None;
                    }
                }
            }
        }
    }

    async fn step(&self, next_height: u64) -> Result<Step> {
        let head = self.rpc.latest_height().await?;
        let Some(window) = next_window(next_height, head, self.settings.batch_size) else {
            return Ok(Step::CaughtUp { head });
        };

        let (start, end) = (*window.start(), *window.end());
        debug!(start, end, head, "fetching window");
        let outcome = self.fetch_window(window).await;

        let Some(cursor) = outcome.last_dispatched else {
            return Ok(Step::Interrupted);
        };
        if cursor < end {
            info!(start, end, cursor, "stop requested mid-window, committing dispatched heights");
        }

        self.store
            .commit_batch(&self.chain_id, &outcome.records, cursor, &outcome.missed)
            .await?;

        info!(
            start,
            end = cursor,
            head,
            indexed = outcome.records.len(),
            missed = outcome.missed.len(),
            "committed window"
        );
        Ok(Step::Committed { through: cursor })
    }

    /// Fetches a window with bounded fan-out. Stop is checked before each dispatch.
    async fn fetch_window(&self, window: RangeInclusive<u64>) -> WindowOutcome {
        let mut results: Vec<_> = stream::iter(window)
            .take_while(|_| future::ready(!self.stop_requested()))
            .map(|height| async move { (height, self.fetcher.fetch(height).await) })
            .buffer_unordered(self.settings.concurrency)
            .collect()
            .await;

        // completion order is arbitrary
        results.sort_by_key(|(height, _)| *height);

        let last_dispatched = results.last().map(|(height, _)| *height);
        let mut records = Vec::with_capacity(results.len());
        let mut missed = Vec::new();

        for (height, result) in results {
            match result {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {
                    warn!(height, "height not available from node, skipping");
                    missed.push(MissedHeight {
                        block_number: height,
                        reason: NOT_FOUND_REASON.to_string(),
                    });
                }
                Err(e) => {
                    warn!(height, "block fetch failed after retries, leaving gap: {}", e);
                    missed.push(MissedHeight {
                        block_number: height,
                        reason: e.to_string(),
                    });
                }
            }
        }

        WindowOutcome { records, missed, last_dispatched }
    }

    /// Sleeps for `duration`, waking early when stop is requested.
    async fn pause(&self, duration: Duration, stop_rx: &mut watch::Receiver<bool>) {
        let sleep = tokio::time::sleep(duration);
        tokio::pin!(sleep);

        loop {
            let stopped = *stop_rx.borrow_and_update();
            if stopped {
                return;
            }
            tokio::select! {
                _ = &mut sleep => return,
                changed = stop_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

struct IdleOnExit<'a>(&'a Mutex<EngineState>);

impl Drop for IdleOnExit<'_> {
    fn drop(&mut self) {
        *self.0.lock() = EngineState::Idle;
    }
}
