//! Indexing engine: per-block fetch, retry policy and the per-chain loop

pub mod block_fetcher;
pub mod retry;
pub mod service;
pub mod supervisor;

pub use block_fetcher::BlockFetcher;
pub use retry::RetryPolicy;
pub use service::{next_window, EngineSettings, EngineState, IndexerService};
pub use supervisor::Supervisor;
