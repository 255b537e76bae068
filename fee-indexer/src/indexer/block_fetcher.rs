//! Fetches and prices a single block

use std::sync::Arc;

use tracing::debug;

use crate::fees::{extract_fees, FeeMode};
use crate::indexer::retry::RetryPolicy;
use crate::models::BlockRecord;
use crate::rpc::{ChainRpc, RpcError};

pub struct BlockFetcher {
    chain_id: String,
    rpc: Arc<dyn ChainRpc>,
    fee_mode: FeeMode,
    retry: RetryPolicy,
}

impl BlockFetcher {
    pub fn new(chain_id: &str, rpc: Arc<dyn ChainRpc>, fee_mode: FeeMode, retry: RetryPolicy) -> Self {
        Self {
            chain_id: chain_id.to_string(),
            rpc,
            fee_mode,
            retry,
        }
    }

    /// One attempt: results and header are requested together.
    pub async fn fetch_once(&self, height: u64) -> Result<BlockRecord, RpcError> {
        let (results, header) = tokio::try_join!(
            self.rpc.block_results(height),
            self.rpc.block_header(height),
        )?;

        let totals = extract_fees(&results, &self.fee_mode);

        Ok(BlockRecord {
            chain_id: self.chain_id.clone(),
            block_number: height,
            timestamp: header.time,
            total_fees: totals.render(&self.fee_mode),
        })
    }

    /// Fetches `height` under the retry policy.
    ///
    /// `Ok(None)` means the node does not have the height; it is skipped
    /// without further attempts.
    pub async fn fetch(&self, height: u64) -> Result<Option<BlockRecord>, RpcError> {
        let outcome = self
            .retry
            .run(
                |attempt| {
                    debug!(chain_id = %self.chain_id, height, attempt, "fetching block");
                    self.fetch_once(height)
                },
                RpcError::is_not_found,
            )
            .await;

        match outcome {
            Ok(record) => Ok(Some(record)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::time::Duration;

    use crate::rpc::{BlockHeader, BlockResults, Event, EventAttribute, TxResult};

    /// Serves one fixed block and fails the first `failures[height]` calls.
    #[derive(Default)]
    struct ScriptedRpc {
        failures: Mutex<HashMap<u64, u32>>,
        missing: Vec<u64>,
    }

    #[async_trait]
    impl ChainRpc for ScriptedRpc {
        async fn latest_height(&self) -> Result<u64, RpcError> {
            Ok(1_000)
        }

        async fn block_results(&self, height: u64) -> Result<BlockResults, RpcError> {
            if self.missing.contains(&height) {
                return Err(RpcError::NotFound(format!("height {}", height)));
            }
            if let Some(left) = self.failures.lock().get_mut(&height) {
                if *left > 0 {
                    *left -= 1;
                    return Err(RpcError::Exhausted(Box::new(RpcError::Network("refused".into()))));
                }
            }
            Ok(BlockResults {
                height: Some(height.to_string()),
                txs_results: Some(vec![
                    TxResult {
                        code: 0,
                        events: vec![Event {
                            kind: "tx".into(),
                            attributes: vec![EventAttribute::new("fee", "1000uatom,500uatom")],
                        }],
                    },
                    TxResult {
                        code: 0,
                        events: vec![Event {
                            kind: "tx".into(),
                            attributes: vec![EventAttribute::new("fee", "200uatom")],
                        }],
                    },
                    TxResult {
                        code: 13,
                        events: vec![Event {
                            kind: "tx".into(),
                            attributes: vec![EventAttribute::new("fee", "999uatom")],
                        }],
                    },
                ]),
            })
        }

        async fn block_header(&self, height: u64) -> Result<BlockHeader, RpcError> {
            Ok(BlockHeader { time: Utc.timestamp_opt(1_700_000_000 + height as i64, 0).unwrap() })
        }
    }

    fn fetcher(rpc: ScriptedRpc, attempts: u32) -> BlockFetcher {
        BlockFetcher::new(
            "cosmoshub-4",
            Arc::new(rpc),
            FeeMode::Single("uatom".into()),
            RetryPolicy::new(attempts, Duration::from_millis(1)),
        )
    }

    #[tokio::test]
    async fn test_builds_record_from_results_and_header() {
        let record = fetcher(ScriptedRpc::default(), 3).fetch(42).await.unwrap().unwrap();
        assert_eq!(record.chain_id, "cosmoshub-4");
        assert_eq!(record.block_number, 42);
        assert_eq!(record.total_fees, "1700uatom");
        assert_eq!(record.timestamp, Utc.timestamp_opt(1_700_000_042, 0).unwrap());
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let rpc = ScriptedRpc::default();
        rpc.failures.lock().insert(7, 2);
        let record = fetcher(rpc, 3).fetch(7).await.unwrap();
        assert!(record.is_some());
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_the_error() {
        let rpc = ScriptedRpc::default();
        rpc.failures.lock().insert(7, 3);
        let err = fetcher(rpc, 3).fetch(7).await.unwrap_err();
        assert!(matches!(err, RpcError::Exhausted(_)));
    }

    #[tokio::test]
    async fn test_not_found_is_skipped() {
        let rpc = ScriptedRpc { missing: vec![9], ..Default::default() };
        assert_eq!(fetcher(rpc, 3).fetch(9).await.unwrap(), None);
    }
}
