//! RPC API trait definitions

use async_trait::async_trait;
use crate::rpc::model::*;

/// The three node queries the indexing engine depends on.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// Current chain head. Fails with [`RpcError::NoResult`] when the node reports no height.
    async fn latest_height(&self) -> Result<u64, RpcError>;

    async fn block_results(&self, height: u64) -> Result<BlockResults, RpcError>;

    async fn block_header(&self, height: u64) -> Result<BlockHeader, RpcError>;
}
