//! Data models for the fee indexer

use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

/// One indexed block. `(chain_id, block_number)` is the storage key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub chain_id: String,
    pub block_number: u64,
    pub timestamp: DateTime<Utc>,
    pub total_fees: String,
}

/// Resume position of one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexingCursor {
    pub chain_id: String,
    pub last_indexed_height: u64,
    pub updated_at: DateTime<Utc>,
}

/// A height that exhausted its retries and was left out of a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissedBlock {
    pub chain_id: String,
    pub block_number: u64,
    pub reason: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeAmount {
    pub denom: String,
    pub amount: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryRange {
    Time { start: DateTime<Utc>, end: DateTime<Utc> },
    Height { start: u64, end: u64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeSummary {
    pub chain_id: String,
    pub range: QueryRange,
    pub block_count: i64,
    pub totals: Vec<FeeAmount>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainStatus {
    pub chain_id: String,
    pub fee_mode: String,
    pub last_indexed_height: Option<u64>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub database: bool,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissedBlocksPage {
    pub chain_id: String,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
    pub missed: Vec<MissedBlock>,
}
