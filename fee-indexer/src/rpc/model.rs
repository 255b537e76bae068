//! RPC data models and types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// RPC error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// The requested height does not exist (yet) on the node.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Timeout, refused connection or any other transport failure.
    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("No result")]
    NoResult,

    #[error("All endpoints failed, last error: {0}")]
    Exhausted(Box<RpcError>),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

impl RpcError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RpcError::NotFound(_))
    }
}

/// JSON-RPC response envelope. Either field may be missing.
#[derive(Debug, Deserialize)]
pub struct RpcResponse<T> {
    pub result: Option<T>,
    pub error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
pub struct RpcErrorBody {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl RpcErrorBody {
    /// Message and data joined, as nodes put the useful part in either.
    pub fn detail(&self) -> String {
        match &self.data {
            Some(serde_json::Value::String(data)) => format!("{}: {}", self.message, data),
            Some(data) => format!("{}: {}", self.message, data),
            None => self.message.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusResult {
    pub sync_info: SyncInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncInfo {
    #[serde(default)]
    pub latest_block_height: Option<String>,
}

/// Execution results of every transaction in one block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlockResults {
    #[serde(default)]
    pub height: Option<String>,
    #[serde(default)]
    pub txs_results: Option<Vec<TxResult>>,
}

impl BlockResults {
    pub fn transactions(&self) -> &[TxResult] {
        self.txs_results.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TxResult {
    #[serde(default)]
    pub code: u32,
    #[serde(default)]
    pub events: Vec<Event>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub attributes: Vec<EventAttribute>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventAttribute {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
}

impl EventAttribute {
    pub fn new(key: &str, value: &str) -> Self {
        Self {
            key: Some(key.to_string()),
            value: Some(value.to_string()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockResult {
    pub block: BlockBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockBody {
    pub header: BlockHeader,
}

/// The part of a block header the indexer needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub time: DateTime<Utc>,
}
