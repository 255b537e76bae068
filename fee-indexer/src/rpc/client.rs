//! Failover-aware HTTP client for Tendermint RPC nodes

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use crate::rpc::endpoint::EndpointSelector;
use crate::rpc::{model::*, ChainRpc};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Phrases nodes use when a height is above the head or already pruned.
const MISSING_HEIGHT_MARKERS: &[&str] = &[
    "must be less than or equal to the current blockchain height",
    "could not find results for height",
    "is not available, lowest height is",
];

pub struct RpcClient {
    chain_id: String,
    endpoints: Vec<String>,
    http: reqwest::Client,
    selector: Mutex<EndpointSelector>,
}

impl RpcClient {
    pub fn new(chain_id: &str, endpoints: &[String]) -> Result<Self, RpcError> {
        Self::with_timeout(chain_id, endpoints, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(chain_id: &str, endpoints: &[String], timeout: Duration) -> Result<Self, RpcError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RpcError::Network(format!("Failed to build HTTP client: {}", e)))?;
        Self::with_http_client(chain_id, endpoints, http)
    }

    pub fn with_http_client(chain_id: &str, endpoints: &[String], http: reqwest::Client) -> Result<Self, RpcError> {
        if endpoints.is_empty() {
            return Err(RpcError::InvalidEndpoint(format!("no endpoints configured for {}", chain_id)));
        }

        let endpoints = endpoints
            .iter()
            .map(|raw| {
                Url::parse(raw).map_err(|e| RpcError::InvalidEndpoint(format!("{}: {}", raw, e)))?;
                Ok(raw.trim_end_matches('/').to_string())
            })
            .collect::<Result<Vec<_>, RpcError>>()?;

        Ok(Self {
            chain_id: chain_id.to_string(),
            selector: Mutex::new(EndpointSelector::new(endpoints.len())),
            endpoints,
            http,
        })
    }

    /// Endpoint currently pinned as trusted, if any.
    pub fn sticky_endpoint(&self) -> Option<&str> {
        let sticky = self.selector.lock().sticky();
        sticky.map(|idx| self.endpoints[idx].as_str())
    }

    /// Number of times a failing endpoint was rotated away from.
    pub fn rotations(&self) -> u64 {
        self.selector.lock().rotations()
    }

    /// Runs one logical call, trying each endpoint at most once.
    async fn call_method<T: DeserializeOwned>(&self, method: &str, query: &[(&str, String)]) -> Result<T, RpcError> {
        let mut last_error = RpcError::NoResult;

        for _ in 0..self.endpoints.len() {
            let index = self.selector.lock().current();
            let endpoint = &self.endpoints[index];

            match self.request::<T>(endpoint, method, query).await {
                Ok(result) => {
                    self.selector.lock().record_success(index);
                    return Ok(result);
                }
                Err(e) if e.is_not_found() => {
                    debug!(chain_id = %self.chain_id, endpoint = %endpoint, method, "not found: {}", e);
                    return Err(e);
                }
                Err(e) => {
                    if matches!(e, RpcError::Malformed(_)) {
                        warn!(chain_id = %self.chain_id, endpoint = %endpoint, method, "malformed response: {}", e);
                    } else {
                        warn!(chain_id = %self.chain_id, endpoint = %endpoint, method, "request failed: {}", e);
                    }
                    if self.selector.lock().record_failure(index) {
                        debug!(chain_id = %self.chain_id, "rotating away from {}", endpoint);
                    }
                    last_error = e;
                }
            }
        }

        Err(RpcError::Exhausted(Box::new(last_error)))
    }

    async fn request<T: DeserializeOwned>(&self, endpoint: &str, method: &str, query: &[(&str, String)]) -> Result<T, RpcError> {
        let url = format!("{}/{}", endpoint, method);
        let response = self.http
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(RpcError::NotFound(format!("{} returned 404", url)));
        }

        let body = response
            .bytes()
            .await
            .map_err(classify_transport_error)?;

        let envelope: RpcResponse<T> = match serde_json::from_slice(&body) {
            Ok(envelope) => envelope,
            Err(e) if status.is_success() => {
                return Err(RpcError::Malformed(format!("Response parsing failed: {}", e)));
            }
            Err(_) => return Err(RpcError::Malformed(format!("HTTP {} from {}", status, url))),
        };

        if let Some(error) = envelope.error {
            let detail = error.detail();
            if is_missing_height(&detail) {
                return Err(RpcError::NotFound(detail));
            }
            return Err(RpcError::Rpc { code: error.code, message: detail });
        }

        // an error status without an error body is still a failed attempt
        if !status.is_success() {
            return Err(RpcError::Network(format!("HTTP {} from {}", status, url)));
        }

        envelope
            .result
            .ok_or_else(|| RpcError::Malformed(format!("{} response has no result", method)))
    }
}

fn classify_transport_error(err: reqwest::Error) -> RpcError {
    if err.is_timeout() {
        RpcError::Network(format!("timed out: {}", err))
    } else if err.is_connect() {
        RpcError::Network(format!("connection failed: {}", err))
    } else if err.is_decode() {
        RpcError::Malformed(err.to_string())
    } else {
        RpcError::Network(err.to_string())
    }
}

fn is_missing_height(detail: &str) -> bool {
    MISSING_HEIGHT_MARKERS.iter().any(|marker| detail.contains(marker))
}

fn parse_height(raw: Option<&str>) -> Result<u64, RpcError> {
    match raw.and_then(|h| h.trim().parse::<u64>().ok()) {
        Some(0) | None => Err(RpcError::NoResult),
        Some(height) => Ok(height),
    }
}

#[async_trait]
impl ChainRpc for RpcClient {
    async fn latest_height(&self) -> Result<u64, RpcError> {
        let status: StatusResult = self.call_method("status", &[]).await?;
        parse_height(status.sync_info.latest_block_height.as_deref())
    }

    async fn block_results(&self, height: u64) -> Result<BlockResults, RpcError> {
        self.call_method("block_results", &[("height", height.to_string())]).await
    }

    async fn block_header(&self, height: u64) -> Result<BlockHeader, RpcError> {
        let block: BlockResult = self.call_method("block", &[("height", height.to_string())]).await?;
        Ok(block.block.header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::{extract::{Query, State}, http::StatusCode as HttpStatus, routing::get, Json, Router};
    use serde_json::{json, Value};

    #[derive(Clone, Copy)]
    enum Behavior {
        Healthy,
        Garbage,
        RpcFailure,
        Throttled,
    }

    #[derive(Clone)]
    struct Node {
        head: u64,
        behavior: Behavior,
        hits: Arc<AtomicUsize>,
    }

    async fn status(State(node): State<Node>) -> (HttpStatus, String) {
        node.hits.fetch_add(1, Ordering::SeqCst);
        match node.behavior {
            Behavior::Healthy => (
                HttpStatus::OK,
                json!({"jsonrpc": "2.0", "id": -1, "result": {"sync_info": {"latest_block_height": node.head.to_string()}}}).to_string(),
            ),
            Behavior::Garbage => (HttpStatus::OK, "<html>rate limited</html>".to_string()),
            Behavior::RpcFailure => (
                HttpStatus::INTERNAL_SERVER_ERROR,
                json!({"jsonrpc": "2.0", "id": -1, "error": {"code": -32603, "message": "Internal error", "data": "node is catching up"}}).to_string(),
            ),
            Behavior::Throttled => (
                HttpStatus::TOO_MANY_REQUESTS,
                json!({"jsonrpc": "2.0", "id": -1, "result": {"sync_info": {"latest_block_height": "7"}}}).to_string(),
            ),
        }
    }

    async fn block_results(
        State(node): State<Node>,
        Query(params): Query<HashMap<String, String>>,
    ) -> (HttpStatus, Json<Value>) {
        node.hits.fetch_add(1, Ordering::SeqCst);
        let height: u64 = params.get("height").and_then(|h| h.parse().ok()).unwrap_or(0);
        if height > node.head {
            return (
                HttpStatus::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "jsonrpc": "2.0",
                    "id": -1,
                    "error": {
                        "code": -32603,
                        "message": "Internal error",
                        "data": format!("height {} must be less than or equal to the current blockchain height {}", height, node.head)
                    }
                })),
            );
        }
        (
            HttpStatus::OK,
            Json(json!({
                "jsonrpc": "2.0",
                "id": -1,
                "result": {
                    "height": height.to_string(),
                    "txs_results": [
                        {"code": 0, "events": [{"type": "tx", "attributes": [{"key": "fee", "value": "250uatom"}]}]}
                    ]
                }
            })),
        )
    }

    async fn block(State(node): State<Node>) -> Json<Value> {
        node.hits.fetch_add(1, Ordering::SeqCst);
        Json(json!({
            "jsonrpc": "2.0",
            "id": -1,
            "result": {"block": {"header": {"time": "2024-03-01T12:00:00.123456789Z", "height": "10"}}}
        }))
    }

    async fn spawn_node(head: u64, behavior: Behavior) -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let node = Node { head, behavior, hits: hits.clone() };
        let app = Router::new()
            .route("/status", get(status))
            .route("/block_results", get(block_results))
            .route("/block", get(block))
            .with_state(node);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), hits)
    }

    fn client(endpoints: &[String]) -> RpcClient {
        let http = reqwest::Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        RpcClient::with_http_client("cosmoshub-4", endpoints, http).unwrap()
    }

    /// An address nothing listens on, so connecting is refused.
    fn closed_endpoint() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_rejects_empty_and_invalid_endpoints() {
        assert!(matches!(RpcClient::new("cosmoshub-4", &[]), Err(RpcError::InvalidEndpoint(_))));
        assert!(matches!(
            RpcClient::new("cosmoshub-4", &["not a url".to_string()]),
            Err(RpcError::InvalidEndpoint(_))
        ));
    }

    #[tokio::test]
    async fn test_fails_over_refused_endpoints_and_pins_working_one() {
        let (live, live_hits) = spawn_node(500, Behavior::Healthy).await;
        let endpoints = vec![closed_endpoint(), closed_endpoint(), live.clone()];
        let client = client(&endpoints);

        assert_eq!(client.latest_height().await.unwrap(), 500);
        assert_eq!(client.rotations(), 2);
        assert_eq!(client.sticky_endpoint(), Some(live.as_str()));

        // The pinned endpoint is reused without retesting the dead ones.
        assert_eq!(client.latest_height().await.unwrap(), 500);
        assert_eq!(client.rotations(), 2);
        assert_eq!(live_hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_not_found_does_not_rotate() {
        let (first, _) = spawn_node(100, Behavior::Healthy).await;
        let (second, second_hits) = spawn_node(10_000, Behavior::Healthy).await;
        let client = client(&[first, second]);

        let err = client.block_results(101).await.unwrap_err();
        assert!(err.is_not_found(), "unexpected error: {err:?}");
        assert_eq!(client.rotations(), 0);
        assert_eq!(second_hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_http_404_is_not_found() {
        let (node, _) = spawn_node(100, Behavior::Healthy).await;
        let client = client(&[format!("{}/missing", node)]);
        let err = client.latest_height().await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_malformed_and_rpc_errors_rotate() {
        let (garbage, _) = spawn_node(100, Behavior::Garbage).await;
        let (failing, _) = spawn_node(100, Behavior::RpcFailure).await;
        let (live, _) = spawn_node(42, Behavior::Healthy).await;
        let client = client(&[garbage, failing, live]);

        assert_eq!(client.latest_height().await.unwrap(), 42);
        assert_eq!(client.rotations(), 2);
    }

    #[tokio::test]
    async fn test_error_status_with_result_body_rotates() {
        let (throttled, _) = spawn_node(7, Behavior::Throttled).await;
        let (live, _) = spawn_node(42, Behavior::Healthy).await;
        let failover = client(&[throttled.clone(), live.clone()]);

        assert_eq!(failover.latest_height().await.unwrap(), 42);
        assert_eq!(failover.rotations(), 1);
        assert_eq!(failover.sticky_endpoint(), Some(live.as_str()));

        let only_throttled = client(&[throttled]);
        match only_throttled.latest_height().await {
            Err(RpcError::Exhausted(last)) => assert!(matches!(*last, RpcError::Network(_))),
            other => panic!("expected exhausted, got {other:?}"),
        }
        assert_eq!(only_throttled.sticky_endpoint(), None);
    }

    #[tokio::test]
    async fn test_all_endpoints_failing_is_exhausted() {
        let client = client(&[closed_endpoint(), closed_endpoint()]);
        match client.latest_height().await {
            Err(RpcError::Exhausted(last)) => assert!(matches!(*last, RpcError::Network(_))),
            other => panic!("expected exhausted, got {other:?}"),
        }
        assert_eq!(client.sticky_endpoint(), None);
    }

    #[tokio::test]
    async fn test_fetches_block_results_and_header() {
        let (node, _) = spawn_node(100, Behavior::Healthy).await;
        let client = client(&[node]);

        let results = client.block_results(10).await.unwrap();
        assert_eq!(results.transactions().len(), 1);
        assert_eq!(results.transactions()[0].events[0].kind, "tx");

        let header = client.block_header(10).await.unwrap();
        assert_eq!(header.time.to_rfc3339(), "2024-03-01T12:00:00.123456789+00:00");
    }

    #[test]
    fn test_zero_or_missing_height_is_no_result() {
        assert_eq!(parse_height(Some("0")), Err(RpcError::NoResult));
        assert_eq!(parse_height(None), Err(RpcError::NoResult));
        assert_eq!(parse_height(Some("abc")), Err(RpcError::NoResult));
        assert_eq!(parse_height(Some("19000000")), Ok(19_000_000));
    }
}
