//! API server implementation

use axum::{
    Router,
    http::Method,
};
use std::future::Future;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{CorsLayer, Any};
use tower_http::trace::TraceLayer;

use crate::api::routes;
use crate::config::ChainConfig;
use crate::database::Database;
use crate::error::{IndexerError, Result};
use crate::fees::FeeMode;

/// A chain the API answers for.
#[derive(Debug, Clone, PartialEq)]
pub struct ServedChain {
    pub chain_id: String,
    pub fee_mode: FeeMode,
}

impl From<&ChainConfig> for ServedChain {
    fn from(config: &ChainConfig) -> Self {
        Self {
            chain_id: config.chain_id.clone(),
            fee_mode: config.fee_mode(),
        }
    }
}

#[derive(Clone)]
pub struct ApiState {
    pub database: Arc<Database>,
    pub chains: Arc<Vec<ServedChain>>,
}

impl ApiState {
    pub fn new(database: Arc<Database>, chains: Vec<ServedChain>) -> Self {
        Self {
            database,
            chains: Arc::new(chains),
        }
    }

    pub fn chain(&self, chain_id: &str) -> Result<&ServedChain> {
        self.chains
            .iter()
            .find(|chain| chain.chain_id == chain_id)
            .ok_or_else(|| IndexerError::NotFound(format!("Unknown chain '{}'", chain_id)))
    }
}

pub struct ApiServer {
    state: ApiState,
    bind_address: String,
    port: u16,
}

impl ApiServer {
    pub fn new(state: ApiState, bind_address: &str, port: u16) -> Self {
        Self {
            state,
            bind_address: bind_address.to_string(),
            port,
        }
    }

    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::OPTIONS])
            .allow_headers(Any);

        Router::new()
            .nest("/api/v1", Router::new()
                .merge(routes::health::routes(self.state.clone()))
                .merge(routes::chains::routes(self.state.clone()))
                .merge(routes::fees::routes(self.state.clone()))
            )
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(cors),
            )
    }

    /// Serves until `shutdown` resolves.
    pub async fn start<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self.router();
        let addr = format!("{}:{}", self.bind_address, self.port);
        let listener = tokio::net::TcpListener::bind(&addr).await
            .map_err(|e| IndexerError::Internal(format!("Failed to bind {}: {}", addr, e)))?;

        tracing::info!("API server listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| IndexerError::Internal(format!("Server error: {}", e)))?;

        Ok(())
    }
}
