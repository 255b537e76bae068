//! Fee indexer - Main entry point

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use fee_indexer::{
    api::{ApiServer, ApiState, ServedChain},
    cli,
    config::{Config, LogConfig, LogFormat},
    database::{Database, FeeStore},
    indexer::{IndexerService, Supervisor},
    rpc::{ChainRpc, RpcClient},
};

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));

    match log.format {
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

/// `DATABASE_URL` wins over the configured path; a `sqlite:` prefix is accepted.
fn database_path_from_env() -> Option<PathBuf> {
    std::env::var("DATABASE_URL").ok().map(|url| {
        PathBuf::from(url.trim_start_matches("sqlite://").trim_start_matches("sqlite:"))
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::parse_args();

    let config_path = args.config_path.clone().unwrap_or_else(|| PathBuf::from("fee-indexer.toml"));
    let mut config = Config::load(&config_path)
        .with_context(|| format!("loading configuration from {}", config_path.display()))?;
    config.apply_cli_overrides(&args);
    if let Some(path) = database_path_from_env() {
        config.database.path = path;
    }

    init_tracing(&config.log);
    info!("Starting fee indexer");

    info!("Database path: {:?}", config.database.path);
    let database = Arc::new(
        Database::with_max_connections(&config.database.path, config.database.max_connections)
            .await
            .context("opening database")?,
    );
    database.migrate().await.context("running migrations")?;
    info!("Database migrations completed");

    let (chains, rejected) = config.validated_chains();
    for e in &rejected {
        error!("Skipping chain: {}", e);
    }
    if chains.is_empty() {
        warn!("No valid chains configured, only the query API will run");
    }

    let store: Arc<dyn FeeStore> = database.clone();
    let mut engines = Vec::with_capacity(chains.len());
    for chain in &chains {
        let timeout = Duration::from_secs(chain.request_timeout_secs);
        let client = match RpcClient::with_timeout(&chain.chain_id, &chain.rpc_endpoints, timeout) {
            Ok(client) => client,
            Err(e) => {
                error!(chain_id = %chain.chain_id, "Skipping chain, cannot build RPC client: {}", e);
                continue;
            }
        };
        let rpc: Arc<dyn ChainRpc> = Arc::new(client);
        info!(chain_id = %chain.chain_id, endpoints = chain.rpc_endpoints.len(), "Configured chain");
        engines.push(Arc::new(IndexerService::new(chain, rpc, Arc::clone(&store))));
    }

    let served: Vec<ServedChain> = engines
        .iter()
        .filter_map(|engine| chains.iter().find(|c| c.chain_id == engine.chain_id()))
        .map(ServedChain::from)
        .collect();

    let supervisor = Supervisor::start(engines);

    if config.api.enabled {
        let api_server = ApiServer::new(
            ApiState::new(database.clone(), served),
            &config.api.bind_address,
            config.api.port,
        );
        if let Err(e) = api_server.start(shutdown_signal()).await {
            error!("API server failed: {}", e);
            // keep indexing until interrupted
            shutdown_signal().await;
        }
    } else {
        shutdown_signal().await;
    }

    info!("Shutdown requested");
    supervisor.shutdown().await;
    database.pool().close().await;
    info!("Fee indexer stopped");

    Ok(())
}
