use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::fs;
use thiserror::Error;
use url::Url;

use crate::fees::FeeMode;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration for chain '{chain_id}': {reason}")]
    Invalid { chain_id: String, reason: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub log: LogConfig,
    pub chains: Vec<ChainConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Per-chain indexing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainConfig {
    pub chain_id: String,
    pub rpc_endpoints: Vec<String>,
    #[serde(default = "default_start_height")]
    pub start_height: u64,
    /// Denomination to total; absent means every denomination is kept.
    #[serde(default)]
    pub fee_denom: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_start_height() -> u64 { 1 }
fn default_batch_size() -> u64 { 100 }
fn default_retry_attempts() -> u32 { 3 }
fn default_retry_delay_ms() -> u64 { 1000 }
fn default_concurrency() -> usize { 10 }
fn default_poll_interval_ms() -> u64 { 5000 }
fn default_request_timeout_secs() -> u64 { 30 }

impl ChainConfig {
    pub fn new(chain_id: &str, rpc_endpoints: Vec<String>) -> Self {
        Self {
            chain_id: chain_id.to_string(),
            rpc_endpoints,
            start_height: default_start_height(),
            fee_denom: None,
            batch_size: default_batch_size(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            concurrency: default_concurrency(),
            poll_interval_ms: default_poll_interval_ms(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }

    pub fn fee_mode(&self) -> FeeMode {
        FeeMode::from_denom(self.fee_denom.as_deref())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::Invalid {
            chain_id: self.chain_id.clone(),
            reason,
        };

        if self.chain_id.trim().is_empty() {
            return Err(invalid("chain_id must not be empty".to_string()));
        }
        if self.rpc_endpoints.is_empty() {
            return Err(invalid("at least one rpc endpoint is required".to_string()));
        }
        for endpoint in &self.rpc_endpoints {
            let url = Url::parse(endpoint)
                .map_err(|e| invalid(format!("endpoint '{}' is not a valid URL: {}", endpoint, e)))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(invalid(format!("endpoint '{}' must use http or https", endpoint)));
            }
        }
        if self.start_height == 0 {
            return Err(invalid("start_height must be at least 1".to_string()));
        }
        if let Some(denom) = &self.fee_denom {
            if denom.trim().is_empty() || !denom.starts_with(|c: char| c.is_ascii_alphabetic()) {
                return Err(invalid(format!("fee_denom '{}' is not a valid denomination", denom)));
            }
        }
        if self.batch_size == 0 {
            return Err(invalid("batch_size must be at least 1".to_string()));
        }
        if self.retry_attempts == 0 {
            return Err(invalid("retry_attempts must be at least 1".to_string()));
        }
        if self.concurrency == 0 {
            return Err(invalid("concurrency must be at least 1".to_string()));
        }
        if self.request_timeout_secs == 0 {
            return Err(invalid("request_timeout_secs must be at least 1".to_string()));
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from file if it exists, otherwise use defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            Self::from_toml(&content)
        } else {
            Ok(Config::default())
        }
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Override config with CLI arguments
    pub fn apply_cli_overrides(&mut self, args: &crate::cli::Args) {
        if let Some(path) = &args.database_path {
            self.database.path = path.clone();
        }

        if let Some(level) = &args.log_level {
            self.log.level = level.clone();
        }

        if args.json_logs {
            self.log.format = LogFormat::Json;
        }

        if let Some(bind) = &args.api_bind {
            self.api.bind_address = bind.clone();
        }

        if let Some(port) = args.api_port {
            self.api.port = port;
        }

        if args.no_api {
            self.api.enabled = false;
        }
    }

    /// Splits the configured chains into runnable ones and rejected ones.
    pub fn validated_chains(&self) -> (Vec<ChainConfig>, Vec<ConfigError>) {
        let mut seen = HashSet::new();
        let mut valid = Vec::new();
        let mut rejected = Vec::new();

        for chain in &self.chains {
            if let Err(e) = chain.validate() {
                rejected.push(e);
                continue;
            }
            if !seen.insert(chain.chain_id.clone()) {
                rejected.push(ConfigError::Invalid {
                    chain_id: chain.chain_id.clone(),
                    reason: "duplicate chain_id".to_string(),
                });
                continue;
            }
            valid.push(chain.clone());
        }

        (valid, rejected)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("fee_indexer.db"),
            max_connections: 10,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Args;

    const SAMPLE: &str = r#"
[database]
path = "/var/lib/fee-indexer/fees.db"

[api]
port = 8080

[log]
format = "json"

[[chains]]
chain_id = "cosmoshub-4"
rpc_endpoints = ["https://rpc.cosmos.network", "https://cosmos-rpc.polkachu.com"]
start_height = 19000000
fee_denom = "uatom"

[[chains]]
chain_id = "osmosis-1"
rpc_endpoints = ["https://rpc.osmosis.zone"]
batch_size = 50
retry_attempts = 5
retry_delay_ms = 250
"#;

    #[test]
    fn test_parses_sample_with_defaults() {
        let config = Config::from_toml(SAMPLE).unwrap();
        assert_eq!(config.database.path, PathBuf::from("/var/lib/fee-indexer/fees.db"));
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.api.port, 8080);
        assert!(config.api.enabled);
        assert_eq!(config.log.format, LogFormat::Json);
        assert_eq!(config.log.level, "info");

        let hub = &config.chains[0];
        assert_eq!(hub.start_height, 19_000_000);
        assert_eq!(hub.fee_mode(), FeeMode::Single("uatom".to_string()));
        assert_eq!(hub.batch_size, 100);
        assert_eq!(hub.retry_attempts, 3);
        assert_eq!(hub.retry_delay_ms, 1000);
        assert_eq!(hub.concurrency, 10);

        let osmo = &config.chains[1];
        assert_eq!(osmo.fee_mode(), FeeMode::Multi);
        assert_eq!(osmo.start_height, 1);
        assert_eq!(osmo.batch_size, 50);
        assert_eq!(osmo.retry_attempts, 5);
        assert_eq!(osmo.retry_delay_ms, 250);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = Config::load(Path::new("/nonexistent/fee-indexer.toml")).unwrap();
        assert!(config.chains.is_empty());
        assert_eq!(config.api.port, 3000);
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(Config::from_toml("[[chains]]\nchain_id = 5"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_invalid_chains_are_rejected_individually() {
        let mut config = Config::from_toml(SAMPLE).unwrap();
        let mut no_endpoints = ChainConfig::new("juno-1", vec![]);
        no_endpoints.batch_size = 10;
        let mut zero_batch = ChainConfig::new("stargaze-1", vec!["https://rpc.stargaze.zone".into()]);
        zero_batch.batch_size = 0;
        let bad_scheme = ChainConfig::new("akash", vec!["ws://rpc.akash.network".into()]);
        let duplicate = ChainConfig::new("osmosis-1", vec!["https://rpc.osmosis.zone".into()]);
        config.chains.extend([no_endpoints, zero_batch, bad_scheme, duplicate]);

        let (valid, rejected) = config.validated_chains();
        let valid_ids: Vec<&str> = valid.iter().map(|c| c.chain_id.as_str()).collect();
        assert_eq!(valid_ids, vec!["cosmoshub-4", "osmosis-1"]);
        assert_eq!(rejected.len(), 4);
        assert!(rejected.iter().all(|e| matches!(e, ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_rejects_bad_denom_and_start_height() {
        let mut chain = ChainConfig::new("cosmoshub-4", vec!["https://rpc.cosmos.network".into()]);
        chain.fee_denom = Some("1uatom".to_string());
        assert!(chain.validate().is_err());

        chain.fee_denom = None;
        chain.start_height = 0;
        assert!(chain.validate().is_err());
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = Config::default();
        let args = Args {
            database_path: Some(PathBuf::from("/tmp/override.db")),
            log_level: Some("debug".to_string()),
            json_logs: true,
            api_port: Some(9000),
            no_api: true,
            ..Default::default()
        };
        config.apply_cli_overrides(&args);

        assert_eq!(config.database.path, PathBuf::from("/tmp/override.db"));
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.log.format, LogFormat::Json);
        assert_eq!(config.api.port, 9000);
        assert!(!config.api.enabled);
    }
}
