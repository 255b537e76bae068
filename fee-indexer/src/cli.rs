use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Default)]
#[command(name = "fee-indexer")]
#[command(about = "Indexes per-block transaction fees from Tendermint RPC nodes", long_about = None)]
pub struct Args {
    /// Path to configuration file (optional, uses defaults if not provided)
    #[arg(short, long)]
    pub config_path: Option<PathBuf>,

    /// SQLite database file
    #[arg(short, long)]
    pub database_path: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    pub json_logs: bool,

    /// API bind address
    #[arg(long)]
    pub api_bind: Option<String>,

    /// API port
    #[arg(long)]
    pub api_port: Option<u16>,

    /// Disable the query API
    #[arg(long)]
    pub no_api: bool,
}

pub fn parse_args() -> Args {
    Args::parse()
}
