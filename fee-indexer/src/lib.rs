//! Fee indexer
//!
//! Follows one or more Tendermint-based chains through their HTTP RPC,
//! extracts per-block transaction fee totals and persists them to SQLite with
//! a resumable per-chain cursor. A read-only HTTP API aggregates the stored
//! totals over height or time ranges.

pub mod api;
pub mod cli;
pub mod config;
pub mod database;
pub mod error;
pub mod fees;
pub mod indexer;
pub mod models;
pub mod rpc;

pub use error::{IndexerError, Result};
