//! Database module for the fee indexer

pub mod connection;
pub mod queries;
pub mod store;

pub use connection::Database;
pub use store::{FeeStore, MissedHeight};
