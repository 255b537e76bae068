//! Read-only HTTP query surface

pub mod routes;
pub mod server;

pub use server::{ApiServer, ApiState, ServedChain};
