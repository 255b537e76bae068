//! Tendermint RPC access: wire model, the `ChainRpc` seam and the failover client

pub mod api;
pub mod client;
pub mod endpoint;
pub mod model;

pub use api::ChainRpc;
pub use client::RpcClient;
pub use endpoint::EndpointSelector;
pub use model::*;
