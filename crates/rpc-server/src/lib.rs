//! RPC Server - JSON-RPC over HTTP for the kernel
//!
//! Read methods answer from the latest published graph and validator set:
//! getGraph, getRound, getConsensusNodes, getHealth, getVersion.
//! submitSnapshot queues a snapshot for the snapshot processor.

pub mod http_server;
pub mod methods;

pub use http_server::HttpRpcServer;
pub use methods::{RpcContext, RpcError};

/// RPC Server configuration
#[derive(Clone, Debug)]
pub struct RpcServerConfig {
    /// HTTP RPC bind address
    pub http_addr: String,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            http_addr: "127.0.0.1:8239".to_string(),
        }
    }
}
