//! Node Configuration

use kernel::KernelConfig;
use kernel_common::Key;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Node configuration, read from a JSON file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Public key this node signs snapshots with
    pub signer: Key,
    /// HTTP RPC bind address
    pub rpc_addr: String,
    /// Snapshot queue poll interval in milliseconds
    pub poll_interval_ms: u64,
    /// Snapshot queue capacity
    pub queue_capacity: usize,
    /// Protocol parameters
    pub kernel: KernelConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            signer: Key::default(),
            rpc_addr: "127.0.0.1:8239".to_string(),
            poll_interval_ms: 50,
            queue_capacity: 1024,
            kernel: KernelConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }
}
