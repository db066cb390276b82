//! Host packet filter capability.
//!
//! Every workload that declares host ports gets its own chain, named after
//! the workload, inside a single table owned by the worker. The worker only
//! ever writes inside that table and never inspects rules it did not create.
//!
//! - [`PacketFilter`]: table/chain/rule primitives
//! - [`NftablesFilter`]: implementation driving the `nft` command line tool
//! - [`allow_rule`]: rule text admitting new and established TCP traffic to a port

use crate::executor::ExecutorError;
use async_trait::async_trait;

mod nftables;

pub use nftables::{FirewallConfig, NftablesFilter};

/// Packet filter errors.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// The filter binary could not be located or started
    #[error("Packet filter unavailable: {0}")]
    Unavailable(String),

    /// The filter rejected a mutation
    #[error("Command `{command}` failed with exit code {exit_code}: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// The filter command could not be executed
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutorError),
}

/// Result type for packet filter operations.
pub type Result<T> = std::result::Result<T, NetworkError>;

/// Table, chain and rule primitives of a host packet filter.
#[async_trait]
pub trait PacketFilter: Send + Sync {
    /// Create `table`; succeeds if it already exists.
    async fn add_table(&self, table: &str) -> Result<()>;

    /// Create `chain` in `table`; succeeds if it already exists.
    async fn add_chain(&self, table: &str, chain: &str) -> Result<()>;

    /// Delete `chain` and all of its rules; succeeds if it does not exist.
    async fn delete_chain(&self, table: &str, chain: &str) -> Result<()>;

    /// Append one rule, written in the filter's native grammar, to `chain`.
    async fn add_rule(&self, table: &str, chain: &str, rule: &str) -> Result<()>;
}

/// Rule admitting new and established TCP connections to `port`, counted.
pub fn allow_rule(port: u16) -> String {
    format!("tcp dport {} ct state new,established counter accept", port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_rule() {
        assert_eq!(
            allow_rule(8080),
            "tcp dport 8080 ct state new,established counter accept"
        );
    }
}
