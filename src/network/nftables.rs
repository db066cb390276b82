//! nftables-backed packet filter.
//!
//! Workload chains are base chains hooked on `input` with an accept policy,
//! so the only effect of a workload chain is the allow rules it holds.

use super::{NetworkError, PacketFilter, Result};
use crate::executor::{CommandExecutor, ExecutionCommand, HostExecutor};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Base chain declaration appended to `add chain`
const CHAIN_SPEC: &str = "{ type filter hook input priority 0 ; policy accept ; }";

/// Stderr fragment nft prints when a table or chain does not exist
const NOT_FOUND_MARKER: &str = "no such file or directory";

/// Timeout applied to every nft invocation
const NFT_TIMEOUT: Duration = Duration::from_secs(30);

/// Packet filter configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FirewallConfig {
    /// Table holding every workload chain
    pub table: String,
    /// nftables address family of the table
    pub family: String,
    /// Explicit path to the nft binary (looked up on `PATH` if unset)
    pub nft_binary: Option<PathBuf>,
}

impl Default for FirewallConfig {
    fn default() -> Self {
        Self {
            table: "edge".to_string(),
            family: "inet".to_string(),
            nft_binary: None,
        }
    }
}

/// Packet filter backed by the nft CLI.
#[derive(Clone)]
pub struct NftablesFilter {
    binary: PathBuf,
    family: String,
    executor: Arc<dyn CommandExecutor>,
}

impl NftablesFilter {
    /// Create a filter that runs nft on the host.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::Unavailable`] if no nft binary can be found.
    pub fn new(config: &FirewallConfig) -> Result<Self> {
        let binary = match &config.nft_binary {
            Some(path) => path.clone(),
            None => which::which("nft").map_err(|e| {
                NetworkError::Unavailable(format!("nft binary not found on PATH: {}", e))
            })?,
        };
        info!("Using nft binary at {}", binary.display());

        Ok(Self::with_executor(
            binary,
            config.family.clone(),
            Arc::new(HostExecutor::new()),
        ))
    }

    /// Create a filter with a custom command executor.
    pub fn with_executor(
        binary: impl Into<PathBuf>,
        family: impl Into<String>,
        executor: Arc<dyn CommandExecutor>,
    ) -> Self {
        Self {
            binary: binary.into(),
            family: family.into(),
            executor,
        }
    }

    /// Run `nft <verb> <object> <family> <table> [name] [rest...]`.
    async fn run_nft(&self, verb: &str, object: &str, table: &str, rest: &[&str]) -> Result<()> {
        let mut args = vec![
            verb.to_string(),
            object.to_string(),
            self.family.clone(),
            table.to_string(),
        ];
        args.extend(rest.iter().map(|a| a.to_string()));

        let command = ExecutionCommand::new(self.binary.clone(), args).with_timeout(NFT_TIMEOUT);
        let rendered = command.display();

        let result = self.executor.execute(command).await?;
        if result.success() {
            return Ok(());
        }

        Err(NetworkError::CommandFailed {
            command: rendered,
            exit_code: result.exit_code,
            stderr: result.stderr.trim().to_string(),
        })
    }
}

#[async_trait]
impl PacketFilter for NftablesFilter {
    async fn add_table(&self, table: &str) -> Result<()> {
        self.run_nft("add", "table", table, &[]).await?;
        debug!("Ensured table {} {}", self.family, table);
        Ok(())
    }

    async fn add_chain(&self, table: &str, chain: &str) -> Result<()> {
        let mut rest = vec![chain];
        rest.extend(CHAIN_SPEC.split_whitespace());
        self.run_nft("add", "chain", table, &rest).await?;
        debug!("Ensured chain {} in table {}", chain, table);
        Ok(())
    }

    async fn delete_chain(&self, table: &str, chain: &str) -> Result<()> {
        // A chain must be empty before nft lets it go
        for verb in ["flush", "delete"] {
            match self.run_nft(verb, "chain", table, &[chain]).await {
                Ok(()) => {}
                Err(NetworkError::CommandFailed { stderr, .. })
                    if stderr.to_lowercase().contains(NOT_FOUND_MARKER) =>
                {
                    debug!("Chain {} not present in table {}", chain, table);
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }
        info!("Deleted chain {} from table {}", chain, table);
        Ok(())
    }

    async fn add_rule(&self, table: &str, chain: &str, rule: &str) -> Result<()> {
        let mut rest = vec![chain];
        rest.extend(rule.split_whitespace());
        self.run_nft("add", "rule", table, &rest).await?;
        debug!("Added rule '{}' to chain {}", rule, chain);
        Ok(())
    }
}
