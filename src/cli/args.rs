//! Command line argument parsing
//!
//! Subcommands:
//! - `apply`: Apply a desired-state message from a JSON file
//! - `restore`: Start the workloads of the stored configuration
//! - `list`: List the workloads known to the container engine
//! - `deregister`: Remove every managed workload
//! - `show-config`: Show configuration discovery information

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, PartialEq, Eq)]
pub enum ExecutionMode {
    Apply(PathBuf), // Desired-state message file
    Restore,
    List,
    Deregister,
    ShowConfig,
}

/// Options shared by every subcommand
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalOptions {
    pub config_override: Option<PathBuf>,
    pub data_dir_override: Option<PathBuf>,
    pub log_level: Option<String>,
}

#[derive(Debug, Parser)]
#[command(name = "edge-worker")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Reconciles container workloads and their host firewall exposure on an edge device")]
#[command(long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,
    /// Data directory (overrides the configured one)
    #[arg(short = 'd', long = "data-dir", global = true)]
    pub data_dir: Option<PathBuf>,
    /// Log filter, e.g. `debug` or `edge_worker=trace`
    #[arg(long = "log-level", global = true)]
    pub log_level: Option<String>,
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Apply a desired-state message
    Apply {
        /// Path to the JSON message
        message: PathBuf,
    },
    /// Start the workloads of the stored configuration (after a reboot)
    Restore,
    /// List workloads known to the container engine
    List,
    /// Remove every managed workload
    Deregister,
    /// Show configuration discovery information
    ShowConfig,
}

impl Args {
    pub fn parse() -> Self {
        Parser::parse()
    }

    pub fn global_options(&self) -> GlobalOptions {
        GlobalOptions {
            config_override: self.config.clone(),
            data_dir_override: self.data_dir.clone(),
            log_level: self.log_level.clone(),
        }
    }

    pub fn mode(&self) -> Result<ExecutionMode, String> {
        match &self.command {
            Some(Commands::Apply { message }) => Ok(ExecutionMode::Apply(message.clone())),
            Some(Commands::Restore) => Ok(ExecutionMode::Restore),
            Some(Commands::List) => Ok(ExecutionMode::List),
            Some(Commands::Deregister) => Ok(ExecutionMode::Deregister),
            Some(Commands::ShowConfig) => Ok(ExecutionMode::ShowConfig),
            None => Err(
                "No command specified. Use 'edge-worker --help' to see available commands."
                    .to_string(),
            ),
        }
    }
}
