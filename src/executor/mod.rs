//! # Host Command Execution
//!
//! The container engine and the packet filter are both driven through their
//! command line tools (`podman`, `nft`). This module provides the narrow seam
//! they share: an [`ExecutionCommand`] describing one invocation, an
//! [`ExecutionResult`] carrying its captured output, and the
//! [`CommandExecutor`] trait that runs it.
//!
//! [`HostExecutor`] is the production implementation; tests substitute a
//! scripted executor to assert the exact argument vectors without touching
//! the host.
//!
//! ```rust,no_run
//! use edge_worker::executor::{CommandExecutor, ExecutionCommand, HostExecutor};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let executor = HostExecutor::new();
//!     let command = ExecutionCommand::new("podman", vec!["pod".into(), "ps".into()])
//!         .with_timeout(Duration::from_secs(30));
//!
//!     let result = executor.execute(command).await?;
//!     println!("{}", result.stdout);
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

/// Host-based command execution.
///
/// Implements [`HostExecutor`] for direct process execution on the
/// host system using `tokio::process::Command`.
pub mod host;

pub use host::HostExecutor;

/// Result of command execution
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    /// Standard output from the command
    pub stdout: String,
    /// Standard error from the command
    pub stderr: String,
    /// Exit code (0 = success, non-zero = failure)
    pub exit_code: i32,
    /// Duration of command execution
    pub duration: Duration,
}

impl ExecutionResult {
    /// Check if the command executed successfully (exit code 0)
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Command to execute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionCommand {
    /// Program name or path to execute
    pub program: PathBuf,
    /// Command line arguments
    pub args: Vec<String>,
    /// Maximum execution time (None = no timeout)
    pub timeout: Option<Duration>,
}

impl ExecutionCommand {
    /// Create a new command with just program and args
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: None,
        }
    }

    /// Set execution timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Render the command line for log and error messages
    pub fn display(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Errors during command execution
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// Command execution timed out
    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    /// I/O error (typically the program could not be spawned)
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Runs an [`ExecutionCommand`] to completion.
///
/// A non-zero exit code is not an error at this level; callers inspect
/// [`ExecutionResult::success`] and interpret stderr themselves.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Execute a command and return its captured output
    async fn execute(&self, cmd: ExecutionCommand) -> Result<ExecutionResult, ExecutorError>;
}
