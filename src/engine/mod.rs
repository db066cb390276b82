//! Container engine capability.
//!
//! The worker never runs containers itself. It hands a rendered pod manifest
//! to an external engine and afterwards refers to the resulting instance only
//! through the opaque identifier the engine returned.
//!
//! - [`ContainerEngine`]: the four operations the reconciler depends on
//! - [`PodmanEngine`]: implementation driving the `podman` command line tool
//! - [`WorkloadInfo`]: one engine-reported workload

use crate::executor::ExecutorError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod podman;

pub use podman::{PodmanConfig, PodmanEngine};

/// A workload instance as reported by the engine.
///
/// `name` is whatever the engine knows the instance by; the workload wrapper
/// overrides it with the mapped workload name when one exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadInfo {
    /// Engine identifier
    pub id: String,
    /// Workload name
    pub name: String,
    /// Engine-reported status string
    pub status: String,
}

/// Container engine errors.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The engine binary could not be located or started
    #[error("Container engine unavailable: {0}")]
    Unavailable(String),

    /// The referenced instance does not exist
    #[error("Workload instance not found: {0}")]
    NotFound(String),

    /// The engine ran but reported failure
    #[error("Command `{command}` failed with exit code {exit_code}: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// The engine accepted a manifest but reported no instance for it
    #[error("Engine returned no identifier for manifest {}", .0.display())]
    NoIdentifier(PathBuf),

    /// Engine output could not be decoded
    #[error("Failed to parse engine output: {0}")]
    Parse(#[from] serde_json::Error),

    /// The engine command could not be executed
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutorError),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Operations the reconciler needs from a container engine.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// List every workload instance the engine knows about.
    async fn list(&self) -> Result<Vec<WorkloadInfo>>;

    /// Instantiate the manifest at `manifest_path`.
    ///
    /// Returns the identifiers of the created instances; the first one is
    /// canonical for the workload.
    async fn run(&self, manifest_path: &Path) -> Result<Vec<String>>;

    /// Remove the instance with the given identifier (or engine-side name).
    async fn remove(&self, id: &str) -> Result<()>;

    /// Start a previously created instance.
    async fn start(&self, id: &str) -> Result<()>;
}
