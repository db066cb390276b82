//! Podman-backed container engine.
//!
//! Workloads are pods: manifests are instantiated with `podman play kube`
//! and pods are listed, removed and started through the `podman pod`
//! subcommands. Every invocation goes through a [`CommandExecutor`] so the
//! argument vectors can be asserted without a podman installation.

use super::{ContainerEngine, EngineError, Result, WorkloadInfo};
use crate::executor::{CommandExecutor, ExecutionCommand, ExecutionResult, HostExecutor};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Podman engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PodmanConfig {
    /// Explicit path to the podman binary (looked up on `PATH` if unset)
    pub podman_binary: Option<PathBuf>,
    /// Timeout applied to every podman invocation, in seconds
    pub command_timeout_secs: u64,
}

impl Default for PodmanConfig {
    fn default() -> Self {
        Self {
            podman_binary: None,
            command_timeout_secs: 120,
        }
    }
}

/// Stderr fragments podman prints when a pod does not exist
const NOT_FOUND_MARKERS: [&str; 2] = ["no such pod", "no pod with name or id"];

/// Container engine backed by the podman CLI.
#[derive(Clone)]
pub struct PodmanEngine {
    binary: PathBuf,
    timeout: Duration,
    executor: Arc<dyn CommandExecutor>,
}

/// One entry of `podman pod ps --format json`
#[derive(Debug, Deserialize)]
struct PodListEntry {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Name", default)]
    name: String,
    #[serde(rename = "Status", default)]
    status: String,
}

impl PodmanEngine {
    /// Create an engine that runs podman on the host.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Unavailable`] if no podman binary can be found.
    pub fn new(config: &PodmanConfig) -> Result<Self> {
        let binary = match &config.podman_binary {
            Some(path) => path.clone(),
            None => which::which("podman").map_err(|e| {
                EngineError::Unavailable(format!("podman binary not found on PATH: {}", e))
            })?,
        };
        info!("Using podman binary at {}", binary.display());

        Ok(Self::with_executor(
            binary,
            Duration::from_secs(config.command_timeout_secs),
            Arc::new(HostExecutor::new()),
        ))
    }

    /// Create an engine with a custom command executor.
    pub fn with_executor(
        binary: impl Into<PathBuf>,
        timeout: Duration,
        executor: Arc<dyn CommandExecutor>,
    ) -> Self {
        Self {
            binary: binary.into(),
            timeout,
            executor,
        }
    }

    /// Run podman with the given arguments, failing on a non-zero exit.
    async fn podman(&self, args: Vec<String>) -> Result<ExecutionResult> {
        let command =
            ExecutionCommand::new(self.binary.clone(), args).with_timeout(self.timeout);
        let rendered = command.display();

        let result = self.executor.execute(command).await?;
        if result.success() {
            return Ok(result);
        }

        Err(EngineError::CommandFailed {
            command: rendered,
            exit_code: result.exit_code,
            stderr: result.stderr.trim().to_string(),
        })
    }

    /// Run a podman pod subcommand that targets a single pod.
    async fn pod_command(&self, verb: &str, id: &str, extra: &[&str]) -> Result<()> {
        let mut args = vec!["pod".to_string(), verb.to_string()];
        args.extend(extra.iter().map(|a| a.to_string()));
        args.push(id.to_string());

        match self.podman(args).await {
            Ok(_) => Ok(()),
            Err(EngineError::CommandFailed { stderr, .. }) if is_not_found(&stderr) => {
                Err(EngineError::NotFound(id.to_string()))
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl ContainerEngine for PodmanEngine {
    async fn list(&self) -> Result<Vec<WorkloadInfo>> {
        let result = self
            .podman(vec![
                "pod".to_string(),
                "ps".to_string(),
                "--format".to_string(),
                "json".to_string(),
            ])
            .await?;

        let workloads = parse_pod_list(&result.stdout)?;
        debug!("Podman reports {} pods", workloads.len());
        Ok(workloads)
    }

    async fn run(&self, manifest_path: &Path) -> Result<Vec<String>> {
        debug!("Playing manifest: {}", manifest_path.display());

        let result = self
            .podman(vec![
                "play".to_string(),
                "kube".to_string(),
                manifest_path.display().to_string(),
            ])
            .await?;

        let ids = parse_play_kube_output(&result.stdout);
        if ids.is_empty() {
            return Err(EngineError::NoIdentifier(manifest_path.to_path_buf()));
        }

        info!(
            "Created pod {} from {}",
            ids[0],
            manifest_path.display()
        );
        Ok(ids)
    }

    async fn remove(&self, id: &str) -> Result<()> {
        debug!("Removing pod: {}", id);
        self.pod_command("rm", id, &["--force"]).await?;
        info!("Removed pod: {}", id);
        Ok(())
    }

    async fn start(&self, id: &str) -> Result<()> {
        debug!("Starting pod: {}", id);
        self.pod_command("start", id, &[]).await?;
        info!("Started pod: {}", id);
        Ok(())
    }
}

/// Decode `podman pod ps --format json` output.
///
/// Podman prints `null` or nothing at all when there are no pods.
fn parse_pod_list(stdout: &str) -> Result<Vec<WorkloadInfo>> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let entries: Option<Vec<PodListEntry>> = serde_json::from_str(trimmed)?;
    Ok(entries
        .unwrap_or_default()
        .into_iter()
        .map(|entry| WorkloadInfo {
            name: if entry.name.is_empty() {
                entry.id.clone()
            } else {
                entry.name
            },
            id: entry.id,
            status: entry.status,
        })
        .collect())
}

/// Extract pod identifiers from `podman play kube` output.
///
/// The output groups identifiers under section headers:
///
/// ```text
/// Pod:
/// 3c5b...
/// Container:
/// 9f01...
/// ```
fn parse_play_kube_output(stdout: &str) -> Vec<String> {
    let mut ids = Vec::new();
    let mut in_pod_section = false;

    for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if line.ends_with(':') {
            in_pod_section = line.eq_ignore_ascii_case("pod:");
            continue;
        }
        if in_pod_section {
            ids.push(line.to_string());
        }
    }

    ids
}

fn is_not_found(stderr: &str) -> bool {
    let stderr = stderr.to_lowercase();
    NOT_FOUND_MARKERS.iter().any(|marker| stderr.contains(marker))
}
