//! Reconciliation of the desired workload set against the container engine.
//!
//! Every pass is destroy-then-recreate: each desired workload's manifest is
//! rewritten, any existing instance is removed and a fresh one is created.
//! Once every desired workload has been attempted, engine-reported workloads
//! that are no longer desired are removed. Failures are collected per
//! workload and returned; a pass never stops on an individual failure.
//!
//! Passes are single-flight. A new [`WorkloadManager::update`] or
//! [`WorkloadManager::deregister`] cancels the pass in progress, which stops
//! before its next workload and skips cleanup and persistence.

use super::{Observer, Pod, Result, Workload, WorkloadError, WorkloadInstance, WorkloadWrapper};
use crate::cli::AgentConfig;
use crate::engine::WorkloadInfo;
use crate::env;
use regex::Regex;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use tokio::fs as async_fs;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

/// Workload names become file names and nft chain names, which must start
/// with a letter.
static WORKLOAD_NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9_.-]{0,62}$").expect("workload name regex is valid")
});

/// Check that `name` can be used as a manifest file name and a chain name.
pub fn validate_workload_name(name: &str) -> Result<()> {
    if WORKLOAD_NAME_REGEX.is_match(name) {
        Ok(())
    } else {
        Err(WorkloadError::InvalidName(name.to_string()))
    }
}

/// Drives a [`WorkloadWrapper`] towards the desired workload set.
pub struct WorkloadManager {
    data_dir: PathBuf,
    wrapper: Arc<dyn WorkloadWrapper>,
    pass_lock: Mutex<()>,
    in_flight: Mutex<CancellationToken>,
}

impl WorkloadManager {
    /// Create a manager over podman and nftables on this host.
    pub async fn new(config: &AgentConfig) -> anyhow::Result<Self> {
        let instance =
            WorkloadInstance::on_host(&config.data_dir, &config.firewall, &config.engine).await?;
        Ok(Self::with_wrapper(&config.data_dir, Arc::new(instance)).await?)
    }

    /// Create a manager over an existing wrapper and initialize it.
    ///
    /// # Errors
    ///
    /// Fails if the manifests directory cannot be created or the wrapper
    /// cannot set up its filter table.
    pub async fn with_wrapper(
        data_dir: impl Into<PathBuf>,
        wrapper: Arc<dyn WorkloadWrapper>,
    ) -> Result<Self> {
        let data_dir = data_dir.into();
        let manifests_dir = env::manifests_dir_path(&data_dir);
        async_fs::create_dir_all(&manifests_dir)
            .await
            .map_err(|e| WorkloadError::persistence(&manifests_dir, e))?;

        wrapper.init().await?;
        info!("Workload manager ready, data directory {}", data_dir.display());

        Ok(Self {
            data_dir,
            wrapper,
            pass_lock: Mutex::new(()),
            in_flight: Mutex::new(CancellationToken::new()),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub async fn register_observer(&self, observer: Arc<dyn Observer>) {
        self.wrapper.register_observer(observer).await;
    }

    /// Writable data root of a workload, mounted at `/export` in its containers.
    pub fn exported_host_path(&self, workload_name: &str) -> PathBuf {
        env::exported_host_path(&self.data_dir, workload_name)
    }

    /// Location of a workload's rendered manifest
    pub fn manifest_path(&self, workload_name: &str) -> PathBuf {
        env::manifest_file_path(&self.data_dir, workload_name)
    }

    /// Engine-reported workloads, named by workload name where mapped.
    pub async fn list_workloads(&self) -> Result<Vec<WorkloadInfo>> {
        self.wrapper.list().await
    }

    /// Reconcile towards `workloads`, returning one error per failed operation.
    pub async fn update(&self, workloads: &[Workload]) -> Vec<WorkloadError> {
        let token = self.supersede(None).await;
        self.reconcile(workloads, token).await
    }

    /// Like [`WorkloadManager::update`], also stopping when `cancel` fires.
    pub async fn update_with_cancellation(
        &self,
        workloads: &[Workload],
        cancel: &CancellationToken,
    ) -> Vec<WorkloadError> {
        let token = self.supersede(Some(cancel)).await;
        self.reconcile(workloads, token).await
    }

    /// Start previously created workloads, reapplying their firewall chains.
    ///
    /// Used after a reboot, when the engine still knows the instances but
    /// the packet filter has lost its chains.
    pub async fn start(&self, workloads: &[Workload]) -> Vec<WorkloadError> {
        let _pass = self.pass_lock.lock().await;
        let mut errors = Vec::new();

        for workload in workloads {
            if let Err(e) = validate_workload_name(&workload.name) {
                errors.push(e);
                continue;
            }
            let pod = match self.render(workload) {
                Ok(pod) => pod,
                Err(e) => {
                    errors.push(e);
                    continue;
                }
            };
            if let Err(e) = self.wrapper.start(&pod).await {
                error!("Failed to start workload {}: {}", workload.name, e);
                errors.push(e);
            }
        }

        info!(
            "Started {} workload(s), {} failure(s)",
            workloads.len(),
            errors.len()
        );
        errors
    }

    /// Remove every managed workload and forget its manifests.
    ///
    /// Cancels any pass in progress first. Every workload is attempted; all
    /// failures are returned together as [`WorkloadError::Multiple`].
    pub async fn deregister(&self) -> Result<()> {
        self.supersede(None).await;
        let _pass = self.pass_lock.lock().await;
        let mut errors = Vec::new();

        match self.wrapper.list().await {
            Ok(infos) => {
                let names: BTreeSet<String> = infos.into_iter().map(|info| info.name).collect();
                for name in &names {
                    if let Err(e) = self.wrapper.remove(name).await {
                        error!("Failed to remove workload {}: {}", name, e);
                        errors.push(e);
                    }
                }
            }
            Err(e) => errors.push(e),
        }

        let manifests_dir = env::manifests_dir_path(&self.data_dir);
        match async_fs::remove_dir_all(&manifests_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => errors.push(WorkloadError::persistence(&manifests_dir, e)),
        }

        if let Err(e) = self.wrapper.persist_configuration().await {
            errors.push(e);
        }

        if errors.is_empty() {
            info!("Deregistered all workloads");
            Ok(())
        } else {
            Err(WorkloadError::Multiple(errors))
        }
    }

    /// Cancel the pass in progress and hand out the token of the next one.
    async fn supersede(&self, parent: Option<&CancellationToken>) -> CancellationToken {
        let token = match parent {
            Some(parent) => parent.child_token(),
            None => CancellationToken::new(),
        };
        let mut in_flight = self.in_flight.lock().await;
        in_flight.cancel();
        *in_flight = token.clone();
        token
    }

    async fn reconcile(&self, workloads: &[Workload], token: CancellationToken) -> Vec<WorkloadError> {
        let _pass = self.pass_lock.lock().await;
        let pass_id = Uuid::new_v4();
        let span = info_span!("reconcile", %pass_id, desired = workloads.len());

        self.run_pass(workloads, &token).instrument(span).await
    }

    async fn run_pass(&self, workloads: &[Workload], token: &CancellationToken) -> Vec<WorkloadError> {
        let mut errors = Vec::new();

        let orphaned = self.wrapper.reap_orphaned_chains().await;
        if !orphaned.is_empty() {
            warn!("Chains still orphaned: {:?}", orphaned);
        }

        let mut desired = BTreeSet::new();
        for workload in workloads {
            if token.is_cancelled() {
                warn!("Reconciliation cancelled before workload {}", workload.name);
                errors.push(WorkloadError::Cancelled);
                return errors;
            }

            if let Err(e) = validate_workload_name(&workload.name) {
                warn!("{}", e);
                errors.push(e);
                continue;
            }
            if !desired.insert(workload.name.clone()) {
                warn!("Skipping duplicate workload {}", workload.name);
                errors.push(WorkloadError::DuplicateWorkload(workload.name.clone()));
                continue;
            }

            if let Err(e) = self.apply(workload).await {
                error!(workload = %workload.name, "Failed to apply workload: {}", e);
                errors.push(e);
            }
        }

        if token.is_cancelled() {
            warn!("Reconciliation cancelled before stale cleanup");
            errors.push(WorkloadError::Cancelled);
            return errors;
        }

        errors.extend(self.remove_stale(&desired).await);

        if let Err(e) = self.wrapper.persist_configuration().await {
            error!("Failed to persist workload mappings: {}", e);
            errors.push(e);
        }

        info!(
            "Reconciliation finished with {} error(s) for {} desired workload(s)",
            errors.len(),
            desired.len()
        );
        errors
    }

    /// Render the manifest and recreate one workload.
    async fn apply(&self, workload: &Workload) -> Result<()> {
        let pod = self.render(workload)?;
        let manifest_path = self.write_manifest(&pod).await?;

        if let Err(e) = self.wrapper.remove(&workload.name).await {
            debug!("No previous instance of {} removed: {}", workload.name, e);
        }

        self.wrapper.run(&pod, &manifest_path).await?;
        info!(workload = %workload.name, "Workload applied");
        Ok(())
    }

    fn render(&self, workload: &Workload) -> Result<Pod> {
        Pod::from_workload(workload, &self.exported_host_path(&workload.name))
    }

    async fn write_manifest(&self, pod: &Pod) -> Result<PathBuf> {
        let path = self.manifest_path(pod.name());
        if let Some(parent) = path.parent() {
            async_fs::create_dir_all(parent)
                .await
                .map_err(|e| WorkloadError::persistence(parent, e))?;
        }

        let manifest = pod.to_yaml()?;
        async_fs::write(&path, manifest)
            .await
            .map_err(|e| WorkloadError::persistence(&path, e))?;
        debug!("Wrote manifest {}", path.display());
        Ok(path)
    }

    /// Remove engine-reported workloads that are not desired.
    async fn remove_stale(&self, desired: &BTreeSet<String>) -> Vec<WorkloadError> {
        let mut errors = Vec::new();

        let infos = match self.wrapper.list().await {
            Ok(infos) => infos,
            Err(e) => {
                error!("Skipping stale workload cleanup: {}", e);
                errors.push(e);
                return errors;
            }
        };

        let stale: BTreeSet<String> = infos
            .into_iter()
            .map(|info| info.name)
            .filter(|name| !desired.contains(name))
            .collect();

        for name in &stale {
            info!(workload = %name, "Removing stale workload");
            if let Err(e) = self.wrapper.remove(name).await {
                error!(workload = %name, "Failed to remove stale workload: {}", e);
                errors.push(e);
            }
        }
        errors
    }
}
