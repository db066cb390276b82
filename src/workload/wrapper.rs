//! Per-workload lifecycle across the container engine, the packet filter and
//! the mapping store.
//!
//! [`WorkloadInstance`] keeps the three in lockstep: a workload's chain exists
//! exactly while the workload is meant to be exposed, and its mapping entry
//! exists exactly while the engine holds an instance for it. Chain deletions
//! that fail during removal are remembered and retried by
//! [`WorkloadWrapper::reap_orphaned_chains`].

use super::{MappingRepository, Pod, Result, WorkloadError};
use crate::engine::{ContainerEngine, EngineError, PodmanConfig, PodmanEngine, WorkloadInfo};
use crate::env;
use crate::network::{FirewallConfig, NftablesFilter, PacketFilter, allow_rule};
use anyhow::Context;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

/// Receives a notification after a workload has been fully removed.
///
/// Observers are called synchronously, in registration order, once the
/// engine instance, chain and mapping entry are gone.
pub trait Observer: Send + Sync {
    fn workload_removed(&self, workload_name: &str);
}

/// Lifecycle operations the reconciler drives per workload.
#[async_trait]
pub trait WorkloadWrapper: Send + Sync {
    /// Ensure the filter table exists. Safe to call repeatedly.
    async fn init(&self) -> Result<()>;

    async fn register_observer(&self, observer: Arc<dyn Observer>);

    /// Engine-reported workloads, named by their mapped workload name when known.
    async fn list(&self) -> Result<Vec<WorkloadInfo>>;

    /// Remove a workload's engine instance, chain and mapping entry.
    async fn remove(&self, workload_name: &str) -> Result<()>;

    /// Apply the pod's exposure and instantiate the manifest at `manifest_path`.
    async fn run(&self, pod: &Pod, manifest_path: &Path) -> Result<()>;

    /// Reapply the pod's exposure and start its existing engine instance.
    async fn start(&self, pod: &Pod) -> Result<()>;

    /// Flush the mapping store to disk.
    async fn persist_configuration(&self) -> Result<()>;

    /// Retry deletion of chains whose removal failed earlier.
    ///
    /// Returns the chains that are still orphaned.
    async fn reap_orphaned_chains(&self) -> Vec<String>;
}

/// [`WorkloadWrapper`] over a container engine and a packet filter.
pub struct WorkloadInstance {
    engine: Arc<dyn ContainerEngine>,
    filter: Arc<dyn PacketFilter>,
    mapping: MappingRepository,
    table: String,
    observers: RwLock<Vec<Arc<dyn Observer>>>,
    orphaned_chains: Mutex<BTreeSet<String>>,
}

impl WorkloadInstance {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        filter: Arc<dyn PacketFilter>,
        mapping: MappingRepository,
        table: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            filter,
            mapping,
            table: table.into(),
            observers: RwLock::new(Vec::new()),
            orphaned_chains: Mutex::new(BTreeSet::new()),
        }
    }

    /// Wire up podman, nftables and the mapping store under `data_dir`.
    pub async fn on_host(
        data_dir: &Path,
        firewall: &FirewallConfig,
        engine: &PodmanConfig,
    ) -> anyhow::Result<Self> {
        let podman = PodmanEngine::new(engine).context("Failed to set up container engine")?;
        let nft = NftablesFilter::new(firewall).context("Failed to set up packet filter")?;
        let mapping = MappingRepository::load(env::mapping_file_path(data_dir))
            .await
            .context("Failed to load workload mapping store")?;

        Ok(Self::new(
            Arc::new(podman),
            Arc::new(nft),
            mapping,
            firewall.table.clone(),
        ))
    }

    pub fn mapping(&self) -> &MappingRepository {
        &self.mapping
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Chains whose deletion failed and has not yet been retried successfully
    pub async fn orphaned_chains(&self) -> Vec<String> {
        self.orphaned_chains.lock().await.iter().cloned().collect()
    }

    /// Engine identifier of `workload_name`, falling back to the name itself.
    async fn resolve_id(&self, workload_name: &str) -> String {
        match self.mapping.get_id(workload_name).await {
            Some(id) => id,
            None => {
                debug!(
                    "No mapping for workload {}, addressing it by name",
                    workload_name
                );
                workload_name.to_string()
            }
        }
    }

    /// Delete a workload's chain without failing the caller, remembering it
    /// for a later retry when the filter refuses.
    async fn delete_chain_best_effort(&self, workload_name: &str) {
        match self.filter.delete_chain(&self.table, workload_name).await {
            Ok(()) => {
                self.orphaned_chains.lock().await.remove(workload_name);
            }
            Err(e) => {
                error!(
                    "Failed to delete chain '{}' from table '{}' for workload '{}': {}",
                    workload_name, self.table, workload_name, e
                );
                self.orphaned_chains
                    .lock()
                    .await
                    .insert(workload_name.to_string());
            }
        }
    }

    /// Make the workload's chain hold exactly one allow rule per declared
    /// host port. Ports are validated before anything is touched.
    async fn apply_network_configuration(&self, pod: &Pod) -> Result<()> {
        let name = pod.name();
        let host_ports = pod.host_ports().inspect_err(|e| error!("{}", e))?;

        if host_ports.is_empty() {
            self.delete_chain_best_effort(name).await;
            return Ok(());
        }

        // Start from an empty chain so rules never pile up across runs
        self.filter
            .delete_chain(&self.table, name)
            .await
            .map_err(|e| WorkloadError::network(name, e))?;
        self.orphaned_chains.lock().await.remove(name);

        self.filter
            .add_chain(&self.table, name)
            .await
            .map_err(|e| WorkloadError::network(name, e))?;

        for port in &host_ports {
            let rule = allow_rule(*port);
            self.filter
                .add_rule(&self.table, name, &rule)
                .await
                .map_err(|e| WorkloadError::network(name, e))?;
        }

        info!(
            "Opened host ports {:?} for workload {} in chain {}",
            host_ports, name, name
        );
        Ok(())
    }

    async fn notify_removed(&self, workload_name: &str) {
        let observers = self.observers.read().await.clone();
        for observer in &observers {
            observer.workload_removed(workload_name);
        }
    }
}

#[async_trait]
impl WorkloadWrapper for WorkloadInstance {
    async fn init(&self) -> Result<()> {
        self.filter
            .add_table(&self.table)
            .await
            .map_err(|e| WorkloadError::network(&self.table, e))?;
        debug!("Packet filter table {} ready", self.table);
        Ok(())
    }

    async fn register_observer(&self, observer: Arc<dyn Observer>) {
        self.observers.write().await.push(observer);
    }

    async fn list(&self) -> Result<Vec<WorkloadInfo>> {
        let mut infos = self.engine.list().await.map_err(WorkloadError::Listing)?;
        for info in &mut infos {
            if let Some(name) = self.mapping.get_name(&info.id).await {
                info.name = name;
            }
        }
        Ok(infos)
    }

    async fn remove(&self, workload_name: &str) -> Result<()> {
        let mut id = self.resolve_id(workload_name).await;
        match self.engine.remove(&id).await {
            Ok(()) => {}
            Err(EngineError::NotFound(_)) if id != workload_name => {
                // The mapping outlived the instance; pods are named after workloads
                warn!(
                    "Engine does not know id {} of workload {}, removing by name",
                    id, workload_name
                );
                if let Err(e) = self.engine.remove(workload_name).await {
                    if matches!(e, EngineError::NotFound(_)) {
                        self.mapping.remove(workload_name).await;
                    }
                    return Err(WorkloadError::engine(workload_name, e));
                }
                id = workload_name.to_string();
            }
            Err(e) => return Err(WorkloadError::engine(workload_name, e)),
        }

        self.delete_chain_best_effort(workload_name).await;
        self.mapping.remove(workload_name).await;

        info!("Removed workload {} ({})", workload_name, id);
        self.notify_removed(workload_name).await;
        Ok(())
    }

    async fn run(&self, pod: &Pod, manifest_path: &Path) -> Result<()> {
        let name = pod.name();
        self.apply_network_configuration(pod).await?;

        let ids = match self.engine.run(manifest_path).await {
            Ok(ids) => ids,
            Err(e) => {
                // Nothing is running behind the chain we just opened
                self.delete_chain_best_effort(name).await;
                return Err(WorkloadError::engine(name, e));
            }
        };

        let Some(id) = ids.first() else {
            self.delete_chain_best_effort(name).await;
            return Err(WorkloadError::engine(
                name,
                EngineError::NoIdentifier(manifest_path.to_path_buf()),
            ));
        };

        self.mapping.add(name, id).await;
        info!("Workload {} running as {}", name, id);
        Ok(())
    }

    async fn start(&self, pod: &Pod) -> Result<()> {
        let name = pod.name();
        self.apply_network_configuration(pod).await?;

        let id = self.resolve_id(name).await;
        self.engine
            .start(&id)
            .await
            .map_err(|e| WorkloadError::engine(name, e))?;

        info!("Started workload {} ({})", name, id);
        Ok(())
    }

    async fn persist_configuration(&self) -> Result<()> {
        self.mapping.persist().await
    }

    async fn reap_orphaned_chains(&self) -> Vec<String> {
        let pending: Vec<String> = self.orphaned_chains().await;
        if pending.is_empty() {
            return pending;
        }

        for chain in &pending {
            match self.filter.delete_chain(&self.table, chain).await {
                Ok(()) => {
                    info!("Reaped orphaned chain {}", chain);
                    self.orphaned_chains.lock().await.remove(chain);
                }
                Err(e) => warn!("Chain {} is still orphaned: {}", chain, e),
            }
        }

        self.orphaned_chains().await
    }
}
