//! Device configuration state.
//!
//! Holds the last applied [`DeviceConfigurationMessage`] on disk and fans
//! new messages out to observers. A message is only dispatched when it
//! differs from the stored one, or when nothing has been applied yet, and it
//! is only stored once every observer accepted it: a rejected message is
//! re-applied in full when the control plane pushes it again. Only the most
//! recent push is ever stored.

use crate::env;
use crate::workload::{DeviceConfigurationMessage, Workload, WorkloadError, WorkloadManager};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs as async_fs;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    /// An observer could not apply the message
    #[error("Cannot update observer: {0:#}")]
    Observer(anyhow::Error),

    #[error("Cannot encode device configuration: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cannot write device config file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Receives every device configuration that differs from the applied one.
#[async_trait]
pub trait ConfigurationObserver: Send + Sync {
    async fn configuration_updated(&self, message: &DeviceConfigurationMessage) -> anyhow::Result<()>;
}

#[async_trait]
impl ConfigurationObserver for WorkloadManager {
    async fn configuration_updated(&self, message: &DeviceConfigurationMessage) -> anyhow::Result<()> {
        let errors = self.update(&message.workloads).await;
        if errors.is_empty() {
            Ok(())
        } else {
            Err(WorkloadError::Multiple(errors).into())
        }
    }
}

struct State {
    current: DeviceConfigurationMessage,
    initial: bool,
    /// Sequence number of the last push handed to observers
    dispatched: u64,
    /// Sequence number of the push `current` came from
    stored: u64,
}

/// Persisted device configuration with change detection.
pub struct ConfigurationManager {
    path: PathBuf,
    state: RwLock<State>,
    observers: RwLock<Vec<Arc<dyn ConfigurationObserver>>>,
    store_lock: Mutex<()>,
}

impl ConfigurationManager {
    /// Load the device configuration stored under `data_dir`.
    ///
    /// Without a readable file the manager starts from defaults and treats the
    /// next message as the initial configuration.
    pub async fn new(data_dir: &Path) -> Self {
        let path = env::device_config_file_path(data_dir);
        info!("Device config file: {}", path.display());

        let (current, initial) = match async_fs::read(&path).await {
            Ok(content) => match serde_json::from_slice(&content) {
                Ok(message) => (message, false),
                Err(e) => {
                    error!("Ignoring corrupt device config {}: {}", path.display(), e);
                    (DeviceConfigurationMessage::default(), true)
                }
            },
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    error!("Cannot read device config {}: {}", path.display(), e);
                }
                (DeviceConfigurationMessage::default(), true)
            }
        };

        Self {
            path,
            state: RwLock::new(State {
                current,
                initial,
                dispatched: 0,
                stored: 0,
            }),
            observers: RwLock::new(Vec::new()),
            store_lock: Mutex::new(()),
        }
    }

    pub async fn register_observer(&self, observer: Arc<dyn ConfigurationObserver>) {
        self.observers.write().await.push(observer);
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `message` if it is new.
    ///
    /// Observers are notified in registration order; the first failure stops
    /// the fan-out and leaves the stored configuration untouched. No lock is
    /// held while observers run, so a newer push reaches the workload manager
    /// (and cancels its pass) while an older one is still being applied, and
    /// the accessors stay responsive. A push that finishes after a newer one
    /// was dispatched is not stored.
    pub async fn update(&self, message: DeviceConfigurationMessage) -> Result<(), ConfigurationError> {
        let sequence = {
            let mut state = self.state.write().await;
            let workloads_equal = state.current.workloads == message.workloads;
            let configuration_equal = state.current.configuration == message.configuration;
            // A dispatched push that was never stored may have changed the device
            let settled = state.dispatched == state.stored;
            debug!(
                "Initial config: {}; settled: {}; workloads equal: {}; configuration equal: {}",
                state.initial, settled, workloads_equal, configuration_equal
            );

            if !state.initial && settled && workloads_equal && configuration_equal {
                debug!("Configuration didn't change");
                return Ok(());
            }
            state.dispatched += 1;
            state.dispatched
        };

        let observers = self.observers.read().await.clone();
        for observer in &observers {
            observer
                .configuration_updated(&message)
                .await
                .map_err(ConfigurationError::Observer)?;
        }

        let _store = self.store_lock.lock().await;
        if self.state.read().await.dispatched != sequence {
            info!(
                "Device configuration version '{}' was superseded by a newer push, not storing it",
                message.version
            );
            return Ok(());
        }

        let serialized = serde_json::to_vec_pretty(&message)?;
        async_fs::write(&self.path, serialized)
            .await
            .map_err(|source| {
                warn!("Cannot write device config {}: {}", self.path.display(), source);
                ConfigurationError::Io {
                    path: self.path.clone(),
                    source,
                }
            })?;

        info!(
            "Applied device configuration version '{}' with {} workload(s)",
            message.version,
            message.workloads.len()
        );
        let mut state = self.state.write().await;
        state.current = message;
        state.initial = false;
        state.stored = sequence;
        Ok(())
    }

    pub async fn workloads(&self) -> Vec<Workload> {
        self.state.read().await.current.workloads.clone()
    }

    pub async fn configuration_version(&self) -> String {
        self.state.read().await.current.version.clone()
    }

    pub async fn is_initial_config(&self) -> bool {
        self.state.read().await.initial
    }

    pub async fn device_configuration(&self) -> DeviceConfigurationMessage {
        self.state.read().await.current.clone()
    }
}
