//! Durable name ↔ engine identifier store.
//!
//! Lookups return `None` on a miss instead of failing: callers fall back to
//! using the workload name itself as the identifier, which the engine also
//! accepts. Mutations only touch memory; [`MappingRepository::persist`]
//! writes a full snapshot and is meant to be called once per batch.

use super::{Result, WorkloadError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio::fs as async_fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// One persisted name ↔ identifier pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingEntry {
    pub name: String,
    pub id: String,
}

/// On-disk format of the mapping store
#[derive(Debug, Serialize, Deserialize)]
struct MappingSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    persisted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    mappings: Vec<MappingEntry>,
}

/// Both directions of the mapping, always updated together
#[derive(Debug, Default)]
struct Mappings {
    name_to_id: BTreeMap<String, String>,
    id_to_name: HashMap<String, String>,
}

impl Mappings {
    fn insert(&mut self, name: &str, id: &str) {
        if let Some(previous_id) = self.name_to_id.remove(name) {
            self.id_to_name.remove(&previous_id);
        }
        if let Some(previous_name) = self.id_to_name.remove(id) {
            self.name_to_id.remove(&previous_name);
        }
        self.name_to_id.insert(name.to_string(), id.to_string());
        self.id_to_name.insert(id.to_string(), name.to_string());
    }

    fn remove(&mut self, name: &str) -> Option<String> {
        let id = self.name_to_id.remove(name)?;
        self.id_to_name.remove(&id);
        Some(id)
    }
}

/// Bidirectional workload name ↔ engine identifier map backed by one file.
#[derive(Debug)]
pub struct MappingRepository {
    path: PathBuf,
    mappings: RwLock<Mappings>,
    persist_lock: Mutex<()>,
}

impl MappingRepository {
    /// Load the store at `path`.
    ///
    /// A missing file yields an empty map. A file that cannot be decoded is
    /// logged and ignored; removals then fall back to workload names.
    ///
    /// # Errors
    ///
    /// Returns [`WorkloadError::Persistence`] if the file exists but cannot
    /// be read.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut mappings = Mappings::default();

        match async_fs::read(&path).await {
            Ok(content) => match serde_json::from_slice::<MappingSnapshot>(&content) {
                Ok(snapshot) => {
                    for entry in &snapshot.mappings {
                        mappings.insert(&entry.name, &entry.id);
                    }
                    info!(
                        "Loaded {} workload mappings from {}",
                        mappings.name_to_id.len(),
                        path.display()
                    );
                }
                Err(e) => {
                    warn!(
                        "Ignoring unreadable mapping store {}: {}",
                        path.display(),
                        e
                    );
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No mapping store at {}, starting empty", path.display());
            }
            Err(e) => return Err(WorkloadError::persistence(path, e)),
        }

        Ok(Self {
            path,
            mappings: RwLock::new(mappings),
            persist_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Map `name` to `id`, dropping any previous pairing of either side.
    pub async fn add(&self, name: &str, id: &str) {
        self.mappings.write().await.insert(name, id);
        debug!("Mapped workload {} to {}", name, id);
    }

    /// Forget the mapping of `name`; a no-op if there is none.
    pub async fn remove(&self, name: &str) {
        if let Some(id) = self.mappings.write().await.remove(name) {
            debug!("Unmapped workload {} from {}", name, id);
        }
    }

    pub async fn get_id(&self, name: &str) -> Option<String> {
        self.mappings.read().await.name_to_id.get(name).cloned()
    }

    pub async fn get_name(&self, id: &str) -> Option<String> {
        self.mappings.read().await.id_to_name.get(id).cloned()
    }

    /// All entries, ordered by workload name
    pub async fn entries(&self) -> Vec<MappingEntry> {
        self.mappings
            .read()
            .await
            .name_to_id
            .iter()
            .map(|(name, id)| MappingEntry {
                name: name.clone(),
                id: id.clone(),
            })
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.mappings.read().await.name_to_id.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Write a full snapshot to disk.
    ///
    /// The snapshot goes to a sibling temp file which is synced and then
    /// renamed over the store, so readers never observe a partial file.
    ///
    /// # Errors
    ///
    /// Returns [`WorkloadError::Persistence`] on any file system failure.
    pub async fn persist(&self) -> Result<()> {
        let _guard = self.persist_lock.lock().await;

        let snapshot = MappingSnapshot {
            persisted_at: Some(Utc::now()),
            mappings: self.entries().await,
        };
        let serialized =
            serde_json::to_vec_pretty(&snapshot).map_err(|e| WorkloadError::Serialization {
                what: "workload mappings".to_string(),
                message: e.to_string(),
            })?;

        if let Some(parent) = self.path.parent() {
            async_fs::create_dir_all(parent)
                .await
                .map_err(|e| WorkloadError::persistence(parent, e))?;
        }

        let temp_path = self.path.with_extension("json.tmp");
        let mut file = async_fs::File::create(&temp_path)
            .await
            .map_err(|e| WorkloadError::persistence(&temp_path, e))?;
        file.write_all(&serialized)
            .await
            .map_err(|e| WorkloadError::persistence(&temp_path, e))?;
        file.sync_all()
            .await
            .map_err(|e| WorkloadError::persistence(&temp_path, e))?;
        drop(file);

        async_fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| WorkloadError::persistence(&self.path, e))?;

        debug!(
            "Persisted {} workload mappings to {}",
            snapshot.mappings.len(),
            self.path.display()
        );
        Ok(())
    }
}
