use serde::{Deserialize, Serialize};

/// A directory of a workload's exported data and where the sync subsystem ships it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPath {
    /// Path relative to the workload's exported host path
    pub source: String,
    /// Remote destination
    pub target: String,
}

/// Data synchronization settings of a workload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataConfiguration {
    #[serde(default)]
    pub paths: Vec<DataPath>,
}

/// One desired workload as pushed by the control plane.
///
/// The name is the stable key across pushes. The specification is an opaque
/// pod definition (YAML or JSON) that is only interpreted when the manifest
/// is rendered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    pub name: String,
    pub specification: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<DataConfiguration>,
}

impl Workload {
    pub fn new(name: impl Into<String>, specification: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            specification: specification.into(),
            data: None,
        }
    }

    /// Attach data paths consumed by the sync subsystem
    pub fn with_data_paths(mut self, paths: Vec<DataPath>) -> Self {
        self.data = Some(DataConfiguration { paths });
        self
    }

    pub fn data_paths(&self) -> &[DataPath] {
        self.data
            .as_ref()
            .map(|d| d.paths.as_slice())
            .unwrap_or_default()
    }
}

/// Desired-state message delivered by the transport layer.
///
/// `configuration` carries settings of collaborating subsystems (heartbeat,
/// storage) and is kept opaque here; it only takes part in change detection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfigurationMessage {
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<serde_json::Value>,
    #[serde(default)]
    pub workloads: Vec<Workload>,
}
