//! Pod model and manifest rendering.
//!
//! Only the parts of a pod the worker touches are typed: container ports (to
//! derive firewall exposure), volumes and volume mounts (to inject the export
//! volume). Every other field of the specification is carried through
//! verbatim so the engine sees exactly what the control plane sent.

use super::{Result, Workload, WorkloadError};
use crate::env;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::path::Path;

/// Host path volume type that lets the engine create the directory
const EXPORT_VOLUME_TYPE: &str = "DirectoryOrCreate";

/// A rendered `v1/Pod` manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pod {
    pub api_version: String,
    pub kind: String,
    pub metadata: PodMetadata,
    pub spec: PodSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodMetadata {
    pub name: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Pod specification as carried in [`Workload::specification`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    #[serde(default)]
    pub containers: Vec<Container>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Value>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<ContainerPort>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<Value>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// A container port. Only ports declaring `hostPort` are exposed on the host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPort {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_port: Option<i64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Pod {
    /// Render the pod for `workload`, wiring in its export volume.
    ///
    /// # Errors
    ///
    /// Returns [`WorkloadError::InvalidSpecification`] if the specification is
    /// not a pod spec.
    pub fn from_workload(workload: &Workload, exported_host_path: &Path) -> Result<Self> {
        let mut spec = if workload.specification.trim().is_empty() {
            PodSpec::default()
        } else {
            serde_yaml::from_str::<PodSpec>(&workload.specification).map_err(|source| {
                WorkloadError::InvalidSpecification {
                    workload: workload.name.clone(),
                    source,
                }
            })?
        };

        let volume_name = export_volume_name(&workload.name);
        spec.volumes.push(export_volume(&volume_name, exported_host_path));
        for container in &mut spec.containers {
            container.volume_mounts.push(export_mount(&volume_name));
        }

        Ok(Self {
            api_version: "v1".to_string(),
            kind: "Pod".to_string(),
            metadata: PodMetadata {
                name: workload.name.clone(),
                extra: BTreeMap::new(),
            },
            spec,
        })
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Host ports declared across all containers, in declaration order.
    ///
    /// # Errors
    ///
    /// Fails on the first declared host port outside (0, 65536).
    pub fn host_ports(&self) -> Result<Vec<u16>> {
        let mut host_ports = Vec::new();
        for container in &self.spec.containers {
            for port in &container.ports {
                let Some(host_port) = port.host_port else {
                    continue;
                };
                match u16::try_from(host_port) {
                    Ok(valid) if valid > 0 => host_ports.push(valid),
                    _ => {
                        return Err(WorkloadError::InvalidHostPort {
                            workload: self.name().to_string(),
                            container: container.name.clone(),
                            port: host_port,
                        });
                    }
                }
            }
        }
        Ok(host_ports)
    }

    /// Serialize as a YAML manifest for the engine.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| WorkloadError::Serialization {
            what: format!("manifest of workload {}", self.name()),
            message: e.to_string(),
        })
    }
}

fn export_volume_name(workload_name: &str) -> String {
    format!("export-{}", workload_name)
}

fn export_volume(volume_name: &str, host_path: &Path) -> Value {
    let mut host = Mapping::new();
    host.insert("path".into(), host_path.display().to_string().into());
    host.insert("type".into(), EXPORT_VOLUME_TYPE.into());

    let mut volume = Mapping::new();
    volume.insert("name".into(), volume_name.into());
    volume.insert("hostPath".into(), Value::Mapping(host));
    Value::Mapping(volume)
}

fn export_mount(volume_name: &str) -> Value {
    let mut mount = Mapping::new();
    mount.insert("name".into(), volume_name.into());
    mount.insert("mountPath".into(), env::workload::EXPORT_MOUNT_PATH.into());
    Value::Mapping(mount)
}
