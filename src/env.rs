//! Environment constants and path utilities for the edge worker.
//!
//! This module centralizes every file and directory name the worker keeps
//! under its data directory. Nothing here reads process state: callers pass
//! the data directory in explicitly.

use std::path::{Path, PathBuf};

/// Default data directory used when no configuration overrides it
pub const DEFAULT_DATA_DIR: &str = "/var/lib/edge-worker";

/// Configuration file name
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Configuration file name looked up in the current directory
pub const LOCAL_CONFIG_FILE_NAME: &str = "edge-worker.toml";

/// Application directory name used for user and system configuration
pub const APP_DIR_NAME: &str = "edge-worker";

/// Workload-related directory and file names
pub mod workload {
    /// Directory holding one rendered manifest per workload
    pub const MANIFESTS_DIR_NAME: &str = "manifests";

    /// Directory holding the exported writable data of each workload
    pub const VOLUMES_DIR_NAME: &str = "volumes";

    /// Name to engine identifier mapping store
    pub const MAPPING_FILE_NAME: &str = "workload-mapping.json";

    /// Extension of rendered manifests
    pub const MANIFEST_EXTENSION: &str = "yaml";

    /// Mount point of the export volume inside every container
    pub const EXPORT_MOUNT_PATH: &str = "/export";
}

/// Device configuration file name (last applied desired state)
pub const DEVICE_CONFIG_FILE_NAME: &str = "device-config.json";

/// Build the manifests directory path
pub fn manifests_dir_path(data_dir: &Path) -> PathBuf {
    data_dir.join(workload::MANIFESTS_DIR_NAME)
}

/// Build the manifest path of a single workload
pub fn manifest_file_path(data_dir: &Path, workload_name: &str) -> PathBuf {
    manifests_dir_path(data_dir).join(format!(
        "{}.{}",
        workload_name,
        workload::MANIFEST_EXTENSION
    ))
}

/// Build the volumes directory path
pub fn volumes_dir_path(data_dir: &Path) -> PathBuf {
    data_dir.join(workload::VOLUMES_DIR_NAME)
}

/// Build the exported host path of a single workload
pub fn exported_host_path(data_dir: &Path, workload_name: &str) -> PathBuf {
    volumes_dir_path(data_dir).join(workload_name)
}

/// Build the mapping store path
pub fn mapping_file_path(data_dir: &Path) -> PathBuf {
    data_dir.join(workload::MAPPING_FILE_NAME)
}

/// Build the device configuration file path
pub fn device_config_file_path(data_dir: &Path) -> PathBuf {
    data_dir.join(DEVICE_CONFIG_FILE_NAME)
}

/// Build config file path in user's home directory
pub fn user_config_file_path(home_dir: &Path) -> PathBuf {
    home_dir
        .join(".config")
        .join(APP_DIR_NAME)
        .join(CONFIG_FILE_NAME)
}

/// Build local config file path in current directory
pub fn local_config_file_path(current_dir: &Path) -> PathBuf {
    current_dir.join(LOCAL_CONFIG_FILE_NAME)
}

/// Build the system-wide config file path
pub fn system_config_file_path() -> PathBuf {
    Path::new("/etc").join(APP_DIR_NAME).join(CONFIG_FILE_NAME)
}
