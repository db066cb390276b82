//! Workload reconciliation.
//!
//! Turns a declarative list of desired workloads into remove/run/start
//! operations against the container engine, keeps the mapping between
//! workload names and engine identifiers, and manages one packet filter chain
//! per workload in lockstep with the workload's lifecycle.
//!
//! ## Components
//!
//! - [`types`]: desired-state wire types
//! - [`pod`]: pod model, manifest rendering and host port validation
//! - [`mapping`]: durable name ↔ engine identifier store
//! - [`wrapper`]: per-workload lifecycle across engine, filter and mapping
//! - [`manager`]: the reconciler driving the wrapper
//!
//! ## Reconciliation pass
//!
//! ```text
//! update(desired)
//!   for each desired workload (in order):
//!     render manifest → wrapper.remove(name) (best effort) → wrapper.run(pod)
//!   wrapper.list() → wrapper.remove(stale) for names not desired
//!   wrapper.persist_configuration()
//! ```

use crate::engine::EngineError;
use crate::network::NetworkError;
use std::path::PathBuf;

pub mod manager;
pub mod mapping;
pub mod pod;
pub mod types;
pub mod wrapper;

#[cfg(test)]
mod tests;

pub use manager::WorkloadManager;
pub use mapping::MappingRepository;
pub use pod::Pod;
pub use types::{DataConfiguration, DataPath, DeviceConfigurationMessage, Workload};
pub use wrapper::{Observer, WorkloadInstance, WorkloadWrapper};

/// Broad class of a [`WorkloadError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed desired state (bad port, name, or specification)
    Validation,
    /// Container engine call failed
    Engine,
    /// Packet filter mutation failed
    Network,
    /// Mapping store or manifest write failed
    Persistence,
    /// The reconciliation pass was cancelled before finishing
    Cancelled,
    /// Several independent failures
    Multiple,
}

/// Workload lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum WorkloadError {
    /// A declared host port is outside (0, 65536)
    #[error("illegal host port number {port} for container {container} in workload {workload}")]
    InvalidHostPort {
        workload: String,
        container: String,
        port: i64,
    },

    /// The workload name cannot be used as a file or chain name
    #[error("invalid workload name '{0}'")]
    InvalidName(String),

    /// The specification blob is not a pod spec
    #[error("invalid specification for workload {workload}: {source}")]
    InvalidSpecification {
        workload: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// The same name appears twice in one desired state
    #[error("workload {0} appears more than once in the desired state")]
    DuplicateWorkload(String),

    /// Container engine failure
    #[error("container engine failed for workload {workload}: {source}")]
    Engine {
        workload: String,
        #[source]
        source: EngineError,
    },

    /// The engine could not enumerate its workloads
    #[error("failed to list workloads: {0}")]
    Listing(#[source] EngineError),

    /// Packet filter failure
    #[error("failed to configure network for workload {workload}: {source}")]
    Network {
        workload: String,
        #[source]
        source: NetworkError,
    },

    /// File system failure while writing state
    #[error("failed to persist {}: {source}", .path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// State could not be encoded
    #[error("failed to serialize {what}: {message}")]
    Serialization { what: String, message: String },

    /// The pass was superseded or cancelled
    #[error("reconciliation pass cancelled")]
    Cancelled,

    /// Aggregate of independent failures
    #[error("{} workload operations failed", .0.len())]
    Multiple(Vec<WorkloadError>),
}

impl WorkloadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidHostPort { .. }
            | Self::InvalidName(_)
            | Self::InvalidSpecification { .. }
            | Self::DuplicateWorkload(_) => ErrorKind::Validation,
            Self::Engine { .. } | Self::Listing(_) => ErrorKind::Engine,
            Self::Network { .. } => ErrorKind::Network,
            Self::Persistence { .. } | Self::Serialization { .. } => ErrorKind::Persistence,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Multiple(_) => ErrorKind::Multiple,
        }
    }

    /// Name of the workload the error belongs to, if it belongs to one
    pub fn workload(&self) -> Option<&str> {
        match self {
            Self::InvalidHostPort { workload, .. }
            | Self::InvalidSpecification { workload, .. }
            | Self::Engine { workload, .. }
            | Self::Network { workload, .. } => Some(workload),
            Self::InvalidName(name) | Self::DuplicateWorkload(name) => Some(name),
            _ => None,
        }
    }

    pub(crate) fn engine(workload: &str, source: EngineError) -> Self {
        Self::Engine {
            workload: workload.to_string(),
            source,
        }
    }

    pub(crate) fn network(workload: &str, source: NetworkError) -> Self {
        Self::Network {
            workload: workload.to_string(),
            source,
        }
    }

    pub(crate) fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persistence {
            path: path.into(),
            source,
        }
    }
}

/// Result type for workload operations.
pub type Result<T> = std::result::Result<T, WorkloadError>;
