//! # Edge Worker
//!
//! The device-side agent of an edge fleet. A control plane pushes the
//! desired set of workloads; the worker renders each one into a pod
//! manifest, recreates it through the container engine, exposes its
//! declared host ports through a per-workload packet filter chain, and
//! removes whatever is running but no longer desired.
//!
//! ## Architecture Overview
//!
//! - **[`workload`]**: reconciliation: manager, per-workload wrapper, mapping store, pod rendering
//! - **[`engine`]**: container engine capability and its podman implementation
//! - **[`network`]**: packet filter capability and its nftables implementation
//! - **[`configuration`]**: last applied device configuration and change detection
//! - **[`executor`]**: host command execution shared by the engine and filter adapters
//! - **[`cli`]**: argument parsing and configuration discovery
//! - **[`env`]**: file layout under the data directory
//!
//! ## Features
//!
//! ### Reconciliation
//! - **Destroy-then-recreate**: every desired workload is removed and created afresh on each push
//! - **Stale cleanup**: engine-reported workloads missing from the desired set are removed
//! - **Partial failure isolation**: failures are collected per workload, never abort the pass
//! - **Single-flight passes**: a newer push cancels the pass it supersedes
//!
//! ### Firewall exposure
//! - **One chain per workload** inside a table owned by the worker
//! - **Fail-fast validation**: an invalid host port stops the workload before anything changes
//! - **Orphan tracking**: chains that could not be deleted are retried on the next pass
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edge_worker::{AgentConfig, Workload, WorkloadManager};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AgentConfig::default();
//!     let manager = WorkloadManager::new(&config).await?;
//!
//!     let desired = vec![Workload::new(
//!         "web",
//!         "containers:\n  - name: nginx\n    image: nginx\n    ports:\n      - containerPort: 80\n        hostPort: 8080\n",
//!     )];
//!
//!     for error in manager.update(&desired).await {
//!         eprintln!("{}", error);
//!     }
//!     Ok(())
//! }
//! ```

/// Command line interface.
///
/// Argument parsing and the configuration discovery hierarchy.
pub mod cli;

/// Device configuration state.
///
/// Persists the last applied desired-state message and dispatches changed
/// messages to observers such as the workload manager.
pub mod configuration;

/// Container engine capability.
pub mod engine;

/// Data directory layout.
pub mod env;

/// Host command execution.
pub mod executor;

/// Packet filter capability.
pub mod network;

/// Workload reconciliation.
///
/// Manager, wrapper and mapping store that keep engine instances, firewall
/// chains and name mappings consistent with the desired state.
pub mod workload;

pub use cli::AgentConfig;
pub use configuration::{ConfigurationError, ConfigurationManager, ConfigurationObserver};
pub use engine::{ContainerEngine, EngineError, WorkloadInfo};
pub use network::{NetworkError, PacketFilter};
pub use workload::{
    DeviceConfigurationMessage, ErrorKind, MappingRepository, Observer, Pod, Workload,
    WorkloadError, WorkloadInstance, WorkloadManager, WorkloadWrapper,
};
