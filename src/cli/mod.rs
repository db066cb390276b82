//! CLI-specific functionality for the edge worker
//!
//! This module contains argument parsing and configuration discovery.

pub mod args;
pub mod config;

pub use args::{Args, ExecutionMode, GlobalOptions};
pub use config::{AgentConfig, ConfigDiscovery};
