use anyhow::Context;
use edge_worker::cli::{Args, ConfigDiscovery, ExecutionMode};
use edge_worker::{
    AgentConfig, ConfigurationError, ConfigurationManager, DeviceConfigurationMessage,
    WorkloadError, WorkloadManager,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "edge_worker=info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let options = args.global_options();
    init_logging(options.log_level.as_deref());

    let mode = match args.mode() {
        Ok(mode) => mode,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    };

    let config = ConfigDiscovery::load(options.config_override.as_deref())?
        .with_data_dir(options.data_dir_override);

    let succeeded = match mode {
        ExecutionMode::Apply(message_path) => run_apply(&config, &message_path).await?,
        ExecutionMode::Restore => run_restore(&config).await?,
        ExecutionMode::List => run_list(&config).await?,
        ExecutionMode::Deregister => run_deregister(&config).await?,
        ExecutionMode::ShowConfig => {
            ConfigDiscovery::show_discovery_info(&config);
            true
        }
    };

    if !succeeded {
        std::process::exit(1);
    }
    Ok(())
}

fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn report(errors: &[WorkloadError]) {
    for e in errors {
        match e.workload() {
            Some(workload) => eprintln!("  {} [{:?}]: {}", workload, e.kind(), e),
            None => eprintln!("  [{:?}]: {}", e.kind(), e),
        }
    }
}

async fn run_apply(config: &AgentConfig, message_path: &Path) -> anyhow::Result<bool> {
    let content = tokio::fs::read_to_string(message_path)
        .await
        .with_context(|| format!("Failed to read message {}", message_path.display()))?;
    let message: DeviceConfigurationMessage = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse message {}", message_path.display()))?;
    info!(
        "Applying configuration version '{}' with {} workload(s)",
        message.version,
        message.workloads.len()
    );

    let manager = Arc::new(WorkloadManager::new(config).await?);
    let configuration = ConfigurationManager::new(&config.data_dir).await;
    configuration.register_observer(manager).await;

    match configuration.update(message).await {
        Ok(()) => {
            println!("Configuration applied");
            Ok(true)
        }
        Err(ConfigurationError::Observer(e)) => {
            eprintln!("Configuration partially applied:");
            match e.downcast_ref::<WorkloadError>() {
                Some(WorkloadError::Multiple(errors)) => report(errors),
                _ => eprintln!("  {:#}", e),
            }
            Ok(false)
        }
        Err(e) => {
            error!("{}", e);
            Ok(false)
        }
    }
}

async fn run_restore(config: &AgentConfig) -> anyhow::Result<bool> {
    let configuration = ConfigurationManager::new(&config.data_dir).await;
    let workloads = configuration.workloads().await;
    info!("Restoring {} workload(s)", workloads.len());

    let manager = WorkloadManager::new(config).await?;
    let errors = manager.start(&workloads).await;
    if errors.is_empty() {
        println!("Restored {} workload(s)", workloads.len());
        return Ok(true);
    }

    eprintln!("Failed to restore some workloads:");
    report(&errors);
    Ok(false)
}

async fn run_list(config: &AgentConfig) -> anyhow::Result<bool> {
    let manager = WorkloadManager::new(config).await?;
    let workloads = manager.list_workloads().await?;

    println!("{:<24} {:<16} STATUS", "NAME", "ID");
    for workload in workloads {
        let short_id: String = workload.id.chars().take(12).collect();
        println!("{:<24} {:<16} {}", workload.name, short_id, workload.status);
    }
    Ok(true)
}

async fn run_deregister(config: &AgentConfig) -> anyhow::Result<bool> {
    let manager = WorkloadManager::new(config).await?;
    match manager.deregister().await {
        Ok(()) => {
            println!("All workloads removed");
            Ok(true)
        }
        Err(WorkloadError::Multiple(errors)) => {
            eprintln!("Failed to remove some workloads:");
            report(&errors);
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}
