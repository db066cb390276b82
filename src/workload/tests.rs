use super::*;
use crate::engine::{EngineError, WorkloadInfo};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct WrapperState {
    calls: Vec<String>,
    engine: BTreeSet<String>,
    fail_run: HashSet<String>,
    fail_remove: HashSet<String>,
    fail_list: bool,
    fail_persist: bool,
    cancel_after_run: Option<(String, CancellationToken)>,
    observers: usize,
}

/// Wrapper that records every call and keeps a set of running names.
#[derive(Default)]
struct FakeWrapper {
    state: Mutex<WrapperState>,
}

impl FakeWrapper {
    fn with_running(names: &[&str]) -> Self {
        let wrapper = Self::default();
        wrapper
            .state
            .lock()
            .unwrap()
            .engine
            .extend(names.iter().map(|n| n.to_string()));
        wrapper
    }

    fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == call).count()
    }

    fn count_prefix(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn running(&self) -> BTreeSet<String> {
        self.state.lock().unwrap().engine.clone()
    }
}

fn engine_down() -> EngineError {
    EngineError::Unavailable("engine down".to_string())
}

#[async_trait]
impl WorkloadWrapper for FakeWrapper {
    async fn init(&self) -> Result<()> {
        self.state.lock().unwrap().calls.push("init".to_string());
        Ok(())
    }

    async fn register_observer(&self, _observer: Arc<dyn Observer>) {
        self.state.lock().unwrap().observers += 1;
    }

    async fn list(&self) -> Result<Vec<WorkloadInfo>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("list".to_string());
        if state.fail_list {
            return Err(WorkloadError::Listing(engine_down()));
        }
        Ok(state
            .engine
            .iter()
            .enumerate()
            .map(|(i, name)| WorkloadInfo {
                id: format!("id{}", i),
                name: name.clone(),
                status: "Running".to_string(),
            })
            .collect())
    }

    async fn remove(&self, workload_name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("remove {}", workload_name));
        if state.fail_remove.contains(workload_name) {
            return Err(WorkloadError::engine(workload_name, engine_down()));
        }
        if !state.engine.remove(workload_name) {
            return Err(WorkloadError::engine(
                workload_name,
                EngineError::NotFound(workload_name.to_string()),
            ));
        }
        Ok(())
    }

    async fn run(&self, pod: &Pod, manifest_path: &Path) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            state.calls.push(format!("run {}", pod.name()));
            assert!(manifest_path.exists(), "manifest must be written before run");
            if let Some((name, token)) = &state.cancel_after_run {
                if name == pod.name() {
                    token.cancel();
                }
            }
            if state.fail_run.contains(pod.name()) {
                return Err(WorkloadError::engine(pod.name(), engine_down()));
            }
            state.engine.insert(pod.name().to_string());
        }
        tokio::task::yield_now().await;
        Ok(())
    }

    async fn start(&self, pod: &Pod) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .calls
            .push(format!("start {}", pod.name()));
        Ok(())
    }

    async fn persist_configuration(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("persist".to_string());
        if state.fail_persist {
            return Err(WorkloadError::persistence(
                "/nonexistent/workload-mapping.json",
                std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
            ));
        }
        Ok(())
    }

    async fn reap_orphaned_chains(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.push("reap".to_string());
        Vec::new()
    }
}

async fn manager_with(wrapper: FakeWrapper) -> (TempDir, Arc<FakeWrapper>, WorkloadManager) {
    let dir = tempfile::tempdir().unwrap();
    let wrapper = Arc::new(wrapper);
    let manager = WorkloadManager::with_wrapper(dir.path(), wrapper.clone())
        .await
        .unwrap();
    (dir, wrapper, manager)
}

fn workloads(names: &[&str]) -> Vec<Workload> {
    names.iter().map(|name| Workload::new(*name, "{}")).collect()
}

#[tokio::test]
async fn test_construction_initializes_wrapper() {
    let (dir, wrapper, manager) = manager_with(FakeWrapper::default()).await;

    assert_eq!(wrapper.calls(), vec!["init".to_string()]);
    assert_eq!(manager.data_dir(), dir.path());
    assert!(dir.path().join("manifests").is_dir());
}

#[tokio::test]
async fn test_update_applies_every_workload() {
    let (_dir, wrapper, manager) = manager_with(FakeWrapper::default()).await;
    let names: Vec<String> = (0..10).map(|i| format!("test{}", i)).collect();
    let desired: Vec<Workload> = names.iter().map(|n| Workload::new(n, "{}")).collect();

    let errors = manager.update(&desired).await;

    assert!(errors.is_empty(), "unexpected errors: {:?}", errors);
    for name in &names {
        assert_eq!(wrapper.count(&format!("remove {}", name)), 1);
        assert_eq!(wrapper.count(&format!("run {}", name)), 1);
    }
    assert_eq!(wrapper.count("persist"), 1);
}

#[tokio::test]
async fn test_remove_precedes_run() {
    let (_dir, wrapper, manager) = manager_with(FakeWrapper::default()).await;

    manager.update(&workloads(&["a", "b"])).await;

    let calls = wrapper.calls();
    let position = |call: &str| calls.iter().position(|c| c == call).unwrap();
    assert!(position("remove a") < position("run a"));
    assert!(position("run a") < position("remove b"));
    assert!(position("run b") < position("list"));
    assert!(position("list") < position("persist"));
}

#[tokio::test]
async fn test_run_failure_is_isolated() {
    let wrapper = FakeWrapper::default();
    wrapper.state.lock().unwrap().fail_run.insert("test0".to_string());
    let (_dir, wrapper, manager) = manager_with(wrapper).await;

    let errors = manager.update(&workloads(&["test0", "test1"])).await;

    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].workload(), Some("test0"));
    assert_eq!(errors[0].kind(), ErrorKind::Engine);
    assert_eq!(wrapper.count_prefix("run "), 2);
    assert_eq!(wrapper.count_prefix("remove "), 2);
}

#[tokio::test]
async fn test_stale_workload_removed_exactly_once() {
    let (_dir, wrapper, manager) = manager_with(FakeWrapper::with_running(&["a", "b", "c"])).await;

    let errors = manager.update(&workloads(&["a", "b"])).await;

    assert!(errors.is_empty(), "unexpected errors: {:?}", errors);
    assert_eq!(wrapper.count("remove c"), 1);
    assert_eq!(wrapper.count("remove a"), 1);
    assert_eq!(wrapper.count("remove b"), 1);
    assert_eq!(
        wrapper.running(),
        BTreeSet::from(["a".to_string(), "b".to_string()])
    );
}

#[tokio::test]
async fn test_no_stale_removal_when_sets_equal() {
    let (_dir, wrapper, manager) = manager_with(FakeWrapper::with_running(&["a", "b"])).await;

    manager.update(&workloads(&["a", "b"])).await;

    let calls = wrapper.calls();
    let list_at = calls.iter().position(|c| c == "list").unwrap();
    assert!(!calls[list_at..].iter().any(|c| c.starts_with("remove ")));
}

#[tokio::test]
async fn test_empty_desired_state_removes_stale() {
    let (_dir, wrapper, manager) = manager_with(FakeWrapper::with_running(&["stale"])).await;

    let errors = manager.update(&[]).await;

    assert!(errors.is_empty());
    assert_eq!(wrapper.count("remove stale"), 1);
    assert!(wrapper.running().is_empty());
}

#[tokio::test]
async fn test_stale_removal_failures_are_aggregated() {
    let wrapper = FakeWrapper::with_running(&["x", "y", "z"]);
    wrapper
        .state
        .lock()
        .unwrap()
        .fail_remove
        .extend(["x".to_string(), "y".to_string()]);
    let (_dir, wrapper, manager) = manager_with(wrapper).await;

    let errors = manager.update(&[]).await;

    assert_eq!(errors.len(), 2);
    assert_eq!(wrapper.count("remove z"), 1);
    assert_eq!(wrapper.count("persist"), 1);
}

#[tokio::test]
async fn test_repeated_update_is_stable() {
    let (_dir, wrapper, manager) = manager_with(FakeWrapper::default()).await;
    let desired = workloads(&["a", "b"]);

    assert!(manager.update(&desired).await.is_empty());
    let after_first = wrapper.running();
    assert!(manager.update(&desired).await.is_empty());

    assert_eq!(wrapper.running(), after_first);
}

#[tokio::test]
async fn test_manifest_written_at_deterministic_path() {
    let (dir, _wrapper, manager) = manager_with(FakeWrapper::default()).await;
    let spec = "containers:\n  - name: web\n    image: nginx\n    ports:\n      - containerPort: 80\n        hostPort: 8080\n";

    let errors = manager.update(&[Workload::new("web", spec)]).await;
    assert!(errors.is_empty());

    let path = dir.path().join("manifests").join("web.yaml");
    assert_eq!(manager.manifest_path("web"), path);
    let manifest = std::fs::read_to_string(&path).unwrap();
    assert!(manifest.contains("name: web"));
    assert!(manifest.contains("hostPort: 8080"));
    assert!(manifest.contains("mountPath: /export"));
    assert!(
        manifest.contains(&manager.exported_host_path("web").display().to_string())
    );
}

#[tokio::test]
async fn test_exported_host_path() {
    let (dir, _wrapper, manager) = manager_with(FakeWrapper::default()).await;
    assert_eq!(
        manager.exported_host_path("collector"),
        dir.path().join("volumes").join("collector")
    );
}

#[tokio::test]
async fn test_validation_errors_skip_only_offending_workloads() {
    let (_dir, wrapper, manager) = manager_with(FakeWrapper::default()).await;
    let desired = vec![
        Workload::new("../escape", "{}"),
        Workload::new("good", "{}"),
        Workload::new("good", "{}"),
        Workload::new("broken", "containers: 12"),
    ];

    let errors = manager.update(&desired).await;

    assert_eq!(errors.len(), 3);
    assert!(errors.iter().all(|e| e.kind() == ErrorKind::Validation));
    assert!(matches!(errors[0], WorkloadError::InvalidName(_)));
    assert!(matches!(errors[1], WorkloadError::DuplicateWorkload(ref n) if n == "good"));
    assert!(matches!(errors[2], WorkloadError::InvalidSpecification { .. }));
    assert_eq!(wrapper.count("run good"), 1);
    assert_eq!(wrapper.count_prefix("run "), 1);
}

#[tokio::test]
async fn test_digit_leading_name_never_reaches_wrapper() {
    let (dir, wrapper, manager) = manager_with(FakeWrapper::default()).await;

    let errors = manager.update(&workloads(&["1web", "web1"])).await;

    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], WorkloadError::InvalidName(ref n) if n == "1web"));
    assert_eq!(wrapper.count_prefix("remove 1web"), 0);
    assert_eq!(wrapper.count("run 1web"), 0);
    assert_eq!(wrapper.count("run web1"), 1);
    assert!(!dir.path().join("manifests").join("1web.yaml").exists());
}

#[tokio::test]
async fn test_invalid_spec_keeps_previous_instance() {
    let (_dir, wrapper, manager) = manager_with(FakeWrapper::with_running(&["broken"])).await;

    let errors = manager
        .update(&[Workload::new("broken", "containers: 12")])
        .await;

    assert_eq!(errors.len(), 1);
    assert_eq!(wrapper.count("remove broken"), 0);
    assert!(wrapper.running().contains("broken"));
}

#[test]
fn test_workload_name_validation() {
    for name in ["nginx", "a", "web-1", "svc_2.v3", "lives9"] {
        assert!(manager::validate_workload_name(name).is_ok(), "{}", name);
    }
    let too_long = "x".repeat(64);
    for name in ["", "-lead", ".hidden", "9lives", "1web", "a/b", "a b", too_long.as_str()] {
        assert!(manager::validate_workload_name(name).is_err(), "{}", name);
    }
}

#[tokio::test]
async fn test_list_failure_skips_cleanup_but_persists() {
    let wrapper = FakeWrapper::default();
    wrapper.state.lock().unwrap().fail_list = true;
    let (_dir, wrapper, manager) = manager_with(wrapper).await;

    let errors = manager.update(&workloads(&["a"])).await;

    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], WorkloadError::Listing(_)));
    assert_eq!(wrapper.count("persist"), 1);
}

#[tokio::test]
async fn test_persist_failure_is_reported() {
    let wrapper = FakeWrapper::default();
    wrapper.state.lock().unwrap().fail_persist = true;
    let (_dir, _wrapper, manager) = manager_with(wrapper).await;

    let errors = manager.update(&workloads(&["a"])).await;

    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind(), ErrorKind::Persistence);
}

#[tokio::test]
async fn test_reaps_orphaned_chains_first() {
    let (_dir, wrapper, manager) = manager_with(FakeWrapper::default()).await;

    manager.update(&workloads(&["a"])).await;

    assert_eq!(wrapper.calls()[1], "reap");
}

#[tokio::test]
async fn test_cancelled_token_stops_pass() {
    let (_dir, wrapper, manager) = manager_with(FakeWrapper::with_running(&["stale"])).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let errors = manager
        .update_with_cancellation(&workloads(&["a", "b"]), &cancel)
        .await;

    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind(), ErrorKind::Cancelled);
    assert_eq!(wrapper.count_prefix("run "), 0);
    assert_eq!(wrapper.count("list"), 0);
    assert_eq!(wrapper.count("persist"), 0);
}

#[tokio::test]
async fn test_cancellation_mid_pass_skips_remaining_work() {
    let cancel = CancellationToken::new();
    let wrapper = FakeWrapper::with_running(&["stale"]);
    wrapper.state.lock().unwrap().cancel_after_run = Some(("b".to_string(), cancel.clone()));
    let (_dir, wrapper, manager) = manager_with(wrapper).await;

    let errors = manager
        .update_with_cancellation(&workloads(&["a", "b", "c"]), &cancel)
        .await;

    assert!(matches!(errors.as_slice(), [WorkloadError::Cancelled]));
    assert_eq!(wrapper.count("run a"), 1);
    assert_eq!(wrapper.count("run b"), 1);
    assert_eq!(wrapper.count("run c"), 0);
    assert_eq!(wrapper.count("remove stale"), 0);
    assert_eq!(wrapper.count("persist"), 0);
}

#[tokio::test]
async fn test_newer_update_supersedes_running_pass() {
    let (_dir, wrapper, manager) = manager_with(FakeWrapper::default()).await;
    let first = workloads(&["a", "b"]);
    let second = workloads(&["a", "b"]);

    let (first_errors, second_errors) =
        tokio::join!(manager.update(&first), manager.update(&second));

    assert!(matches!(first_errors.as_slice(), [WorkloadError::Cancelled]));
    assert!(second_errors.is_empty(), "unexpected errors: {:?}", second_errors);
    // One run of the superseded pass, then the full second pass
    assert_eq!(wrapper.count("run a"), 2);
    assert_eq!(wrapper.count("run b"), 1);
    assert_eq!(wrapper.count("persist"), 1);
}

#[tokio::test]
async fn test_start_restarts_each_workload() {
    let (_dir, wrapper, manager) = manager_with(FakeWrapper::default()).await;

    let errors = manager
        .start(&[
            Workload::new("a", "{}"),
            Workload::new("bad name", "{}"),
            Workload::new("b", "{}"),
        ])
        .await;

    assert_eq!(errors.len(), 1);
    assert_eq!(wrapper.count("start a"), 1);
    assert_eq!(wrapper.count("start b"), 1);
    assert_eq!(wrapper.count_prefix("run "), 0);
}

#[tokio::test]
async fn test_deregister_removes_everything() {
    let (dir, wrapper, manager) = manager_with(FakeWrapper::default()).await;
    assert!(manager.update(&workloads(&["a", "b"])).await.is_empty());
    assert!(dir.path().join("manifests").join("a.yaml").exists());

    manager.deregister().await.unwrap();

    assert!(wrapper.running().is_empty());
    assert!(!dir.path().join("manifests").exists());
    assert_eq!(wrapper.count("persist"), 2);
}

#[tokio::test]
async fn test_deregister_aggregates_failures() {
    let wrapper = FakeWrapper::with_running(&["a", "b", "c"]);
    wrapper
        .state
        .lock()
        .unwrap()
        .fail_remove
        .extend(["a".to_string(), "c".to_string()]);
    let (_dir, wrapper, manager) = manager_with(wrapper).await;

    match manager.deregister().await {
        Err(WorkloadError::Multiple(errors)) => {
            assert_eq!(errors.len(), 2);
            assert_eq!(errors[0].workload(), Some("a"));
            assert_eq!(errors[1].workload(), Some("c"));
        }
        other => panic!("Expected Multiple, got {:?}", other),
    }
    assert_eq!(wrapper.running(), BTreeSet::from(["a".to_string(), "c".to_string()]));
    assert_eq!(wrapper.count("persist"), 1);
}

#[tokio::test]
async fn test_register_observer_is_forwarded() {
    struct Noop;
    impl Observer for Noop {
        fn workload_removed(&self, _workload_name: &str) {}
    }

    let (_dir, wrapper, manager) = manager_with(FakeWrapper::default()).await;
    manager.register_observer(Arc::new(Noop)).await;
    manager.register_observer(Arc::new(Noop)).await;

    assert_eq!(wrapper.state.lock().unwrap().observers, 2);
}
