mod common;

use async_trait::async_trait;
use common::{admin, chain_graph, gate_graph, init_tracing, member, test_registry, test_registry_with_gate, wait_until};
use labcore::{
    AuthorizationError, ConfigurationError, ExecutionError, ExecutionEvent, LabError, LaunchError,
    NodeSpec, ProtocolGraph, Resource, StoreError, User,
};
use labruntime::{
    Experiment, LabRuntime, MemoryRepository, Repository, RepositoryExt, RunOptions, RuntimeConfig,
    WorkerExit,
};
use std::sync::Arc;
use tokio::sync::Semaphore;
use uuid::Uuid;

fn result_text(experiment: &Experiment) -> Option<String> {
    experiment
        .protocol()
        .outputs()
        .port("result")
        .and_then(|p| p.resource())
        .and_then(|r| r.value.as_str().map(String::from))
}

fn failing_graph() -> ProtocolGraph {
    let mut graph = ProtocolGraph::new();
    graph
        .add_node("emit", NodeSpec::task("test.emit"))
        .add_node("fail", NodeSpec::task("test.fail"))
        .link("emit", "out", "fail", "in");
    graph
}

#[tokio::test]
async fn test_blocking_run_succeeds_and_persists() {
    init_tracing();
    let runtime = LabRuntime::in_memory(test_registry());
    let user = member();
    let mut experiment = runtime
        .create_experiment("chain", &chain_graph("stored"), &user)
        .await
        .unwrap();
    let mut events = runtime.subscribe_events();

    experiment.run(&user, RunOptions::blocking(), &runtime).await.unwrap();

    assert!(experiment.state().is_succeeded());
    assert_eq!(experiment.run_by(), Some(user.id));
    assert_eq!(result_text(&experiment).as_deref(), Some("stored"));

    let record = runtime.experiment_record(experiment.id()).await.unwrap().unwrap();
    assert!(record.state.is_succeeded());
    assert!(record.started_at.is_some() && record.ended_at.is_some());

    let mut started = false;
    let mut completed = None;
    while let Ok(event) = events.try_recv() {
        match event {
            ExecutionEvent::ExperimentStarted { .. } => started = true,
            ExecutionEvent::ExperimentCompleted { success, .. } => completed = Some(success),
            _ => {}
        }
    }
    assert!(started);
    assert_eq!(completed, Some(true));
}

#[tokio::test]
async fn test_run_is_a_no_op_once_finished() {
    let runtime = LabRuntime::in_memory(test_registry());
    let user = member();
    let mut experiment = runtime
        .create_experiment("twice", &chain_graph("x"), &user)
        .await
        .unwrap();

    experiment.run(&user, RunOptions::blocking(), &runtime).await.unwrap();
    let ended_at = runtime.experiment_record(experiment.id()).await.unwrap().unwrap().ended_at;

    experiment.run(&user, RunOptions::blocking(), &runtime).await.unwrap();
    let record = runtime.experiment_record(experiment.id()).await.unwrap().unwrap();
    assert!(record.state.is_succeeded());
    assert_eq!(record.ended_at, ended_at);
}

#[tokio::test]
async fn test_failed_run_records_the_error() {
    let runtime = LabRuntime::in_memory(test_registry());
    let user = member();
    let mut experiment = runtime
        .create_experiment("failing", &failing_graph(), &user)
        .await
        .unwrap();

    let err = experiment
        .run(&user, RunOptions::blocking(), &runtime)
        .await
        .unwrap_err();

    assert!(matches!(err, LabError::Execution(_)));
    assert!(experiment.state().is_failed());
    assert!(experiment.error().unwrap().contains("protocol.fail"));

    let record = runtime.experiment_record(experiment.id()).await.unwrap().unwrap();
    assert!(record.state.is_failed());
    let last = record.progress.last_message().unwrap();
    assert!(last.text.starts_with("An error occurred"));
}

/// Refuses to store an experiment that claims success
#[derive(Default)]
struct RejectSuccess {
    inner: MemoryRepository,
}

#[async_trait]
impl Repository for RejectSuccess {
    async fn put(&self, kind: &str, id: Uuid, document: serde_json::Value) -> Result<(), StoreError> {
        if kind == "experiment" && document["state"]["is_successful"] == serde_json::json!(true) {
            return Err(StoreError::Backend("disk full".to_string()));
        }
        self.inner.put(kind, id, document).await
    }

    async fn get(&self, kind: &str, id: Uuid) -> Result<Option<serde_json::Value>, StoreError> {
        self.inner.get(kind, id).await
    }

    async fn delete(&self, kind: &str, id: Uuid) -> Result<bool, StoreError> {
        self.inner.delete(kind, id).await
    }

    async fn list(&self, kind: &str) -> Result<Vec<serde_json::Value>, StoreError> {
        self.inner.list(kind).await
    }
}

#[tokio::test]
async fn test_failed_completion_checkpoint_fails_the_run() {
    let runtime = LabRuntime::new(
        test_registry(),
        Arc::new(RejectSuccess::default()),
        RuntimeConfig::default(),
    );
    let user = member();
    let mut experiment = runtime
        .create_experiment("unsaved", &chain_graph("x"), &user)
        .await
        .unwrap();
    let mut events = runtime.subscribe_events();

    let err = experiment
        .run(&user, RunOptions::blocking(), &runtime)
        .await
        .unwrap_err();

    assert!(matches!(err, LabError::Execution(ExecutionError::Checkpoint(_))));
    assert!(experiment.state().is_failed());
    assert!(experiment.error().unwrap().contains("disk full"));

    let record = runtime.experiment_record(experiment.id()).await.unwrap().unwrap();
    assert!(record.state.is_failed());
    assert!(!record.state.is_running);
    assert_eq!(runtime.count_running_experiments().await.unwrap(), 0);

    let mut completed = None;
    while let Ok(event) = events.try_recv() {
        if let ExecutionEvent::ExperimentCompleted { success, .. } = event {
            completed = Some(success);
        }
    }
    assert_eq!(completed, Some(false));
}

#[tokio::test]
async fn test_admin_only_processes_need_an_admin() {
    let runtime = LabRuntime::in_memory(test_registry());
    let mut graph = ProtocolGraph::new();
    graph.add_node("privileged", NodeSpec::task("test.admin"));
    let mut experiment = runtime
        .create_experiment("admin", &graph, &member())
        .await
        .unwrap();

    let err = experiment
        .run(&member(), RunOptions::blocking(), &runtime)
        .await
        .unwrap_err();
    match err {
        LabError::Authorization(AuthorizationError::InsufficientPrivilege { process, .. }) => {
            assert_eq!(process, "protocol.privileged");
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(experiment.state().is_draft());

    experiment.run(&admin(), RunOptions::blocking(), &runtime).await.unwrap();
    assert!(experiment.state().is_succeeded());
}

#[tokio::test]
async fn test_kill_requires_a_running_experiment() {
    let runtime = LabRuntime::in_memory(test_registry());
    let user = member();
    let mut experiment = runtime
        .create_experiment("idle", &chain_graph("x"), &user)
        .await
        .unwrap();

    let err = experiment.kill(&runtime).await.unwrap_err();
    assert!(matches!(
        err,
        LabError::Configuration(ConfigurationError::InvalidState(_))
    ));
}

#[tokio::test]
async fn test_reset_allows_a_second_run() {
    let runtime = LabRuntime::in_memory(test_registry());
    let user = member();
    let mut experiment = runtime
        .create_experiment("again", &chain_graph("x"), &user)
        .await
        .unwrap();
    experiment.run(&user, RunOptions::blocking(), &runtime).await.unwrap();

    experiment.reset(&runtime).await.unwrap();

    assert!(experiment.state().is_draft());
    assert!(result_text(&experiment).is_none());
    let record = runtime.experiment_record(experiment.id()).await.unwrap().unwrap();
    assert!(record.state.is_draft());
    assert!(record.started_at.is_none());

    experiment.run(&user, RunOptions::blocking(), &runtime).await.unwrap();
    assert_eq!(result_text(&experiment).as_deref(), Some("x"));
}

#[tokio::test]
async fn test_validation_locks_the_experiment() {
    let runtime = LabRuntime::in_memory(test_registry());
    let user = member();
    let mut experiment = runtime
        .create_experiment("locked", &chain_graph("x"), &user)
        .await
        .unwrap();

    assert!(experiment.validate(&runtime).await.is_err());
    experiment.run(&user, RunOptions::blocking(), &runtime).await.unwrap();
    experiment.validate(&runtime).await.unwrap();

    assert!(experiment.is_validated());
    assert!(experiment.validate(&runtime).await.is_err());
    assert!(matches!(
        experiment.reset(&runtime).await.unwrap_err(),
        LabError::Configuration(ConfigurationError::ExperimentLocked(_))
    ));
    assert!(matches!(
        experiment.protocol_mut().unwrap_err(),
        ConfigurationError::ExperimentLocked(_)
    ));

    let reloaded = runtime.load_experiment(experiment.id()).await.unwrap();
    assert!(reloaded.is_validated());
    assert!(reloaded.state().is_succeeded());
}

#[tokio::test]
async fn test_archived_experiments_do_not_run() {
    let runtime = LabRuntime::in_memory(test_registry());
    let user = member();
    let mut experiment = runtime
        .create_experiment("shelved", &chain_graph("x"), &user)
        .await
        .unwrap();

    experiment.archive(true, &runtime).await.unwrap();
    let err = experiment
        .run(&user, RunOptions::blocking(), &runtime)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LabError::Configuration(ConfigurationError::ExperimentArchived(_))
    ));

    experiment.archive(false, &runtime).await.unwrap();
    experiment.run(&user, RunOptions::blocking(), &runtime).await.unwrap();
    assert!(experiment.state().is_succeeded());
}

#[tokio::test]
async fn test_serving_run_without_launcher_is_refused() {
    let runtime = LabRuntime::in_memory(test_registry());
    let user = member();
    let mut experiment = runtime
        .create_experiment("served", &chain_graph("x"), &user)
        .await
        .unwrap();

    let err = experiment
        .run(&user, RunOptions::serving(), &runtime)
        .await
        .unwrap_err();

    assert!(matches!(err, LabError::Launch(LaunchError::Unavailable(_))));
    assert!(experiment.state().is_draft());
}

#[tokio::test]
async fn test_serving_run_hands_off_to_a_worker() {
    let runtime = LabRuntime::with_in_process_launcher(
        test_registry(),
        Arc::new(MemoryRepository::new()),
        RuntimeConfig::default(),
    );
    let user = member();
    runtime.register_user(&user).await.unwrap();
    let mut experiment = runtime
        .create_experiment("served", &chain_graph("worker"), &user)
        .await
        .unwrap();

    experiment.run(&user, RunOptions::serving(), &runtime).await.unwrap();
    assert!(experiment.state().is_running);
    assert!(experiment.pid().is_some());

    let exit = experiment.wait_for_worker().await.unwrap().unwrap();
    assert!(exit.success);

    experiment.refresh(&runtime).await.unwrap();
    assert!(experiment.state().is_succeeded());
    assert!(!runtime.recover_worker_exit(experiment.id(), &exit).await.unwrap());
}

#[tokio::test]
async fn test_kill_stops_the_worker() {
    let gate = Arc::new(Semaphore::new(0));
    let runtime = LabRuntime::with_in_process_launcher(
        test_registry_with_gate(Arc::clone(&gate)),
        Arc::new(MemoryRepository::new()),
        RuntimeConfig::default(),
    );
    let user = User::system();
    let mut experiment = runtime
        .create_experiment("gated", &gate_graph(), &user)
        .await
        .unwrap();
    let id = experiment.id();

    experiment.run(&user, RunOptions::serving(), &runtime).await.unwrap();
    let store = runtime.store();
    wait_until(|| {
        let store = Arc::clone(&store);
        async move {
            store
                .list_all::<labruntime::ProcessRecord>()
                .await
                .map(|records| records.iter().any(|r| r.instance_path == "protocol.gate"))
                .unwrap_or(false)
        }
    })
    .await;

    experiment.kill(&runtime).await.unwrap();

    assert!(experiment.state().is_failed());
    assert_eq!(experiment.error(), Some("Experiment manually stopped by a user."));
    let record = runtime.experiment_record(id).await.unwrap().unwrap();
    assert!(record.state.is_failed());
    assert!(!experiment.state().is_running);
}

#[tokio::test]
async fn test_single_task_experiment_mirrors_its_ports() {
    let runtime = LabRuntime::in_memory(test_registry());
    let user = member();
    let process = runtime
        .registry()
        .create_process("test.pass", &Default::default())
        .unwrap();
    let mut experiment = Experiment::from_task("single", process, &user).unwrap();
    experiment.set_input("in", Resource::text("solo")).unwrap();

    experiment.run(&user, RunOptions::blocking(), &runtime).await.unwrap();

    let out = experiment.protocol().outputs().port("out").unwrap();
    assert_eq!(out.resource().unwrap().value.as_str(), Some("solo"));
}

#[tokio::test]
async fn test_load_restores_inputs_as_draft() {
    let runtime = LabRuntime::in_memory(test_registry());
    let user = member();
    let mut graph = ProtocolGraph::new();
    graph
        .add_node("pass", NodeSpec::task("test.pass"))
        .interface("in", "pass", "in")
        .outerface("result", "pass", "out");
    let mut experiment = runtime.create_experiment("inputs", &graph, &user).await.unwrap();
    experiment.set_input("in", Resource::text("kept")).unwrap();
    runtime.save_experiment(&experiment).await.unwrap();

    let mut loaded = runtime.load_experiment(experiment.id()).await.unwrap();
    assert_eq!(loaded.title(), "inputs");
    assert!(loaded.state().is_draft());

    loaded.run(&user, RunOptions::blocking(), &runtime).await.unwrap();
    assert_eq!(result_text(&loaded).as_deref(), Some("kept"));
}

#[tokio::test]
async fn test_worker_exit_recovery_marks_run_failed() {
    let runtime = LabRuntime::in_memory(test_registry());
    let experiment = runtime
        .create_experiment("lost", &chain_graph("x"), &member())
        .await
        .unwrap();
    let mut record = runtime.experiment_record(experiment.id()).await.unwrap().unwrap();
    record.state.is_running = true;
    runtime.store().save(&record).await.unwrap();

    let exit = WorkerExit {
        success: false,
        code: Some(9),
    };
    assert!(runtime.recover_worker_exit(experiment.id(), &exit).await.unwrap());

    let record = runtime.experiment_record(experiment.id()).await.unwrap().unwrap();
    assert!(record.state.is_failed());
    assert!(record.error.unwrap().contains("exit code 9"));
    assert!(!runtime.recover_worker_exit(experiment.id(), &exit).await.unwrap());
}

#[tokio::test]
async fn test_orphaned_runs_are_failed() {
    let runtime = LabRuntime::in_memory(test_registry());
    let user = member();
    let idle = runtime.create_experiment("idle", &chain_graph("x"), &user).await.unwrap();
    let stuck = runtime.create_experiment("stuck", &chain_graph("x"), &user).await.unwrap();
    let mut record = runtime.experiment_record(stuck.id()).await.unwrap().unwrap();
    record.state.is_running = true;
    runtime.store().save(&record).await.unwrap();

    assert_eq!(runtime.count_running_experiments().await.unwrap(), 1);
    assert_eq!(runtime.recover_orphaned_runs().await.unwrap(), 1);
    assert_eq!(runtime.count_running_experiments().await.unwrap(), 0);

    let idle = runtime.experiment_record(idle.id()).await.unwrap().unwrap();
    assert!(idle.state.is_draft());
}

#[tokio::test]
async fn test_worker_refuses_experiments_not_handed_off() {
    let runtime = LabRuntime::in_memory(test_registry());
    let user = User::system();
    let experiment = runtime
        .create_experiment("direct", &chain_graph("x"), &user)
        .await
        .unwrap();

    let err = runtime.run_worker(experiment.id(), user.id).await.unwrap_err();
    assert!(matches!(
        err,
        LabError::Configuration(ConfigurationError::InvalidState(_))
    ));
}

#[tokio::test]
async fn test_unknown_users_are_not_resolved() {
    let runtime = LabRuntime::in_memory(test_registry());
    let stranger = member();

    assert!(matches!(
        runtime.resolve_user(stranger.id).await.unwrap_err(),
        LabError::Authorization(AuthorizationError::UnknownUser(_))
    ));
    runtime.register_user(&stranger).await.unwrap();
    assert_eq!(runtime.resolve_user(stranger.id).await.unwrap(), stranger);
    assert!(runtime.resolve_user(User::system().id).await.unwrap().is_system());
}
