mod common;

use common::{
    chain_graph, gate_graph, init_tracing, test_registry, test_registry_with_gate, wait_until,
    ScriptedLauncher,
};
use labcore::{LabError, SchedulingError, User};
use labruntime::{
    Job, LabRuntime, Launcher, MemoryRepository, RepositoryExt, RunOptions, RuntimeConfig,
    WorkerExit,
};
use std::sync::Arc;
use tokio::sync::Semaphore;
use uuid::Uuid;

fn config(max_running: usize, max_queue_length: usize) -> RuntimeConfig {
    RuntimeConfig {
        max_running_experiments: max_running,
        max_queue_length,
        // Only explicit ticks in these tests
        tick_interval_ms: 3_600_000,
        ..RuntimeConfig::default()
    }
}

fn scripted_runtime(config: RuntimeConfig) -> (Arc<LabRuntime>, Arc<ScriptedLauncher>) {
    let launcher = ScriptedLauncher::new();
    let runtime = LabRuntime::new(test_registry(), Arc::new(MemoryRepository::new()), config)
        .with_launcher(Arc::clone(&launcher) as Arc<dyn Launcher>);
    (Arc::new(runtime), launcher)
}

async fn draft(runtime: &LabRuntime, title: &str) -> Uuid {
    runtime
        .create_experiment(title, &chain_graph(title), &User::system())
        .await
        .unwrap()
        .id()
}

#[tokio::test]
async fn test_one_experiment_runs_at_a_time() {
    init_tracing();
    let (runtime, launcher) = scripted_runtime(config(1, 10));
    let first = draft(&runtime, "first").await;
    let second = draft(&runtime, "second").await;
    let scheduler = runtime.start_scheduler();
    let user = User::system();

    scheduler.add_job(first, user.id).await.unwrap();
    scheduler.add_job(second, user.id).await.unwrap();

    let report = scheduler.tick().await.unwrap();
    assert_eq!(report.launched, vec![first]);
    assert!(report.discarded.is_empty());
    assert_eq!(launcher.launched(), vec![first]);
    let queued: Vec<_> = scheduler.jobs().await.unwrap().iter().map(|j| j.experiment_id).collect();
    assert_eq!(queued, vec![second]);

    // Still running: nothing new is admitted
    let report = scheduler.tick().await.unwrap();
    assert!(report.launched.is_empty());
    assert_eq!(runtime.count_running_experiments().await.unwrap(), 1);

    // A worker exit frees the slot and triggers the next admission
    assert!(launcher.finish(first, WorkerExit { success: false, code: Some(2) }));
    let watched = Arc::clone(&launcher);
    wait_until(move || {
        let launched = watched.launched();
        async move { launched.len() == 2 }
    })
    .await;

    assert_eq!(launcher.launched(), vec![first, second]);
    let record = runtime.experiment_record(first).await.unwrap().unwrap();
    assert!(record.state.is_failed());
    assert!(record.error.unwrap().contains("exit code 2"));
    assert!(scheduler.jobs().await.unwrap().is_empty());

    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_higher_bound_admits_several() {
    let (runtime, launcher) = scripted_runtime(config(2, 10));
    let ids = [
        draft(&runtime, "a").await,
        draft(&runtime, "b").await,
        draft(&runtime, "c").await,
    ];
    let scheduler = runtime.start_scheduler();
    for id in ids {
        scheduler.add_job(id, User::system().id).await.unwrap();
    }

    let report = scheduler.tick().await.unwrap();

    assert_eq!(report.launched, ids[..2].to_vec());
    assert_eq!(launcher.launched().len(), 2);
    assert_eq!(scheduler.jobs().await.unwrap().len(), 1);
    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_orphaned_and_finished_jobs_are_discarded() {
    let (runtime, launcher) = scripted_runtime(config(1, 10));
    let user = User::system();
    let mut finished = runtime
        .create_experiment("done", &chain_graph("done"), &user)
        .await
        .unwrap();
    finished.run(&user, RunOptions::blocking(), &runtime).await.unwrap();
    let fresh = draft(&runtime, "fresh").await;
    let scheduler = runtime.start_scheduler();

    let orphan = scheduler.add_job(Uuid::new_v4(), user.id).await.unwrap();
    let stale = scheduler.add_job(finished.id(), user.id).await.unwrap();
    scheduler.add_job(fresh, user.id).await.unwrap();

    let report = scheduler.tick().await.unwrap();

    assert_eq!(report.discarded, vec![orphan.id, stale.id]);
    assert_eq!(report.launched, vec![fresh]);
    assert_eq!(launcher.launched(), vec![fresh]);
    assert!(runtime.store().list_all::<Job>().await.unwrap().is_empty());
    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_deactivated_queue_keeps_its_jobs() {
    let (runtime, launcher) = scripted_runtime(config(1, 10));
    let id = draft(&runtime, "paused").await;
    let scheduler = runtime.start_scheduler();

    scheduler.deactivate().await.unwrap();
    scheduler.add_job(id, User::system().id).await.unwrap();

    let report = scheduler.tick().await.unwrap();
    assert!(report.skipped);
    assert!(launcher.launched().is_empty());
    assert_eq!(scheduler.jobs().await.unwrap().len(), 1);

    scheduler.activate().await.unwrap();
    assert_eq!(launcher.launched(), vec![id]);
    assert!(scheduler.jobs().await.unwrap().is_empty());
    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_queue_bounds_and_duplicates() {
    let (runtime, _) = scripted_runtime(config(1, 2));
    let scheduler = runtime.start_scheduler();
    scheduler.deactivate().await.unwrap();
    let user = User::system().id;
    let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

    scheduler.add_job(a, user).await.unwrap();
    assert!(matches!(
        scheduler.add_job(a, user).await.unwrap_err(),
        LabError::Scheduling(SchedulingError::AlreadyQueued(id)) if id == a
    ));
    scheduler.add_job(b, user).await.unwrap();
    assert!(matches!(
        scheduler.add_job(c, user).await.unwrap_err(),
        LabError::Scheduling(SchedulingError::QueueFull { max_length: 2 })
    ));
    assert_eq!(runtime.store().list_all::<Job>().await.unwrap().len(), 2);
    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_remove_drops_a_queued_job() {
    let (runtime, _) = scripted_runtime(config(1, 10));
    let scheduler = runtime.start_scheduler();
    scheduler.deactivate().await.unwrap();
    let id = Uuid::new_v4();
    scheduler.add_job(id, User::system().id).await.unwrap();

    assert!(scheduler.remove(id).await.unwrap());
    assert!(!scheduler.remove(id).await.unwrap());
    assert!(scheduler.jobs().await.unwrap().is_empty());
    assert!(runtime.store().list_all::<Job>().await.unwrap().is_empty());
    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_start_restores_backlog_and_fails_lost_runs() {
    let (runtime, launcher) = scripted_runtime(config(1, 10));
    let lost = draft(&runtime, "lost").await;
    let mut record = runtime.experiment_record(lost).await.unwrap().unwrap();
    record.state.is_running = true;
    runtime.store().save(&record).await.unwrap();
    let queued = draft(&runtime, "queued").await;
    runtime
        .store()
        .save(&Job::new(queued, User::system().id))
        .await
        .unwrap();

    let scheduler = runtime.start_scheduler();
    // Any request is served after the startup tick
    assert!(scheduler.jobs().await.unwrap().is_empty());

    assert_eq!(launcher.launched(), vec![queued]);
    let lost = runtime.experiment_record(lost).await.unwrap().unwrap();
    assert!(lost.state.is_failed());
    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_kill_terminates_a_launched_worker() {
    let (runtime, launcher) = scripted_runtime(config(1, 10));
    let id = draft(&runtime, "doomed").await;
    let scheduler = runtime.start_scheduler();
    scheduler.add_job(id, User::system().id).await.unwrap();
    scheduler.tick().await.unwrap();
    assert_eq!(launcher.launched(), vec![id]);

    scheduler.kill(id).await.unwrap();

    let record = runtime.experiment_record(id).await.unwrap().unwrap();
    assert!(record.state.is_failed());
    assert_eq!(record.error.as_deref(), Some("Experiment manually stopped by a user."));
    assert!(scheduler.kill(id).await.is_err());
    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_in_process_workers_drain_the_queue() {
    let gate = Arc::new(Semaphore::new(0));
    let runtime = LabRuntime::with_in_process_launcher(
        test_registry_with_gate(Arc::clone(&gate)),
        Arc::new(MemoryRepository::new()),
        config(1, 10),
    );
    let user = User::system();
    let mut ids = Vec::new();
    for title in ["one", "two"] {
        let experiment = runtime.create_experiment(title, &gate_graph(), &user).await.unwrap();
        ids.push(experiment.id());
    }
    let scheduler = runtime.start_scheduler();
    for id in &ids {
        scheduler.add_job(*id, user.id).await.unwrap();
    }
    assert_eq!(scheduler.tick().await.unwrap().launched, vec![ids[0]]);

    gate.add_permits(2);
    for id in ids.clone() {
        let runtime = Arc::clone(&runtime);
        wait_until(move || {
            let runtime = Arc::clone(&runtime);
            async move {
                runtime
                    .experiment_record(id)
                    .await
                    .ok()
                    .flatten()
                    .is_some_and(|r| r.state.is_succeeded())
            }
        })
        .await;
    }

    assert_eq!(runtime.count_running_experiments().await.unwrap(), 0);
    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_stops_the_supervisor() {
    let runtime = Arc::new(LabRuntime::in_memory(test_registry()));
    let scheduler = runtime.start_scheduler();
    assert!(scheduler.is_running());

    scheduler.shutdown().await;

    assert!(!scheduler.is_running());
    assert!(matches!(
        scheduler.jobs().await.unwrap_err(),
        SchedulingError::SupervisorStopped
    ));
}
