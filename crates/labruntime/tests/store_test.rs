mod common;

use common::{chain_graph, member, test_registry};
use labcore::User;
use labruntime::{
    ExperimentRecord, FileRepository, Job, LabRuntime, MemoryRepository, Repository, RepositoryExt,
    RunOptions, RuntimeConfig,
};
use std::sync::Arc;
use uuid::Uuid;

async fn exercise(store: &dyn Repository) {
    let user = member();
    assert!(store.get_by_id::<User>(user.id).await.unwrap().is_none());

    store.save(&user).await.unwrap();
    assert_eq!(store.get_by_id::<User>(user.id).await.unwrap(), Some(user.clone()));

    let jobs = [Job::new(Uuid::new_v4(), user.id), Job::new(Uuid::new_v4(), user.id)];
    for job in &jobs {
        store.save(job).await.unwrap();
    }
    assert_eq!(store.list_all::<Job>().await.unwrap().len(), 2);
    // Kinds do not mix
    assert_eq!(store.list_all::<User>().await.unwrap().len(), 1);

    assert!(store.delete_by_id::<Job>(jobs[0].id).await.unwrap());
    assert!(!store.delete_by_id::<Job>(jobs[0].id).await.unwrap());
    let left = store.list_all::<Job>().await.unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].id, jobs[1].id);
}

#[tokio::test]
async fn test_memory_repository() {
    exercise(&MemoryRepository::new()).await;
}

#[tokio::test]
async fn test_file_repository() {
    let dir = tempfile::tempdir().unwrap();
    exercise(&FileRepository::new(dir.path())).await;

    assert!(dir.path().join("user").is_dir());
    assert!(dir.path().join("job").is_dir());
}

#[tokio::test]
async fn test_file_repository_on_empty_root() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileRepository::new(dir.path().join("missing"));

    assert!(store.list_all::<Job>().await.unwrap().is_empty());
    assert!(!store.delete_by_id::<Job>(Uuid::new_v4()).await.unwrap());
}

#[tokio::test]
async fn test_experiments_survive_a_runtime_restart() {
    let dir = tempfile::tempdir().unwrap();
    let user = User::system();
    let id = {
        let store = Arc::new(FileRepository::new(dir.path()));
        let runtime = LabRuntime::new(test_registry(), store, RuntimeConfig::default());
        let mut experiment = runtime
            .create_experiment("persisted", &chain_graph("disk"), &user)
            .await
            .unwrap();
        experiment.run(&user, RunOptions::blocking(), &runtime).await.unwrap();
        experiment.id()
    };

    let runtime = LabRuntime::new(
        test_registry(),
        Arc::new(FileRepository::new(dir.path())),
        RuntimeConfig::default(),
    );
    let records: Vec<ExperimentRecord> = runtime.list_experiments().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, id);
    assert!(records[0].state.is_succeeded());

    let experiment = runtime.load_experiment(id).await.unwrap();
    assert_eq!(experiment.title(), "persisted");
    assert!(experiment.state().is_succeeded());
    assert_eq!(experiment.protocol().to_graph().unwrap(), chain_graph("disk"));
}
