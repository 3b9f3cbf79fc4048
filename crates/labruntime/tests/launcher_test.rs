#![cfg(unix)]

use labruntime::{LaunchRequest, Launcher, ProcessLauncher};
use std::time::Duration;
use uuid::Uuid;

fn request() -> LaunchRequest {
    LaunchRequest {
        experiment_id: Uuid::new_v4(),
        user_id: Uuid::nil(),
    }
}

// `sh -c <script>` ignores the worker arguments appended after the script

#[tokio::test]
async fn test_exit_code_is_reported() {
    let launcher = ProcessLauncher::new("sh")
        .with_args(["-c", "exit 3"])
        .with_poll_interval(Duration::from_millis(10));

    let worker = launcher.launch(request()).await.unwrap();
    assert!(worker.pid().is_some());

    let exit = worker.wait().await.unwrap();
    assert!(!exit.success);
    assert_eq!(exit.code, Some(3));
    assert!(!worker.is_alive().await);
    // Waiting twice gives the same answer
    assert_eq!(worker.wait().await.unwrap(), exit);
}

#[tokio::test]
async fn test_terminate_kills_the_worker() {
    let launcher = ProcessLauncher::new("sh")
        .with_args(["-c", "sleep 30"])
        .with_poll_interval(Duration::from_millis(10));
    let worker = launcher.launch(request()).await.unwrap();
    assert!(worker.is_alive().await);

    worker.terminate().await.unwrap();

    let exit = tokio::time::timeout(Duration::from_secs(5), worker.wait())
        .await
        .unwrap()
        .unwrap();
    assert!(!exit.success);
    assert_eq!(exit.code, None);
}

#[tokio::test]
async fn test_missing_program_fails_to_spawn() {
    let launcher = ProcessLauncher::new("/nonexistent/lab-worker");

    let err = launcher.launch(request()).await.err().unwrap();
    assert!(matches!(err, labcore::LaunchError::Spawn(_)));
}
