use crate::runtime::LabRuntime;
use async_trait::async_trait;
use labcore::{ExperimentId, LabError, LaunchError, UserId};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::{AbortHandle, JoinHandle};

/// What a worker needs to pick up an experiment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchRequest {
    pub experiment_id: ExperimentId,
    pub user_id: UserId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerExit {
    pub success: bool,
    /// Exit code, when the worker was a process that exited normally
    pub code: Option<i32>,
}

impl WorkerExit {
    pub fn failed() -> Self {
        Self {
            success: false,
            code: None,
        }
    }
}

/// Handle on one running worker
#[async_trait]
pub trait WorkerHandle: Send + Sync {
    fn pid(&self) -> Option<u32>;

    async fn is_alive(&self) -> bool;

    /// Resolves once the worker has exited. Safe to call more than once.
    async fn wait(&self) -> Result<WorkerExit, LaunchError>;

    async fn terminate(&self) -> Result<(), LaunchError>;
}

/// Starts workers that run one experiment each
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self, request: LaunchRequest) -> Result<Arc<dyn WorkerHandle>, LaunchError>;
}

/// Spawns `<program> [args] worker --experiment <id> --user <id>` as a
/// detached OS process.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
    poll_interval: Duration,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            poll_interval: Duration::from_millis(200),
        }
    }

    /// Arguments placed before the `worker` subcommand
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

#[async_trait]
impl Launcher for ProcessLauncher {
    async fn launch(&self, request: LaunchRequest) -> Result<Arc<dyn WorkerHandle>, LaunchError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg("worker")
            .arg("--experiment")
            .arg(request.experiment_id.to_string())
            .arg("--user")
            .arg(request.user_id.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());

        let child = cmd
            .spawn()
            .map_err(|e| LaunchError::Spawn(format!("{}: {}", self.program.display(), e)))?;
        let pid = child.id();
        tracing::info!(
            "Launched worker for experiment {} (pid {:?})",
            request.experiment_id,
            pid
        );

        Ok(Arc::new(ChildWorker {
            pid,
            child: Mutex::new(child),
            poll_interval: self.poll_interval,
        }))
    }
}

struct ChildWorker {
    pid: Option<u32>,
    child: Mutex<Child>,
    poll_interval: Duration,
}

#[async_trait]
impl WorkerHandle for ChildWorker {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    async fn is_alive(&self) -> bool {
        matches!(self.child.lock().await.try_wait(), Ok(None))
    }

    async fn wait(&self) -> Result<WorkerExit, LaunchError> {
        // Poll instead of awaiting the child so terminate can still take the lock
        loop {
            {
                let mut child = self.child.lock().await;
                if let Some(status) = child
                    .try_wait()
                    .map_err(|e| LaunchError::Wait(e.to_string()))?
                {
                    return Ok(WorkerExit {
                        success: status.success(),
                        code: status.code(),
                    });
                }
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn terminate(&self) -> Result<(), LaunchError> {
        let mut child = self.child.lock().await;
        if let Ok(Some(_)) = child.try_wait() {
            return Ok(());
        }
        child
            .start_kill()
            .map_err(|e| LaunchError::Terminate(e.to_string()))
    }
}

/// Runs workers as tokio tasks inside the current process
pub struct InProcessLauncher {
    runtime: Weak<LabRuntime>,
}

impl InProcessLauncher {
    pub fn new(runtime: Weak<LabRuntime>) -> Self {
        Self { runtime }
    }
}

#[async_trait]
impl Launcher for InProcessLauncher {
    async fn launch(&self, request: LaunchRequest) -> Result<Arc<dyn WorkerHandle>, LaunchError> {
        let runtime = self
            .runtime
            .upgrade()
            .ok_or_else(|| LaunchError::Unavailable("runtime has been dropped".to_string()))?;

        let done = Arc::new(AtomicBool::new(false));
        let finished = Arc::clone(&done);
        let handle = tokio::spawn(async move {
            let result = runtime
                .run_worker(request.experiment_id, request.user_id)
                .await;
            finished.store(true, Ordering::SeqCst);
            result
        });
        tracing::info!("Started in-process worker for experiment {}", request.experiment_id);

        Ok(Arc::new(TaskWorker {
            abort: handle.abort_handle(),
            handle: Mutex::new(Some(handle)),
            exit: Mutex::new(None),
            done,
        }))
    }
}

struct TaskWorker {
    abort: AbortHandle,
    handle: Mutex<Option<JoinHandle<Result<(), LabError>>>>,
    exit: Mutex<Option<WorkerExit>>,
    done: Arc<AtomicBool>,
}

#[async_trait]
impl WorkerHandle for TaskWorker {
    fn pid(&self) -> Option<u32> {
        Some(std::process::id())
    }

    async fn is_alive(&self) -> bool {
        !self.done.load(Ordering::SeqCst) && self.exit.lock().await.is_none()
    }

    async fn wait(&self) -> Result<WorkerExit, LaunchError> {
        let mut handle = self.handle.lock().await;
        if let Some(exit) = *self.exit.lock().await {
            return Ok(exit);
        }
        let Some(join) = handle.take() else {
            return Ok(WorkerExit::failed());
        };

        let exit = match join.await {
            Ok(Ok(())) => WorkerExit {
                success: true,
                code: Some(0),
            },
            Ok(Err(e)) => {
                tracing::warn!("In-process worker failed: {}", e);
                WorkerExit {
                    success: false,
                    code: Some(1),
                }
            }
            Err(e) if e.is_cancelled() => WorkerExit::failed(),
            Err(e) => return Err(LaunchError::Wait(e.to_string())),
        };
        *self.exit.lock().await = Some(exit);
        Ok(exit)
    }

    async fn terminate(&self) -> Result<(), LaunchError> {
        self.abort.abort();
        Ok(())
    }
}
