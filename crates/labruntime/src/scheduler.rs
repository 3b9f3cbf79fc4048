use crate::experiment::RunOptions;
use crate::launcher::{WorkerExit, WorkerHandle};
use crate::queue::{Job, Queue};
use crate::runtime::{LabRuntime, RuntimeConfig};
use crate::store::RepositoryExt;
use labcore::{ConfigurationError, ExperimentId, LabError, SchedulingError, UserId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    pub max_running: usize,
    pub max_queue_length: usize,
    pub tick_interval: Duration,
    pub recover_orphans: bool,
}

impl From<&RuntimeConfig> for SchedulerConfig {
    fn from(config: &RuntimeConfig) -> Self {
        Self {
            max_running: config.max_running_experiments.max(1),
            max_queue_length: config.max_queue_length,
            tick_interval: config.tick_interval(),
            recover_orphans: config.recover_orphans_on_start,
        }
    }
}

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub launched: Vec<ExperimentId>,
    /// Jobs dropped because they could not be admitted
    pub discarded: Vec<Uuid>,
    /// The queue was deactivated
    pub skipped: bool,
}

enum Command {
    Enqueue {
        job: Job,
        reply: oneshot::Sender<Result<(), LabError>>,
    },
    Remove {
        experiment_id: ExperimentId,
        reply: oneshot::Sender<Result<bool, LabError>>,
    },
    Jobs {
        reply: oneshot::Sender<Vec<Job>>,
    },
    SetActive {
        active: bool,
        reply: oneshot::Sender<()>,
    },
    Tick {
        reply: oneshot::Sender<TickReport>,
    },
    Kill {
        experiment_id: ExperimentId,
        reply: oneshot::Sender<Result<(), LabError>>,
    },
}

/// Client side of the queue supervisor. Every queue operation goes through
/// the supervisor's single loop, which is what keeps ticks from overlapping.
pub struct SchedulerHandle {
    commands: mpsc::Sender<Command>,
    cancellation: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SchedulerHandle {
    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, SchedulingError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| SchedulingError::SupervisorStopped)?;
        response.await.map_err(|_| SchedulingError::SupervisorStopped)
    }

    /// Queue a run of `experiment_id` for `user_id`
    pub async fn add_job(&self, experiment_id: ExperimentId, user_id: UserId) -> Result<Job, LabError> {
        let job = Job::new(experiment_id, user_id);
        self.enqueue(job.clone()).await?;
        Ok(job)
    }

    pub async fn enqueue(&self, job: Job) -> Result<(), LabError> {
        self.request(|reply| Command::Enqueue { job, reply }).await?
    }

    /// Drop the queued job of an experiment. Returns whether one was queued.
    pub async fn remove(&self, experiment_id: ExperimentId) -> Result<bool, LabError> {
        self.request(|reply| Command::Remove {
            experiment_id,
            reply,
        })
        .await?
    }

    /// Queued jobs, oldest first
    pub async fn jobs(&self) -> Result<Vec<Job>, SchedulingError> {
        self.request(|reply| Command::Jobs { reply }).await
    }

    /// Resume ticking and drain the backlog right away
    pub async fn activate(&self) -> Result<(), SchedulingError> {
        self.request(|reply| Command::SetActive { active: true, reply })
            .await
    }

    /// Stop admitting jobs; queued jobs are kept
    pub async fn deactivate(&self) -> Result<(), SchedulingError> {
        self.request(|reply| Command::SetActive {
            active: false,
            reply,
        })
        .await
    }

    /// Run a tick now instead of waiting for the timer
    pub async fn tick(&self) -> Result<TickReport, SchedulingError> {
        self.request(|reply| Command::Tick { reply }).await
    }

    /// Terminate the worker running `experiment_id` and mark the run failed
    pub async fn kill(&self, experiment_id: ExperimentId) -> Result<(), LabError> {
        self.request(|reply| Command::Kill {
            experiment_id,
            reply,
        })
        .await?
    }

    pub fn is_running(&self) -> bool {
        !self.cancellation.is_cancelled() && !self.commands.is_closed()
    }

    /// Stop the supervisor and wait for its loop to end. Queued jobs stay persisted.
    pub async fn shutdown(&self) {
        self.cancellation.cancel();
        if let Some(task) = self.task.lock().await.take() {
            if let Err(e) = task.await {
                tracing::error!("Scheduler task ended abnormally: {}", e);
            }
        }
    }
}

pub(crate) fn spawn(runtime: Arc<LabRuntime>, config: SchedulerConfig) -> SchedulerHandle {
    let (commands, inbox) = mpsc::channel(64);
    let (exits, exited) = mpsc::unbounded_channel();
    let cancellation = CancellationToken::new();

    let supervisor = Supervisor {
        queue: Queue::new(config.max_queue_length),
        runtime,
        config,
        active: true,
        workers: HashMap::new(),
        exits,
    };
    let task = tokio::spawn(supervisor.run(inbox, exited, cancellation.clone()));

    SchedulerHandle {
        commands,
        cancellation,
        task: Mutex::new(Some(task)),
    }
}

struct Supervisor {
    runtime: Arc<LabRuntime>,
    config: SchedulerConfig,
    queue: Queue,
    active: bool,
    workers: HashMap<ExperimentId, Arc<dyn WorkerHandle>>,
    exits: mpsc::UnboundedSender<(ExperimentId, WorkerExit)>,
}

impl Supervisor {
    async fn run(
        mut self,
        mut inbox: mpsc::Receiver<Command>,
        mut exited: mpsc::UnboundedReceiver<(ExperimentId, WorkerExit)>,
        cancellation: CancellationToken,
    ) {
        self.restore().await;
        self.tick().await;

        let first_tick = tokio::time::Instant::now() + self.config.tick_interval;
        let mut interval = tokio::time::interval_at(first_tick, self.config.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(
            "Scheduler started (max running: {}, tick every {:?})",
            self.config.max_running,
            self.config.tick_interval
        );

        loop {
            tokio::select! {
                _ = cancellation.cancelled() => break,
                _ = interval.tick() => {
                    self.tick().await;
                }
                Some((experiment_id, exit)) = exited.recv() => {
                    self.on_worker_exit(experiment_id, exit).await;
                }
                command = inbox.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
            }
        }
        tracing::info!("Scheduler stopped with {} queued jobs", self.queue.len());
    }

    /// Reload the persisted backlog and fail runs a previous supervisor lost
    async fn restore(&mut self) {
        if self.config.recover_orphans {
            match self.runtime.recover_orphaned_runs().await {
                Ok(0) => {}
                Ok(count) => tracing::warn!("Marked {} interrupted runs as failed", count),
                Err(e) => tracing::error!("Failed to recover interrupted runs: {}", e),
            }
        }

        match self.runtime.store().list_all::<Job>().await {
            Ok(jobs) => {
                if !jobs.is_empty() {
                    tracing::info!("Restored {} queued jobs", jobs.len());
                }
                self.queue = Queue::with_jobs(self.config.max_queue_length, jobs);
            }
            Err(e) => tracing::error!("Failed to load queued jobs: {}", e),
        }
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Enqueue { job, reply } => {
                let _ = reply.send(self.enqueue(job).await);
            }
            Command::Remove {
                experiment_id,
                reply,
            } => {
                let _ = reply.send(self.remove(experiment_id).await);
            }
            Command::Jobs { reply } => {
                let _ = reply.send(self.queue.jobs());
            }
            Command::SetActive { active, reply } => {
                self.active = active;
                tracing::info!("Queue {}", if active { "activated" } else { "deactivated" });
                if active {
                    self.tick().await;
                }
                let _ = reply.send(());
            }
            Command::Tick { reply } => {
                let report = self.tick().await;
                let _ = reply.send(report);
            }
            Command::Kill {
                experiment_id,
                reply,
            } => {
                let _ = reply.send(self.kill(experiment_id).await);
            }
        }
    }

    async fn enqueue(&mut self, job: Job) -> Result<(), LabError> {
        if let Err(e) = self.queue.add(job.clone()) {
            tracing::warn!("Refusing job for experiment {}: {}", job.experiment_id, e);
            return Err(e.into());
        }
        if let Err(e) = self.runtime.store().save(&job).await {
            self.queue.remove_experiment(job.experiment_id);
            return Err(e.into());
        }
        tracing::info!(
            "Queued experiment {} ({} of {})",
            job.experiment_id,
            self.queue.len(),
            self.queue.max_length()
        );
        Ok(())
    }

    async fn remove(&mut self, experiment_id: ExperimentId) -> Result<bool, LabError> {
        let Some(job) = self.queue.remove_experiment(experiment_id) else {
            return Ok(false);
        };
        self.runtime.store().delete_by_id::<Job>(job.id).await?;
        tracing::info!("Removed experiment {} from the queue", experiment_id);
        Ok(true)
    }

    /// Admit jobs while the lab-wide running count is under the bound
    async fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();
        if !self.active {
            tracing::debug!("Queue is deactivated, skipping tick");
            report.skipped = true;
            return report;
        }

        while !self.queue.is_empty() {
            let running = match self.runtime.count_running_experiments().await {
                Ok(count) => count,
                Err(e) => {
                    tracing::error!("Cannot count running experiments: {}", e);
                    break;
                }
            };
            if running >= self.config.max_running {
                tracing::debug!("{} experiments running, waiting for a free slot", running);
                break;
            }

            let Some(job) = self.queue.pop_first() else {
                break;
            };
            if let Err(e) = self.runtime.store().delete_by_id::<Job>(job.id).await {
                tracing::warn!("Failed to delete job {}: {}", job.id, e);
            }

            match self.admit(&job).await {
                Ok(()) => report.launched.push(job.experiment_id),
                Err(e) => {
                    tracing::warn!("Discarding job {}: {}", job.id, e);
                    report.discarded.push(job.id);
                }
            }
        }
        report
    }

    async fn admit(&mut self, job: &Job) -> Result<(), LabError> {
        if self.runtime.experiment_record(job.experiment_id).await?.is_none() {
            return Err(SchedulingError::OrphanedJob {
                job: job.id,
                experiment: job.experiment_id,
            }
            .into());
        }

        let mut experiment = self.runtime.load_experiment(job.experiment_id).await?;
        if !experiment.state().is_draft() {
            return Err(SchedulingError::NotLaunchable {
                experiment: job.experiment_id,
                reason: "it has already run".to_string(),
            }
            .into());
        }

        let user = self.runtime.resolve_user(job.user_id).await?;
        experiment
            .run(&user, RunOptions::serving(), &self.runtime)
            .await?;
        tracing::info!("Admitted experiment {} for {}", job.experiment_id, user.name);

        if let Some(worker) = experiment.worker() {
            self.watch(job.experiment_id, worker);
        }
        Ok(())
    }

    /// Wait for the worker off-loop and report back when it exits
    fn watch(&mut self, experiment_id: ExperimentId, worker: Arc<dyn WorkerHandle>) {
        self.workers.insert(experiment_id, Arc::clone(&worker));
        let exits = self.exits.clone();
        tokio::spawn(async move {
            let exit = worker.wait().await.unwrap_or_else(|e| {
                tracing::warn!("Lost track of worker for {}: {}", experiment_id, e);
                WorkerExit::failed()
            });
            let _ = exits.send((experiment_id, exit));
        });
    }

    async fn on_worker_exit(&mut self, experiment_id: ExperimentId, exit: WorkerExit) {
        self.workers.remove(&experiment_id);
        tracing::info!(
            "Worker for experiment {} exited (success: {}, code: {:?})",
            experiment_id,
            exit.success,
            exit.code
        );
        if let Err(e) = self.runtime.recover_worker_exit(experiment_id, &exit).await {
            tracing::error!("Failed to check experiment {} after worker exit: {}", experiment_id, e);
        }
        // A slot may have freed up
        self.tick().await;
    }

    async fn kill(&mut self, experiment_id: ExperimentId) -> Result<(), LabError> {
        let mut experiment = self.runtime.load_experiment(experiment_id).await?;
        match self.workers.get(&experiment_id) {
            Some(worker) => experiment.attach_worker(Arc::clone(worker)),
            None if !experiment.state().is_running => {
                return Err(ConfigurationError::InvalidState(format!(
                    "experiment {} is not running",
                    experiment_id
                ))
                .into());
            }
            None => {}
        }
        experiment.kill(&self.runtime).await
    }
}
