use crate::process::{Process, ProcessRecord};
use crate::store::{Repository, RepositoryExt};
use labcore::{EventBus, ExecutionError, ExperimentId, User};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Everything a run needs from the outside, passed explicitly down the tree
#[derive(Clone)]
pub struct RunContext {
    experiment_id: ExperimentId,
    user: User,
    store: Arc<dyn Repository>,
    events: Arc<EventBus>,
    cancellation: CancellationToken,
}

impl RunContext {
    pub fn new(
        experiment_id: ExperimentId,
        user: User,
        store: Arc<dyn Repository>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            experiment_id,
            user,
            store,
            events,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn experiment_id(&self) -> ExperimentId {
        self.experiment_id
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn store(&self) -> &Arc<dyn Repository> {
        &self.store
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Persist the current lifecycle state of a process
    pub(crate) async fn checkpoint(&self, process: &Process, path: &str) -> Result<(), ExecutionError> {
        let record = ProcessRecord::capture(process, self.experiment_id, path);
        self.store.save(&record).await?;
        Ok(())
    }
}
