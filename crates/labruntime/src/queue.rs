use crate::store::Entity;
use chrono::{DateTime, Utc};
use labcore::{ExperimentId, SchedulingError, UserId};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

/// Request to run one experiment on behalf of a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub experiment_id: ExperimentId,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(experiment_id: ExperimentId, user_id: UserId) -> Self {
        Self {
            id: Uuid::new_v4(),
            experiment_id,
            user_id,
            created_at: Utc::now(),
        }
    }
}

impl Entity for Job {
    const KIND: &'static str = "job";

    fn entity_id(&self) -> Uuid {
        self.id
    }
}

/// Bounded FIFO of jobs
#[derive(Debug, Clone)]
pub struct Queue {
    jobs: VecDeque<Job>,
    max_length: usize,
}

impl Queue {
    pub fn new(max_length: usize) -> Self {
        Self {
            jobs: VecDeque::new(),
            max_length,
        }
    }

    /// Rebuild from persisted jobs, oldest first. Jobs beyond the bound are
    /// kept; only new additions are refused.
    pub fn with_jobs(max_length: usize, mut jobs: Vec<Job>) -> Self {
        jobs.sort_by_key(|job| job.created_at);
        Self {
            jobs: jobs.into(),
            max_length,
        }
    }

    pub fn add(&mut self, job: Job) -> Result<(), SchedulingError> {
        if self.contains(job.experiment_id) {
            return Err(SchedulingError::AlreadyQueued(job.experiment_id));
        }
        if self.is_full() {
            return Err(SchedulingError::QueueFull {
                max_length: self.max_length,
            });
        }
        self.jobs.push_back(job);
        Ok(())
    }

    pub fn pop_first(&mut self) -> Option<Job> {
        self.jobs.pop_front()
    }

    pub fn remove_experiment(&mut self, experiment_id: ExperimentId) -> Option<Job> {
        let index = self
            .jobs
            .iter()
            .position(|job| job.experiment_id == experiment_id)?;
        self.jobs.remove(index)
    }

    pub fn contains(&self, experiment_id: ExperimentId) -> bool {
        self.jobs.iter().any(|job| job.experiment_id == experiment_id)
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.jobs.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.jobs.len() >= self.max_length
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let mut queue = Queue::new(3);
        let first = Job::new(Uuid::new_v4(), Uuid::nil());
        let second = Job::new(Uuid::new_v4(), Uuid::nil());
        queue.add(first.clone()).unwrap();
        queue.add(second.clone()).unwrap();

        assert_eq!(queue.pop_first(), Some(first));
        assert_eq!(queue.pop_first(), Some(second));
        assert!(queue.pop_first().is_none());
    }

    #[test]
    fn test_rejects_when_full() {
        let mut queue = Queue::new(1);
        queue.add(Job::new(Uuid::new_v4(), Uuid::nil())).unwrap();

        let err = queue.add(Job::new(Uuid::new_v4(), Uuid::nil())).unwrap_err();
        assert_eq!(err, SchedulingError::QueueFull { max_length: 1 });
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_rejects_duplicate_experiment() {
        let mut queue = Queue::new(5);
        let experiment = Uuid::new_v4();
        queue.add(Job::new(experiment, Uuid::nil())).unwrap();

        let err = queue.add(Job::new(experiment, Uuid::nil())).unwrap_err();
        assert_eq!(err, SchedulingError::AlreadyQueued(experiment));
    }

    #[test]
    fn test_remove_experiment() {
        let mut queue = Queue::new(5);
        let kept = Job::new(Uuid::new_v4(), Uuid::nil());
        let removed = Job::new(Uuid::new_v4(), Uuid::nil());
        queue.add(kept.clone()).unwrap();
        queue.add(removed.clone()).unwrap();

        assert_eq!(queue.remove_experiment(removed.experiment_id), Some(removed));
        assert_eq!(queue.jobs(), vec![kept]);
    }

    #[test]
    fn test_restore_sorts_oldest_first() {
        let mut older = Job::new(Uuid::new_v4(), Uuid::nil());
        let newer = Job::new(Uuid::new_v4(), Uuid::nil());
        older.created_at = newer.created_at - chrono::Duration::seconds(5);

        let mut queue = Queue::with_jobs(10, vec![newer.clone(), older.clone()]);
        assert_eq!(queue.pop_first(), Some(older));
        assert_eq!(queue.pop_first(), Some(newer));
    }
}
