//! Deferred work for the workflow.

use chrono::{DateTime, Utc};
use redline_core::job::JobId;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, PoisonError};

/// A unit of deferred work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    /// Run the next step of a job.
    Advance(JobId),
    /// Delete a completed job.
    Purge(JobId),
}

impl Task {
    pub fn job_id(&self) -> &JobId {
        match self {
            Self::Advance(id) | Self::Purge(id) => id,
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Advance(id) => write!(f, "advance {}", id),
            Self::Purge(id) => write!(f, "purge {}", id),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("failed to schedule {task}: {reason}")]
pub struct SchedulerError {
    pub task: String,
    pub reason: String,
}

/// Accepts tasks to run at (or after) a given time.
pub trait Scheduler: Send + Sync {
    fn schedule(&self, task: Task, due: DateTime<Utc>) -> Result<(), SchedulerError>;
}

/// In-process queue ordered by due time, first-in first-out among equal times.
#[derive(Debug, Default)]
pub struct TaskQueue {
    entries: Mutex<VecDeque<(DateTime<Utc>, Task)>>,
    capacity: Option<usize>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse new tasks once `capacity` are pending.
    pub fn with_capacity_limit(capacity: usize) -> Self {
        Self {
            entries: Mutex::default(),
            capacity: Some(capacity),
        }
    }

    /// Remove and return the earliest task due at `now`.
    pub fn pop_due(&self, now: DateTime<Utc>) -> Option<Task> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.front() {
            Some((due, _)) if *due <= now => entries.pop_front().map(|(_, task)| task),
            _ => None,
        }
    }

    /// Pending tasks in due order.
    pub fn pending(&self) -> Vec<(DateTime<Utc>, Task)> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Scheduler for TaskQueue {
    fn schedule(&self, task: Task, due: DateTime<Utc>) -> Result<(), SchedulerError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(capacity) = self.capacity
            && entries.len() >= capacity
        {
            return Err(SchedulerError {
                task: task.to_string(),
                reason: format!("queue is full ({} pending)", entries.len()),
            });
        }
        let position = entries.partition_point(|(at, _)| *at <= due);
        tracing::debug!(%task, %due, "task scheduled");
        entries.insert(position, (due, task));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_due_order_and_fifo() {
        let queue = TaskQueue::new();
        let now = Utc::now();
        let a = JobId::generate();
        let b = JobId::generate();
        queue.schedule(Task::Purge(a.clone()), now + Duration::seconds(180)).unwrap();
        queue.schedule(Task::Advance(a.clone()), now).unwrap();
        queue.schedule(Task::Advance(b.clone()), now).unwrap();

        assert_eq!(queue.pop_due(now), Some(Task::Advance(a.clone())));
        assert_eq!(queue.pop_due(now), Some(Task::Advance(b)));
        assert_eq!(queue.pop_due(now), None);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pending()[0].0, now + Duration::seconds(180));
        assert_eq!(
            queue.pop_due(now + Duration::seconds(181)),
            Some(Task::Purge(a))
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn test_task_names_its_job() {
        let id = JobId::generate();
        let task = Task::Purge(id.clone());
        assert_eq!(task.job_id(), &id);
        assert_eq!(task.to_string(), format!("purge {}", id));
    }

    #[test]
    fn test_capacity_limit_rejects() {
        let queue = TaskQueue::with_capacity_limit(1);
        let now = Utc::now();
        queue.schedule(Task::Advance(JobId::generate()), now).unwrap();
        let err = queue
            .schedule(Task::Advance(JobId::generate()), now)
            .unwrap_err();
        assert!(err.to_string().contains("queue is full"));
    }
}
