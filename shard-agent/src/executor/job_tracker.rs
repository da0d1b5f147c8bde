//! Tracks running shard tasks so they can be cancelled by id.
//!
//! Cancellation is cooperative: a cancelled task starts no new file copies,
//! but copies already in flight run to completion.

use dashmap::DashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Default)]
pub struct JobTracker {
    jobs: Arc<DashMap<String, CancellationToken>>,
}

/// Registration of one running task. Dropping it removes the task from the
/// tracker, including when the future driving the task is dropped early.
pub struct JobGuard {
    tracker: JobTracker,
    task_id: String,
    token: CancellationToken,
}

impl JobGuard {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        // Copies spawned for an abandoned task must not start
        self.token.cancel();
        self.tracker.complete(&self.task_id);
    }
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task. It stays tracked until the guard is dropped.
    pub fn register(&self, task_id: &str) -> JobGuard {
        let token = CancellationToken::new();
        self.jobs.insert(task_id.to_string(), token.clone());
        JobGuard {
            tracker: self.clone(),
            task_id: task_id.to_string(),
            token,
        }
    }

    /// Cancel a running task by its ID
    pub fn cancel(&self, task_id: &str) -> bool {
        match self.jobs.get(task_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every running task. Returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        self.jobs.iter().map(|entry| entry.value().cancel()).count()
    }

    /// Forget a finished task. A live re-registration of the same id is
    /// left alone; the guard cancels its own token before calling this.
    pub(crate) fn complete(&self, task_id: &str) {
        self.jobs.remove_if(task_id, |_, current| current.is_cancelled());
    }

    pub fn running_count(&self) -> usize {
        self.jobs.len()
    }
}
