//! In-memory record of admin operations and their cancellation tokens.
//!
//! Finished operations are kept for a while so callers can poll their
//! outcome, then forgotten. Running operations are never dropped.

use chrono::{Duration, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::models::operation::{OperationKind, OperationState, OperationStatus};

/// Handle an orchestrator holds for the operation it is running.
#[derive(Debug, Clone)]
pub struct OperationHandle {
    pub id: String,
    pub cancel: CancellationToken,
}

struct Tracked {
    status: OperationStatus,
    cancel: CancellationToken,
    /// Order in which the operation finished
    finished_seq: u64,
}

/// How long a finished operation stays visible
pub const DEFAULT_RETENTION_HOURS: i64 = 24;
/// Finished operations kept at most, oldest evicted first
pub const DEFAULT_MAX_FINISHED: usize = 1000;

#[derive(Clone)]
pub struct OperationTracker {
    ops: Arc<DashMap<String, Tracked>>,
    finished: Arc<AtomicU64>,
    retention: Duration,
    max_finished: usize,
}

impl Default for OperationTracker {
    fn default() -> Self {
        Self::with_limits(Duration::hours(DEFAULT_RETENTION_HOURS), DEFAULT_MAX_FINISHED)
    }
}

impl OperationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(retention: Duration, max_finished: usize) -> Self {
        Self {
            ops: Arc::new(DashMap::new()),
            finished: Arc::new(AtomicU64::new(0)),
            retention,
            max_finished,
        }
    }

    pub fn start(
        &self,
        kind: OperationKind,
        collection: &str,
        backup_name: &str,
        repository: Option<&str>,
    ) -> OperationHandle {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let cancel = CancellationToken::new();
        let status = OperationStatus {
            id: id.clone(),
            kind,
            collection: collection.to_string(),
            backup_name: backup_name.to_string(),
            repository: repository.map(String::from),
            state: OperationState::Init,
            message: None,
            shards_total: 0,
            shards_failed: 0,
            started_at: now,
            updated_at: now,
        };
        tracing::info!(operation = %id, ?kind, collection, backup = backup_name, "Operation started");
        self.prune();
        self.ops.insert(
            id.clone(),
            Tracked {
                status,
                cancel: cancel.clone(),
                finished_seq: 0,
            },
        );
        OperationHandle { id, cancel }
    }

    pub fn transition(&self, id: &str, state: OperationState) {
        if let Some(mut op) = self.ops.get_mut(id) {
            tracing::info!(operation = id, from = ?op.status.state, to = ?state, "Operation state change");
            op.status.state = state;
            op.status.updated_at = Utc::now();
        }
    }

    /// Record the repository an operation resolved to.
    pub fn set_repository(&self, id: &str, repository: &str) {
        if let Some(mut op) = self.ops.get_mut(id) {
            op.status.repository = Some(repository.to_string());
        }
    }

    pub fn set_shards(&self, id: &str, total: usize, failed: usize) {
        if let Some(mut op) = self.ops.get_mut(id) {
            op.status.shards_total = total;
            op.status.shards_failed = failed;
        }
    }

    pub fn finish(&self, id: &str, state: OperationState, message: Option<String>) {
        if let Some(mut op) = self.ops.get_mut(id) {
            tracing::info!(operation = id, from = ?op.status.state, to = ?state, "Operation finished");
            op.status.state = state;
            op.status.message = message;
            op.status.updated_at = Utc::now();
            op.finished_seq = self.finished.fetch_add(1, Ordering::Relaxed);
        }
        self.prune();
    }

    /// Forget finished operations past the retention window, then the oldest
    /// ones beyond the cap.
    fn prune(&self) {
        let cutoff = Utc::now() - self.retention;
        self.ops
            .retain(|_, op| !op.status.state.is_terminal() || op.status.updated_at > cutoff);

        let mut finished: Vec<(u64, String)> = self
            .ops
            .iter()
            .filter(|op| op.status.state.is_terminal())
            .map(|op| (op.finished_seq, op.key().clone()))
            .collect();
        if finished.len() <= self.max_finished {
            return;
        }
        finished.sort();
        let excess = finished.len() - self.max_finished;
        for (_, id) in finished.into_iter().take(excess) {
            self.ops.remove(&id);
        }
        tracing::debug!(evicted = excess, "Evicted finished operations");
    }

    pub fn get(&self, id: &str) -> Option<OperationStatus> {
        self.ops.get(id).map(|op| op.status.clone())
    }

    /// Most recent first
    pub fn list(&self) -> Vec<OperationStatus> {
        let mut all: Vec<OperationStatus> = self.ops.iter().map(|op| op.status.clone()).collect();
        all.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        all
    }

    /// Request cancellation. `None` for an unknown id, `Some(false)` if the
    /// operation has already finished.
    pub fn cancel(&self, id: &str) -> Option<bool> {
        let op = self.ops.get(id)?;
        if op.status.state.is_terminal() {
            return Some(false);
        }
        tracing::info!(operation = id, "Cancellation requested");
        op.cancel.cancel();
        Some(true)
    }

    /// Cancel every unfinished operation. Returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| !op.status.state.is_terminal())
            .map(|op| op.cancel.cancel())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle() {
        let tracker = OperationTracker::new();
        let handle = tracker.start(OperationKind::Backup, "books", "b1", None);
        assert_eq!(tracker.get(&handle.id).unwrap().state, OperationState::Init);

        tracker.transition(&handle.id, OperationState::Dispatched);
        tracker.set_shards(&handle.id, 3, 0);
        tracker.finish(&handle.id, OperationState::Committed, None);

        let status = tracker.get(&handle.id).unwrap();
        assert_eq!(status.state, OperationState::Committed);
        assert_eq!(status.shards_total, 3);
        assert_eq!(tracker.cancel(&handle.id), Some(false));
        assert!(!handle.cancel.is_cancelled());
    }

    #[test]
    fn test_cancel_running() {
        let tracker = OperationTracker::new();
        let handle = tracker.start(OperationKind::Restore, "books", "b1", Some("local"));
        assert_eq!(tracker.cancel(&handle.id), Some(true));
        assert!(handle.cancel.is_cancelled());
        assert_eq!(tracker.cancel("nope"), None);
    }

    #[test]
    fn test_finished_operations_are_capped() {
        let tracker = OperationTracker::with_limits(Duration::hours(1), 2);
        let running = tracker.start(OperationKind::Restore, "books", "b0", None);

        let ids: Vec<String> = (1..=3)
            .map(|i| {
                let op = tracker.start(OperationKind::Backup, "books", &format!("b{i}"), None);
                tracker.finish(&op.id, OperationState::Committed, None);
                op.id
            })
            .collect();

        assert!(tracker.get(&ids[0]).is_none());
        assert!(tracker.get(&ids[1]).is_some());
        assert!(tracker.get(&ids[2]).is_some());
        assert_eq!(tracker.get(&running.id).unwrap().state, OperationState::Init);
        assert_eq!(tracker.list().len(), 3);
    }

    #[test]
    fn test_expired_operations_are_forgotten() {
        let tracker = OperationTracker::with_limits(Duration::zero(), 100);
        let done = tracker.start(OperationKind::Backup, "books", "b1", None);
        let running = tracker.start(OperationKind::Backup, "books", "b2", None);
        tracker.finish(&done.id, OperationState::Aborted, Some("failed".into()));

        tracker.start(OperationKind::Backup, "books", "b3", None);
        assert!(tracker.get(&done.id).is_none());
        assert!(tracker.get(&running.id).is_some());
    }
}
