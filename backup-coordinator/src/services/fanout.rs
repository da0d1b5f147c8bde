//! Run one task per shard and gather the per-shard results.

use futures_util::stream::{FuturesUnordered, StreamExt};
use shard_agent::{OperationResult, Outcome, ShardId, ShardReport};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::dispatch::ShardDispatcher;

pub struct PendingShard {
    pub shard_id: ShardId,
    pub node: String,
    pub task_id: String,
    handle: JoinHandle<OperationResult>,
}

/// Start a shard task bounded by `timeout`. A timeout is reported as a
/// failure of that shard.
pub fn spawn_shard<F>(
    shard_id: ShardId,
    node: String,
    task_id: String,
    timeout: Duration,
    task: F,
) -> PendingShard
where
    F: Future<Output = OperationResult> + Send + 'static,
{
    let sid = shard_id.clone();
    let handle = tokio::spawn(async move {
        match tokio::time::timeout(timeout, task).await {
            Ok(result) => result,
            Err(_) => OperationResult::failure(
                sid,
                format!("Shard task timed out after {}s", timeout.as_secs()),
                None,
            ),
        }
    });
    PendingShard {
        shard_id,
        node,
        task_id,
        handle,
    }
}

/// Wait for every shard to report.
///
/// Nodes are told to stop their tasks once `cancel` fires. Waiting continues
/// after that so no shard is still writing when the caller decides the
/// outcome. Returns the results in shard id order and whether cancellation
/// was requested.
pub async fn await_all(
    pending: Vec<PendingShard>,
    dispatcher: &Arc<dyn ShardDispatcher>,
    cancel: &CancellationToken,
) -> (Vec<OperationResult>, bool) {
    let targets: Vec<(String, String)> = pending
        .iter()
        .map(|p| (p.node.clone(), p.task_id.clone()))
        .collect();

    let mut running: FuturesUnordered<_> = pending
        .into_iter()
        .map(|p| async move {
            match p.handle.await {
                Ok(result) => result,
                Err(e) => OperationResult::failure(p.shard_id, format!("Shard task panicked: {e}"), None),
            }
        })
        .collect();

    let mut results = Vec::with_capacity(targets.len());
    let mut cancel_sent = false;
    let mut first_failure_seen = false;

    loop {
        tokio::select! {
            _ = cancel.cancelled(), if !cancel_sent => {
                cancel_sent = true;
                tracing::info!(shards = targets.len(), "Cancelling shard tasks");
                let requests = targets
                    .iter()
                    .map(|(node, task_id)| dispatcher.cancel(node, task_id));
                futures_util::future::join_all(requests).await;
            }
            next = running.next() => match next {
                Some(result) => {
                    if !result.is_success() && !first_failure_seen {
                        first_failure_seen = true;
                        tracing::warn!(
                            shard = %result.shard_id,
                            remaining = running.len(),
                            "Shard failed, operation will abort once in-flight shards finish"
                        );
                    }
                    results.push(result);
                }
                None => break,
            },
        }
    }

    results.sort_by(|a, b| a.shard_id.cmp(&b.shard_id));
    (results, cancel_sent || cancel.is_cancelled())
}

/// The failure chosen to represent a failed operation.
#[derive(Debug, Clone, PartialEq)]
pub struct ShardFailures {
    pub failed: usize,
    pub total: usize,
    pub shard_id: ShardId,
    pub reason: String,
    pub cause: Option<String>,
}

/// All reports if every shard succeeded, otherwise the failure of the lowest
/// shard id together with the failure count.
pub fn aggregate(results: Vec<OperationResult>) -> Result<Vec<(ShardId, ShardReport)>, ShardFailures> {
    let total = results.len();
    let mut reports = Vec::with_capacity(total);
    let mut first: Option<(ShardId, String, Option<String>)> = None;
    let mut failed = 0;

    for result in results {
        match result.outcome {
            Outcome::Success(report) => reports.push((result.shard_id, report)),
            Outcome::Failure { reason, cause } => {
                failed += 1;
                let lower = first
                    .as_ref()
                    .map_or(true, |(shard, _, _)| result.shard_id < *shard);
                if lower {
                    first = Some((result.shard_id, reason, cause));
                }
            }
        }
    }

    match first {
        None => {
            reports.sort_by(|a, b| a.0.cmp(&b.0));
            Ok(reports)
        }
        Some((shard_id, reason, cause)) => Err(ShardFailures {
            failed,
            total,
            shard_id,
            reason,
            cause,
        }),
    }
}
