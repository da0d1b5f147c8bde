//! Units of work sent to a shard-holding node, and their results.
//!
//! These types cross the dispatch boundary as JSON. A task never fails by
//! raising: every outcome, including transport trouble seen by the
//! coordinator, is expressed as an [`OperationResult`].

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use url::Url;

use crate::manifest::FileDescriptor;

/// Shard identifier, ordered naturally (`shard2` before `shard10`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShardId(String);

impl ShardId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn split(&self) -> (&str, Option<u64>) {
        let digits = self.0.len() - self.0.trim_end_matches(|c: char| c.is_ascii_digit()).len();
        let (prefix, number) = self.0.split_at(self.0.len() - digits);
        (prefix, number.parse().ok())
    }
}

impl Ord for ShardId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.split()
            .cmp(&other.split())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for ShardId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ShardId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Copy one shard's index files into a repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardBackupTask {
    pub task_id: String,
    pub collection: String,
    pub shard_id: ShardId,
    pub replica_id: String,
    /// Resolved repository name, never left to the node's default
    pub repository: String,
    pub location: Url,
    pub backup_name: String,
}

/// Copy one shard's files out of a repository into a new local index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardRestoreTask {
    pub task_id: String,
    /// Target collection the index is installed under
    pub collection: String,
    pub shard_id: ShardId,
    pub repository: String,
    pub location: Url,
    pub backup_name: String,
    /// Files recorded for this shard in the manifest
    pub files: Vec<FileDescriptor>,
}

/// What a successful shard task moved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShardReport {
    pub files: Vec<FileDescriptor>,
    pub bytes: u64,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success(ShardReport),
    Failure {
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cause: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    pub shard_id: ShardId,
    pub outcome: Outcome,
}

impl OperationResult {
    pub fn success(shard_id: ShardId, report: ShardReport) -> Self {
        Self {
            shard_id,
            outcome: Outcome::Success(report),
        }
    }

    pub fn failure(shard_id: ShardId, reason: impl Into<String>, cause: Option<String>) -> Self {
        Self {
            shard_id,
            outcome: Outcome::Failure {
                reason: reason.into(),
                cause,
            },
        }
    }

    /// Failure carrying an error's message and, if any, its source.
    pub fn from_error(shard_id: ShardId, err: &(dyn std::error::Error + 'static)) -> Self {
        Self::failure(shard_id, err.to_string(), err.source().map(|s| s.to_string()))
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_id_natural_order() {
        let mut ids: Vec<ShardId> = ["shard10", "shard2", "shard1", "alpha"]
            .into_iter()
            .map(ShardId::from)
            .collect();
        ids.sort();
        let sorted: Vec<&str> = ids.iter().map(|s| s.as_str()).collect();
        assert_eq!(sorted, vec!["alpha", "shard1", "shard2", "shard10"]);
    }

    #[test]
    fn test_outcome_wire_format() {
        let result = OperationResult::failure(ShardId::from("shard1"), "boom", None);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["shard_id"], "shard1");
        assert_eq!(json["outcome"]["status"], "failure");
        assert_eq!(json["outcome"]["reason"], "boom");
        assert!(json["outcome"].get("cause").is_none());

        let ok = OperationResult::success(
            ShardId::from("shard2"),
            ShardReport {
                files: vec![],
                bytes: 7,
                duration_ms: 1,
            },
        );
        let json = serde_json::to_string(&ok).unwrap();
        let back: OperationResult = serde_json::from_str(&json).unwrap();
        assert!(back.is_success());
        assert_eq!(back, ok);
    }

    #[test]
    fn test_from_error_keeps_source() {
        let err = crate::repository::RepositoryError::io(
            "poisoned",
            "local",
            "copy '_0.cfs'",
            std::io::Error::new(std::io::ErrorKind::Other, "disk gone"),
        );
        let result = OperationResult::from_error(ShardId::from("shard1"), &err);
        match result.outcome {
            Outcome::Failure { reason, cause } => {
                assert!(reason.contains("poisoned"));
                assert_eq!(cause.as_deref(), Some("disk gone"));
            }
            Outcome::Success(_) => panic!("expected failure"),
        }
    }
}
