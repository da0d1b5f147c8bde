//! Admin operation records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Backup,
    Restore,
}

/// Orchestrator state machine.
///
/// Backup: `Init → Dispatched → AwaitingResults → Committed | Aborted`.
/// Restore: `Init → Dispatched → AwaitingResults → Ready | Aborted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    Init,
    Dispatched,
    AwaitingResults,
    Committed,
    Ready,
    Aborted,
}

impl OperationState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OperationState::Committed | OperationState::Ready | OperationState::Aborted
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationStatus {
    pub id: String,
    pub kind: OperationKind,
    pub collection: String,
    pub backup_name: String,
    pub repository: Option<String>,
    pub state: OperationState,
    pub message: Option<String>,
    pub shards_total: usize,
    pub shards_failed: usize,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackupRequest {
    pub collection: String,
    pub backup_name: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub repository: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RestoreRequest {
    /// Name of the collection to create
    pub collection: String,
    pub backup_name: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub repository: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(OperationState::Committed.is_terminal());
        assert!(OperationState::Ready.is_terminal());
        assert!(OperationState::Aborted.is_terminal());
        assert!(!OperationState::AwaitingResults.is_terminal());
        assert_eq!(
            serde_json::to_string(&OperationState::AwaitingResults).unwrap(),
            "\"awaiting_results\""
        );
    }
}
