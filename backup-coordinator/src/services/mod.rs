pub mod backup_catalog;
pub mod backup_orchestrator;
pub mod cluster_state;
pub mod dispatch;
pub mod fanout;
pub mod location;
pub mod operation_tracker;
pub mod restore_orchestrator;
