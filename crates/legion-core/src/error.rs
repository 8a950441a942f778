//! Error types for the core orchestrator crate.

use legion_config::ConfigError;
use legion_protocol::{MissionId, TaskId, TaskType};
use thiserror::Error;

/// Errors returned by orchestrator operations.
#[derive(Debug, Error)]
pub enum LegionCoreError {
    /// Mission id is unknown to the store.
    #[error("mission not found: {0}")]
    NotFound(MissionId),
    /// Task id is unknown to the mission.
    #[error("unknown task: {0}")]
    UnknownTask(TaskId),
    /// The mission is not in a state that permits the request.
    #[error("invalid transition for mission {mission_id}: {reason}")]
    InvalidTransition {
        mission_id: MissionId,
        reason: String,
    },
    #[error("no agent registered for task type {0}")]
    NoAgentFor(TaskType),
    /// Two adapters claim the same task type.
    #[error("agent conflict: {0}")]
    AgentConflict(String),
    /// The mission was cancelled while the caller waited on it.
    #[error("mission cancelled: {0}")]
    Cancelled(MissionId),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("state error: {0}")]
    State(String),
    #[error("executor error: {0}")]
    Executor(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl LegionCoreError {
    pub(crate) fn invalid(mission_id: MissionId, reason: impl Into<String>) -> Self {
        LegionCoreError::InvalidTransition {
            mission_id,
            reason: reason.into(),
        }
    }
}
