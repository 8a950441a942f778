//! Agent-to-agent task and response shapes.

use crate::mission::{AnalysisReport, CollectedData, DeliverableFormat, DeliverableKind};
use crate::{MissionId, TaskId};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// The four fixed agent roles.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Planner.
    Consul,
    /// Collector.
    Centurion,
    /// Analyst.
    Augur,
    /// Creator.
    Scribe,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Consul => "consul",
            AgentRole::Centurion => "centurion",
            AgentRole::Augur => "augur",
            AgentRole::Scribe => "scribe",
        }
    }

    /// Upper-case name used in the message log.
    pub fn display_name(&self) -> &'static str {
        match self {
            AgentRole::Consul => "CONSUL",
            AgentRole::Centurion => "CENTURION",
            AgentRole::Augur => "AUGUR",
            AgentRole::Scribe => "SCRIBE",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Unit of work an agent can accept.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    PlanMission,
    RefinePlan,
    CollectData,
    Analyze,
    CreateDeliverable,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::PlanMission => "plan_mission",
            TaskType::RefinePlan => "refine_plan",
            TaskType::CollectData => "collect_data",
            TaskType::Analyze => "analyze",
            TaskType::CreateDeliverable => "create_deliverable",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit request in the A2A protocol.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct A2ATask {
    /// Caller-assigned unique id.
    pub task_id: TaskId,
    pub mission_id: MissionId,
    /// Role handing over the work; `None` when it comes from the user.
    pub from_role: Option<AgentRole>,
    pub to_role: AgentRole,
    pub task_type: TaskType,
    /// Role-specific payload, see the `*Request` types in this module.
    pub parameters: Value,
    pub created_at: DateTime<Utc>,
}

impl A2ATask {
    /// Decode the parameters into a typed request.
    pub fn parameters_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.parameters.clone())
    }
}

/// Terminal status carried by a response.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Completed,
    Failed,
}

/// Failure classification for a response.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ProviderUnavailable,
    RateLimited,
    /// Synthesized when no response arrived before the await timeout.
    TaskTimeout,
    /// Synthesized when the mission was cancelled while waiting.
    Abandoned,
    InvalidInput,
    Internal,
}

impl ErrorKind {
    /// Failures worth another attempt under a phase-level retry policy.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorKind::ProviderUnavailable | ErrorKind::RateLimited | ErrorKind::TaskTimeout
        )
    }
}

/// Error payload of a failed response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct A2AError {
    pub kind: ErrorKind,
    pub message: String,
}

impl A2AError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for A2AError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// The unit reply in the A2A protocol; exactly one per task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct A2AResponse {
    pub task_id: TaskId,
    pub status: ResponseStatus,
    #[serde(default)]
    pub payload: Value,
    /// Present iff `status` is `failed`.
    #[serde(default)]
    pub error: Option<A2AError>,
    pub created_at: DateTime<Utc>,
}

impl A2AResponse {
    /// Build a successful response from a serializable payload.
    pub fn completed(task_id: TaskId, payload: impl Serialize) -> Self {
        match serde_json::to_value(payload) {
            Ok(payload) => Self {
                task_id,
                status: ResponseStatus::Completed,
                payload,
                error: None,
                created_at: Utc::now(),
            },
            Err(err) => Self::failed(
                task_id,
                A2AError::new(
                    ErrorKind::Internal,
                    format!("failed to encode payload: {err}"),
                ),
            ),
        }
    }

    pub fn failed(task_id: TaskId, error: A2AError) -> Self {
        Self {
            task_id,
            status: ResponseStatus::Failed,
            payload: Value::Null,
            error: Some(error),
            created_at: Utc::now(),
        }
    }

    pub fn timed_out(task_id: TaskId, timeout: Duration) -> Self {
        Self::failed(
            task_id,
            A2AError::new(
                ErrorKind::TaskTimeout,
                format!("no response within {}ms", timeout.as_millis()),
            ),
        )
    }

    pub fn abandoned(task_id: TaskId) -> Self {
        Self::failed(
            task_id,
            A2AError::new(ErrorKind::Abandoned, "mission cancelled"),
        )
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Completed
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|error| error.kind)
    }

    /// Decode the payload into a typed result.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// A question as proposed by the planner (before it gets a mission id).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlannedQuestion {
    pub text: String,
    pub category: String,
    pub priority: u32,
    #[serde(default)]
    pub context: String,
}

/// Parameters of `plan_mission`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanRequest {
    pub intent: String,
    pub max_questions: usize,
    #[serde(default)]
    pub requested_formats: Vec<DeliverableFormat>,
}

/// Parameters of `refine_plan`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RefineRequest {
    pub intent: String,
    pub feedback: String,
    pub current_questions: Vec<PlannedQuestion>,
    pub max_questions: usize,
}

/// Payload of a completed `plan_mission` or `refine_plan`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanOutcome {
    pub summary: String,
    pub questions: Vec<PlannedQuestion>,
    #[serde(default)]
    pub formats: Vec<DeliverableFormat>,
}

/// Parameters of `collect_data`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollectRequest {
    pub question_id: u32,
    pub question: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub context: String,
    pub intent: String,
}

/// One question's collected data as handed to the analyst.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuestionFindings {
    pub question_id: u32,
    pub question: String,
    pub data: CollectedData,
}

/// Parameters of `analyze`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalyzeRequest {
    pub intent: String,
    pub findings: Vec<QuestionFindings>,
}

/// Parameters of `create_deliverable`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreateRequest {
    pub format: DeliverableFormat,
    pub title: String,
    pub intent: String,
    pub analysis: AnalysisReport,
    /// Stable key the creation provider may use to de-duplicate artifacts.
    pub idempotency_key: String,
}

/// Payload of a completed `create_deliverable`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeliverableDescriptor {
    pub title: String,
    pub kind: DeliverableKind,
    pub format: DeliverableFormat,
    pub external_ref: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    #[test]
    fn failed_response_carries_error() {
        let task_id = Uuid::new_v4();
        let response = A2AResponse::timed_out(task_id, Duration::from_millis(250));
        assert_eq!(response.is_success(), false);
        assert_eq!(response.error_kind(), Some(ErrorKind::TaskTimeout));
        assert_eq!(response.payload, Value::Null);
        assert_eq!(
            response.error.expect("error").message,
            "no response within 250ms".to_string()
        );
    }

    #[test]
    fn transient_kinds_are_retryable() {
        assert_eq!(ErrorKind::RateLimited.is_transient(), true);
        assert_eq!(ErrorKind::TaskTimeout.is_transient(), true);
        assert_eq!(ErrorKind::InvalidInput.is_transient(), false);
        assert_eq!(ErrorKind::Abandoned.is_transient(), false);
    }

    #[test]
    fn task_parameters_decode_into_requests() {
        let task = A2ATask {
            task_id: Uuid::new_v4(),
            mission_id: Uuid::new_v4(),
            from_role: Some(AgentRole::Consul),
            to_role: AgentRole::Centurion,
            task_type: TaskType::CollectData,
            parameters: serde_json::json!({
                "question_id": 2,
                "question": "Who leads the market?",
                "intent": "solar storage"
            }),
            created_at: Utc::now(),
        };
        let request: CollectRequest = task.parameters_as().expect("decode");
        assert_eq!(request.question_id, 2);
        assert_eq!(request.category, String::new());
    }
}
