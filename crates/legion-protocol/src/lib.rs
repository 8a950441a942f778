//! Wire protocol types for Legion missions, A2A tasks, and events.

mod a2a;
mod mission;

pub use a2a::{
    A2AError, A2AResponse, A2ATask, AgentRole, AnalyzeRequest, CollectRequest,
    CreateRequest, DeliverableDescriptor, ErrorKind, PlanOutcome, PlanRequest, PlannedQuestion,
    QuestionFindings, RefineRequest, ResponseStatus, TaskType,
};
pub use mission::{
    AnalysisReport, CollectedData, Deliverable, DeliverableFormat, DeliverableKind,
    FormatFailure, Insight, Message, MessageKind, Operation, OperationKind, OperationStatus,
    Phase, Progress, Question, QuestionStatus, Snippet, TaskRecord, TaskStatus,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a mission.
pub type MissionId = Uuid;
/// Unique identifier for an A2A task.
pub type TaskId = Uuid;
/// Unique identifier for an operation.
pub type OperationId = Uuid;
/// Unique identifier for a deliverable.
pub type DeliverableId = Uuid;

/// Wrapper for events published on a mission stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventMsg {
    /// Unique id for the event.
    pub id: Uuid,
    /// Mission the event belongs to.
    pub mission_id: MissionId,
    /// Per-mission publish sequence, starting at 1.
    pub seq: u64,
    /// Timestamp when the event was created.
    pub created_at: DateTime<Utc>,
    /// Event payload content.
    pub payload: EventPayload,
}

/// All events emitted while a mission runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "type", content = "payload")]
pub enum EventPayload {
    /// Mission record created in `planning`.
    MissionCreated { intent: String },
    /// Phase moved forward or to `failed`.
    PhaseChanged { from: Phase, to: Phase },
    /// CONSUL produced (or revised) the plan; awaiting approval.
    PlanReady {
        questions: Vec<Question>,
        formats: Vec<DeliverableFormat>,
        revision: u32,
    },
    /// Collection for a question was dispatched.
    QuestionStarted { question_id: u32 },
    QuestionCompleted { question_id: u32, snippet_count: usize },
    QuestionFailed { question_id: u32, error: String },
    /// An A2A task left the orchestrator.
    TaskDispatched {
        task_id: TaskId,
        to_role: AgentRole,
        task_type: TaskType,
    },
    /// An A2A task reached a terminal status.
    TaskFinished { task_id: TaskId, status: TaskStatus },
    /// An operation was created or changed.
    OperationUpdated { operation: Operation },
    /// A message was appended to the mission log.
    MessagePosted { message: Message },
    /// AUGUR's report was stored.
    AnalysisReady { insight_count: usize },
    DeliverableReady { deliverable: Deliverable },
    DeliverableFailed {
        format: DeliverableFormat,
        error: String,
    },
    /// Terminal success.
    MissionCompleted { deliverable_count: usize },
    /// Terminal failure; `reason` is `cancelled` for user cancellation.
    MissionFailed { reason: String },
}

impl EventPayload {
    /// Snake-case event name, matching the serialized `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            EventPayload::MissionCreated { .. } => "mission_created",
            EventPayload::PhaseChanged { .. } => "phase_changed",
            EventPayload::PlanReady { .. } => "plan_ready",
            EventPayload::QuestionStarted { .. } => "question_started",
            EventPayload::QuestionCompleted { .. } => "question_completed",
            EventPayload::QuestionFailed { .. } => "question_failed",
            EventPayload::TaskDispatched { .. } => "task_dispatched",
            EventPayload::TaskFinished { .. } => "task_finished",
            EventPayload::OperationUpdated { .. } => "operation_updated",
            EventPayload::MessagePosted { .. } => "message_posted",
            EventPayload::AnalysisReady { .. } => "analysis_ready",
            EventPayload::DeliverableReady { .. } => "deliverable_ready",
            EventPayload::DeliverableFailed { .. } => "deliverable_failed",
            EventPayload::MissionCompleted { .. } => "mission_completed",
            EventPayload::MissionFailed { .. } => "mission_failed",
        }
    }

    /// Whether this event ends the mission stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventPayload::MissionCompleted { .. } | EventPayload::MissionFailed { .. }
        )
    }
}

/// Sink interface for mission events.
pub trait EventSink: Send + Sync {
    /// Emit an event to downstream listeners.
    fn emit(&self, event: EventMsg);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn event_payload_uses_type_tag() {
        let event = EventMsg {
            id: Uuid::nil(),
            mission_id: Uuid::nil(),
            seq: 3,
            created_at: Utc::now(),
            payload: EventPayload::PhaseChanged {
                from: Phase::Planning,
                to: Phase::Collecting,
            },
        };
        let encoded = serde_json::to_value(&event).expect("serialize");
        assert_eq!(
            encoded["payload"],
            json!({
                "type": "phase_changed",
                "payload": { "from": "planning", "to": "collecting" }
            })
        );
        assert_eq!(event.payload.kind(), "phase_changed");
    }

    #[test]
    fn event_round_trips_through_json() {
        let event = EventMsg {
            id: Uuid::new_v4(),
            mission_id: Uuid::new_v4(),
            seq: 1,
            created_at: Utc::now(),
            payload: EventPayload::DeliverableFailed {
                format: DeliverableFormat::Sheet,
                error: "timed out".to_string(),
            },
        };
        let encoded = serde_json::to_value(&event).expect("serialize");
        let decoded: EventMsg = serde_json::from_value(encoded).expect("deserialize");
        assert_eq!(decoded, event);
        assert_eq!(decoded.payload.is_terminal(), false);
    }
}
