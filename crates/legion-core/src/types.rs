//! Mission aggregate and the mutations that change it.
//!
//! Every change to a mission goes through [`Mission::apply`], both in memory
//! and when a persisted rollout is replayed, so the two views cannot drift.

use crate::error::LegionCoreError;
use chrono::{DateTime, Utc};
use legion_protocol::{
    AnalysisReport, CollectedData, Deliverable, DeliverableFormat, EventPayload, FormatFailure,
    Message, MissionId, Operation, OperationId, OperationStatus, Phase, Question, QuestionStatus,
    TaskId, TaskRecord, TaskStatus,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Caller input for a new mission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MissionSeed {
    /// Free-text research intent.
    pub intent: String,
    /// Formats the user asked for; empty lets the planner decide.
    #[serde(default)]
    pub formats: Vec<DeliverableFormat>,
}

impl MissionSeed {
    pub fn new(intent: impl Into<String>) -> Self {
        Self {
            intent: intent.into(),
            formats: Vec::new(),
        }
    }

    pub fn with_formats(mut self, formats: impl IntoIterator<Item = DeliverableFormat>) -> Self {
        self.formats = formats.into_iter().collect();
        self
    }
}

/// One research mission tracked through the phase state machine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Mission {
    pub id: MissionId,
    pub intent: String,
    pub phase: Phase,
    /// Set once the mission reaches `failed`.
    #[serde(default)]
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub plan_summary: Option<String>,
    /// Number of plans recorded so far (initial plan plus refinements).
    #[serde(default)]
    pub plan_revision: u32,
    pub questions: Vec<Question>,
    pub tasks: BTreeMap<TaskId, TaskRecord>,
    pub operations: BTreeMap<OperationId, Operation>,
    pub messages: Vec<Message>,
    pub deliverables: Vec<Deliverable>,
    #[serde(default)]
    pub failed_formats: Vec<FormatFailure>,
    pub formats: BTreeSet<DeliverableFormat>,
    #[serde(default)]
    pub analysis: Option<AnalysisReport>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Mission {
    /// Build a fresh mission in `planning`.
    pub fn new(id: MissionId, seed: &MissionSeed, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            intent: seed.intent.clone(),
            phase: Phase::Planning,
            failure_reason: None,
            plan_summary: None,
            plan_revision: 0,
            questions: Vec::new(),
            tasks: BTreeMap::new(),
            operations: BTreeMap::new(),
            messages: Vec::new(),
            deliverables: Vec::new(),
            failed_formats: Vec::new(),
            formats: seed.formats.iter().copied().collect(),
            analysis: None,
            created_at,
            updated_at: created_at,
        }
    }

    pub fn question(&self, question_id: u32) -> Option<&Question> {
        self.questions.iter().find(|question| question.id == question_id)
    }

    /// Tasks still waiting on a response.
    pub fn in_flight_tasks(&self) -> Vec<TaskId> {
        self.tasks
            .values()
            .filter(|task| task.status == TaskStatus::Dispatched)
            .map(|task| task.task_id)
            .collect()
    }

    /// Questions whose collection produced data, in plan order.
    pub fn collected(&self) -> Vec<(&Question, &CollectedData)> {
        self.questions
            .iter()
            .filter(|question| question.status == QuestionStatus::Done)
            .filter_map(|question| question.findings.as_ref().map(|data| (question, data)))
            .collect()
    }

    /// Apply a single mutation. Terminal missions reject every mutation.
    pub fn apply(
        &mut self,
        mutation: &MissionMutation,
        at: DateTime<Utc>,
    ) -> Result<(), LegionCoreError> {
        if self.phase.is_terminal() {
            return Err(LegionCoreError::invalid(
                self.id,
                format!("mission is already {}", self.phase),
            ));
        }
        match mutation {
            MissionMutation::PhaseChanged { phase } => {
                if *phase == Phase::Failed {
                    return Err(LegionCoreError::invalid(
                        self.id,
                        "failing a mission requires a reason",
                    ));
                }
                if !self.phase.can_transition_to(*phase) {
                    return Err(LegionCoreError::invalid(
                        self.id,
                        format!("cannot move from {} to {}", self.phase, phase),
                    ));
                }
                self.phase = *phase;
            }
            MissionMutation::PlanRecorded {
                summary,
                questions,
                formats,
            } => {
                self.require_phase(Phase::Planning)?;
                self.plan_summary = Some(summary.clone());
                self.questions = questions.clone();
                self.formats = formats.iter().copied().collect();
                self.plan_revision += 1;
            }
            MissionMutation::QuestionAppended { question } => {
                self.require_phase(Phase::Planning)?;
                if self.question(question.id).is_some() {
                    return Err(LegionCoreError::invalid(
                        self.id,
                        format!("question {} already exists", question.id),
                    ));
                }
                self.questions.push(question.clone());
            }
            MissionMutation::QuestionUpdated {
                question_id,
                status,
                findings,
                error,
            } => {
                let mission_id = self.id;
                let question = self
                    .questions
                    .iter_mut()
                    .find(|question| question.id == *question_id)
                    .ok_or_else(|| {
                        LegionCoreError::invalid(
                            mission_id,
                            format!("unknown question {question_id}"),
                        )
                    })?;
                if question.status.is_terminal() {
                    return Err(LegionCoreError::invalid(
                        mission_id,
                        format!("question {question_id} already concluded"),
                    ));
                }
                question.status = *status;
                if findings.is_some() {
                    question.findings = findings.clone();
                }
                if error.is_some() {
                    question.error = error.clone();
                }
            }
            MissionMutation::TaskUpserted { task } => {
                if let Some(existing) = self.tasks.get(&task.task_id)
                    && existing.status.is_terminal()
                {
                    return Err(LegionCoreError::invalid(
                        self.id,
                        format!("task {} already resolved", task.task_id),
                    ));
                }
                self.tasks.insert(task.task_id, task.clone());
            }
            MissionMutation::OperationUpserted { operation } => {
                self.operations.insert(operation.id, operation.clone());
            }
            MissionMutation::MessageAppended { message } => {
                let mut message = message.clone();
                message.seq = self.messages.len() as u64 + 1;
                self.messages.push(message);
            }
            MissionMutation::AnalysisRecorded { report } => {
                self.require_phase(Phase::Analyzing)?;
                self.analysis = Some(report.clone());
            }
            MissionMutation::DeliverableAppended { deliverable } => {
                self.require_phase(Phase::Creating)?;
                self.deliverables.push(deliverable.clone());
            }
            MissionMutation::FormatFailed { failure } => {
                self.require_phase(Phase::Creating)?;
                self.failed_formats.push(failure.clone());
            }
            MissionMutation::Terminated { reason } => {
                self.phase = Phase::Failed;
                self.failure_reason = Some(reason.clone());
                for task in self.tasks.values_mut() {
                    if task.status == TaskStatus::Dispatched {
                        task.status = TaskStatus::Abandoned;
                        task.finished_at = Some(at);
                    }
                }
                for operation in self.operations.values_mut() {
                    if operation.status != OperationStatus::Completed {
                        operation.status = OperationStatus::Completed;
                        operation.updated_at = at;
                    }
                }
                for question in &mut self.questions {
                    if !question.status.is_terminal() {
                        question.status = QuestionStatus::Failed;
                        question.error = Some(reason.clone());
                    }
                }
            }
        }
        self.updated_at = at;
        Ok(())
    }

    fn require_phase(&self, phase: Phase) -> Result<(), LegionCoreError> {
        if self.phase == phase {
            Ok(())
        } else {
            Err(LegionCoreError::invalid(
                self.id,
                format!("expected phase {phase}, mission is {}", self.phase),
            ))
        }
    }
}

/// A single recorded change to a mission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MissionMutation {
    /// Forward move on the success path; failure goes through `Terminated`.
    PhaseChanged { phase: Phase },
    /// Replace the plan; bumps the plan revision.
    PlanRecorded {
        summary: String,
        questions: Vec<Question>,
        formats: Vec<DeliverableFormat>,
    },
    QuestionAppended { question: Question },
    QuestionUpdated {
        question_id: u32,
        status: QuestionStatus,
        #[serde(default)]
        findings: Option<CollectedData>,
        #[serde(default)]
        error: Option<String>,
    },
    TaskUpserted { task: TaskRecord },
    OperationUpserted { operation: Operation },
    /// Append to the log; the store assigns the message `seq`.
    MessageAppended { message: Message },
    AnalysisRecorded { report: AnalysisReport },
    DeliverableAppended { deliverable: Deliverable },
    FormatFailed { failure: FormatFailure },
    /// Fail the mission; in-flight tasks become `abandoned`.
    Terminated { reason: String },
}

impl MissionMutation {
    /// Events describing this mutation, given the phase before it and the state after it.
    pub fn events(&self, before: Phase, after: &Mission) -> Vec<EventPayload> {
        match self {
            MissionMutation::PhaseChanged { phase } => {
                let mut events = vec![EventPayload::PhaseChanged {
                    from: before,
                    to: *phase,
                }];
                if *phase == Phase::Completed {
                    events.push(EventPayload::MissionCompleted {
                        deliverable_count: after.deliverables.len(),
                    });
                }
                events
            }
            MissionMutation::PlanRecorded { .. } => vec![EventPayload::PlanReady {
                questions: after.questions.clone(),
                formats: after.formats.iter().copied().collect(),
                revision: after.plan_revision,
            }],
            MissionMutation::QuestionAppended { .. } => Vec::new(),
            MissionMutation::QuestionUpdated {
                question_id,
                status,
                findings,
                error,
            } => match status {
                QuestionStatus::Pending => Vec::new(),
                QuestionStatus::Collecting => vec![EventPayload::QuestionStarted {
                    question_id: *question_id,
                }],
                QuestionStatus::Done => vec![EventPayload::QuestionCompleted {
                    question_id: *question_id,
                    snippet_count: findings.as_ref().map_or(0, |data| data.snippets.len()),
                }],
                QuestionStatus::Failed => vec![EventPayload::QuestionFailed {
                    question_id: *question_id,
                    error: error.clone().unwrap_or_else(|| "unknown error".to_string()),
                }],
            },
            MissionMutation::TaskUpserted { task } => {
                if task.status == TaskStatus::Dispatched {
                    vec![EventPayload::TaskDispatched {
                        task_id: task.task_id,
                        to_role: task.to_role,
                        task_type: task.task_type,
                    }]
                } else {
                    vec![EventPayload::TaskFinished {
                        task_id: task.task_id,
                        status: task.status,
                    }]
                }
            }
            MissionMutation::OperationUpserted { operation } => {
                vec![EventPayload::OperationUpdated {
                    operation: operation.clone(),
                }]
            }
            MissionMutation::MessageAppended { .. } => after
                .messages
                .last()
                .map(|message| EventPayload::MessagePosted {
                    message: message.clone(),
                })
                .into_iter()
                .collect(),
            MissionMutation::AnalysisRecorded { report } => vec![EventPayload::AnalysisReady {
                insight_count: report.insights.len(),
            }],
            MissionMutation::DeliverableAppended { deliverable } => {
                vec![EventPayload::DeliverableReady {
                    deliverable: deliverable.clone(),
                }]
            }
            MissionMutation::FormatFailed { failure } => vec![EventPayload::DeliverableFailed {
                format: failure.format,
                error: failure.error.clone(),
            }],
            MissionMutation::Terminated { reason } => vec![
                EventPayload::PhaseChanged {
                    from: before,
                    to: Phase::Failed,
                },
                EventPayload::MissionFailed {
                    reason: reason.clone(),
                },
            ],
        }
    }
}

/// Compact listing view of a mission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MissionSummary {
    pub id: MissionId,
    pub intent: String,
    pub phase: Phase,
    #[serde(default)]
    pub failure_reason: Option<String>,
    pub question_count: usize,
    pub questions_done: usize,
    pub questions_failed: usize,
    pub deliverable_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Mission> for MissionSummary {
    fn from(mission: &Mission) -> Self {
        let count = |status: QuestionStatus| {
            mission
                .questions
                .iter()
                .filter(|question| question.status == status)
                .count()
        };
        Self {
            id: mission.id,
            intent: mission.intent.clone(),
            phase: mission.phase,
            failure_reason: mission.failure_reason.clone(),
            question_count: mission.questions.len(),
            questions_done: count(QuestionStatus::Done),
            questions_failed: count(QuestionStatus::Failed),
            deliverable_count: mission.deliverables.len(),
            created_at: mission.created_at,
            updated_at: mission.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use legion_protocol::{MessageKind, Progress};
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    fn question(id: u32) -> Question {
        Question {
            id,
            text: format!("Question {id}?"),
            category: "general".to_string(),
            priority: id,
            context: String::new(),
            status: QuestionStatus::Pending,
            findings: None,
            error: None,
        }
    }

    fn mission() -> Mission {
        Mission::new(Uuid::new_v4(), &MissionSeed::new("solar storage"), Utc::now())
    }

    #[test]
    fn phase_changes_are_forward_only() {
        let mut mission = mission();
        let now = Utc::now();
        let err = mission
            .apply(
                &MissionMutation::PhaseChanged {
                    phase: Phase::Analyzing,
                },
                now,
            )
            .expect_err("skip");
        assert!(matches!(err, LegionCoreError::InvalidTransition { .. }));

        mission
            .apply(
                &MissionMutation::PhaseChanged {
                    phase: Phase::Collecting,
                },
                now,
            )
            .expect("advance");
        let err = mission
            .apply(
                &MissionMutation::PhaseChanged {
                    phase: Phase::Planning,
                },
                now,
            )
            .expect_err("regress");
        assert!(matches!(err, LegionCoreError::InvalidTransition { .. }));
        assert_eq!(mission.phase, Phase::Collecting);
    }

    #[test]
    fn terminated_mission_rejects_further_mutations() {
        let mut mission = mission();
        let now = Utc::now();
        mission
            .apply(
                &MissionMutation::PlanRecorded {
                    summary: "plan".to_string(),
                    questions: vec![question(1), question(2)],
                    formats: vec![DeliverableFormat::Doc],
                },
                now,
            )
            .expect("plan");
        mission
            .apply(
                &MissionMutation::Terminated {
                    reason: "cancelled".to_string(),
                },
                now,
            )
            .expect("terminate");
        assert_eq!(mission.phase, Phase::Failed);
        assert_eq!(mission.failure_reason, Some("cancelled".to_string()));
        assert!(
            mission
                .questions
                .iter()
                .all(|question| question.status == QuestionStatus::Failed)
        );

        let err = mission
            .apply(
                &MissionMutation::QuestionUpdated {
                    question_id: 1,
                    status: QuestionStatus::Done,
                    findings: None,
                    error: None,
                },
                now,
            )
            .expect_err("terminal");
        assert!(matches!(err, LegionCoreError::InvalidTransition { .. }));
    }

    #[test]
    fn message_seq_follows_insertion_order() {
        let mut mission = mission();
        let now = Utc::now();
        for text in ["first", "second"] {
            let mutation = MissionMutation::MessageAppended {
                message: Message {
                    seq: 0,
                    from: "CONSUL".to_string(),
                    to: None,
                    text: text.to_string(),
                    kind: MessageKind::Thinking,
                    question_id: None,
                    timestamp: now,
                },
            };
            mission.apply(&mutation, now).expect("append");
            let events = mutation.events(Phase::Planning, &mission);
            let EventPayload::MessagePosted { message } = &events[0] else {
                panic!("unexpected event: {events:?}");
            };
            assert_eq!(message.text, text.to_string());
        }
        let seqs: Vec<u64> = mission.messages.iter().map(|message| message.seq).collect();
        assert_eq!(seqs, vec![1, 2]);
    }

    #[test]
    fn terminated_abandons_dispatched_tasks() {
        let mut mission = mission();
        let now = Utc::now();
        let task_id = Uuid::new_v4();
        let operation_id = Uuid::new_v4();
        mission
            .apply(
                &MissionMutation::TaskUpserted {
                    task: TaskRecord {
                        task_id,
                        mission_id: mission.id,
                        from_role: None,
                        to_role: legion_protocol::AgentRole::Consul,
                        task_type: legion_protocol::TaskType::PlanMission,
                        parameters: serde_json::Value::Null,
                        question_id: None,
                        format: None,
                        status: TaskStatus::Dispatched,
                        error: None,
                        created_at: now,
                        finished_at: None,
                    },
                },
                now,
            )
            .expect("task");
        mission
            .apply(
                &MissionMutation::OperationUpserted {
                    operation: Operation {
                        id: operation_id,
                        agent: legion_protocol::AgentRole::Consul,
                        kind: legion_protocol::OperationKind::Planning,
                        title: "Mission planning".to_string(),
                        status: OperationStatus::Active,
                        progress: Progress::percent(10),
                        question_id: None,
                        task_id: Some(task_id),
                        started_at: now,
                        updated_at: now,
                    },
                },
                now,
            )
            .expect("operation");
        let terminate = MissionMutation::Terminated {
            reason: "cancelled".to_string(),
        };
        mission.apply(&terminate, now).expect("terminate");
        assert_eq!(mission.in_flight_tasks(), Vec::<TaskId>::new());
        assert_eq!(mission.tasks[&task_id].status, TaskStatus::Abandoned);
        assert_eq!(
            mission.operations[&operation_id].status,
            OperationStatus::Completed
        );
        let kinds: Vec<&str> = terminate
            .events(Phase::Planning, &mission)
            .iter()
            .map(|event| event.kind())
            .collect();
        assert_eq!(kinds, vec!["phase_changed", "mission_failed"]);
    }
}
