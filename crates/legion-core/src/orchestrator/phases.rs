//! Phase drivers: planning rounds and the approved pipeline.

use super::dispatch::{TaskSpec, execute_task, halted};
use super::lifecycle::{self, MissionRuntime};
use super::{SYSTEM_SENDER, Shared, message};
use crate::error::LegionCoreError;
use crate::types::MissionMutation;
use chrono::Utc;
use legion_protocol::{
    A2AResponse, AgentRole, AnalysisReport, AnalyzeRequest, CollectRequest, CollectedData,
    CreateRequest, Deliverable, DeliverableDescriptor, DeliverableFormat, FormatFailure,
    MessageKind, MissionId, OperationKind, Phase, PlanOutcome, PlanRequest, PlannedQuestion,
    Question, QuestionFindings, QuestionStatus, RefineRequest, TaskType,
};
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::sync::OwnedSemaphorePermit;
use tokio::task::JoinSet;
use uuid::Uuid;

/// Which planner call a planning round makes.
pub(crate) enum PlanRound {
    Initial { requested: Vec<DeliverableFormat> },
    Refine { feedback: String },
}

/// Run one planning round and hold the mission for approval.
pub(crate) async fn run_planning(
    shared: Arc<Shared>,
    runtime: Arc<MissionRuntime>,
    mission_id: MissionId,
    round: PlanRound,
) {
    let initial = matches!(round, PlanRound::Initial { .. });
    let result = plan(&shared, &runtime, mission_id, round).await;
    if result.is_err() {
        runtime.end_planning();
    }
    match result {
        Ok(()) => {}
        Err(LegionCoreError::Cancelled(_)) => {
            debug!("planning stopped (mission_id={})", mission_id);
        }
        Err(err) if initial => {
            warn!("planning failed (mission_id={}, error={})", mission_id, err);
            stop(&shared, mission_id, lifecycle::REASON_PLANNING_FAILED);
        }
        Err(err) => {
            // A failed refinement keeps the previous plan open for approval.
            warn!("plan refinement failed (mission_id={}, error={})", mission_id, err);
            let note = message(
                AgentRole::Consul.display_name(),
                Some(super::USER_SENDER),
                format!("I could not revise the plan ({err}); the previous plan still stands."),
                MessageKind::Status,
                None,
            );
            if let Err(err) = shared
                .store
                .commit(mission_id, vec![MissionMutation::MessageAppended { message: note }])
            {
                debug!("refine note dropped (mission_id={}, error={})", mission_id, err);
            }
        }
    }
}

async fn plan(
    shared: &Shared,
    runtime: &MissionRuntime,
    mission_id: MissionId,
    round: PlanRound,
) -> Result<(), LegionCoreError> {
    let (intent, current) = shared.store.read(mission_id, |mission| {
        let current: Vec<PlannedQuestion> = mission
            .questions
            .iter()
            .map(|question| PlannedQuestion {
                text: question.text.clone(),
                category: question.category.clone(),
                priority: question.priority,
                context: question.context.clone(),
            })
            .collect();
        (mission.intent.clone(), current)
    })?;
    let max_questions = shared.config.orchestrator.max_questions;
    let (task_type, parameters, title, request) = match round {
        PlanRound::Initial { requested } => (
            TaskType::PlanMission,
            serde_json::to_value(PlanRequest {
                intent: intent.clone(),
                max_questions,
                requested_formats: requested,
            }),
            "Mission planning".to_string(),
            format!("Please plan a research mission: {intent}"),
        ),
        PlanRound::Refine { feedback } => (
            TaskType::RefinePlan,
            serde_json::to_value(RefineRequest {
                intent: intent.clone(),
                feedback: feedback.clone(),
                current_questions: current,
                max_questions,
            }),
            "Plan refinement".to_string(),
            format!("Please revise the plan: {feedback}"),
        ),
    };
    let parameters = parameters.map_err(|err| LegionCoreError::Executor(err.to_string()))?;
    let response = execute_task(
        shared,
        runtime,
        mission_id,
        TaskSpec {
            from_role: None,
            to_role: AgentRole::Consul,
            task_type,
            parameters,
            operation_kind: OperationKind::Planning,
            title,
            request,
            question_id: None,
            format: None,
            timeout: shared.config.timeouts.plan(),
            with_dispatch: Vec::new(),
        },
    )
    .await?;
    let outcome: PlanOutcome = decode(&response)?;
    if outcome.questions.is_empty() {
        return Err(LegionCoreError::Executor("plan has no questions".to_string()));
    }

    let questions: Vec<Question> = outcome
        .questions
        .into_iter()
        .take(max_questions)
        .enumerate()
        .map(|(idx, planned)| Question {
            id: idx as u32 + 1,
            text: planned.text,
            category: planned.category,
            priority: planned.priority,
            context: planned.context,
            status: QuestionStatus::Pending,
            findings: None,
            error: None,
        })
        .collect();
    let question_count = questions.len();
    let defaults = shared.config.deliverables.default_formats.clone();
    shared
        .store
        .commit_with(mission_id, |mission| {
            let mut formats = outcome.formats;
            if formats.is_empty() {
                formats = mission.formats.iter().copied().collect();
            }
            if formats.is_empty() {
                formats = defaults;
            }
            let listing: Vec<String> = formats.iter().map(ToString::to_string).collect();
            let announcement = message(
                AgentRole::Consul.display_name(),
                Some(super::USER_SENDER),
                format!(
                    "Plan ready: {} research questions, deliverables: {}. Approve to begin.",
                    question_count,
                    listing.join(", ")
                ),
                MessageKind::Announcement,
                None,
            );
            // Open for approval before plan_ready is published.
            runtime.end_planning();
            Ok(vec![
                MissionMutation::PlanRecorded {
                    summary: outcome.summary,
                    questions,
                    formats,
                },
                MissionMutation::MessageAppended {
                    message: announcement,
                },
            ])
        })
        .map_err(|err| halted(&shared.store, mission_id, err))?;
    info!(
        "plan ready (mission_id={}, questions={})",
        mission_id, question_count
    );
    Ok(())
}

/// Drive an approved mission from `collecting` to a terminal phase.
pub(crate) async fn run_pipeline(
    shared: Arc<Shared>,
    runtime: Arc<MissionRuntime>,
    mission_id: MissionId,
) {
    match pipeline(&shared, &runtime, mission_id).await {
        Ok(()) => {}
        Err(LegionCoreError::Cancelled(_)) => {
            debug!("pipeline stopped (mission_id={})", mission_id);
        }
        Err(err) => {
            error!("pipeline error (mission_id={}, error={})", mission_id, err);
            stop(&shared, mission_id, lifecycle::REASON_INTERNAL);
        }
    }
}

async fn pipeline(
    shared: &Arc<Shared>,
    runtime: &Arc<MissionRuntime>,
    mission_id: MissionId,
) -> Result<(), LegionCoreError> {
    let collected = collect(shared, runtime, mission_id).await?;
    if collected == 0 {
        stop(shared, mission_id, lifecycle::REASON_NO_DATA);
        return Ok(());
    }

    let Some(report) = analyze(shared, runtime, mission_id).await? else {
        stop(shared, mission_id, lifecycle::REASON_ANALYSIS_FAILED);
        return Ok(());
    };

    let created = create(shared, runtime, mission_id, report).await?;
    if created == 0 {
        stop(shared, mission_id, lifecycle::REASON_NO_DELIVERABLES);
        return Ok(());
    }

    let announcement = message(
        SYSTEM_SENDER,
        None,
        format!("Mission complete: {created} deliverables ready"),
        MessageKind::Announcement,
        None,
    );
    shared
        .store
        .commit(
            mission_id,
            vec![
                MissionMutation::MessageAppended {
                    message: announcement,
                },
                MissionMutation::PhaseChanged {
                    phase: Phase::Completed,
                },
            ],
        )
        .map_err(|err| halted(&shared.store, mission_id, err))?;
    lifecycle::finish(shared, mission_id);
    info!(
        "mission completed (mission_id={}, deliverables={})",
        mission_id, created
    );
    Ok(())
}

/// Collect every question concurrently; returns how many reached `done`.
async fn collect(
    shared: &Arc<Shared>,
    runtime: &Arc<MissionRuntime>,
    mission_id: MissionId,
) -> Result<usize, LegionCoreError> {
    let (intent, questions) = shared
        .store
        .read(mission_id, |mission| (mission.intent.clone(), mission.questions.clone()))?;
    let mut workers = JoinSet::new();
    for question in questions {
        let shared = shared.clone();
        let runtime = runtime.clone();
        let intent = intent.clone();
        workers.spawn(async move {
            collect_question(&shared, &runtime, mission_id, &intent, question).await
        });
    }

    let mut outcome = Ok(());
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                if matches!(err, LegionCoreError::Cancelled(_)) {
                    workers.abort_all();
                }
                if outcome.is_ok() {
                    outcome = Err(err);
                }
            }
            Err(err) if err.is_cancelled() => {}
            Err(err) => error!("collect worker crashed (mission_id={}, error={})", mission_id, err),
        }
    }
    outcome?;

    // Questions whose worker crashed still need a terminal status.
    shared
        .store
        .commit_with(mission_id, |mission| {
            Ok(mission
                .questions
                .iter()
                .filter(|question| !question.status.is_terminal())
                .map(|question| MissionMutation::QuestionUpdated {
                    question_id: question.id,
                    status: QuestionStatus::Failed,
                    findings: None,
                    error: Some("collection did not finish".to_string()),
                })
                .collect())
        })
        .map_err(|err| halted(&shared.store, mission_id, err))?;
    let done = shared
        .store
        .read(mission_id, |mission| mission.collected().len())?;
    info!(
        "collection finished (mission_id={}, done={})",
        mission_id, done
    );
    Ok(done)
}

async fn collect_question(
    shared: &Shared,
    runtime: &MissionRuntime,
    mission_id: MissionId,
    intent: &str,
    question: Question,
) -> Result<(), LegionCoreError> {
    let attempts = shared.config.orchestrator.collect_attempts.max(1);
    let parameters = serde_json::to_value(CollectRequest {
        question_id: question.id,
        question: question.text.clone(),
        category: question.category.clone(),
        context: question.context.clone(),
        intent: intent.to_string(),
    })
    .map_err(|err| LegionCoreError::Executor(err.to_string()))?;

    let mut last_error = String::new();
    for attempt in 1..=attempts {
        let with_dispatch = if attempt == 1 {
            vec![MissionMutation::QuestionUpdated {
                question_id: question.id,
                status: QuestionStatus::Collecting,
                findings: None,
                error: None,
            }]
        } else {
            Vec::new()
        };
        let permit = provider_slot(shared, runtime, mission_id).await?;
        let result = execute_task(
            shared,
            runtime,
            mission_id,
            TaskSpec {
                from_role: Some(AgentRole::Consul),
                to_role: AgentRole::Centurion,
                task_type: TaskType::CollectData,
                parameters: parameters.clone(),
                operation_kind: OperationKind::QuestionResearch,
                title: format!("Researching Question #{}", question.id),
                request: format!(
                    "Please research Question #{} ({}): {}",
                    question.id, question.category, question.text
                ),
                question_id: Some(question.id),
                format: None,
                timeout: shared.config.timeouts.collect(),
                with_dispatch,
            },
        )
        .await;
        drop(permit);

        let response = match result {
            Ok(response) => response,
            Err(LegionCoreError::Cancelled(id)) => return Err(LegionCoreError::Cancelled(id)),
            Err(err) => {
                last_error = err.to_string();
                break;
            }
        };
        if response.is_success() {
            match response.payload_as::<CollectedData>() {
                Ok(data) => {
                    let snippets = data.snippets.len();
                    shared
                        .store
                        .commit(
                            mission_id,
                            vec![MissionMutation::QuestionUpdated {
                                question_id: question.id,
                                status: QuestionStatus::Done,
                                findings: Some(data),
                                error: None,
                            }],
                        )
                        .map_err(|err| halted(&shared.store, mission_id, err))?;
                    debug!(
                        "question collected (mission_id={}, question_id={}, snippets={})",
                        mission_id, question.id, snippets
                    );
                    return Ok(());
                }
                Err(err) => {
                    last_error = format!("invalid collection payload: {err}");
                    break;
                }
            }
        }
        let retryable = response.error_kind().is_some_and(|kind| kind.is_transient());
        last_error = response
            .error
            .map(|error| error.message)
            .unwrap_or_else(|| "collection failed".to_string());
        if !retryable || attempt == attempts {
            break;
        }
        warn!(
            "retrying collection (mission_id={}, question_id={}, attempt={}, error={})",
            mission_id, question.id, attempt, last_error
        );
    }

    warn!(
        "question failed (mission_id={}, question_id={}, error={})",
        mission_id, question.id, last_error
    );
    shared
        .store
        .commit(
            mission_id,
            vec![MissionMutation::QuestionUpdated {
                question_id: question.id,
                status: QuestionStatus::Failed,
                findings: None,
                error: Some(last_error),
            }],
        )
        .map_err(|err| halted(&shared.store, mission_id, err))
}

/// Wait for a process-wide provider permit, giving up once the mission closes.
async fn provider_slot(
    shared: &Shared,
    runtime: &MissionRuntime,
    mission_id: MissionId,
) -> Result<OwnedSemaphorePermit, LegionCoreError> {
    tokio::select! {
        permit = shared.limiter.clone().acquire_owned() => {
            permit.map_err(|err| LegionCoreError::Executor(err.to_string()))
        }
        () = runtime.closed() => {
            debug!("provider wait cancelled (mission_id={})", mission_id);
            Err(LegionCoreError::Cancelled(mission_id))
        }
    }
}

/// Returns `None` when analysis failed.
async fn analyze(
    shared: &Shared,
    runtime: &MissionRuntime,
    mission_id: MissionId,
) -> Result<Option<AnalysisReport>, LegionCoreError> {
    let (intent, findings) = shared.store.read(mission_id, |mission| {
        let findings: Vec<QuestionFindings> = mission
            .collected()
            .into_iter()
            .map(|(question, data)| QuestionFindings {
                question_id: question.id,
                question: question.text.clone(),
                data: data.clone(),
            })
            .collect();
        (mission.intent.clone(), findings)
    })?;
    let failed = shared.store.read(mission_id, |mission| {
        mission.questions.len() - mission.collected().len()
    })?;
    let announcement = message(
        SYSTEM_SENDER,
        None,
        if failed == 0 {
            format!("Collection complete for all {} questions", findings.len())
        } else {
            format!(
                "Collection complete: {} questions answered, {} failed",
                findings.len(),
                failed
            )
        },
        MessageKind::Announcement,
        None,
    );
    shared
        .store
        .commit(
            mission_id,
            vec![
                MissionMutation::PhaseChanged {
                    phase: Phase::Analyzing,
                },
                MissionMutation::MessageAppended {
                    message: announcement,
                },
            ],
        )
        .map_err(|err| halted(&shared.store, mission_id, err))?;

    let question_count = findings.len();
    let parameters = serde_json::to_value(AnalyzeRequest { intent, findings })
        .map_err(|err| LegionCoreError::Executor(err.to_string()))?;
    let response = execute_task(
        shared,
        runtime,
        mission_id,
        TaskSpec {
            from_role: Some(AgentRole::Centurion),
            to_role: AgentRole::Augur,
            task_type: TaskType::Analyze,
            parameters,
            operation_kind: OperationKind::Analyzing,
            title: "Synthesizing findings".to_string(),
            request: format!("Please analyze the findings from {question_count} questions"),
            question_id: None,
            format: None,
            timeout: shared.config.timeouts.analyze(),
            with_dispatch: Vec::new(),
        },
    )
    .await?;
    if !response.is_success() {
        return Ok(None);
    }
    let report: AnalysisReport = match decode(&response) {
        Ok(report) => report,
        Err(err) => {
            warn!("analysis payload rejected (mission_id={}, error={})", mission_id, err);
            return Ok(None);
        }
    };
    shared
        .store
        .commit(
            mission_id,
            vec![MissionMutation::AnalysisRecorded {
                report: report.clone(),
            }],
        )
        .map_err(|err| halted(&shared.store, mission_id, err))?;
    Ok(Some(report))
}

/// Create every requested format concurrently; returns how many succeeded.
async fn create(
    shared: &Arc<Shared>,
    runtime: &Arc<MissionRuntime>,
    mission_id: MissionId,
    report: AnalysisReport,
) -> Result<usize, LegionCoreError> {
    let (intent, formats) = shared.store.read(mission_id, |mission| {
        (
            mission.intent.clone(),
            mission.formats.iter().copied().collect::<Vec<_>>(),
        )
    })?;
    shared
        .store
        .commit(
            mission_id,
            vec![MissionMutation::PhaseChanged {
                phase: Phase::Creating,
            }],
        )
        .map_err(|err| halted(&shared.store, mission_id, err))?;

    let title = deliverable_title(&intent);
    let mut workers = JoinSet::new();
    for format in formats {
        let shared = shared.clone();
        let runtime = runtime.clone();
        let request = CreateRequest {
            format,
            title: title.clone(),
            intent: intent.clone(),
            analysis: report.clone(),
            idempotency_key: format!("{mission_id}:{format}"),
        };
        workers.spawn(async move { create_format(&shared, &runtime, mission_id, request).await });
    }

    let mut outcome = Ok(());
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                if matches!(err, LegionCoreError::Cancelled(_)) {
                    workers.abort_all();
                }
                if outcome.is_ok() {
                    outcome = Err(err);
                }
            }
            Err(err) if err.is_cancelled() => {}
            Err(err) => error!("create worker crashed (mission_id={}, error={})", mission_id, err),
        }
    }
    outcome?;
    shared
        .store
        .read(mission_id, |mission| mission.deliverables.len())
}

async fn create_format(
    shared: &Shared,
    runtime: &MissionRuntime,
    mission_id: MissionId,
    request: CreateRequest,
) -> Result<(), LegionCoreError> {
    let format = request.format;
    let parameters = serde_json::to_value(&request)
        .map_err(|err| LegionCoreError::Executor(err.to_string()))?;
    let permit = provider_slot(shared, runtime, mission_id).await?;
    let result = execute_task(
        shared,
        runtime,
        mission_id,
        TaskSpec {
            from_role: Some(AgentRole::Augur),
            to_role: AgentRole::Scribe,
            task_type: TaskType::CreateDeliverable,
            parameters,
            operation_kind: OperationKind::Composing,
            title: format!("Composing {format}"),
            request: format!("Please create the {format} deliverable: {}", request.title),
            question_id: None,
            format: Some(format),
            timeout: shared.config.timeouts.create(),
            with_dispatch: Vec::new(),
        },
    )
    .await;
    drop(permit);

    let mutation = match result {
        Err(LegionCoreError::Cancelled(id)) => return Err(LegionCoreError::Cancelled(id)),
        Err(err) => failed_format(format, err.to_string()),
        Ok(response) if response.is_success() => {
            match response.payload_as::<DeliverableDescriptor>() {
                Ok(descriptor) => MissionMutation::DeliverableAppended {
                    deliverable: Deliverable {
                        id: Uuid::new_v4(),
                        title: descriptor.title,
                        kind: descriptor.kind,
                        format,
                        external_ref: descriptor.external_ref,
                        created_at: Utc::now(),
                    },
                },
                Err(err) => failed_format(format, format!("invalid deliverable payload: {err}")),
            }
        }
        Ok(response) => failed_format(
            format,
            response
                .error
                .map(|error| error.message)
                .unwrap_or_else(|| "creation failed".to_string()),
        ),
    };
    if let MissionMutation::FormatFailed { failure } = &mutation {
        warn!(
            "format failed (mission_id={}, format={}, error={})",
            mission_id, format, failure.error
        );
    }
    shared
        .store
        .commit(mission_id, vec![mutation])
        .map_err(|err| halted(&shared.store, mission_id, err))
}

fn failed_format(format: DeliverableFormat, error: String) -> MissionMutation {
    MissionMutation::FormatFailed {
        failure: FormatFailure { format, error },
    }
}

fn deliverable_title(intent: &str) -> String {
    let trimmed = intent.trim();
    let mut title: String = trimmed.chars().take(80).collect();
    if title.len() < trimmed.len() {
        title.push_str("...");
    }
    format!("Research Report: {title}")
}

fn decode<T: serde::de::DeserializeOwned>(response: &A2AResponse) -> Result<T, LegionCoreError> {
    if let Some(error) = &response.error {
        return Err(LegionCoreError::Executor(error.to_string()));
    }
    response
        .payload_as::<T>()
        .map_err(|err| LegionCoreError::Executor(format!("invalid payload: {err}")))
}

fn stop(shared: &Shared, mission_id: MissionId, reason: &str) {
    if let Err(err) = lifecycle::terminate(shared, mission_id, reason) {
        debug!("mission already stopped (mission_id={}, error={})", mission_id, err);
    }
}

#[cfg(test)]
mod tests {
    use super::{MissionRuntime, deliverable_title, provider_slot};
    use crate::error::LegionCoreError;
    use crate::orchestrator::Orchestrator;
    use legion_config::LegionConfig;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::time::Duration;
    use uuid::Uuid;

    #[test]
    fn deliverable_title_truncates_long_intents() {
        assert_eq!(
            deliverable_title("  EV adoption in Norway "),
            "Research Report: EV adoption in Norway".to_string()
        );
        let long = "x".repeat(100);
        assert_eq!(
            deliverable_title(&long),
            format!("Research Report: {}...", "x".repeat(80))
        );
    }

    #[tokio::test]
    async fn queued_provider_wait_ends_when_mission_closes() {
        let orchestrator =
            Orchestrator::new(LegionConfig::default(), None, None).expect("orchestrator");
        let shared = orchestrator.shared.clone();
        let capacity = shared.config.orchestrator.max_concurrent_provider_calls as u32;
        let held = shared
            .limiter
            .clone()
            .acquire_many_owned(capacity)
            .await
            .expect("drain limiter");

        let runtime = Arc::new(MissionRuntime::default());
        let mission_id = Uuid::new_v4();
        let waiter = tokio::spawn({
            let shared = shared.clone();
            let runtime = runtime.clone();
            async move { provider_slot(&shared, &runtime, mission_id).await.map(drop) }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(waiter.is_finished(), false);

        runtime.shutdown();
        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter released")
            .expect("joined");
        assert!(matches!(result, Err(LegionCoreError::Cancelled(id)) if id == mission_id));
        assert_eq!(shared.limiter.available_permits(), 0);
        drop(held);
        assert_eq!(shared.limiter.available_permits(), capacity as usize);
    }
}
