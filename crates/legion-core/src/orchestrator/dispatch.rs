//! Dispatch of a single A2A task: record, hand over, await, record outcome.

use super::lifecycle::MissionRuntime;
use super::{Shared, message};
use crate::agents::ProgressReporter;
use crate::error::LegionCoreError;
use crate::store::MissionStore;
use crate::types::MissionMutation;
use chrono::Utc;
use legion_protocol::{
    A2AResponse, A2ATask, AgentRole, DeliverableFormat, ErrorKind, MessageKind, MissionId,
    Operation, OperationKind, OperationStatus, Progress, TaskRecord, TaskStatus, TaskType,
};
use log::{debug, warn};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Everything needed to run one task against whichever adapter accepts it.
pub(crate) struct TaskSpec {
    pub from_role: Option<AgentRole>,
    pub to_role: AgentRole,
    pub task_type: TaskType,
    pub parameters: Value,
    pub operation_kind: OperationKind,
    pub title: String,
    /// Conversation line posted from the sender to the receiver.
    pub request: String,
    pub question_id: Option<u32>,
    pub format: Option<DeliverableFormat>,
    pub timeout: Duration,
    /// Committed in the same batch as the dispatch record.
    pub with_dispatch: Vec<MissionMutation>,
}

/// Run one task to a response.
///
/// Returns the response for success, explicit failure, and timeout alike;
/// returns `Cancelled` when the mission stopped while the task was pending.
pub(crate) async fn execute_task(
    shared: &Shared,
    runtime: &MissionRuntime,
    mission_id: MissionId,
    spec: TaskSpec,
) -> Result<A2AResponse, LegionCoreError> {
    let agent = shared.agents.resolve(spec.task_type)?;
    let now = Utc::now();
    let task = A2ATask {
        task_id: Uuid::new_v4(),
        mission_id,
        from_role: spec.from_role,
        to_role: spec.to_role,
        task_type: spec.task_type,
        parameters: spec.parameters,
        created_at: now,
    };
    let operation = Operation {
        id: Uuid::new_v4(),
        agent: spec.to_role,
        kind: spec.operation_kind,
        title: spec.title,
        status: OperationStatus::Active,
        progress: Progress::percent(0),
        question_id: spec.question_id,
        task_id: Some(task.task_id),
        started_at: now,
        updated_at: now,
    };
    let mut record = TaskRecord {
        task_id: task.task_id,
        mission_id,
        from_role: spec.from_role,
        to_role: spec.to_role,
        task_type: spec.task_type,
        parameters: task.parameters.clone(),
        question_id: spec.question_id,
        format: spec.format,
        status: TaskStatus::Dispatched,
        error: None,
        created_at: now,
        finished_at: None,
    };
    let sender = spec
        .from_role
        .map_or(super::USER_SENDER, |role| role.display_name());
    let mut batch = spec.with_dispatch;
    batch.push(MissionMutation::MessageAppended {
        message: message(
            sender,
            Some(spec.to_role.display_name()),
            spec.request,
            MessageKind::Conversation,
            spec.question_id,
        ),
    });
    batch.push(MissionMutation::TaskUpserted {
        task: record.clone(),
    });
    batch.push(MissionMutation::OperationUpserted {
        operation: operation.clone(),
    });
    shared
        .store
        .commit(mission_id, batch)
        .map_err(|err| halted(&shared.store, mission_id, err))?;

    let pending = shared.broker.dispatch(&task);
    let reporter = Arc::new(MissionReporter {
        store: shared.store.clone(),
        mission_id,
        role: spec.to_role,
        question_id: spec.question_id,
        operation: Mutex::new(operation.clone()),
    });
    let broker = shared.broker.clone();
    let task_id = task.task_id;
    let adapter = super::spawn(async move {
        let response = agent.handle(task, reporter).await;
        if !broker.resolve(task_id, response) {
            debug!("discarded late response (task_id={})", task_id);
        }
    })?;
    if !runtime.track(adapter.abort_handle()) {
        shared.broker.abandon_mission(mission_id);
        return Err(LegionCoreError::Cancelled(mission_id));
    }

    let response = shared.broker.await_response(pending, spec.timeout).await;
    match response.error_kind() {
        Some(ErrorKind::Abandoned) => return Err(LegionCoreError::Cancelled(mission_id)),
        Some(ErrorKind::TaskTimeout) => adapter.abort(),
        _ => {}
    }

    let finished_at = Utc::now();
    record.status = match (response.is_success(), response.error_kind()) {
        (true, _) => TaskStatus::Completed,
        (false, Some(ErrorKind::TaskTimeout)) => TaskStatus::TimedOut,
        (false, _) => TaskStatus::Failed,
    };
    record.error = response.error.clone();
    record.finished_at = Some(finished_at);
    if let Some(error) = &response.error {
        warn!(
            "task failed (mission_id={}, task_id={}, type={}, error={})",
            mission_id, record.task_id, record.task_type, error
        );
    }
    let task_id = record.task_id;
    shared
        .store
        .commit_with(mission_id, |mission| {
            let mut closed = mission
                .operations
                .get(&operation.id)
                .cloned()
                .unwrap_or(operation);
            closed.status = OperationStatus::Completed;
            if response.is_success() {
                closed.progress = Progress::percent(100);
            }
            closed.updated_at = finished_at;
            Ok(vec![
                MissionMutation::TaskUpserted { task: record },
                MissionMutation::OperationUpserted { operation: closed },
            ])
        })
        .map_err(|err| halted(&shared.store, mission_id, err))?;
    debug!(
        "task finished (mission_id={}, task_id={}, success={})",
        mission_id,
        task_id,
        response.is_success()
    );
    Ok(response)
}

/// Map a rejected commit on a mission that has since ended to `Cancelled`.
pub(crate) fn halted(
    store: &MissionStore,
    mission_id: MissionId,
    err: LegionCoreError,
) -> LegionCoreError {
    let ended = store
        .read(mission_id, |mission| mission.phase.is_terminal())
        .unwrap_or(false);
    if ended {
        LegionCoreError::Cancelled(mission_id)
    } else {
        err
    }
}

/// Reporter handed to adapters; turns their callbacks into store commits.
struct MissionReporter {
    store: MissionStore,
    mission_id: MissionId,
    role: AgentRole,
    question_id: Option<u32>,
    operation: Mutex<Operation>,
}

impl ProgressReporter for MissionReporter {
    fn thinking(&self, text: &str) {
        let message = message(
            self.role.display_name(),
            None,
            text.to_string(),
            MessageKind::Thinking,
            self.question_id,
        );
        if let Err(err) = self
            .store
            .commit(self.mission_id, vec![MissionMutation::MessageAppended { message }])
        {
            debug!(
                "dropped progress message (mission_id={}, error={})",
                self.mission_id, err
            );
        }
    }

    fn progress(&self, progress: Progress) {
        let operation = {
            let mut operation = self.operation.lock();
            operation.progress = progress;
            operation.updated_at = Utc::now();
            operation.clone()
        };
        let operation_id = operation.id;
        // Skip updates that arrive after the operation was closed.
        let result = self.store.commit_with(self.mission_id, |mission| {
            match mission.operations.get(&operation_id) {
                Some(current) if current.status == OperationStatus::Completed => Ok(Vec::new()),
                _ => Ok(vec![MissionMutation::OperationUpserted { operation }]),
            }
        });
        if let Err(err) = result {
            debug!(
                "dropped progress update (mission_id={}, error={})",
                self.mission_id, err
            );
        }
    }
}
