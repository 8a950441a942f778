//! In-flight A2A task tracking: dispatch, resolve, and timed await.

use legion_protocol::{A2AResponse, A2ATask, MissionId, TaskId};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::oneshot;

struct PendingEntry {
    mission_id: MissionId,
    sender: oneshot::Sender<A2AResponse>,
}

/// Handle for a dispatched task, consumed by [`A2ABroker::await_response`].
pub struct PendingTask {
    task_id: TaskId,
    mission_id: MissionId,
    receiver: oneshot::Receiver<A2AResponse>,
}

impl PendingTask {
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn mission_id(&self) -> MissionId {
        self.mission_id
    }
}

/// Tracks tasks awaiting a response. Does not retry.
#[derive(Default)]
pub struct A2ABroker {
    pending: Mutex<HashMap<TaskId, PendingEntry>>,
}

impl A2ABroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task as in flight.
    pub fn dispatch(&self, task: &A2ATask) -> PendingTask {
        let (sender, receiver) = oneshot::channel();
        let previous = self.pending.lock().insert(
            task.task_id,
            PendingEntry {
                mission_id: task.mission_id,
                sender,
            },
        );
        if previous.is_some() {
            warn!("task id reused; replacing pending entry (task_id={})", task.task_id);
        }
        debug!(
            "task dispatched (task_id={}, mission_id={}, to={}, type={})",
            task.task_id, task.mission_id, task.to_role, task.task_type
        );
        PendingTask {
            task_id: task.task_id,
            mission_id: task.mission_id,
            receiver,
        }
    }

    /// Deliver the response for a task.
    ///
    /// Returns `false` without side effects when the id is unknown, already
    /// resolved, timed out, or belongs to a cancelled mission.
    pub fn resolve(&self, task_id: TaskId, response: A2AResponse) -> bool {
        if response.task_id != task_id {
            warn!(
                "response task id mismatch (task_id={}, response_task_id={})",
                task_id, response.task_id
            );
            return false;
        }
        let Some(entry) = self.pending.lock().remove(&task_id) else {
            debug!("ignoring response for unknown task (task_id={})", task_id);
            return false;
        };
        debug!(
            "task resolved (task_id={}, mission_id={}, status={:?})",
            task_id, entry.mission_id, response.status
        );
        // The waiter may have stopped listening; the response is dropped then.
        entry.sender.send(response).is_ok()
    }

    /// Wait for a response, synthesizing one on timeout or cancellation.
    pub async fn await_response(&self, pending: PendingTask, timeout: Duration) -> A2AResponse {
        let PendingTask {
            task_id,
            mut receiver,
            ..
        } = pending;
        match tokio::time::timeout(timeout, &mut receiver).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => A2AResponse::abandoned(task_id),
            Err(_) => {
                let removed = self.pending.lock().remove(&task_id).is_some();
                if !removed && let Ok(response) = receiver.try_recv() {
                    return response;
                }
                warn!(
                    "task timed out (task_id={}, timeout_ms={})",
                    task_id,
                    timeout.as_millis()
                );
                A2AResponse::timed_out(task_id, timeout)
            }
        }
    }

    /// Drop every pending task of a mission; their waiters see `abandoned`.
    pub fn abandon_mission(&self, mission_id: MissionId) -> Vec<TaskId> {
        let mut pending = self.pending.lock();
        let abandoned: Vec<TaskId> = pending
            .iter()
            .filter(|(_, entry)| entry.mission_id == mission_id)
            .map(|(task_id, _)| *task_id)
            .collect();
        for task_id in &abandoned {
            pending.remove(task_id);
        }
        if !abandoned.is_empty() {
            info!(
                "abandoned in-flight tasks (mission_id={}, count={})",
                mission_id,
                abandoned.len()
            );
        }
        abandoned
    }

    pub fn in_flight(&self, mission_id: MissionId) -> usize {
        self.pending
            .lock()
            .values()
            .filter(|entry| entry.mission_id == mission_id)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use legion_protocol::{AgentRole, ErrorKind, TaskType};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use uuid::Uuid;

    fn task(mission_id: MissionId) -> A2ATask {
        A2ATask {
            task_id: Uuid::new_v4(),
            mission_id,
            from_role: Some(AgentRole::Consul),
            to_role: AgentRole::Centurion,
            task_type: TaskType::CollectData,
            parameters: json!({}),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn resolve_is_idempotent() {
        let broker = A2ABroker::new();
        let task = task(Uuid::new_v4());
        let pending = broker.dispatch(&task);
        let response = A2AResponse::completed(task.task_id, json!({ "ok": true }));
        assert_eq!(broker.resolve(task.task_id, response.clone()), true);
        assert_eq!(broker.resolve(task.task_id, response.clone()), false);
        let received = broker
            .await_response(pending, Duration::from_secs(1))
            .await;
        assert_eq!(received, response);
    }

    #[tokio::test]
    async fn await_times_out_and_late_resolve_is_ignored() {
        let broker = A2ABroker::new();
        let task = task(Uuid::new_v4());
        let pending = broker.dispatch(&task);
        let response = broker
            .await_response(pending, Duration::from_millis(20))
            .await;
        assert_eq!(response.error_kind(), Some(ErrorKind::TaskTimeout));
        assert_eq!(
            broker.resolve(task.task_id, A2AResponse::completed(task.task_id, json!({}))),
            false
        );
    }

    #[tokio::test]
    async fn abandon_mission_releases_waiters() {
        let broker = A2ABroker::new();
        let mission_id = Uuid::new_v4();
        let first = task(mission_id);
        let other = task(Uuid::new_v4());
        let pending = broker.dispatch(&first);
        let _other = broker.dispatch(&other);

        assert_eq!(broker.abandon_mission(mission_id), vec![first.task_id]);
        let response = broker
            .await_response(pending, Duration::from_secs(5))
            .await;
        assert_eq!(response.error_kind(), Some(ErrorKind::Abandoned));
        assert_eq!(broker.in_flight(mission_id), 0);
        assert_eq!(broker.in_flight(other.mission_id), 1);
        assert_eq!(
            broker.resolve(first.task_id, A2AResponse::completed(first.task_id, json!({}))),
            false
        );
    }

    #[test]
    fn resolve_unknown_task_is_noop() {
        let broker = A2ABroker::new();
        let task_id = Uuid::new_v4();
        assert_eq!(
            broker.resolve(task_id, A2AResponse::abandoned(task_id)),
            false
        );
    }
}
