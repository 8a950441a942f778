//! Registry of live missions and their termination path.

use super::Shared;
use crate::error::LegionCoreError;
use crate::types::MissionMutation;
use legion_protocol::{MessageKind, MissionId};
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::AbortHandle;

pub(crate) const REASON_CANCELLED: &str = "cancelled";
pub(crate) const REASON_PLAN_EXPIRED: &str = "plan_expired";
pub(crate) const REASON_PLANNING_FAILED: &str = "planning_failed";
pub(crate) const REASON_NO_DATA: &str = "no_data_collected";
pub(crate) const REASON_ANALYSIS_FAILED: &str = "analysis_failed";
pub(crate) const REASON_NO_DELIVERABLES: &str = "no_deliverables_created";
pub(crate) const REASON_INTERNAL: &str = "internal_error";

#[derive(Default)]
struct RuntimeState {
    /// A plan or refine task is running.
    planning: bool,
    /// The plan was approved and the pipeline owns the mission.
    executing: bool,
    closed: bool,
    adapters: Vec<AbortHandle>,
    expiry: Option<AbortHandle>,
}

/// Process-local control state of one live mission.
pub(crate) struct MissionRuntime {
    state: Mutex<RuntimeState>,
    /// Flips to `true` once on shutdown.
    closed_tx: watch::Sender<bool>,
}

impl Default for MissionRuntime {
    fn default() -> Self {
        Self {
            state: Mutex::new(RuntimeState::default()),
            closed_tx: watch::channel(false).0,
        }
    }
}

impl MissionRuntime {
    /// Resolves once the mission is closed.
    pub(crate) async fn closed(&self) {
        let mut closed = self.closed_tx.subscribe();
        let _ = closed.wait_for(|closed| *closed).await;
    }

    /// Claim the planner for a plan or refine round.
    pub(crate) fn begin_planning(&self, mission_id: MissionId) -> Result<(), LegionCoreError> {
        let mut state = self.state.lock();
        if state.closed || state.executing {
            return Err(LegionCoreError::invalid(mission_id, "plan is no longer open"));
        }
        if state.planning {
            return Err(LegionCoreError::invalid(
                mission_id,
                "a planning round is already in flight",
            ));
        }
        state.planning = true;
        Ok(())
    }

    pub(crate) fn end_planning(&self) {
        self.state.lock().planning = false;
    }

    /// Hand the mission to the pipeline; disarms the approval timer.
    pub(crate) fn begin_execution(&self, mission_id: MissionId) -> Result<(), LegionCoreError> {
        let mut state = self.state.lock();
        if state.closed || state.executing {
            return Err(LegionCoreError::invalid(mission_id, "plan was already approved"));
        }
        if state.planning {
            return Err(LegionCoreError::invalid(
                mission_id,
                "cannot approve while a planning round is in flight",
            ));
        }
        state.executing = true;
        if let Some(expiry) = state.expiry.take() {
            expiry.abort();
        }
        Ok(())
    }

    /// Undo [`begin_execution`](Self::begin_execution) when the approval commit was rejected.
    pub(crate) fn abort_execution(&self) {
        self.state.lock().executing = false;
    }

    /// Track a running adapter call. Returns `false` once the mission is closed;
    /// the handle is aborted in that case.
    pub(crate) fn track(&self, handle: AbortHandle) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            handle.abort();
            return false;
        }
        state.adapters.retain(|handle| !handle.is_finished());
        state.adapters.push(handle);
        true
    }

    pub(crate) fn arm_expiry(&self, handle: AbortHandle) {
        let mut state = self.state.lock();
        if state.closed || state.executing {
            handle.abort();
            return;
        }
        if let Some(previous) = state.expiry.replace(handle) {
            previous.abort();
        }
    }

    /// Claim the mission for expiry; fails once it was approved or closed.
    fn claim_expiry(&self) -> bool {
        let mut state = self.state.lock();
        if state.closed || state.executing {
            return false;
        }
        state.executing = true;
        true
    }

    /// Close the runtime and abort everything it still tracks.
    pub(super) fn shutdown(&self) -> usize {
        let mut state = self.state.lock();
        state.closed = true;
        self.closed_tx.send_replace(true);
        if let Some(expiry) = state.expiry.take() {
            expiry.abort();
        }
        let adapters = std::mem::take(&mut state.adapters);
        let mut aborted = 0;
        for handle in adapters {
            if !handle.is_finished() {
                handle.abort();
                aborted += 1;
            }
        }
        aborted
    }
}

/// The single mapping of live missions, mutated only on create, terminate
/// and completion.
#[derive(Default)]
pub(crate) struct Lifecycle {
    runtimes: RwLock<HashMap<MissionId, Arc<MissionRuntime>>>,
}

impl Lifecycle {
    pub(crate) fn insert(&self, mission_id: MissionId) -> Arc<MissionRuntime> {
        let runtime = Arc::new(MissionRuntime::default());
        self.runtimes.write().insert(mission_id, runtime.clone());
        runtime
    }

    pub(crate) fn get(&self, mission_id: MissionId) -> Option<Arc<MissionRuntime>> {
        self.runtimes.read().get(&mission_id).cloned()
    }

    pub(crate) fn contains(&self, mission_id: MissionId) -> bool {
        self.runtimes.read().contains_key(&mission_id)
    }

    pub(crate) fn live_count(&self) -> usize {
        self.runtimes.read().len()
    }

    fn remove(&self, mission_id: MissionId) -> Option<Arc<MissionRuntime>> {
        self.runtimes.write().remove(&mission_id)
    }
}

/// Resolve the runtime of a mission that must still be live.
///
/// Distinguishes a mission that never existed (`NotFound`) from one that has
/// already ended or is not driven by this process (`InvalidTransition`).
pub(crate) fn live_runtime(
    shared: &Shared,
    mission_id: MissionId,
) -> Result<Arc<MissionRuntime>, LegionCoreError> {
    if let Some(runtime) = shared.lifecycle.get(mission_id) {
        return Ok(runtime);
    }
    let mission = shared.store.get(mission_id)?;
    Err(LegionCoreError::invalid(
        mission_id,
        if mission.phase.is_terminal() {
            format!("mission is already {}", mission.phase)
        } else {
            "mission is not active in this process".to_string()
        },
    ))
}

/// Fail a mission with `reason`.
///
/// The runtime is closed before the terminal commit so no new adapter call
/// can start afterwards; waiters are released after it so any late response
/// meets a terminal mission and is discarded.
pub(crate) fn terminate(
    shared: &Shared,
    mission_id: MissionId,
    reason: &str,
) -> Result<(), LegionCoreError> {
    let aborted = shared
        .lifecycle
        .remove(mission_id)
        .map_or(0, |runtime| runtime.shutdown());
    let announcement = super::message(
        super::SYSTEM_SENDER,
        None,
        format!("Mission failed: {}", reason.replace('_', " ")),
        MessageKind::Announcement,
        None,
    );
    let result = shared.store.commit(
        mission_id,
        vec![
            MissionMutation::MessageAppended {
                message: announcement,
            },
            MissionMutation::Terminated {
                reason: reason.to_string(),
            },
        ],
    );
    let abandoned = shared.broker.abandon_mission(mission_id);
    shared.bus.close(mission_id);
    match &result {
        Ok(()) => info!(
            "mission failed (mission_id={}, reason={}, abandoned={}, aborted={})",
            mission_id,
            reason,
            abandoned.len(),
            aborted
        ),
        Err(err) => warn!(
            "terminate rejected (mission_id={}, reason={}, error={})",
            mission_id, reason, err
        ),
    }
    result
}

/// Release the runtime of a mission that completed.
pub(crate) fn finish(shared: &Shared, mission_id: MissionId) {
    if let Some(runtime) = shared.lifecycle.remove(mission_id) {
        runtime.shutdown();
    }
    shared.broker.abandon_mission(mission_id);
    shared.bus.close(mission_id);
    debug!("released mission runtime (mission_id={})", mission_id);
}

/// Fail the mission with `plan_expired` unless it is approved within `after`.
pub(crate) fn arm_plan_expiry(
    shared: &Arc<Shared>,
    runtime: &MissionRuntime,
    mission_id: MissionId,
    after: Duration,
) -> Result<(), LegionCoreError> {
    let weak = Arc::downgrade(shared);
    let handle = super::spawn(async move {
        tokio::time::sleep(after).await;
        let Some(shared) = weak.upgrade() else {
            return;
        };
        let claimed = shared
            .lifecycle
            .get(mission_id)
            .is_some_and(|runtime| runtime.claim_expiry());
        if !claimed {
            return;
        }
        info!(
            "plan approval window elapsed (mission_id={}, after_secs={})",
            mission_id,
            after.as_secs()
        );
        if let Err(err) = terminate(&shared, mission_id, REASON_PLAN_EXPIRED) {
            debug!("plan expiry skipped (mission_id={}, error={})", mission_id, err);
        }
    })?;
    runtime.arm_expiry(handle.abort_handle());
    Ok(())
}
