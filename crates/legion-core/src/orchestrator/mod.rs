//! Orchestrator Core

mod dispatch;
mod lifecycle;
mod phases;

use crate::a2a::A2ABroker;
use crate::agents::{
    Agent, AgentCard, AgentRegistry, AugurAgent, CenturionAgent, ConsulAgent, ScribeAgent,
};
use crate::bus::{EventBus, MissionSubscription};
use crate::error::LegionCoreError;
use crate::providers::{CreationProvider, ReasoningProvider, SearchProvider};
use crate::state::{JsonlStateStore, StateStore};
use crate::store::MissionStore;
use crate::types::{Mission, MissionMutation, MissionSeed, MissionSummary};
use chrono::Utc;
use legion_config::{LegionConfig, PersistenceConfig};
use legion_protocol::{
    AgentRole, EventMsg, EventPayload, EventSink, Message, MessageKind, MissionId, Phase,
};
use log::{debug, info};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use lifecycle::{Lifecycle, live_runtime};
use phases::PlanRound;

/// Sender name for messages typed by the user.
pub(crate) const USER_SENDER: &str = "user";
/// Sender name for orchestrator announcements.
pub(crate) const SYSTEM_SENDER: &str = "LEGION";

/// State shared by the facade and every mission driver.
pub(crate) struct Shared {
    config: Arc<LegionConfig>,
    store: MissionStore,
    bus: Arc<EventBus>,
    broker: Arc<A2ABroker>,
    agents: AgentRegistry,
    /// Process-wide bound on concurrent collect/create calls.
    limiter: Arc<Semaphore>,
    lifecycle: Lifecycle,
}

/// Publishes to the mission bus and, optionally, to an outside sink.
///
/// A mission channel is opened by its `mission_created` event so that the
/// creation event itself reaches the bus.
struct FanoutEventSink {
    bus: Arc<EventBus>,
    secondary: Option<Arc<dyn EventSink>>,
}

impl EventSink for FanoutEventSink {
    fn emit(&self, event: EventMsg) {
        if matches!(event.payload, EventPayload::MissionCreated { .. }) {
            self.bus.open(event.mission_id);
        }
        if let Some(secondary) = &self.secondary {
            secondary.emit(event.clone());
        }
        self.bus.publish(event);
    }
}

/// Main orchestration façade: owns the agents, the store, and every live mission.
#[derive(Clone)]
pub struct Orchestrator {
    shared: Arc<Shared>,
}

impl Orchestrator {
    /// Construct an orchestrator.
    ///
    /// When persistence is enabled and no `state_store` is supplied, a JSONL
    /// store is opened at the configured root.
    pub fn new(
        config: LegionConfig,
        state_store: Option<Arc<dyn StateStore>>,
        event_sink: Option<Arc<dyn EventSink>>,
    ) -> Result<Self, LegionCoreError> {
        info!("initializing orchestrator");
        config.validate()?;
        debug!(
            "orchestrator config (max_concurrent_provider_calls={}, collect_attempts={}, persistence={})",
            config.orchestrator.max_concurrent_provider_calls,
            config.orchestrator.collect_attempts,
            config.persistence.enabled
        );
        let state_store = if config.persistence.enabled {
            match state_store {
                Some(store) => Some(store),
                None => Some(build_default_state_store(&config.persistence)?),
            }
        } else {
            None
        };
        let bus = Arc::new(EventBus::new(config.orchestrator.event_buffer));
        let sink: Arc<dyn EventSink> = Arc::new(FanoutEventSink {
            bus: bus.clone(),
            secondary: event_sink,
        });
        let limiter = Arc::new(Semaphore::new(
            config.orchestrator.max_concurrent_provider_calls.max(1),
        ));
        let shared = Shared {
            store: MissionStore::new(state_store, sink),
            bus,
            broker: Arc::new(A2ABroker::new()),
            agents: AgentRegistry::new(),
            limiter,
            lifecycle: Lifecycle::default(),
            config: Arc::new(config),
        };
        info!("orchestrator initialized");
        Ok(Self {
            shared: Arc::new(shared),
        })
    }

    /// Return the shared configuration for this orchestrator.
    pub fn config(&self) -> &LegionConfig {
        &self.shared.config
    }

    /// Register an adapter for the task types it declares.
    pub fn register_agent(&self, agent: Arc<dyn Agent>) -> Result<(), LegionCoreError> {
        self.shared.agents.register(agent)
    }

    /// Register the four standard roles over the given providers.
    pub fn register_default_agents(
        &self,
        reasoning: Arc<dyn ReasoningProvider>,
        search: Arc<dyn SearchProvider>,
        creation: Arc<dyn CreationProvider>,
    ) -> Result<(), LegionCoreError> {
        self.register_agent(Arc::new(ConsulAgent::new(reasoning.clone())))?;
        self.register_agent(Arc::new(CenturionAgent::new(search)))?;
        self.register_agent(Arc::new(AugurAgent::new(reasoning)))?;
        self.register_agent(Arc::new(ScribeAgent::new(creation)))
    }

    /// Cards of every registered adapter.
    pub fn agent_cards(&self) -> Vec<AgentCard> {
        self.shared.agents.cards()
    }

    /// Create a mission and start planning it.
    ///
    /// Returns as soon as the mission exists; the plan arrives as a
    /// `plan_ready` event. Must be called from within a Tokio runtime.
    pub fn create_mission(&self, seed: MissionSeed) -> Result<MissionId, LegionCoreError> {
        let shared = &self.shared;
        let mission_id = shared.store.create_mission(&seed)?;
        let runtime = shared.lifecycle.insert(mission_id);
        runtime.begin_planning(mission_id)?;
        let request = message(
            USER_SENDER,
            Some(AgentRole::Consul.display_name()),
            seed.intent.clone(),
            MessageKind::Conversation,
            None,
        );
        shared
            .store
            .commit(mission_id, vec![MissionMutation::MessageAppended { message: request }])?;
        let round = PlanRound::Initial {
            requested: seed.formats,
        };
        if let Err(err) = spawn(phases::run_planning(
            shared.clone(),
            runtime.clone(),
            mission_id,
            round,
        )) {
            runtime.end_planning();
            lifecycle::terminate(shared, mission_id, lifecycle::REASON_INTERNAL)?;
            return Err(err);
        }
        if let Some(after) = shared.config.orchestrator.plan_approval_timeout() {
            lifecycle::arm_plan_expiry(shared, &runtime, mission_id, after)?;
        }
        Ok(mission_id)
    }

    /// Approve the current plan and start collection.
    ///
    /// Rejected with `InvalidTransition` unless the mission is in `planning`
    /// with a recorded plan and no planning round in flight.
    pub fn approve_plan(&self, mission_id: MissionId) -> Result<(), LegionCoreError> {
        let shared = &self.shared;
        let runtime = live_runtime(shared, mission_id)?;
        runtime.begin_execution(mission_id)?;
        let committed = shared.store.commit_with(mission_id, |mission| {
            require_open_plan(mission)?;
            let approval = message(
                USER_SENDER,
                Some(AgentRole::Consul.display_name()),
                "Plan approved".to_string(),
                MessageKind::Conversation,
                None,
            );
            let announcement = message(
                SYSTEM_SENDER,
                None,
                format!(
                    "Mission approved: researching {} questions",
                    mission.questions.len()
                ),
                MessageKind::Announcement,
                None,
            );
            Ok(vec![
                MissionMutation::MessageAppended { message: approval },
                MissionMutation::PhaseChanged {
                    phase: Phase::Collecting,
                },
                MissionMutation::MessageAppended {
                    message: announcement,
                },
            ])
        });
        if let Err(err) = committed {
            runtime.abort_execution();
            return Err(err);
        }
        info!("plan approved (mission_id={})", mission_id);
        if let Err(err) = spawn(phases::run_pipeline(shared.clone(), runtime, mission_id)) {
            lifecycle::terminate(shared, mission_id, lifecycle::REASON_INTERNAL)?;
            return Err(err);
        }
        Ok(())
    }

    /// Ask the planner to revise the plan with user feedback.
    ///
    /// The revised plan replaces the current one and is announced with a new
    /// `plan_ready` event. Rejected under the same conditions as approval.
    pub fn refine_plan(
        &self,
        mission_id: MissionId,
        feedback: impl Into<String>,
    ) -> Result<(), LegionCoreError> {
        let feedback = feedback.into();
        let shared = &self.shared;
        let runtime = live_runtime(shared, mission_id)?;
        runtime.begin_planning(mission_id)?;
        let committed = shared.store.commit_with(mission_id, |mission| {
            require_open_plan(mission)?;
            Ok(vec![MissionMutation::MessageAppended {
                message: message(
                    USER_SENDER,
                    Some(AgentRole::Consul.display_name()),
                    feedback.clone(),
                    MessageKind::Conversation,
                    None,
                ),
            }])
        });
        if let Err(err) = committed {
            runtime.end_planning();
            return Err(err);
        }
        info!(
            "plan refinement requested (mission_id={}, feedback_len={})",
            mission_id,
            feedback.len()
        );
        let round = PlanRound::Refine { feedback };
        if let Err(err) = spawn(phases::run_planning(
            shared.clone(),
            runtime.clone(),
            mission_id,
            round,
        )) {
            runtime.end_planning();
            return Err(err);
        }
        Ok(())
    }

    /// Cancel a mission that has not reached a terminal phase.
    ///
    /// In-flight tasks are abandoned without waiting; their late responses
    /// are discarded.
    pub fn cancel_mission(&self, mission_id: MissionId) -> Result<(), LegionCoreError> {
        live_runtime(&self.shared, mission_id)?;
        info!("cancelling mission (mission_id={})", mission_id);
        lifecycle::terminate(&self.shared, mission_id, lifecycle::REASON_CANCELLED)
    }

    /// Snapshot of a mission.
    pub fn get_mission(&self, mission_id: MissionId) -> Result<Mission, LegionCoreError> {
        self.shared.store.get(mission_id)
    }

    /// Summaries of all known missions, most recently updated first.
    pub fn list_missions(&self) -> Result<Vec<MissionSummary>, LegionCoreError> {
        self.shared.store.list()
    }

    /// Number of missions this process is still driving.
    pub fn active_missions(&self) -> usize {
        self.shared.lifecycle.live_count()
    }

    /// Subscribe to a mission's events from now on.
    ///
    /// Earlier events are not replayed; read [`get_mission`](Self::get_mission)
    /// for history. A terminal mission yields an already-ended subscription.
    pub fn subscribe(&self, mission_id: MissionId) -> Result<MissionSubscription, LegionCoreError> {
        if !self.shared.store.contains(mission_id) {
            self.shared.store.get(mission_id)?;
        }
        Ok(self.shared.bus.subscribe(mission_id))
    }

    /// Drop a terminal mission from memory and the backing store.
    pub fn evict_mission(&self, mission_id: MissionId) -> Result<bool, LegionCoreError> {
        if self.shared.lifecycle.contains(mission_id) {
            return Err(LegionCoreError::invalid(
                mission_id,
                "cannot evict a mission that is still running",
            ));
        }
        let mission = self.shared.store.get(mission_id)?;
        if !mission.phase.is_terminal() {
            return Err(LegionCoreError::invalid(
                mission_id,
                format!("cannot evict a mission in {}", mission.phase),
            ));
        }
        self.shared.store.remove(mission_id)
    }
}

fn require_open_plan(mission: &Mission) -> Result<(), LegionCoreError> {
    if mission.phase != Phase::Planning {
        return Err(LegionCoreError::invalid(
            mission.id,
            format!("mission is in {}, not planning", mission.phase),
        ));
    }
    if mission.questions.is_empty() {
        return Err(LegionCoreError::invalid(mission.id, "no plan recorded yet"));
    }
    Ok(())
}

/// Build a log message; the store assigns its `seq`.
pub(crate) fn message(
    from: &str,
    to: Option<&str>,
    text: String,
    kind: MessageKind,
    question_id: Option<u32>,
) -> Message {
    Message {
        seq: 0,
        from: from.to_string(),
        to: to.map(str::to_string),
        text,
        kind,
        question_id,
        timestamp: Utc::now(),
    }
}

/// Spawn onto the current Tokio runtime.
pub(crate) fn spawn<F>(future: F) -> Result<JoinHandle<F::Output>, LegionCoreError>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let handle = tokio::runtime::Handle::try_current()
        .map_err(|err| LegionCoreError::Executor(err.to_string()))?;
    Ok(handle.spawn(future))
}

/// Build the default state store from config.
fn build_default_state_store(
    config: &PersistenceConfig,
) -> Result<Arc<dyn StateStore>, LegionCoreError> {
    let root = config.resolve_root()?;
    info!("initializing mission store (root={})", root.display());
    let store =
        JsonlStateStore::new(root).map_err(|err| LegionCoreError::State(err.to_string()))?;
    Ok(Arc::new(store))
}

#[cfg(test)]
mod tests {
    use super::*;
    use legion_config::OrchestratorConfig;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;
    use uuid::Uuid;

    #[test]
    fn persistence_builds_jsonl_store_under_configured_root() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("missions");
        let config = LegionConfig::builder()
            .persistence(PersistenceConfig {
                enabled: true,
                path: Some(root.to_string_lossy().to_string()),
            })
            .build();
        let orchestrator = Orchestrator::new(config, None, None).expect("orchestrator");
        assert_eq!(orchestrator.list_missions().expect("list").len(), 0);
        assert_eq!(root.is_dir(), true);
    }

    #[test]
    fn invalid_built_config_is_rejected() {
        let config = LegionConfig::builder()
            .orchestrator(OrchestratorConfig {
                max_questions: 0,
                ..OrchestratorConfig::default()
            })
            .build();
        let err = Orchestrator::new(config, None, None).err();
        assert!(matches!(err, Some(LegionCoreError::Config(_))));
    }

    #[test]
    fn commands_on_unknown_missions_are_not_found() {
        let orchestrator =
            Orchestrator::new(LegionConfig::default(), None, None).expect("orchestrator");
        let mission_id = Uuid::new_v4();
        assert!(matches!(
            orchestrator.approve_plan(mission_id),
            Err(LegionCoreError::NotFound(_))
        ));
        assert!(matches!(
            orchestrator.cancel_mission(mission_id),
            Err(LegionCoreError::NotFound(_))
        ));
        assert!(matches!(
            orchestrator.subscribe(mission_id).err(),
            Some(LegionCoreError::NotFound(_))
        ));
    }

    #[test]
    fn create_outside_runtime_fails_cleanly() {
        let orchestrator =
            Orchestrator::new(LegionConfig::default(), None, None).expect("orchestrator");
        let err = orchestrator
            .create_mission(MissionSeed::new("topic"))
            .expect_err("no runtime");
        assert!(matches!(err, LegionCoreError::Executor(_)));
        assert_eq!(orchestrator.active_missions(), 0);
        let summaries = orchestrator.list_missions().expect("list");
        assert_eq!(summaries[0].failure_reason, Some("internal_error".to_string()));
    }
}
