use crate::{ScriptedReasoning, ScriptedSearch, StubCreation};
use legion_config::{LegionConfig, TimeoutsConfig};
use legion_core::{
    CreationProvider, LegionCoreError, Mission, Orchestrator, ReasoningProvider, SearchProvider,
};
use legion_protocol::MissionId;
use std::sync::Arc;
use std::time::Duration;

/// Config with persistence off and one-second phase timeouts.
pub fn test_config() -> LegionConfig {
    LegionConfig::builder()
        .timeouts(TimeoutsConfig {
            plan_secs: 1,
            collect_secs: 1,
            analyze_secs: 1,
            create_secs: 1,
        })
        .build()
}

/// Orchestrator over `config` with the four standard roles registered.
pub fn orchestrator_with(
    config: LegionConfig,
    reasoning: Arc<dyn ReasoningProvider>,
    search: Arc<dyn SearchProvider>,
    creation: Arc<dyn CreationProvider>,
) -> Result<Orchestrator, LegionCoreError> {
    let orchestrator = Orchestrator::new(config, None, None)?;
    orchestrator.register_default_agents(reasoning, search, creation)?;
    Ok(orchestrator)
}

/// Orchestrator over the default scripted providers.
pub fn default_orchestrator() -> Result<Orchestrator, LegionCoreError> {
    orchestrator_with(
        test_config(),
        Arc::new(ScriptedReasoning::new()),
        Arc::new(ScriptedSearch::new()),
        Arc::new(StubCreation::new()),
    )
}

/// Poll the mission snapshot until `predicate` holds.
///
/// Returns the last snapshot seen when `timeout` elapses first.
pub async fn wait_for_mission<F>(
    orchestrator: &Orchestrator,
    mission_id: MissionId,
    timeout: Duration,
    predicate: F,
) -> Result<Mission, LegionCoreError>
where
    F: Fn(&Mission) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let mission = orchestrator.get_mission(mission_id)?;
        if predicate(&mission) || tokio::time::Instant::now() >= deadline {
            return Ok(mission);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait until the plan is ready for approval.
pub async fn wait_for_plan(
    orchestrator: &Orchestrator,
    mission_id: MissionId,
) -> Result<Mission, LegionCoreError> {
    wait_for_mission(orchestrator, mission_id, Duration::from_secs(5), |mission| {
        mission.plan_revision > 0 || mission.phase.is_terminal()
    })
    .await
}

/// Wait until the mission reaches `completed` or `failed`.
pub async fn wait_for_terminal(
    orchestrator: &Orchestrator,
    mission_id: MissionId,
) -> Result<Mission, LegionCoreError> {
    wait_for_mission(orchestrator, mission_id, Duration::from_secs(10), |mission| {
        mission.phase.is_terminal()
    })
    .await
}
