//! Agent adapters and the capability registry.
//!
//! The orchestrator only ever talks to [`Agent`]; which concrete role answers
//! a task is decided by the registry from the task type.

mod augur;
mod centurion;
mod consul;
mod scribe;

pub use augur::AugurAgent;
pub use centurion::CenturionAgent;
pub use consul::ConsulAgent;
pub use scribe::ScribeAgent;

use crate::error::LegionCoreError;
use async_trait::async_trait;
use legion_protocol::{A2AError, A2AResponse, A2ATask, AgentRole, ErrorKind, Progress, TaskType};
use log::info;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Discovery record for an adapter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentCard {
    pub name: String,
    pub role: AgentRole,
    pub version: String,
    pub description: String,
    /// Task types the adapter accepts.
    pub capabilities: Vec<TaskType>,
}

/// Progress callback handed to adapters while they run.
///
/// Adapters report through this instead of writing mission state themselves.
pub trait ProgressReporter: Send + Sync {
    /// Post a `thinking` message to the mission log.
    fn thinking(&self, text: &str);
    /// Update the task's operation progress.
    fn progress(&self, progress: Progress);
}

/// Reporter that discards everything.
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn thinking(&self, _text: &str) {}

    fn progress(&self, _progress: Progress) {}
}

/// A role adapter: one capability surface, always answers with a response.
#[async_trait]
pub trait Agent: Send + Sync {
    fn card(&self) -> AgentCard;

    fn capabilities(&self) -> Vec<TaskType> {
        self.card().capabilities
    }

    /// Execute a task. Failures are encoded in the response, never raised.
    async fn handle(&self, task: A2ATask, reporter: Arc<dyn ProgressReporter>) -> A2AResponse;
}

/// Adapters indexed by the task types they accept.
#[derive(Clone, Default)]
pub struct AgentRegistry {
    by_task: Arc<RwLock<BTreeMap<TaskType, Arc<dyn Agent>>>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter for every task type it declares.
    pub fn register(&self, agent: Arc<dyn Agent>) -> Result<(), LegionCoreError> {
        let card = agent.card();
        let mut by_task = self.by_task.write();
        for task_type in &card.capabilities {
            if let Some(existing) = by_task.get(task_type) {
                return Err(LegionCoreError::AgentConflict(format!(
                    "{} already handles {} (requested by {})",
                    existing.card().name,
                    task_type,
                    card.name
                )));
            }
        }
        for task_type in &card.capabilities {
            by_task.insert(*task_type, agent.clone());
        }
        info!(
            "registered agent (name={}, role={}, capabilities={})",
            card.name,
            card.role,
            card.capabilities.len()
        );
        Ok(())
    }

    pub fn resolve(&self, task_type: TaskType) -> Result<Arc<dyn Agent>, LegionCoreError> {
        self.by_task
            .read()
            .get(&task_type)
            .cloned()
            .ok_or(LegionCoreError::NoAgentFor(task_type))
    }

    /// Cards of every registered adapter, one per adapter.
    pub fn cards(&self) -> Vec<AgentCard> {
        let mut cards: Vec<AgentCard> = Vec::new();
        for agent in self.by_task.read().values() {
            let card = agent.card();
            if !cards.iter().any(|known| known.name == card.name) {
                cards.push(card);
            }
        }
        cards.sort_by(|a, b| a.role.cmp(&b.role));
        cards
    }
}

/// Response for a task type this adapter does not accept.
pub(crate) fn unsupported(task: &A2ATask, role: AgentRole) -> A2AResponse {
    A2AResponse::failed(
        task.task_id,
        A2AError::new(
            ErrorKind::InvalidInput,
            format!("{role} does not handle {}", task.task_type),
        ),
    )
}

/// Response for parameters that do not decode.
pub(crate) fn invalid_parameters(task: &A2ATask, err: serde_json::Error) -> A2AResponse {
    A2AResponse::failed(
        task.task_id,
        A2AError::new(
            ErrorKind::InvalidInput,
            format!("invalid {} parameters: {err}", task.task_type),
        ),
    )
}

fn card(role: AgentRole, description: &str, capabilities: Vec<TaskType>) -> AgentCard {
    AgentCard {
        name: role.display_name().to_string(),
        role,
        version: env!("CARGO_PKG_VERSION").to_string(),
        description: description.to_string(),
        capabilities,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct Fixed(AgentRole, Vec<TaskType>);

    #[async_trait]
    impl Agent for Fixed {
        fn card(&self) -> AgentCard {
            card(self.0, "test", self.1.clone())
        }

        async fn handle(&self, task: A2ATask, _reporter: Arc<dyn ProgressReporter>) -> A2AResponse {
            unsupported(&task, self.0)
        }
    }

    #[test]
    fn registry_rejects_overlapping_capabilities() {
        let registry = AgentRegistry::new();
        registry
            .register(Arc::new(Fixed(
                AgentRole::Consul,
                vec![TaskType::PlanMission, TaskType::RefinePlan],
            )))
            .expect("consul");
        let err = registry
            .register(Arc::new(Fixed(AgentRole::Augur, vec![TaskType::RefinePlan])))
            .err()
            .expect("conflict");
        assert!(matches!(err, LegionCoreError::AgentConflict(_)));
        assert!(matches!(
            registry.resolve(TaskType::Analyze).err(),
            Some(LegionCoreError::NoAgentFor(TaskType::Analyze))
        ));
        assert_eq!(registry.cards().len(), 1);
        assert_eq!(
            registry
                .resolve(TaskType::RefinePlan)
                .expect("resolve")
                .card()
                .role,
            AgentRole::Consul
        );
    }
}
