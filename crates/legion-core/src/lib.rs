//! Core mission orchestration for Legion.
//!
//! This crate owns the phase state machine, the A2A broker, the mission
//! store and its persistence, the event bus, and the four role adapters.

pub mod a2a;
pub mod agents;
pub mod bus;
pub mod error;
pub mod orchestrator;
pub mod providers;
pub mod state;
pub mod store;
pub mod types;

pub use a2a::{A2ABroker, PendingTask};
/// Role adapters and discovery.
pub use agents::{
    Agent, AgentCard, AgentRegistry, AugurAgent, CenturionAgent, ConsulAgent, NoopReporter,
    ProgressReporter, ScribeAgent,
};
pub use bus::{EventBus, EventStream, MissionSubscription};
pub use error::LegionCoreError;
pub use legion_protocol::EventSink;
pub use orchestrator::Orchestrator;
/// External collaborator interfaces.
pub use providers::{
    CreatedArtifact, CreationProvider, ProviderError, ReasoningProvider, SearchHit,
    SearchProvider,
};
pub use state::{JsonlStateStore, StateError, StateStore};
pub use store::MissionStore;
pub use types::{Mission, MissionMutation, MissionSeed, MissionSummary};
