//! Test helpers shared across Legion crates.

pub mod creation;
pub mod events;
pub mod fixtures;
pub mod reasoning;
pub mod search;

pub use creation::StubCreation;
pub use events::{drain_events, event_names, phase_trail};
pub use fixtures::{
    default_orchestrator, orchestrator_with, test_config, wait_for_mission, wait_for_plan,
    wait_for_terminal,
};
pub use reasoning::{FailingReasoning, ScriptedReasoning, THREE_QUESTION_PLAN, TWO_INSIGHT_ANALYSIS};
pub use search::ScriptedSearch;
