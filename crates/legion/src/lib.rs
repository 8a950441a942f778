//! Public SDK surface for Legion.
//!
//! This crate re-exports the orchestrator building blocks and provides a
//! small initialization helper to keep consumer setup consistent.

/// Re-export for convenience.
pub use legion_config as config;
pub use legion_core as core;
/// Re-export for convenience.
pub use legion_protocol as protocol;

pub use legion_config::LegionConfig;
pub use legion_core::{MissionSeed, Orchestrator};

#[inline]
/// Initialize logging using env_logger if the "logging" feature is enabled.
///
/// This is a no-op if the feature is not enabled. Binaries are still expected
/// to call this early in startup to ensure log output is wired up.
pub fn init_logging() {
    #[cfg(feature = "logging")]
    {
        let _ = env_logger::try_init();
    }
}
