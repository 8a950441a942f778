//! Configuration schema for Legion.

use crate::ConfigError;
use directories::UserDirs;
use legion_protocol::DeliverableFormat;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Directory under the user's home that holds Legion state.
pub const LEGION_HOME_DIR: &str = ".legion";

/// Root config for the Legion orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct LegionConfig {
    #[serde(default, rename = "$schema")]
    pub schema: Option<String>,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub deliverables: DeliverablesConfig,
}

impl LegionConfig {
    /// Start building a config programmatically with defaults applied.
    pub fn builder() -> LegionConfigBuilder {
        LegionConfigBuilder::new()
    }
}

/// Builder for assembling a `LegionConfig` in code.
#[derive(Debug, Default, Clone)]
pub struct LegionConfigBuilder {
    config: LegionConfig,
}

impl LegionConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: LegionConfig::default(),
        }
    }

    pub fn orchestrator(mut self, orchestrator: OrchestratorConfig) -> Self {
        self.config.orchestrator = orchestrator;
        self
    }

    pub fn timeouts(mut self, timeouts: TimeoutsConfig) -> Self {
        self.config.timeouts = timeouts;
        self
    }

    pub fn persistence(mut self, persistence: PersistenceConfig) -> Self {
        self.config.persistence = persistence;
        self
    }

    pub fn deliverables(mut self, deliverables: DeliverablesConfig) -> Self {
        self.config.deliverables = deliverables;
        self
    }

    /// Finalize and return the built `LegionConfig`.
    pub fn build(self) -> LegionConfig {
        self.config
    }
}

/// Mission driving policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrchestratorConfig {
    /// Process-wide cap on concurrent search and creation calls.
    #[serde(default = "default_max_concurrent_provider_calls")]
    pub max_concurrent_provider_calls: usize,
    /// Attempts per question during collection; only transient failures retry.
    #[serde(default = "default_collect_attempts")]
    pub collect_attempts: u32,
    /// Upper bound on questions kept from a plan.
    #[serde(default = "default_max_questions")]
    pub max_questions: usize,
    /// Fail missions left unapproved in `planning` for this long. Unbounded when unset.
    #[serde(default)]
    pub plan_approval_timeout_secs: Option<u64>,
    /// Per-subscriber event buffer; slow subscribers lose the oldest events.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_provider_calls: default_max_concurrent_provider_calls(),
            collect_attempts: default_collect_attempts(),
            max_questions: default_max_questions(),
            plan_approval_timeout_secs: None,
            event_buffer: default_event_buffer(),
        }
    }
}

impl OrchestratorConfig {
    pub fn plan_approval_timeout(&self) -> Option<Duration> {
        self.plan_approval_timeout_secs.map(Duration::from_secs)
    }
}

fn default_max_concurrent_provider_calls() -> usize {
    4
}

fn default_collect_attempts() -> u32 {
    1
}

fn default_max_questions() -> usize {
    8
}

fn default_event_buffer() -> usize {
    256
}

/// Await timeouts for each phase's A2A tasks, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeoutsConfig {
    #[serde(default = "default_plan_secs")]
    pub plan_secs: u64,
    #[serde(default = "default_collect_secs")]
    pub collect_secs: u64,
    #[serde(default = "default_analyze_secs")]
    pub analyze_secs: u64,
    #[serde(default = "default_create_secs")]
    pub create_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            plan_secs: default_plan_secs(),
            collect_secs: default_collect_secs(),
            analyze_secs: default_analyze_secs(),
            create_secs: default_create_secs(),
        }
    }
}

impl TimeoutsConfig {
    pub fn plan(&self) -> Duration {
        Duration::from_secs(self.plan_secs)
    }

    pub fn collect(&self) -> Duration {
        Duration::from_secs(self.collect_secs)
    }

    pub fn analyze(&self) -> Duration {
        Duration::from_secs(self.analyze_secs)
    }

    pub fn create(&self) -> Duration {
        Duration::from_secs(self.create_secs)
    }
}

fn default_plan_secs() -> u64 {
    120
}

fn default_collect_secs() -> u64 {
    90
}

fn default_analyze_secs() -> u64 {
    180
}

fn default_create_secs() -> u64 {
    120
}

/// Durable mission storage.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PersistenceConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Directory for mission rollouts; defaults to `~/.legion/missions`.
    #[serde(default)]
    pub path: Option<String>,
}

impl PersistenceConfig {
    /// Resolve the directory mission rollouts are written to.
    pub fn resolve_root(&self) -> Result<PathBuf, ConfigError> {
        if let Some(path) = &self.path {
            return Ok(PathBuf::from(path));
        }
        let dirs = UserDirs::new().ok_or(ConfigError::NoHomeDir)?;
        Ok(dirs.home_dir().join(LEGION_HOME_DIR).join("missions"))
    }
}

/// Deliverable defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeliverablesConfig {
    /// Formats used when neither the user nor the plan names any.
    #[serde(default = "default_formats")]
    pub default_formats: Vec<DeliverableFormat>,
}

impl Default for DeliverablesConfig {
    fn default() -> Self {
        Self {
            default_formats: default_formats(),
        }
    }
}

fn default_formats() -> Vec<DeliverableFormat> {
    vec![DeliverableFormat::Doc]
}
