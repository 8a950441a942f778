//! Layered configuration loader.
//!
//! Discovers system, user, and working-directory layers, validates each one
//! against the schema, merges them in precedence order, and produces the
//! effective `LegionConfig`.

mod layer_io;
mod schema;
mod utils;

#[cfg(test)]
mod tests;

use crate::{ConfigError, LegionConfig};
use log::{debug, info};
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Config filename looked up in every layer.
const DEFAULT_CONFIG_FILE: &str = "legion.json5";

#[cfg(unix)]
const SYSTEM_CONFIG_PATH: &str = "/etc/legion/legion.json5";
#[cfg(windows)]
const SYSTEM_CONFIG_PATH: &str = "C:\\ProgramData\\legion\\legion.json5";

/// Effective config plus metadata about which layers were loaded.
#[derive(Debug, Clone)]
pub struct LayeredConfig {
    pub config: LegionConfig,
    pub layers: Vec<ConfigLayer>,
}

/// Origin for a single config layer, lowest precedence first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigLayerSource {
    System,
    User,
    Cwd,
    /// Explicit override files; applied last.
    Runtime,
}

impl ConfigLayerSource {
    fn label(&self) -> &'static str {
        match self {
            ConfigLayerSource::System => "system",
            ConfigLayerSource::User => "user",
            ConfigLayerSource::Cwd => "cwd",
            ConfigLayerSource::Runtime => "runtime",
        }
    }
}

/// Metadata about a loaded config layer.
#[derive(Debug, Clone)]
pub struct ConfigLayer {
    pub source: ConfigLayerSource,
    pub path: PathBuf,
}

/// Schema validation mode for layered configs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SchemaMode {
    /// A single layer; values are type-checked only.
    Partial,
    /// The effective config; range checks apply too.
    Full,
}

/// Options controlling layer discovery and overrides.
#[derive(Debug, Clone)]
pub struct LayeredConfigOptions {
    pub cwd: PathBuf,
    /// Defaults to `/etc/legion/legion.json5` on Unix.
    pub system_config_path: Option<PathBuf>,
    /// Defaults to `~/.legion/legion.json5`.
    pub user_config_path: Option<PathBuf>,
    pub runtime_paths: Vec<PathBuf>,
}

impl LayeredConfigOptions {
    /// Create options with default layer locations for the provided cwd.
    pub fn new(cwd: impl AsRef<Path>) -> Self {
        Self {
            cwd: cwd.as_ref().to_path_buf(),
            system_config_path: layer_io::default_system_config_path(),
            user_config_path: layer_io::default_user_config_path(),
            runtime_paths: Vec::new(),
        }
    }

    /// Add a runtime override config path that is applied last.
    pub fn with_runtime_path(mut self, path: impl AsRef<Path>) -> Self {
        self.runtime_paths.push(path.as_ref().to_path_buf());
        self
    }
}

impl LegionConfig {
    /// Load a single config from a path (no layering).
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        info!("loading config from path: {}", path.as_ref().display());
        let contents = fs::read_to_string(path)?;
        let value: Value = json5::from_str(&contents)?;
        config_from_value(value, "config")
    }

    /// Load a single config from JSON5 contents (no layering).
    pub fn load_from_str(contents: &str) -> Result<Self, ConfigError> {
        debug!("loading config from raw contents (len={})", contents.len());
        let value: Value = json5::from_str(contents)?;
        config_from_value(value, "config")
    }

    /// Load the layered stack using the default layer locations.
    pub fn load_layered(cwd: impl AsRef<Path>) -> Result<LayeredConfig, ConfigError> {
        Self::load_layered_with_options(LayeredConfigOptions::new(cwd))
    }

    /// Load the layered stack using explicit layer locations.
    ///
    /// Precedence (low -> high): system, user, cwd, runtime overrides.
    pub fn load_layered_with_options(
        options: LayeredConfigOptions,
    ) -> Result<LayeredConfig, ConfigError> {
        let cwd = utils::normalize_path(&options.cwd)?;
        let mut layers = Vec::new();
        let mut merged = Value::Object(serde_json::Map::new());
        let mut seen_paths = HashSet::new();

        let cwd_path = cwd.join(DEFAULT_CONFIG_FILE);
        let candidates = [
            (
                ConfigLayerSource::System,
                options.system_config_path.as_deref(),
            ),
            (ConfigLayerSource::User, options.user_config_path.as_deref()),
            (ConfigLayerSource::Cwd, Some(cwd_path.as_path())),
        ];
        for (source, path) in candidates {
            let Some(path) = path else {
                continue;
            };
            if !seen_paths.insert(utils::unique_path(path)) {
                debug!(
                    "skipping duplicate layer (source={:?}, path={})",
                    source,
                    path.display()
                );
                continue;
            }
            if let Some(value) = layer_io::load_optional_layer(source, path)? {
                utils::merge_json_values(&mut merged, &value);
                layers.push(ConfigLayer {
                    source,
                    path: path.to_path_buf(),
                });
            }
        }

        for runtime_path in &options.runtime_paths {
            let value = layer_io::load_required_layer(ConfigLayerSource::Runtime, runtime_path)?;
            utils::merge_json_values(&mut merged, &value);
            layers.push(ConfigLayer {
                source: ConfigLayerSource::Runtime,
                path: runtime_path.clone(),
            });
        }

        let config = config_from_value(merged, "effective")?;
        info!("layered config loaded (layers={})", layers.len());
        Ok(LayeredConfig { config, layers })
    }

    /// Validate invariants that cannot be expressed in serde.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let orchestrator = &self.orchestrator;
        if orchestrator.max_concurrent_provider_calls == 0 {
            return Err(ConfigError::Invalid(
                "orchestrator.max_concurrent_provider_calls must be at least 1".to_string(),
            ));
        }
        if orchestrator.collect_attempts == 0 {
            return Err(ConfigError::Invalid(
                "orchestrator.collect_attempts must be at least 1".to_string(),
            ));
        }
        if orchestrator.max_questions == 0 {
            return Err(ConfigError::Invalid(
                "orchestrator.max_questions must be at least 1".to_string(),
            ));
        }
        if orchestrator.event_buffer == 0 {
            return Err(ConfigError::Invalid(
                "orchestrator.event_buffer must be at least 1".to_string(),
            ));
        }
        if orchestrator.plan_approval_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "orchestrator.plan_approval_timeout_secs must be at least 1 when set".to_string(),
            ));
        }
        let timeouts = &self.timeouts;
        for (name, secs) in [
            ("plan_secs", timeouts.plan_secs),
            ("collect_secs", timeouts.collect_secs),
            ("analyze_secs", timeouts.analyze_secs),
            ("create_secs", timeouts.create_secs),
        ] {
            if secs == 0 {
                return Err(ConfigError::Invalid(format!(
                    "timeouts.{name} must be at least 1"
                )));
            }
        }
        if self.deliverables.default_formats.is_empty() {
            return Err(ConfigError::Invalid(
                "deliverables.default_formats must name at least one format".to_string(),
            ));
        }
        Ok(())
    }
}

fn config_from_value(value: Value, label: &str) -> Result<LegionConfig, ConfigError> {
    schema::validate_layer_schema(&value, SchemaMode::Full, label)?;
    let config: LegionConfig = serde_json::from_value(value)?;
    config.validate()?;
    Ok(config)
}
