//! Reading config layers from disk.

use super::{ConfigLayerSource, DEFAULT_CONFIG_FILE, SYSTEM_CONFIG_PATH, SchemaMode, schema};
use crate::{ConfigError, LEGION_HOME_DIR};
use directories::UserDirs;
use log::debug;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

/// Load a layer if the path exists.
pub(super) fn load_optional_layer(
    source: ConfigLayerSource,
    path: &Path,
) -> Result<Option<Value>, ConfigError> {
    if !path.exists() {
        debug!(
            "optional layer missing (source={:?}, path={})",
            source,
            path.display()
        );
        return Ok(None);
    }
    load_required_layer(source, path).map(Some)
}

/// Load and type-check a layer that must exist.
pub(super) fn load_required_layer(
    source: ConfigLayerSource,
    path: &Path,
) -> Result<Value, ConfigError> {
    debug!(
        "loading config layer (source={:?}, path={})",
        source,
        path.display()
    );
    let contents = fs::read_to_string(path)?;
    let value: Value = json5::from_str(&contents)?;
    let label = format!("{}({})", source.label(), path.display());
    schema::validate_layer_schema(&value, SchemaMode::Partial, &label)?;
    Ok(value)
}

pub(super) fn default_system_config_path() -> Option<PathBuf> {
    #[cfg(any(unix, windows))]
    {
        Some(PathBuf::from(SYSTEM_CONFIG_PATH))
    }
    #[cfg(not(any(unix, windows)))]
    {
        None
    }
}

pub(super) fn default_user_config_path() -> Option<PathBuf> {
    UserDirs::new().map(|dirs| dirs.home_dir().join(LEGION_HOME_DIR).join(DEFAULT_CONFIG_FILE))
}
