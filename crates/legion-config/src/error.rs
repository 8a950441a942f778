//! Error types for Legion config loading.

use thiserror::Error;

/// Errors returned while loading or validating config.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    ReadFailed(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    ParseFailed(#[from] json5::Error),
    #[error("failed to decode config: {0}")]
    DecodeFailed(#[from] serde_json::Error),
    /// A field failed schema validation; `path` is `layer:dotted.path`.
    #[error("invalid config at {path}: {message}")]
    InvalidField { path: String, message: String },
    /// A cross-field invariant does not hold.
    #[error("invalid config: {0}")]
    Invalid(String),
    /// No home directory could be resolved for a default path.
    #[error("home directory unavailable")]
    NoHomeDir,
}
