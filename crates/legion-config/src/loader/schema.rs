//! Schema validation for Legion JSON5 configuration.

use super::SchemaMode;
use crate::ConfigError;
use legion_protocol::DeliverableFormat;
use serde_json::{Map, Value};

/// Validate a single config layer (or the merged config) against the schema.
pub(super) fn validate_layer_schema(
    value: &Value,
    mode: SchemaMode,
    layer: &str,
) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, "")?;
    ensure_allowed_keys(
        map,
        &[
            "$schema",
            "orchestrator",
            "timeouts",
            "persistence",
            "deliverables",
        ],
        layer,
        "",
    )?;

    if let Some(value) = map.get("$schema") {
        expect_string(value, layer, "$schema")?;
    }
    if let Some(value) = map.get("orchestrator") {
        validate_orchestrator(value, mode, layer, "orchestrator")?;
    }
    if let Some(value) = map.get("timeouts") {
        validate_timeouts(value, mode, layer, "timeouts")?;
    }
    if let Some(value) = map.get("persistence") {
        validate_persistence(value, layer, "persistence")?;
    }
    if let Some(value) = map.get("deliverables") {
        validate_deliverables(value, layer, "deliverables")?;
    }
    Ok(())
}

fn validate_orchestrator(
    value: &Value,
    mode: SchemaMode,
    layer: &str,
    path: &str,
) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, path)?;
    ensure_allowed_keys(
        map,
        &[
            "max_concurrent_provider_calls",
            "collect_attempts",
            "max_questions",
            "plan_approval_timeout_secs",
            "event_buffer",
        ],
        layer,
        path,
    )?;
    for key in [
        "max_concurrent_provider_calls",
        "collect_attempts",
        "max_questions",
        "event_buffer",
    ] {
        if let Some(value) = map.get(key) {
            expect_count(value, mode, layer, &join_path(path, key))?;
        }
    }
    if let Some(value) = map.get("plan_approval_timeout_secs") {
        if !value.is_null() {
            expect_count(
                value,
                mode,
                layer,
                &join_path(path, "plan_approval_timeout_secs"),
            )?;
        }
    }
    Ok(())
}

fn validate_timeouts(
    value: &Value,
    mode: SchemaMode,
    layer: &str,
    path: &str,
) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, path)?;
    let keys = ["plan_secs", "collect_secs", "analyze_secs", "create_secs"];
    ensure_allowed_keys(map, &keys, layer, path)?;
    for key in keys {
        if let Some(value) = map.get(key) {
            expect_count(value, mode, layer, &join_path(path, key))?;
        }
    }
    Ok(())
}

fn validate_persistence(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, path)?;
    ensure_allowed_keys(map, &["enabled", "path"], layer, path)?;
    if let Some(value) = map.get("enabled") {
        expect_bool(value, layer, &join_path(path, "enabled"))?;
    }
    if let Some(value) = map.get("path") {
        expect_string(value, layer, &join_path(path, "path"))?;
    }
    Ok(())
}

fn validate_deliverables(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, path)?;
    ensure_allowed_keys(map, &["default_formats"], layer, path)?;
    let Some(formats) = map.get("default_formats") else {
        return Ok(());
    };
    let formats_path = join_path(path, "default_formats");
    let Value::Array(entries) = formats else {
        return Err(invalid_field(layer, &formats_path, "expected array"));
    };
    for (idx, entry) in entries.iter().enumerate() {
        let entry_path = format!("{formats_path}[{idx}]");
        let Some(name) = entry.as_str() else {
            return Err(invalid_field(layer, &entry_path, "expected string"));
        };
        if serde_json::from_value::<DeliverableFormat>(Value::String(name.to_string())).is_err() {
            return Err(invalid_field(
                layer,
                &entry_path,
                "expected one of doc, sheet, slides",
            ));
        }
    }
    Ok(())
}

fn expect_object<'a>(
    value: &'a Value,
    layer: &str,
    path: &str,
) -> Result<&'a Map<String, Value>, ConfigError> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(invalid_field(layer, path, "expected object")),
    }
}

fn expect_string(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    if value.is_string() {
        Ok(())
    } else {
        Err(invalid_field(layer, path, "expected string"))
    }
}

fn expect_bool(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    if value.is_boolean() {
        Ok(())
    } else {
        Err(invalid_field(layer, path, "expected bool"))
    }
}

/// Expect a non-negative integer; the merged config also requires it non-zero.
fn expect_count(
    value: &Value,
    mode: SchemaMode,
    layer: &str,
    path: &str,
) -> Result<(), ConfigError> {
    let Some(count) = value.as_u64() else {
        return Err(invalid_field(layer, path, "expected non-negative integer"));
    };
    if mode == SchemaMode::Full && count == 0 {
        return Err(invalid_field(layer, path, "must be greater than zero"));
    }
    Ok(())
}

fn ensure_allowed_keys(
    map: &Map<String, Value>,
    allowed: &[&str],
    layer: &str,
    path: &str,
) -> Result<(), ConfigError> {
    for key in map.keys() {
        if !allowed.contains(&key.as_str()) {
            return Err(invalid_field(layer, &join_path(path, key), "unknown key"));
        }
    }
    Ok(())
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

fn invalid_field(layer: &str, path: &str, message: &str) -> ConfigError {
    let normalized_path = if path.is_empty() { "root" } else { path };
    ConfigError::InvalidField {
        path: format!("{layer}:{normalized_path}"),
        message: message.to_string(),
    }
}
