//! Tests for layered configuration loading.

use super::*;
use crate::{OrchestratorConfig, TimeoutsConfig};
use legion_protocol::DeliverableFormat;
use pretty_assertions::assert_eq;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

fn write_json5(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("dir");
    }
    fs::write(path, contents).expect("write");
}

fn isolated_options(cwd: &Path) -> LayeredConfigOptions {
    let mut options = LayeredConfigOptions::new(cwd);
    options.system_config_path = None;
    options.user_config_path = None;
    options
}

#[test]
fn parse_minimal_config() {
    let config = LegionConfig::load_from_str("{}").expect("config");
    assert_eq!(config.orchestrator.max_concurrent_provider_calls, 4);
    assert_eq!(config.orchestrator.collect_attempts, 1);
    assert_eq!(config.orchestrator.plan_approval_timeout(), None);
    assert_eq!(config.timeouts.collect(), Duration::from_secs(90));
    assert_eq!(
        config.deliverables.default_formats,
        vec![DeliverableFormat::Doc]
    );
    assert_eq!(config.persistence.enabled, false);
}

#[test]
fn rejects_unknown_top_level_key() {
    let err = LegionConfig::load_from_str("{ unexpected: true }").unwrap_err();
    assert!(format!("{err}").contains("unknown key"));
}

#[test]
fn rejects_zero_concurrency() {
    let json5 = "{ orchestrator: { max_concurrent_provider_calls: 0 } }";
    let err = LegionConfig::load_from_str(json5).unwrap_err();
    let msg = format!("{err}");
    assert!(msg.contains("orchestrator.max_concurrent_provider_calls"));
}

#[test]
fn validate_rejects_zero_limits_in_built_configs() {
    let config = LegionConfig::builder()
        .orchestrator(OrchestratorConfig {
            max_questions: 0,
            ..OrchestratorConfig::default()
        })
        .build();
    let err = config.validate().unwrap_err();
    assert!(format!("{err}").contains("orchestrator.max_questions"));

    let config = LegionConfig::builder()
        .timeouts(TimeoutsConfig {
            create_secs: 0,
            ..TimeoutsConfig::default()
        })
        .build();
    let err = config.validate().unwrap_err();
    assert!(format!("{err}").contains("timeouts.create_secs"));

    assert!(LegionConfig::default().validate().is_ok());
}

#[test]
fn rejects_unknown_format() {
    let json5 = r#"{ deliverables: { default_formats: ["doc", "video"] } }"#;
    let err = LegionConfig::load_from_str(json5).unwrap_err();
    let msg = format!("{err}");
    assert!(msg.contains("deliverables.default_formats[1]"));
}

#[test]
fn parses_plan_approval_timeout() {
    let json5 = "{ orchestrator: { plan_approval_timeout_secs: 600 } }";
    let config = LegionConfig::load_from_str(json5).expect("config");
    assert_eq!(
        config.orchestrator.plan_approval_timeout(),
        Some(Duration::from_secs(600))
    );
}

#[test]
fn explicit_persistence_path_wins() {
    let json5 = r#"{ persistence: { enabled: true, path: "/var/lib/legion" } }"#;
    let config = LegionConfig::load_from_str(json5).expect("config");
    assert_eq!(
        config.persistence.resolve_root().expect("root"),
        std::path::PathBuf::from("/var/lib/legion")
    );
}

#[test]
fn cwd_layer_overrides_user_layer() {
    let temp = TempDir::new().expect("tmp");
    let root = temp.path();
    let cwd = root.join("work");
    fs::create_dir_all(&cwd).expect("cwd");

    let system_config = root.join("system.json5");
    write_json5(
        &system_config,
        "{ orchestrator: { max_questions: 3, event_buffer: 32 } }",
    );
    let user_config = root.join("user.json5");
    write_json5(&user_config, "{ orchestrator: { max_questions: 5 } }");
    write_json5(
        &cwd.join(DEFAULT_CONFIG_FILE),
        "{ orchestrator: { max_questions: 6 } }",
    );

    let mut options = isolated_options(&cwd);
    options.system_config_path = Some(system_config);
    options.user_config_path = Some(user_config);

    let layered = LegionConfig::load_layered_with_options(options).expect("layered");
    assert_eq!(layered.config.orchestrator.max_questions, 6);
    assert_eq!(layered.config.orchestrator.event_buffer, 32);
    let sources: Vec<_> = layered.layers.iter().map(|layer| layer.source).collect();
    assert_eq!(
        sources,
        vec![
            ConfigLayerSource::System,
            ConfigLayerSource::User,
            ConfigLayerSource::Cwd
        ]
    );
}

#[test]
fn runtime_override_wins() {
    let temp = TempDir::new().expect("tmp");
    let root = temp.path();
    write_json5(
        &root.join(DEFAULT_CONFIG_FILE),
        "{ timeouts: { collect_secs: 30 } }",
    );
    let runtime_config = root.join("runtime.json5");
    write_json5(&runtime_config, "{ timeouts: { collect_secs: 5 } }");

    let options = isolated_options(root).with_runtime_path(&runtime_config);
    let layered = LegionConfig::load_layered_with_options(options).expect("layered");
    assert_eq!(layered.config.timeouts.collect_secs, 5);
    assert_eq!(layered.config.timeouts.plan_secs, 120);
}

#[test]
fn missing_runtime_layer_is_an_error() {
    let temp = TempDir::new().expect("tmp");
    let options = isolated_options(temp.path()).with_runtime_path(temp.path().join("nope.json5"));
    let err = LegionConfig::load_layered_with_options(options).unwrap_err();
    assert!(matches!(err, ConfigError::ReadFailed(_)));
}

#[test]
fn layer_errors_name_the_layer() {
    let temp = TempDir::new().expect("tmp");
    write_json5(
        &temp.path().join(DEFAULT_CONFIG_FILE),
        "{ persistence: { enabled: \"yes\" } }",
    );
    let err = LegionConfig::load_layered_with_options(isolated_options(temp.path())).unwrap_err();
    let msg = format!("{err}");
    assert!(msg.contains("cwd("));
    assert!(msg.contains("persistence.enabled"));
}
