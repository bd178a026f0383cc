//! Layered configuration: TOML file under `KAIROS__*` environment overrides
//!
//! Environment variables are process-global, so these tests run serially.

use kairos_core::{DriftResetMode, EngineConfig, KairosError};
use serial_test::serial;
use std::env;
use std::fs;
use tempfile::TempDir;

#[test]
#[serial]
fn test_load_without_sources_is_default() {
    let config = EngineConfig::load(None).unwrap();
    assert_eq!(config, EngineConfig::default());
}

#[test]
#[serial]
fn test_file_then_environment_override() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("kairos.toml");
    fs::write(
        &path,
        r#"
        [drift]
        reset_mode = "soft"
        variance_threshold = 0.5

        [selection]
        close_competition_min_trials = 10
        "#,
    )
    .unwrap();

    env::set_var("KAIROS__DRIFT__VARIANCE_THRESHOLD", "0.4");
    let result = EngineConfig::load(Some(&path));
    env::remove_var("KAIROS__DRIFT__VARIANCE_THRESHOLD");

    let config = result.unwrap();
    assert_eq!(config.drift.reset_mode, DriftResetMode::Soft);
    assert_eq!(config.drift.variance_threshold, 0.4);
    assert_eq!(config.selection.close_competition_min_trials, 10);
    assert_eq!(config.dose.max_secs, 180.0);
}

#[test]
#[serial]
fn test_invalid_override_is_rejected() {
    env::set_var("KAIROS__PRIOR__ALPHA", "-1.0");
    let result = EngineConfig::load(None);
    env::remove_var("KAIROS__PRIOR__ALPHA");

    assert!(matches!(result, Err(KairosError::InvalidConfig(_))));
}

#[test]
#[serial]
fn test_missing_config_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    let result = EngineConfig::load(Some(&dir.path().join("absent.toml")));
    assert!(matches!(result, Err(KairosError::Config(_))));
}
