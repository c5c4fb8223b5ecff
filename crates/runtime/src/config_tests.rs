// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn base_config() -> RuntimeConfig {
    RuntimeConfig {
        boards_dir: "data/boards".into(),
        context_ttl_secs: 3600,
        context_sweep_secs: 60,
        history_retention_days: 30,
        history_sweep_secs: 3600,
        autopilot_stop_grace_ms: 500,
        autopilot_debounce_ms: 1000,
        autopilot_poll_secs: 5,
        link_timeout_secs: 30,
        log_format: "json".to_owned(),
        log_level: "info".to_owned(),
    }
}

#[test]
fn validate_accepts_defaults() {
    assert!(base_config().validate().is_ok());
}

#[test]
fn validate_rejects_zero_ttl() {
    let mut config = base_config();
    config.context_ttl_secs = 0;
    assert!(config.validate().is_err());
}

#[test]
fn validate_rejects_zero_history_sweep() {
    let mut config = base_config();
    config.history_sweep_secs = 0;
    assert!(config.validate().is_err());
}

#[test]
fn validate_rejects_unknown_log_format() {
    let mut config = base_config();
    config.log_format = "yaml".to_owned();
    assert!(config.validate().is_err());
}

#[test]
fn durations_convert_from_configured_units() {
    let config = base_config();
    assert_eq!(config.context_ttl(), Duration::from_secs(3600));
    assert_eq!(config.autopilot_stop_grace(), Duration::from_millis(500));
}
