// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;

use super::*;

fn parse(args: &[&str]) -> Config {
    let mut full = vec!["reins"];
    full.extend_from_slice(args);
    Config::parse_from(full)
}

#[test]
fn requires_agent_command() {
    let config = parse(&[]);
    assert!(config.validate().is_err());

    let config = parse(&["--", "fake-agent", "--jsonl"]);
    assert!(config.validate().is_ok());
    assert_eq!(config.agent_command, vec!["fake-agent", "--jsonl"]);
}

#[test]
fn rejects_zero_limits() {
    let config = parse(&["--max-sessions", "0", "--", "agent"]);
    assert!(config.validate().is_err());

    let config = parse(&["--ring-capacity", "0", "--", "agent"]);
    assert!(config.validate().is_err());
}

#[test]
fn config_mode_parsing() {
    let config = parse(&["--config-mode", "strict", "--", "agent"]);
    assert_eq!(config.config_mode_enum().unwrap(), ConfigMode::Strict);

    let config = parse(&["--config-mode", "bogus", "--", "agent"]);
    assert!(config.validate().is_err());
}

#[test]
fn duration_helpers() {
    let config = parse(&["--stop-abort-timeout-ms", "250", "--", "agent"]);
    assert_eq!(config.stop_abort_timeout(), Duration::from_millis(250));
    assert_eq!(config.rpc_timeout(), Duration::from_millis(30000));
    assert_eq!(config.rpc_refresh_timeout(), Duration::from_millis(8000));
}

#[test]
fn auth_file_defaults_under_data_dir() {
    let config = parse(&["--data-dir", "/tmp/reins-test", "--", "agent"]);
    assert_eq!(config.resolved_auth_file(), PathBuf::from("/tmp/reins-test/auth.json"));
}
