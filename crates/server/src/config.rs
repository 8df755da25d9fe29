// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Personal automation server for steering coding agents.
#[derive(Debug, Clone, Parser)]
#[command(name = "reins", version, about)]
pub struct Config {
    /// HTTP/WebSocket port to listen on.
    #[arg(long, env = "REINS_PORT", default_value = "8787")]
    pub port: u16,

    /// Host address to bind to.
    #[arg(long, env = "REINS_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Data directory for config, sessions, and workspaces.
    #[arg(long, env = "REINS_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Credentials file for the auth-substitution proxy.
    #[arg(long, env = "REINS_AUTH_FILE")]
    pub auth_file: Option<PathBuf>,

    /// Port for the local auth-substitution proxy (0 = ephemeral).
    #[arg(long, env = "REINS_PROXY_PORT", default_value = "0")]
    pub proxy_port: u16,

    /// Maximum concurrent sessions across all workspaces.
    #[arg(long = "max-sessions", env = "REINS_MAX_SESSIONS", default_value = "12")]
    pub max_sessions_global: usize,

    /// Maximum concurrent sessions per workspace.
    #[arg(
        long = "max-sessions-workspace",
        env = "REINS_MAX_SESSIONS_WORKSPACE",
        default_value = "4"
    )]
    pub max_sessions_per_workspace: usize,

    /// Event ring capacity (events retained per session for replay).
    #[arg(long, env = "REINS_RING_CAPACITY", default_value = "1024")]
    pub ring_capacity: usize,

    /// Turn dedupe cache capacity.
    #[arg(long, env = "REINS_DEDUPE_CAPACITY", default_value = "256")]
    pub dedupe_capacity: usize,

    /// Turn dedupe TTL in seconds.
    #[arg(long, env = "REINS_DEDUPE_TTL", default_value = "600")]
    pub dedupe_ttl_secs: u64,

    /// Milliseconds to wait for the agent-ready sentinel after spawn.
    #[arg(long, env = "REINS_SPAWN_READY_TIMEOUT_MS", default_value = "30000")]
    pub spawn_ready_timeout_ms: u64,

    /// Milliseconds before a graceful stop escalates to a second abort.
    #[arg(long, env = "REINS_STOP_ABORT_TIMEOUT_MS", default_value = "5000")]
    pub stop_abort_timeout_ms: u64,

    /// Milliseconds after the second abort before the stop is declared failed.
    #[arg(long, env = "REINS_STOP_ABORT_RETRY_TIMEOUT_MS", default_value = "10000")]
    pub stop_abort_retry_timeout_ms: u64,

    /// Default RPC command timeout in milliseconds.
    #[arg(long, env = "REINS_RPC_TIMEOUT_MS", default_value = "30000")]
    pub rpc_timeout_ms: u64,

    /// Timeout for follow-up state refresh commands in milliseconds.
    #[arg(long, env = "REINS_RPC_REFRESH_TIMEOUT_MS", default_value = "8000")]
    pub rpc_refresh_timeout_ms: u64,

    /// Seconds a container workspace may sit with zero sessions before
    /// its idle-stop fires (0 = disabled).
    #[arg(long, env = "REINS_IDLE_STOP_SECS", default_value = "900")]
    pub idle_stop_secs: u64,

    /// Default approval timeout for pending permissions in milliseconds
    /// (0 = never expire).
    #[arg(long, env = "REINS_APPROVAL_TIMEOUT_MS", default_value = "120000")]
    pub approval_timeout_ms: u64,

    /// Config file handling for unknown keys (strict or lenient).
    #[arg(long, env = "REINS_CONFIG_MODE", default_value = "lenient")]
    pub config_mode: String,

    /// Security profile preset (host or container).
    #[arg(long, env = "REINS_SECURITY_PROFILE", default_value = "host")]
    pub security_profile: String,

    /// Log format (json or text).
    #[arg(long, env = "REINS_LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "REINS_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Agent command to spawn per session (after --).
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub agent_command: Vec<String>,
}

/// How the config loader treats unknown top-level keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigMode {
    /// Unknown keys are an error.
    Strict,
    /// Unknown keys are preserved and logged as warnings.
    Lenient,
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.agent_command.is_empty() {
            anyhow::bail!("an agent command must be specified after --");
        }
        if self.max_sessions_global == 0 || self.max_sessions_per_workspace == 0 {
            anyhow::bail!("session limits must be at least 1");
        }
        if self.ring_capacity == 0 {
            anyhow::bail!("--ring-capacity must be at least 1");
        }
        self.config_mode_enum()?;
        self.security_profile_enum()?;
        Ok(())
    }

    pub fn config_mode_enum(&self) -> anyhow::Result<ConfigMode> {
        match self.config_mode.to_lowercase().as_str() {
            "strict" => Ok(ConfigMode::Strict),
            "lenient" => Ok(ConfigMode::Lenient),
            other => anyhow::bail!("invalid config mode: {other}"),
        }
    }

    pub fn security_profile_enum(&self) -> anyhow::Result<crate::policy::SecurityProfile> {
        crate::policy::SecurityProfile::parse(&self.security_profile)
            .ok_or_else(|| anyhow::anyhow!("invalid security profile: {}", self.security_profile))
    }

    /// Resolve the data directory, defaulting to `$HOME/.reins`.
    pub fn resolved_data_dir(&self) -> PathBuf {
        if let Some(ref dir) = self.data_dir {
            return dir.clone();
        }
        match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(".reins"),
            None => PathBuf::from(".reins"),
        }
    }

    /// Resolve the proxy credentials file, defaulting to `<data_dir>/auth.json`.
    pub fn resolved_auth_file(&self) -> PathBuf {
        self.auth_file.clone().unwrap_or_else(|| self.resolved_data_dir().join("auth.json"))
    }

    pub fn spawn_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.spawn_ready_timeout_ms)
    }

    pub fn stop_abort_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_abort_timeout_ms)
    }

    pub fn stop_abort_retry_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_abort_retry_timeout_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn rpc_refresh_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_refresh_timeout_ms)
    }

    pub fn idle_stop_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_stop_secs)
    }

    pub fn dedupe_ttl(&self) -> Duration {
        Duration::from_secs(self.dedupe_ttl_secs)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
