// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `config.json` schema (version 2) with legacy normalization.
//!
//! Strict mode rejects unknown top-level keys; lenient mode preserves
//! them under `ext` and warns. Legacy (unversioned, flat) configs are
//! lifted into the v2 sections and rewritten on load.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::config::ConfigMode;

pub const CONFIG_VERSION: u32 = 2;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecuritySettings {
    /// Active security profile preset.
    #[serde(default = "default_profile")]
    pub profile: String,
    /// Server-wide approval timeout. `Some(0)` = never expire;
    /// `None` = built-in default (120000 ms).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_timeout_ms: Option<u64>,
}

fn default_profile() -> String {
    "host".to_owned()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentitySettings {
    #[serde(default)]
    pub user_name: String,
    /// Valid bearer tokens (`sk_` prefixed). Rotation appends; earlier
    /// tokens stay valid until explicitly revoked.
    #[serde(default)]
    pub tokens: Vec<String>,
    /// Ed25519 signing key, PKCS#8 document, base64.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteSettings {
    /// Invite validity window in seconds.
    #[serde(default = "default_invite_ttl")]
    pub ttl_secs: u64,
}

fn default_invite_ttl() -> u64 {
    600
}

impl Default for InviteSettings {
    fn default() -> Self {
        Self { ttl_secs: default_invite_ttl() }
    }
}

/// The whole persisted config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub config_version: u32,
    #[serde(default)]
    pub security: SecuritySettings,
    #[serde(default)]
    pub identity: IdentitySettings,
    #[serde(default)]
    pub invite: InviteSettings,
    /// Forward-compat keys live here, never at the top level.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub ext: Map<String, Value>,
}

impl Settings {
    pub fn fresh() -> Self {
        Self { config_version: CONFIG_VERSION, ..Self::default() }
    }
}

/// Error from parsing a config document.
#[derive(Debug)]
pub enum SettingsError {
    Malformed(String),
    /// Strict mode: unknown top-level keys.
    UnknownKeys(Vec<String>),
    /// A newer config version than this build understands.
    VersionTooNew(u32),
}

impl std::fmt::Display for SettingsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed(e) => write!(f, "malformed config: {e}"),
            Self::UnknownKeys(keys) => write!(f, "unknown config keys: {}", keys.join(", ")),
            Self::VersionTooNew(v) => write!(f, "config version {v} is newer than this build"),
        }
    }
}

impl std::error::Error for SettingsError {}

const KNOWN_KEYS: &[&str] = &["configVersion", "security", "identity", "invite", "ext"];

/// Parse a config document. Returns the settings plus whether the file
/// should be rewritten (legacy normalization or lenient cleanup).
pub fn parse(contents: &str, mode: ConfigMode) -> Result<(Settings, bool), SettingsError> {
    let value: Value =
        serde_json::from_str(contents).map_err(|e| SettingsError::Malformed(e.to_string()))?;
    let Value::Object(mut map) = value else {
        return Err(SettingsError::Malformed("top level must be an object".to_owned()));
    };

    let version = map.get("configVersion").and_then(Value::as_u64);
    match version {
        None => return normalize_legacy(map).map(|s| (s, true)),
        Some(v) if v as u32 > CONFIG_VERSION => {
            return Err(SettingsError::VersionTooNew(v as u32));
        }
        Some(_) => {}
    }

    let unknown: Vec<String> =
        map.keys().filter(|k| !KNOWN_KEYS.contains(&k.as_str())).cloned().collect();
    let mut rewrite = false;
    if !unknown.is_empty() {
        match mode {
            ConfigMode::Strict => return Err(SettingsError::UnknownKeys(unknown)),
            ConfigMode::Lenient => {
                warn!(keys = ?unknown, "preserving unknown config keys under ext");
                let moved: Vec<(String, Value)> = unknown
                    .iter()
                    .filter_map(|k| map.remove(k).map(|v| (k.clone(), v)))
                    .collect();
                let ext = map
                    .entry("ext".to_owned())
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Value::Object(ext_map) = ext {
                    for (k, v) in moved {
                        ext_map.insert(k, v);
                    }
                }
                rewrite = true;
            }
        }
    }

    let mut settings: Settings = serde_json::from_value(Value::Object(map))
        .map_err(|e| SettingsError::Malformed(e.to_string()))?;
    settings.config_version = CONFIG_VERSION;
    Ok((settings, rewrite))
}

/// Lift a legacy flat config into the v2 sections.
fn normalize_legacy(map: Map<String, Value>) -> Result<Settings, SettingsError> {
    let mut settings = Settings::fresh();

    if let Some(name) = map.get("userName").and_then(Value::as_str) {
        settings.identity.user_name = name.to_owned();
    }
    if let Some(token) = map.get("token").and_then(Value::as_str) {
        settings.identity.tokens.push(token.to_owned());
    }
    if let Some(profile) = map.get("securityProfile").and_then(Value::as_str) {
        settings.security.profile = profile.to_owned();
    }
    if let Some(timeout) = map.get("approvalTimeoutMs").and_then(Value::as_u64) {
        settings.security.approval_timeout_ms = Some(timeout);
    }

    // Anything unrecognized rides along in ext rather than being dropped.
    const LEGACY_KEYS: &[&str] = &["userName", "token", "securityProfile", "approvalTimeoutMs"];
    for (key, value) in map {
        if !LEGACY_KEYS.contains(&key.as_str()) {
            settings.ext.insert(key, value);
        }
    }
    Ok(settings)
}

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;
