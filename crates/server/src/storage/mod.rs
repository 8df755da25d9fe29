// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! File-backed persistence for sessions, workspaces, themes, device
//! tokens, and config. Files are owner-only (0600 files, 0700 dirs).

pub mod settings;

pub use settings::{Settings, SettingsError};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ConfigMode;
use crate::session::record::SessionRecord;
use crate::workspace::WorkspaceRecord;

/// A registered push device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceToken {
    pub token: String,
    pub device_name: String,
    pub created_at: u64,
}

/// The storage collaborator: a simple key/value persistence of sessions,
/// workspaces, and config.
pub struct Storage {
    root: PathBuf,
    settings: RwLock<Settings>,
    device_tokens: RwLock<Vec<DeviceToken>>,
    thinking_levels: RwLock<HashMap<String, String>>,
    mode: ConfigMode,
}

impl Storage {
    /// Open (or initialize) the data directory.
    pub fn open(root: &Path, mode: ConfigMode) -> anyhow::Result<Self> {
        create_private_dir(root)?;
        for sub in ["sessions", "workspaces", "themes"] {
            create_private_dir(&root.join(sub))?;
        }

        let config_path = root.join("config.json");
        let settings = match std::fs::read_to_string(&config_path) {
            Ok(contents) => {
                let (settings, rewrite) = settings::parse(&contents, mode)?;
                if rewrite {
                    write_private_json(&config_path, &settings)?;
                }
                settings
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let settings = Settings::fresh();
                write_private_json(&config_path, &settings)?;
                settings
            }
            Err(e) => return Err(e.into()),
        };

        let device_tokens = read_json_or_default(&root.join("device_tokens.json"));
        let thinking_levels = read_json_or_default(&root.join("thinking_levels.json"));

        Ok(Self {
            root: root.to_owned(),
            settings: RwLock::new(settings),
            device_tokens: RwLock::new(device_tokens),
            thinking_levels: RwLock::new(thinking_levels),
            mode,
        })
    }

    pub fn config_mode(&self) -> ConfigMode {
        self.mode
    }

    // -- Settings -----------------------------------------------------------

    pub fn settings(&self) -> Settings {
        self.settings.read().map(|s| s.clone()).unwrap_or_default()
    }

    /// Mutate settings and persist. Best-effort on the write; the
    /// in-memory copy always updates.
    pub fn update_settings(&self, f: impl FnOnce(&mut Settings)) {
        let snapshot = {
            let Ok(mut settings) = self.settings.write() else {
                return;
            };
            f(&mut settings);
            settings.clone()
        };
        if let Err(e) = write_private_json(&self.root.join("config.json"), &snapshot) {
            warn!(err = %e, "config write failed");
        }
    }

    // -- Sessions -----------------------------------------------------------

    pub fn save_session(&self, record: &SessionRecord) {
        let path = self.root.join("sessions").join(format!("{}.json", record.id));
        if let Err(e) = write_private_json(&path, record) {
            warn!(session_id = %record.id, err = %e, "session write failed");
        }
    }

    pub fn load_session(&self, id: &str) -> Option<SessionRecord> {
        read_json(&self.root.join("sessions").join(format!("{id}.json")))
    }

    pub fn list_sessions(&self) -> Vec<SessionRecord> {
        list_json(&self.root.join("sessions"))
    }

    pub fn delete_session(&self, id: &str) -> bool {
        std::fs::remove_file(self.root.join("sessions").join(format!("{id}.json"))).is_ok()
    }

    // -- Workspaces ---------------------------------------------------------

    pub fn save_workspace(&self, record: &WorkspaceRecord) {
        let path = self.root.join("workspaces").join(format!("{}.json", record.id));
        if let Err(e) = write_private_json(&path, record) {
            warn!(workspace_id = %record.id, err = %e, "workspace write failed");
        }
    }

    pub fn load_workspace(&self, id: &str) -> Option<WorkspaceRecord> {
        read_json(&self.root.join("workspaces").join(format!("{id}.json")))
    }

    pub fn list_workspaces(&self) -> Vec<WorkspaceRecord> {
        list_json(&self.root.join("workspaces"))
    }

    pub fn delete_workspace(&self, id: &str) -> bool {
        std::fs::remove_file(self.root.join("workspaces").join(format!("{id}.json"))).is_ok()
    }

    // -- Themes -------------------------------------------------------------

    pub fn save_theme(&self, name: &str, theme: &Value) -> bool {
        if !valid_name(name) {
            return false;
        }
        write_private_json(&self.root.join("themes").join(format!("{name}.json")), theme).is_ok()
    }

    pub fn load_theme(&self, name: &str) -> Option<Value> {
        if !valid_name(name) {
            return None;
        }
        read_json(&self.root.join("themes").join(format!("{name}.json")))
    }

    pub fn list_themes(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(self.root.join("themes")) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                e.file_name().to_str().and_then(|n| n.strip_suffix(".json")).map(str::to_owned)
            })
            .collect();
        names.sort();
        names
    }

    pub fn delete_theme(&self, name: &str) -> bool {
        valid_name(name)
            && std::fs::remove_file(self.root.join("themes").join(format!("{name}.json"))).is_ok()
    }

    // -- Device tokens ------------------------------------------------------

    pub fn add_device_token(&self, token: DeviceToken) {
        let snapshot = {
            let Ok(mut tokens) = self.device_tokens.write() else {
                return;
            };
            tokens.retain(|t| t.token != token.token);
            tokens.push(token);
            tokens.clone()
        };
        self.persist_device_tokens(&snapshot);
    }

    pub fn remove_device_token(&self, token: &str) -> bool {
        let (removed, snapshot) = {
            let Ok(mut tokens) = self.device_tokens.write() else {
                return false;
            };
            let before = tokens.len();
            tokens.retain(|t| t.token != token);
            (tokens.len() != before, tokens.clone())
        };
        if removed {
            self.persist_device_tokens(&snapshot);
        }
        removed
    }

    pub fn device_tokens(&self) -> Vec<DeviceToken> {
        self.device_tokens.read().map(|t| t.clone()).unwrap_or_default()
    }

    fn persist_device_tokens(&self, tokens: &[DeviceToken]) {
        if let Err(e) = write_private_json(&self.root.join("device_tokens.json"), &tokens) {
            warn!(err = %e, "device token write failed");
        }
    }

    // -- Thinking-level memory ---------------------------------------------

    pub fn remember_thinking_level(&self, model: &str, level: &str) {
        let snapshot = {
            let Ok(mut levels) = self.thinking_levels.write() else {
                return;
            };
            levels.insert(model.to_owned(), level.to_owned());
            levels.clone()
        };
        if let Err(e) = write_private_json(&self.root.join("thinking_levels.json"), &snapshot) {
            debug!(err = %e, "thinking level write failed");
        }
    }

    pub fn remembered_thinking_level(&self, model: &str) -> Option<String> {
        self.thinking_levels.read().ok()?.get(model).cloned()
    }
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
}

fn create_private_dir(path: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(path)?;
    set_mode(path, 0o700)
}

fn write_private_json<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    let contents = serde_json::to_string_pretty(value)
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    std::fs::write(path, contents)?;
    set_mode(path, 0o600)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Option<T> {
    let contents = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&contents).ok()
}

fn read_json_or_default<T: for<'de> Deserialize<'de> + Default>(path: &Path) -> T {
    read_json(path).unwrap_or_default()
}

fn list_json<T: for<'de> Deserialize<'de>>(dir: &Path) -> Vec<T> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();
    paths.iter().filter_map(|p| read_json(p)).collect()
}

#[cfg(test)]
#[path = "storage_tests.rs"]
mod tests;
