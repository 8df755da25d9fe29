// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Provider credential storage for the substitution proxy.
//!
//! The JSON file maps provider name to a credential record. It is read at
//! startup and on explicit reload; the swap is atomic so in-flight
//! requests see either the old or the new set, never a mix.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One provider's credential record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    /// Credential kind, e.g. `oauth` or `api_key`.
    #[serde(rename = "type")]
    pub kind: String,
    /// The real access token injected into upstream requests.
    pub access: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh: Option<String>,
    /// Expiry in epoch millis; 0 = never expires.
    #[serde(default)]
    pub expires: u64,
    /// Provider-specific fields (e.g. `accountId`).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl Credential {
    pub fn expired(&self, now_ms: u64) -> bool {
        self.expires != 0 && self.expires <= now_ms
    }

    /// A provider-specific string field, e.g. `accountId`.
    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }
}

/// Atomic credential store backed by one JSON file.
pub struct CredentialStore {
    path: PathBuf,
    creds: RwLock<HashMap<String, Credential>>,
}

impl CredentialStore {
    /// Load the store. A missing file yields an empty store (providers
    /// simply appear absent); a malformed file is an error.
    pub fn load(path: &Path) -> Result<Self, std::io::Error> {
        let creds = read_credentials(path)?;
        Ok(Self { path: path.to_owned(), creds: RwLock::new(creds) })
    }

    /// Re-read the file and swap the whole map at once.
    pub fn reload(&self) -> Result<(), std::io::Error> {
        let fresh = read_credentials(&self.path)?;
        if let Ok(mut creds) = self.creds.write() {
            *creds = fresh;
        }
        Ok(())
    }

    pub fn get(&self, provider: &str) -> Option<Credential> {
        self.creds.read().ok()?.get(provider).cloned()
    }

    pub fn has(&self, provider: &str) -> bool {
        self.creds.read().map(|c| c.contains_key(provider)).unwrap_or(false)
    }

    pub fn providers(&self) -> Vec<String> {
        self.creds.read().map(|c| c.keys().cloned().collect()).unwrap_or_default()
    }
}

fn read_credentials(path: &Path) -> Result<HashMap<String, Credential>, std::io::Error> {
    match std::fs::read_to_string(path) {
        Ok(contents) => serde_json::from_str(&contents)
            .map_err(|e| std::io::Error::other(format!("malformed credentials file: {e}"))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
#[path = "credentials_tests.rs"]
mod tests;
