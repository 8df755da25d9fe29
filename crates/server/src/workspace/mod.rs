// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workspace records and the workspace-level resource runtime.

pub mod runtime;

pub use runtime::{ReserveError, WorkspaceRuntime};

use serde::{Deserialize, Serialize};

/// Where a workspace's sessions execute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkspaceKind {
    /// Sessions run directly on the host in this directory.
    Host { path: String },
    /// Sessions run inside a managed container.
    Container { image: String },
}

impl WorkspaceKind {
    pub fn is_container(&self) -> bool {
        matches!(self, Self::Container { .. })
    }

    /// The host path, when this is a host workspace.
    pub fn host_path(&self) -> Option<&str> {
        match self {
            Self::Host { path } => Some(path),
            Self::Container { .. } => None,
        }
    }
}

/// Per-workspace policy knobs layered over the server defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyOverlay {
    /// Pending-permission timeout. `Some(0)` = never expire;
    /// `None` = server default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_timeout_ms: Option<u64>,
    /// Overrides the server-wide security profile for this workspace.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_profile: Option<crate::policy::SecurityProfile>,
}

/// The persisted workspace record. Owned by storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceRecord {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub kind: WorkspaceKind,
    /// Enabled skill names, in activation order.
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub policy: PolicyOverlay,
    pub created_at: u64,
    pub updated_at: u64,
}

impl WorkspaceRecord {
    pub fn new(id: String, name: String, kind: WorkspaceKind, now_ms: u64) -> Self {
        Self {
            id,
            name,
            kind,
            skills: Vec::new(),
            policy: PolicyOverlay::default(),
            created_at: now_ms,
            updated_at: now_ms,
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
