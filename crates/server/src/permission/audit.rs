// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Decision audit log. Every permission outcome lands here, whether the
//! policy engine decided alone or a human (or a timer) did.

use std::collections::VecDeque;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::policy::{PolicyAction, PolicyLayer};

/// How a decision was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolvedBy {
    Policy,
    User,
    Timeout,
    /// The session went away before anyone decided.
    Cancelled,
}

/// One audited decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: String,
    pub timestamp: u64,
    pub session_id: String,
    pub workspace_id: String,
    pub tool: String,
    pub display_summary: String,
    pub decision: PolicyAction,
    pub resolved_by: ResolvedBy,
    pub layer: PolicyLayer,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
}

/// Bounded in-memory audit log. Oldest entries are dropped at capacity;
/// queries return newest first.
pub struct AuditLog {
    entries: RwLock<VecDeque<AuditEntry>>,
    capacity: usize,
}

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        Self { entries: RwLock::new(VecDeque::new()), capacity: capacity.max(1) }
    }

    pub fn append(&self, entry: AuditEntry) {
        let Ok(mut entries) = self.entries.write() else {
            return;
        };
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Newest-first query.
    pub fn query(&self, limit: usize) -> Vec<AuditEntry> {
        let Ok(entries) = self.entries.read() else {
            return Vec::new();
        };
        entries.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[path = "audit_tests.rs"]
mod tests;
