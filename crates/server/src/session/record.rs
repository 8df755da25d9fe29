// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session records: the persisted shape of a session plus its status state
//! machine. Mutation happens only inside the owning session lock.

use serde::{Deserialize, Serialize};

/// Session lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Starting,
    Ready,
    Busy,
    Stopping,
    Error,
    Ended,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Busy => "busy",
            Self::Stopping => "stopping",
            Self::Error => "error",
            Self::Ended => "ended",
        }
    }

    /// Whether `next` is a legal transition from this status.
    ///
    /// `Ended` is terminal and reachable from every non-terminal status
    /// (subprocess exit, stop-session, idle teardown).
    pub fn can_transition(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        match (*self, next) {
            (Ended, _) => false,
            (a, b) if a == b => true,
            (_, Ended) => true,
            (Starting, Ready) | (Starting, Error) => true,
            (Ready, Busy) => true,
            (Busy, Ready) | (Busy, Stopping) => true,
            (Stopping, Ready) | (Stopping, Busy) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input/output token tallies for a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTally {
    pub input: u64,
    pub output: u64,
}

/// The persisted session record. Owned by [`crate::storage::Storage`];
/// the manager mutates it only under the owning session lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    pub workspace_id: String,
    pub status: SessionStatus,
    pub created_at: u64,
    pub last_activity: u64,
    pub message_count: u64,
    pub tokens: TokenTally,
    pub cost: f64,
    /// Canonical `provider/modelId` form.
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_level: Option<String>,
    /// Back-reference to the agent's on-disk transcript, when it reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript_path: Option<String>,
}

impl SessionRecord {
    pub fn new(id: String, workspace_id: String, model: String, now_ms: u64) -> Self {
        Self {
            id,
            workspace_id,
            status: SessionStatus::Starting,
            created_at: now_ms,
            last_activity: now_ms,
            message_count: 0,
            tokens: TokenTally::default(),
            cost: 0.0,
            model,
            thinking_level: None,
            transcript_path: None,
        }
    }

    /// Apply a status transition, returning `false` (and leaving the record
    /// untouched) if the transition is not legal.
    pub fn transition(&mut self, next: SessionStatus, now_ms: u64) -> bool {
        if !self.status.can_transition(next) {
            return false;
        }
        self.status = next;
        self.last_activity = now_ms;
        true
    }
}

/// Return current epoch millis.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
#[path = "record_tests.rs"]
mod tests;
