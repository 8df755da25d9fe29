// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Turn idempotency cache: `clientTurnId` → delivery stage.
//!
//! LRU + TTL. Stage transitions are monotonic (`accepted` → `dispatched` →
//! `started`); a retry that arrives after the turn advanced echoes the
//! latest observed stage instead of regressing.

use indexmap::IndexMap;

use crate::transport::ws_msg::TurnStage;

/// Which turn command created the cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnCommand {
    Prompt,
    Steer,
    FollowUp,
}

impl TurnCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prompt => "prompt",
            Self::Steer => "steer",
            Self::FollowUp => "follow_up",
        }
    }
}

/// Cached delivery state for one client turn.
#[derive(Debug, Clone)]
pub struct TurnDedupeRecord {
    pub command: TurnCommand,
    /// SHA-256 hex of the canonical turn payload.
    pub payload_hash: String,
    pub stage: TurnStage,
    pub accepted_at: u64,
    pub updated_at: u64,
}

/// LRU + TTL map from `clientTurnId` to [`TurnDedupeRecord`].
///
/// Callers pass the clock (epoch millis) so tests can drive expiry
/// deterministically.
#[derive(Debug)]
pub struct TurnDedupeCache {
    entries: IndexMap<String, TurnDedupeRecord>,
    capacity: usize,
    ttl_ms: u64,
}

impl TurnDedupeCache {
    pub fn new(capacity: usize, ttl_ms: u64) -> Self {
        Self { entries: IndexMap::new(), capacity: capacity.max(1), ttl_ms }
    }

    /// Insert (or replace) an entry, evicting the least-recently-used
    /// entry if the cache is full.
    pub fn set(&mut self, id: &str, record: TurnDedupeRecord) {
        self.entries.shift_remove(id);
        if self.entries.len() >= self.capacity {
            self.entries.shift_remove_index(0);
        }
        self.entries.insert(id.to_owned(), record);
    }

    /// Look up an entry, refreshing its LRU position. Expired entries are
    /// dropped and reported as absent.
    pub fn get(&mut self, id: &str, now_ms: u64) -> Option<&TurnDedupeRecord> {
        let record = self.entries.shift_remove(id)?;
        if now_ms.saturating_sub(record.accepted_at) > self.ttl_ms {
            return None;
        }
        self.entries.insert(id.to_owned(), record);
        self.entries.get(id)
    }

    /// Advance an entry's stage. Never regresses: updating a `started`
    /// entry to `dispatched` leaves it at `started`.
    ///
    /// Returns the stage now stored, or `None` if the entry is absent.
    pub fn update_stage(&mut self, id: &str, stage: TurnStage, now_ms: u64) -> Option<TurnStage> {
        let record = self.entries.get_mut(id)?;
        if stage > record.stage {
            record.stage = stage;
        }
        record.updated_at = now_ms;
        Some(record.stage)
    }

    /// Remove an entry outright (used when a stdin write fails after
    /// acceptance, so the client's retry is treated as new).
    pub fn remove(&mut self, id: &str) -> Option<TurnDedupeRecord> {
        self.entries.shift_remove(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
#[path = "dedupe_tests.rs"]
mod tests;
