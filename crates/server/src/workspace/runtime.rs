// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workspace-level resource coordination: advisory mutexes, session slot
//! accounting, and idle teardown timers.
//!
//! Tokio mutexes are fair, so queued `with_*_lock` callers run in FIFO
//! order. Locks for distinct workspaces or sessions never contend.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Why a session reservation was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveError {
    WorkspaceLimit,
    GlobalLimit,
    Duplicate,
}

impl ReserveError {
    pub fn error_code(&self) -> crate::error::ErrorCode {
        match self {
            Self::WorkspaceLimit => crate::error::ErrorCode::SessionLimitWorkspace,
            Self::GlobalLimit => crate::error::ErrorCode::SessionLimitGlobal,
            Self::Duplicate => crate::error::ErrorCode::Conflict,
        }
    }
}

impl std::fmt::Display for ReserveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.error_code().as_str())
    }
}

#[derive(Default)]
struct SlotState {
    /// Reserved session ids per workspace.
    workspaces: HashMap<String, HashSet<String>>,
    total: usize,
    /// Container session counts per workspace (drives the idle timers).
    container_counts: HashMap<String, usize>,
}

/// Central workspace resource coordinator.
pub struct WorkspaceRuntime {
    workspace_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    session_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    slots: Mutex<SlotState>,
    idle_timers: Mutex<HashMap<String, CancellationToken>>,
    idle_tx: mpsc::UnboundedSender<String>,
    max_per_workspace: usize,
    max_global: usize,
    idle_timeout: Duration,
}

impl WorkspaceRuntime {
    /// Build a runtime. The returned receiver yields workspace ids whose
    /// idle teardown timer fired.
    pub fn new(
        max_per_workspace: usize,
        max_global: usize,
        idle_timeout: Duration,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (idle_tx, idle_rx) = mpsc::unbounded_channel();
        let runtime = Arc::new(Self {
            workspace_locks: Mutex::new(HashMap::new()),
            session_locks: Mutex::new(HashMap::new()),
            slots: Mutex::new(SlotState::default()),
            idle_timers: Mutex::new(HashMap::new()),
            idle_tx,
            max_per_workspace,
            max_global,
            idle_timeout,
        });
        (runtime, idle_rx)
    }

    /// Reserve a session slot: workspace cap first, then global cap.
    ///
    /// A container reservation cancels any pending idle timer for the
    /// workspace.
    pub async fn reserve_session_start(
        &self,
        workspace_id: &str,
        session_id: &str,
        container: bool,
    ) -> Result<(), ReserveError> {
        {
            let mut slots = self.slots.lock().await;
            if slots
                .workspaces
                .get(workspace_id)
                .is_some_and(|set| set.contains(session_id))
            {
                return Err(ReserveError::Duplicate);
            }
            if slots
                .workspaces
                .get(workspace_id)
                .is_some_and(|set| set.len() >= self.max_per_workspace)
            {
                return Err(ReserveError::WorkspaceLimit);
            }
            if slots.total >= self.max_global {
                return Err(ReserveError::GlobalLimit);
            }
            let set = slots.workspaces.entry(workspace_id.to_owned()).or_default();
            set.insert(session_id.to_owned());
            slots.total += 1;
            if container {
                *slots.container_counts.entry(workspace_id.to_owned()).or_default() += 1;
            }
        }
        if container {
            self.cancel_idle_timer(workspace_id).await;
        }
        Ok(())
    }

    /// Release a slot. Idempotent. Releasing the last container session in
    /// a workspace schedules its idle-stop timer.
    pub async fn release_session(&self, workspace_id: &str, session_id: &str, container: bool) {
        let schedule_idle = {
            let mut slots = self.slots.lock().await;
            let Some(set) = slots.workspaces.get_mut(workspace_id) else {
                return;
            };
            if !set.remove(session_id) {
                return;
            }
            if set.is_empty() {
                slots.workspaces.remove(workspace_id);
            }
            slots.total = slots.total.saturating_sub(1);
            if container {
                let count = slots.container_counts.entry(workspace_id.to_owned()).or_default();
                *count = count.saturating_sub(1);
                *count == 0
            } else {
                false
            }
        };
        if schedule_idle {
            self.schedule_idle_timer(workspace_id).await;
        }
    }

    /// Session ids currently reserved in a workspace.
    pub async fn sessions_in_workspace(&self, workspace_id: &str) -> Vec<String> {
        let slots = self.slots.lock().await;
        slots
            .workspaces
            .get(workspace_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Total reserved sessions across all workspaces.
    pub async fn total_sessions(&self) -> usize {
        self.slots.lock().await.total
    }

    /// Run `f` holding the session's advisory lock.
    pub async fn with_session_lock<F, Fut, T>(&self, session_id: &str, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let lock = {
            let mut locks = self.session_locks.lock().await;
            Arc::clone(locks.entry(session_id.to_owned()).or_default())
        };
        let result = {
            let _guard = lock.lock().await;
            f().await
        };
        prune_lock(&self.session_locks, session_id, &lock).await;
        result
    }

    /// Run `f` holding the workspace's advisory lock.
    pub async fn with_workspace_lock<F, Fut, T>(&self, workspace_id: &str, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let lock = {
            let mut locks = self.workspace_locks.lock().await;
            Arc::clone(locks.entry(workspace_id.to_owned()).or_default())
        };
        let result = {
            let _guard = lock.lock().await;
            f().await
        };
        prune_lock(&self.workspace_locks, workspace_id, &lock).await;
        result
    }

    #[cfg(test)]
    pub(crate) async fn session_lock_entries(&self) -> usize {
        self.session_locks.lock().await.len()
    }

    #[cfg(test)]
    pub(crate) async fn workspace_lock_entries(&self) -> usize {
        self.workspace_locks.lock().await.len()
    }

    /// Cancel a pending idle timer (no-op if none).
    pub async fn cancel_idle_timer(&self, workspace_id: &str) {
        if let Some(token) = self.idle_timers.lock().await.remove(workspace_id) {
            debug!(workspace_id, "idle timer cancelled");
            token.cancel();
        }
    }

    async fn schedule_idle_timer(&self, workspace_id: &str) {
        if self.idle_timeout.is_zero() {
            return;
        }
        let token = CancellationToken::new();
        {
            let mut timers = self.idle_timers.lock().await;
            if let Some(old) = timers.insert(workspace_id.to_owned(), token.clone()) {
                old.cancel();
            }
        }
        debug!(workspace_id, timeout = ?self.idle_timeout, "idle timer scheduled");
        let tx = self.idle_tx.clone();
        let timeout = self.idle_timeout;
        let id = workspace_id.to_owned();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    let _ = tx.send(id);
                }
            }
        });
    }

    /// Whether an idle timer is currently pending for a workspace.
    pub async fn has_idle_timer(&self, workspace_id: &str) -> bool {
        self.idle_timers.lock().await.contains_key(workspace_id)
    }
}

/// Drop a lock-map entry once nobody holds or waits on it, so ids used
/// over the server's lifetime don't accumulate entries forever.
///
/// Checked under the map mutex: no new clone can be taken mid-check, so
/// strong count 2 means exactly the map entry plus `ours`. Queued waiters
/// hold their own clones and keep the entry alive (preserving FIFO order)
/// until the last of them finishes.
async fn prune_lock(
    locks: &Mutex<HashMap<String, Arc<Mutex<()>>>>,
    id: &str,
    ours: &Arc<Mutex<()>>,
) {
    let mut locks = locks.lock().await;
    if let Some(entry) = locks.get(id) {
        if Arc::ptr_eq(entry, ours) && Arc::strong_count(entry) == 2 {
            locks.remove(id);
        }
    }
}

#[cfg(test)]
#[path = "runtime_tests.rs"]
mod tests;
