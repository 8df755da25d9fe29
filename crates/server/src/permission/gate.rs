// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The gate holds tool execution until the policy engine or a human
//! decides. Each pending permission is a one-shot awaitable with three
//! distinct resolution paths — user response, expiry, cancellation — and
//! every path produces exactly one audit entry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::permission::audit::{AuditEntry, AuditLog, ResolvedBy};
use crate::policy::engine::EvalContext;
use crate::policy::{
    bash, format_display_summary, PolicyAction, PolicyEngine, PolicyLayer, PolicyRule, RuleScope,
    ToolRequest,
};
use crate::session::record::epoch_ms;
use crate::transport::ws_msg::{PermissionScope, ServerMessage};

/// Fan-out hook: delivers a gate-originated message into the owning
/// session's event stream (seq assignment happens on the session side).
pub type SessionBroadcast = Arc<dyn Fn(ServerMessage) + Send + Sync>;

/// A tool invocation awaiting a decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingPermission {
    pub id: String,
    pub session_id: String,
    pub workspace_id: String,
    pub tool: String,
    pub input: Value,
    pub display_summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Absolute epoch millis. `None` when the request never expires.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_at: Option<u64>,
    pub expires: bool,
    pub risk: String,
}

impl PendingPermission {
    fn expired(&self, now_ms: u64) -> bool {
        self.expires && self.timeout_at.is_some_and(|t| t < now_ms)
    }
}

/// The final answer handed back to the agent-facing caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateDecision {
    pub allowed: bool,
    pub reason: String,
    pub resolved_by: ResolvedBy,
}

/// How an awaiting request gets resolved.
enum Resolution {
    User { action: crate::transport::ws_msg::PermissionAction },
    Timeout,
    Cancelled { reason: String },
}

/// Pending index key. Anonymous calls key by pending id so they can never
/// collide with each other or with real tool-call ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CallKey {
    Call(String),
    Anonymous(String),
}

struct PendingEntry {
    record: PendingPermission,
    key: CallKey,
    tx: oneshot::Sender<Resolution>,
    timer: CancellationToken,
}

struct SessionEntry {
    workspace_id: String,
    /// Effective approval timeout. `None` = never expires.
    approval_timeout_ms: Option<u64>,
    broadcast: SessionBroadcast,
}

#[derive(Default)]
struct GateState {
    sessions: HashMap<String, SessionEntry>,
    pending: HashMap<String, PendingEntry>,
    /// `(session, tool-call key)` → pending id, for the one-pending-per-call
    /// invariant.
    by_call: HashMap<(String, CallKey), String>,
}

/// The permission gate.
pub struct PermissionGate {
    engine: Arc<PolicyEngine>,
    audit: Arc<AuditLog>,
    state: Mutex<GateState>,
    /// Server default used when a workspace overlay is silent.
    /// 0 = never expire.
    default_timeout_ms: u64,
}

impl PermissionGate {
    pub fn new(engine: Arc<PolicyEngine>, audit: Arc<AuditLog>, default_timeout_ms: u64) -> Self {
        Self { engine, audit, state: Mutex::new(GateState::default()), default_timeout_ms }
    }

    /// Allocate per-session gate state.
    ///
    /// `approval_timeout_ms` is the workspace overlay value: `Some(0)`
    /// means never expire, `None` falls back to the server default.
    pub fn register_session(
        &self,
        session_id: &str,
        workspace_id: &str,
        approval_timeout_ms: Option<u64>,
        broadcast: SessionBroadcast,
    ) {
        let effective = match approval_timeout_ms {
            Some(0) => None,
            Some(t) => Some(t),
            None => match self.default_timeout_ms {
                0 => None,
                t => Some(t),
            },
        };
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        state.sessions.insert(
            session_id.to_owned(),
            SessionEntry {
                workspace_id: workspace_id.to_owned(),
                approval_timeout_ms: effective,
                broadcast,
            },
        );
    }

    /// Drop all state for a session, replying "cancelled" to every pending
    /// request it still owns.
    pub fn destroy_session(&self, session_id: &str) {
        let (entries, broadcast) = {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            let broadcast = state.sessions.remove(session_id).map(|s| s.broadcast);
            let ids: Vec<String> = state
                .pending
                .values()
                .filter(|e| e.record.session_id == session_id)
                .map(|e| e.record.id.clone())
                .collect();
            let entries: Vec<PendingEntry> =
                ids.iter().filter_map(|id| remove_pending(&mut state, id)).collect();
            (entries, broadcast)
        };
        for entry in entries {
            entry.timer.cancel();
            if let Some(ref broadcast) = broadcast {
                broadcast(ServerMessage::PermissionCancelled {
                    id: entry.record.id.clone(),
                    reason: "session stopped".to_owned(),
                });
            }
            let _ = entry.tx.send(Resolution::Cancelled { reason: "session stopped".to_owned() });
        }
    }

    /// The agent-facing call: decide a tool invocation, pausing it until a
    /// human answers when the policy says `ask`.
    pub async fn request(self: &Arc<Self>, session_id: &str, request: ToolRequest) -> GateDecision {
        let now_ms = epoch_ms();

        let (workspace_id, timeout_ms, broadcast) = {
            let Ok(state) = self.state.lock() else {
                return deny_unregistered();
            };
            match state.sessions.get(session_id) {
                Some(entry) => (
                    entry.workspace_id.clone(),
                    entry.approval_timeout_ms,
                    Arc::clone(&entry.broadcast),
                ),
                None => return deny_unregistered(),
            }
        };

        let ctx = EvalContext {
            workspace_id: workspace_id.clone(),
            session_id: session_id.to_owned(),
        };
        let decision = self.engine.evaluate(&request, &ctx, now_ms);
        let summary = format_display_summary(&request);
        debug!(
            session_id,
            tool = %request.tool,
            action = %decision.action.as_str(),
            summary_chars = summary.chars().count(),
            "permission evaluated"
        );

        if decision.action != PolicyAction::Ask {
            self.append_audit(
                session_id,
                &workspace_id,
                &request,
                &summary,
                decision.action,
                ResolvedBy::Policy,
                decision.layer,
                decision.rule_id.clone(),
                now_ms,
            );
            return GateDecision {
                allowed: decision.action == PolicyAction::Allow,
                reason: decision.reason,
                resolved_by: ResolvedBy::Policy,
            };
        }

        // Pending path.
        let id = uuid::Uuid::new_v4().to_string();
        let timeout_at = timeout_ms.map(|t| now_ms + t);
        let record = PendingPermission {
            id: id.clone(),
            session_id: session_id.to_owned(),
            workspace_id: workspace_id.clone(),
            tool: request.tool.clone(),
            input: request.input.clone(),
            display_summary: summary.clone(),
            reason: Some(decision.reason.clone()),
            timeout_at,
            expires: timeout_at.is_some(),
            risk: risk_for(decision.layer).to_owned(),
        };
        let key = match request.tool_call_id {
            Some(ref call_id) => CallKey::Call(call_id.clone()),
            None => CallKey::Anonymous(id.clone()),
        };

        let (tx, rx) = oneshot::channel();
        let timer = CancellationToken::new();
        let superseded = {
            let Ok(mut state) = self.state.lock() else {
                return deny_unregistered();
            };
            // One pending per {session, toolCallId}: a retry for the same
            // call supersedes the stale entry.
            let superseded = state
                .by_call
                .get(&(session_id.to_owned(), key.clone()))
                .cloned()
                .and_then(|old_id| remove_pending(&mut state, &old_id));
            state.by_call.insert((session_id.to_owned(), key.clone()), id.clone());
            state.pending.insert(
                id.clone(),
                PendingEntry { record: record.clone(), key, tx, timer: timer.clone() },
            );
            superseded
        };
        if let Some(old) = superseded {
            old.timer.cancel();
            broadcast(ServerMessage::PermissionCancelled {
                id: old.record.id.clone(),
                reason: "superseded by a newer request".to_owned(),
            });
            let _ = old.tx.send(Resolution::Cancelled { reason: "superseded".to_owned() });
        }

        if let Some(t) = timeout_ms {
            self.spawn_expiry(&id, t, timer);
        }

        broadcast(ServerMessage::PermissionRequest {
            id: record.id.clone(),
            session_id: record.session_id.clone(),
            workspace_id: record.workspace_id.clone(),
            tool: record.tool.clone(),
            input: record.input.clone(),
            display_summary: record.display_summary.clone(),
            reason: record.reason.clone(),
            timeout_at: record.timeout_at,
            expires: record.expires,
            risk: record.risk.clone(),
        });

        let resolution = rx.await.unwrap_or(Resolution::Cancelled {
            reason: "gate dropped".to_owned(),
        });

        let (allowed, reason, resolved_by) = match resolution {
            Resolution::User { action } => (
                action == crate::transport::ws_msg::PermissionAction::Allow,
                "resolved by user".to_owned(),
                ResolvedBy::User,
            ),
            Resolution::Timeout => (false, "permission timeout".to_owned(), ResolvedBy::Timeout),
            Resolution::Cancelled { reason } => (false, reason, ResolvedBy::Cancelled),
        };
        self.append_audit(
            session_id,
            &workspace_id,
            &request,
            &summary,
            if allowed { PolicyAction::Allow } else { PolicyAction::Deny },
            resolved_by,
            PolicyLayer::Permission,
            None,
            epoch_ms(),
        );
        GateDecision { allowed, reason, resolved_by }
    }

    /// User response. Returns `false` when the id is unknown (already
    /// resolved, expired, or never existed) — no second audit happens.
    pub fn resolve_decision(
        &self,
        id: &str,
        action: crate::transport::ws_msg::PermissionAction,
        scope: PermissionScope,
        pattern: Option<String>,
    ) -> bool {
        let entry = {
            let Ok(mut state) = self.state.lock() else {
                return false;
            };
            match remove_pending(&mut state, id) {
                Some(entry) => entry,
                None => return false,
            }
        };
        entry.timer.cancel();

        if action == crate::transport::ws_msg::PermissionAction::Allow
            && scope != PermissionScope::Once
        {
            self.engine.add_rule(scoped_rule(&entry.record, scope, pattern));
        }

        let _ = entry.tx.send(Resolution::User { action });
        true
    }

    /// Snapshot for the REST surface: expired entries are filtered with
    /// the caller's clock; non-expiring entries survive any clock.
    pub fn pending_for_user(&self, now_ms: u64) -> Vec<PendingPermission> {
        self.pending_filtered(now_ms, |_| true)
    }

    pub fn pending_for_session(&self, session_id: &str, now_ms: u64) -> Vec<PendingPermission> {
        self.pending_filtered(now_ms, |p| p.session_id == session_id)
    }

    pub fn pending_for_workspace(&self, workspace_id: &str, now_ms: u64) -> Vec<PendingPermission> {
        self.pending_filtered(now_ms, |p| p.workspace_id == workspace_id)
    }

    /// Whether a session is currently registered.
    pub fn session_registered(&self, session_id: &str) -> bool {
        self.state.lock().map(|s| s.sessions.contains_key(session_id)).unwrap_or(false)
    }

    fn pending_filtered(
        &self,
        now_ms: u64,
        keep: impl Fn(&PendingPermission) -> bool,
    ) -> Vec<PendingPermission> {
        let Ok(state) = self.state.lock() else {
            return Vec::new();
        };
        let mut out: Vec<PendingPermission> = state
            .pending
            .values()
            .map(|e| &e.record)
            .filter(|p| !p.expired(now_ms) && keep(p))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    fn spawn_expiry(self: &Arc<Self>, id: &str, timeout_ms: u64, token: CancellationToken) {
        let gate = Arc::clone(self);
        let id = id.to_owned();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(std::time::Duration::from_millis(timeout_ms)) => {
                    gate.expire(&id);
                }
            }
        });
    }

    fn expire(&self, id: &str) {
        let (entry, broadcast) = {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            let Some(entry) = remove_pending(&mut state, id) else {
                return;
            };
            let broadcast = state
                .sessions
                .get(&entry.record.session_id)
                .map(|s| Arc::clone(&s.broadcast));
            (entry, broadcast)
        };
        if let Some(broadcast) = broadcast {
            broadcast(ServerMessage::PermissionExpired {
                id: entry.record.id.clone(),
                reason: "timeout".to_owned(),
            });
        }
        let _ = entry.tx.send(Resolution::Timeout);
    }

    #[allow(clippy::too_many_arguments)]
    fn append_audit(
        &self,
        session_id: &str,
        workspace_id: &str,
        request: &ToolRequest,
        summary: &str,
        decision: PolicyAction,
        resolved_by: ResolvedBy,
        layer: PolicyLayer,
        rule_id: Option<String>,
        now_ms: u64,
    ) {
        self.audit.append(AuditEntry {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: now_ms,
            session_id: session_id.to_owned(),
            workspace_id: workspace_id.to_owned(),
            tool: request.tool.clone(),
            display_summary: summary.to_owned(),
            decision,
            resolved_by,
            layer,
            rule_id,
        });
    }
}

fn remove_pending(state: &mut GateState, id: &str) -> Option<PendingEntry> {
    let entry = state.pending.remove(id)?;
    state.by_call.remove(&(entry.record.session_id.clone(), entry.key.clone()));
    Some(entry)
}

fn deny_unregistered() -> GateDecision {
    GateDecision {
        allowed: false,
        reason: "session not registered with the permission gate".to_owned(),
        resolved_by: ResolvedBy::Policy,
    }
}

fn risk_for(layer: PolicyLayer) -> &'static str {
    match layer {
        PolicyLayer::Guardrail => "high",
        PolicyLayer::Heuristic => "medium",
        PolicyLayer::Permission | PolicyLayer::Rule | PolicyLayer::Fallback => "low",
    }
}

/// Build the rule a scoped allow creates. Without an explicit pattern,
/// bash approvals widen to the command's executable; path tools pin the
/// exact path.
fn scoped_rule(
    pending: &PendingPermission,
    scope: PermissionScope,
    pattern: Option<String>,
) -> PolicyRule {
    let derived = pattern.or_else(|| {
        if let Some(command) = pending.input.get("command").and_then(Value::as_str) {
            let exe = bash::parse_bash_command(command).executable;
            if exe.is_empty() {
                None
            } else {
                Some(format!("{exe} *"))
            }
        } else {
            pending
                .input
                .get("path")
                .and_then(Value::as_str)
                .map(str::to_owned)
        }
    });

    let (rule_scope, workspace_id, session_id) = match scope {
        PermissionScope::Session => {
            (RuleScope::Session, None, Some(pending.session_id.clone()))
        }
        PermissionScope::Workspace => {
            (RuleScope::Workspace, Some(pending.workspace_id.clone()), None)
        }
        _ => (RuleScope::Global, None, None),
    };

    PolicyRule {
        id: uuid::Uuid::new_v4().to_string(),
        tool: pending.tool.clone(),
        decision: PolicyAction::Allow,
        executable: None,
        pattern: derived,
        scope: rule_scope,
        workspace_id,
        session_id,
        expires_at: None,
        label: format!("approved: {}", pending.display_summary),
    }
}

#[cfg(test)]
#[path = "gate_tests.rs"]
mod tests;
