// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers for the REST surface.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ErrorCode;
use crate::policy::SecurityProfile;
use crate::session::record::epoch_ms;
use crate::session::SessionRecord;
use crate::storage::DeviceToken;
use crate::transport::pairing::PairError;
use crate::transport::{error_json, no_content, not_found, AppState};
use crate::workspace::{PolicyOverlay, WorkspaceKind, WorkspaceRecord};

// -- Request/response types ---------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairRequest {
    pub pairing_token: String,
    pub device_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PairResponse {
    pub device_token: String,
    pub user_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceTokenRequest {
    pub token: String,
    #[serde(default)]
    pub device_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWorkspaceRequest {
    pub name: String,
    #[serde(flatten)]
    pub kind: WorkspaceKind,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub policy: PolicyOverlay,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateWorkspaceRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub skills: Option<Vec<String>>,
    #[serde(default)]
    pub policy: Option<PolicyOverlay>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnSessionRequest {
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SinceSeqQuery {
    #[serde(default)]
    pub since_seq: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingQuery {
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileRequest {
    pub profile: String,
}

const DEFAULT_MODEL: &str = "anthropic/claude-sonnet-4-5";

// -- Unauthenticated ----------------------------------------------------------

/// `GET /health` — unauthenticated liveness.
pub async fn health() -> impl IntoResponse {
    Json(json!({ "ok": true, "status": "running" }))
}

/// `POST /pair` — exchange a pairing token for a device token.
pub async fn pair(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PairRequest>,
) -> Response {
    match state.pairing.redeem(&req.pairing_token, &req.device_name, epoch_ms(), &state.storage) {
        Ok(device) => Json(PairResponse {
            device_token: device.token,
            user_name: state.user_name(),
        })
        .into_response(),
        Err(PairError::Invalid) => error_json(ErrorCode::Unauthorized, "invalid pairing token"),
        Err(PairError::RateLimited) => {
            error_json(ErrorCode::RateLimited, "too many pairing attempts")
        }
    }
}

// -- Owner & server info ------------------------------------------------------

/// `GET /me`
pub async fn me(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "userName": state.user_name(),
        "devices": state.storage.device_tokens().len(),
        "securityProfile": state.engine.profile().as_str(),
    }))
}

/// `GET /server/info`
pub async fn server_info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "uptimeSecs": state.started_at.elapsed().as_secs(),
        "sessions": state.manager.list().await.len(),
    }))
}

/// `POST /me/device-token` — push registration.
pub async fn register_device_token(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DeviceTokenRequest>,
) -> Response {
    state.storage.add_device_token(DeviceToken {
        token: req.token,
        device_name: req.device_name.unwrap_or_else(|| "unnamed".to_owned()),
        created_at: epoch_ms(),
    });
    no_content()
}

/// `DELETE /me/device-token`
pub async fn remove_device_token(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DeviceTokenRequest>,
) -> Response {
    if state.storage.remove_device_token(&req.token) {
        no_content()
    } else {
        not_found("unknown device token")
    }
}

// -- Workspaces ---------------------------------------------------------------

/// `GET /workspaces`
pub async fn list_workspaces(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({ "workspaces": state.storage.list_workspaces() }))
}

/// `POST /workspaces`
pub async fn create_workspace(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateWorkspaceRequest>,
) -> Response {
    if req.name.trim().is_empty() {
        return error_json(ErrorCode::BadRequest, "workspace name must not be empty");
    }
    if let WorkspaceKind::Host { ref path } = req.kind {
        if !std::path::Path::new(path).is_dir() {
            return error_json(ErrorCode::BadRequest, format!("path does not exist: {path}"));
        }
    }
    let now = epoch_ms();
    let mut record = WorkspaceRecord::new(
        uuid::Uuid::new_v4().to_string(),
        req.name,
        req.kind,
        now,
    );
    record.skills = req.skills;
    record.policy = req.policy;
    state.storage.save_workspace(&record);
    Json(record).into_response()
}

/// `GET /workspaces/{id}`
pub async fn get_workspace(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.storage.load_workspace(&id) {
        Some(record) => Json(record).into_response(),
        None => not_found("unknown workspace"),
    }
}

/// `PUT /workspaces/{id}` — serialized with other workspace-level ops.
pub async fn update_workspace(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateWorkspaceRequest>,
) -> Response {
    state
        .runtime
        .with_workspace_lock(&id, || async {
            let Some(mut record) = state.storage.load_workspace(&id) else {
                return not_found("unknown workspace");
            };
            if let Some(name) = req.name {
                record.name = name;
            }
            if let Some(skills) = req.skills {
                record.skills = skills;
            }
            if let Some(policy) = req.policy {
                record.policy = policy;
            }
            record.updated_at = epoch_ms();
            state.storage.save_workspace(&record);
            Json(record).into_response()
        })
        .await
}

/// `DELETE /workspaces/{id}` — refused while sessions are live.
pub async fn delete_workspace(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    state
        .runtime
        .with_workspace_lock(&id, || async {
            if !state.runtime.sessions_in_workspace(&id).await.is_empty() {
                return error_json(ErrorCode::Conflict, "workspace has live sessions");
            }
            if state.storage.delete_workspace(&id) {
                state.runtime.cancel_idle_timer(&id).await;
                no_content()
            } else {
                not_found("unknown workspace")
            }
        })
        .await
}

// -- Sessions -----------------------------------------------------------------

/// `GET /workspaces/{id}/sessions`
pub async fn list_workspace_sessions(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    if state.storage.load_workspace(&id).is_none() {
        return not_found("unknown workspace");
    }
    // Live records win over their persisted snapshots.
    let mut records: Vec<SessionRecord> = Vec::new();
    for active in state.manager.list_for_workspace(&id).await {
        records.push(active.record());
    }
    for stored in state.storage.list_sessions() {
        if stored.workspace_id == id && !records.iter().any(|r| r.id == stored.id) {
            records.push(stored);
        }
    }
    Json(json!({ "sessions": records })).into_response()
}

/// `POST /workspaces/{id}/sessions` — spawn.
pub async fn spawn_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<SpawnSessionRequest>,
) -> Response {
    let Some(workspace) = state.storage.load_workspace(&id) else {
        return not_found("unknown workspace");
    };
    let model = req.model.unwrap_or_else(|| DEFAULT_MODEL.to_owned());
    match state.manager.spawn(&workspace, &model).await {
        Ok(active) => Json(active.record()).into_response(),
        Err(e) => error_json(e.error_code(), e.to_string()),
    }
}

/// Resolve a session that must belong to the given workspace.
async fn resolve_session(
    state: &AppState,
    workspace_id: &str,
    session_id: &str,
) -> Option<SessionRecord> {
    let record = match state.manager.get(session_id).await {
        Some(active) => active.record(),
        None => state.storage.load_session(session_id)?,
    };
    (record.workspace_id == workspace_id).then_some(record)
}

/// `GET /workspaces/{w}/sessions/{s}`
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path((w, s)): Path<(String, String)>,
) -> Response {
    match resolve_session(&state, &w, &s).await {
        Some(record) => Json(record).into_response(),
        None => not_found("unknown session"),
    }
}

/// `DELETE /workspaces/{w}/sessions/{s}` — forceful teardown.
pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path((w, s)): Path<(String, String)>,
) -> Response {
    if resolve_session(&state, &w, &s).await.is_none() {
        return not_found("unknown session");
    }
    // Live sessions are torn down; an already-ended record is a no-op.
    let _ = state.manager.stop_session(&s, "deleted by user").await;
    no_content()
}

/// `GET /workspaces/{w}/sessions/{s}/events?sinceSeq=`
pub async fn session_events(
    State(state): State<Arc<AppState>>,
    Path((w, s)): Path<(String, String)>,
    Query(query): Query<SinceSeqQuery>,
) -> Response {
    if resolve_session(&state, &w, &s).await.is_none() {
        return not_found("unknown session");
    }
    let Some(active) = state.manager.get(&s).await else {
        return error_json(ErrorCode::Gone, "session is not live");
    };
    let since = match query.since_seq {
        Some(n) if n < 0 => {
            return error_json(ErrorCode::BadRequest, "sinceSeq must be non-negative");
        }
        Some(n) => n as u64,
        None => 0,
    };
    let (events, served) = active.events_since(since);
    let events: Vec<Value> = events
        .iter()
        .filter_map(|e| {
            let mut value = serde_json::to_value(&e.event).ok()?;
            if let Some(obj) = value.as_object_mut() {
                obj.insert("seq".to_owned(), e.seq.into());
                obj.insert("timestamp".to_owned(), e.timestamp.into());
            }
            Some(value)
        })
        .collect();
    Json(json!({
        "events": events,
        "currentSeq": active.current_seq(),
        "resync": !served,
    }))
    .into_response()
}

/// `GET /workspaces/{w}/sessions/{s}/files` — shallow workspace listing.
pub async fn session_files(
    State(state): State<Arc<AppState>>,
    Path((w, s)): Path<(String, String)>,
) -> Response {
    if resolve_session(&state, &w, &s).await.is_none() {
        return not_found("unknown session");
    }
    let Some(workspace) = state.storage.load_workspace(&w) else {
        return not_found("unknown workspace");
    };
    let Some(path) = workspace.kind.host_path() else {
        return Json(json!({ "files": [] })).into_response();
    };

    let mut files = Vec::new();
    if let Ok(entries) = std::fs::read_dir(path) {
        for entry in entries.flatten().take(500) {
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            files.push(json!({ "name": name, "isDir": is_dir }));
        }
    }
    files.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));
    Json(json!({ "files": files })).into_response()
}

/// `GET /workspaces/{w}/sessions/{s}/tool-output/{tid}`
pub async fn session_tool_output(
    State(state): State<Arc<AppState>>,
    Path((w, s, tid)): Path<(String, String, String)>,
) -> Response {
    if resolve_session(&state, &w, &s).await.is_none() {
        return not_found("unknown session");
    }
    let Some(active) = state.manager.get(&s).await else {
        return error_json(ErrorCode::Gone, "session is not live");
    };
    match active.tool_output(&tid) {
        Some(output) => Json(json!({ "toolCallId": tid, "output": output })).into_response(),
        None => not_found("unknown tool call"),
    }
}

/// `GET /workspaces/{w}/sessions/{s}/overall-diff`
pub async fn session_overall_diff(
    State(state): State<Arc<AppState>>,
    Path((w, s)): Path<(String, String)>,
) -> Response {
    if resolve_session(&state, &w, &s).await.is_none() {
        return not_found("unknown session");
    }
    let Some(workspace) = state.storage.load_workspace(&w) else {
        return not_found("unknown workspace");
    };
    let Some(path) = workspace.kind.host_path() else {
        return Json(json!({ "diff": "" })).into_response();
    };

    let output = tokio::process::Command::new("git")
        .args(["diff"])
        .current_dir(path)
        .output()
        .await;
    match output {
        Ok(out) if out.status.success() => {
            Json(json!({ "diff": String::from_utf8_lossy(&out.stdout) })).into_response()
        }
        _ => Json(json!({ "diff": "" })).into_response(),
    }
}

/// `GET /workspaces/{w}/sessions/{s}/stop` — graceful abort.
pub async fn session_stop(
    State(state): State<Arc<AppState>>,
    Path((w, s)): Path<(String, String)>,
) -> Response {
    if resolve_session(&state, &w, &s).await.is_none() {
        return not_found("unknown session");
    }
    match state.manager.send_abort(&s).await {
        Ok(()) => Json(json!({ "ok": true })).into_response(),
        Err(e) => error_json(e.code, e.message),
    }
}

/// `GET /workspaces/{w}/sessions/{s}/resume`
pub async fn session_resume(
    State(state): State<Arc<AppState>>,
    Path((w, s)): Path<(String, String)>,
) -> Response {
    session_rpc(&state, &w, &s, "resume").await
}

/// `GET /workspaces/{w}/sessions/{s}/fork`
pub async fn session_fork(
    State(state): State<Arc<AppState>>,
    Path((w, s)): Path<(String, String)>,
) -> Response {
    session_rpc(&state, &w, &s, "fork").await
}

async fn session_rpc(state: &Arc<AppState>, w: &str, s: &str, command: &str) -> Response {
    if resolve_session(state, w, s).await.is_none() {
        return not_found("unknown session");
    }
    let request_id = uuid::Uuid::new_v4().to_string();
    match state
        .manager
        .forward_command(s, command, Value::Null, &request_id)
        .await
    {
        Ok(response) => Json(json!({
            "success": response.success,
            "data": response.data,
            "error": response.error,
        }))
        .into_response(),
        Err(e) => error_json(e.code, e.message),
    }
}

// -- Permissions & policy -----------------------------------------------------

/// `GET /permissions/pending?sessionId=`
pub async fn pending_permissions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PendingQuery>,
) -> Response {
    let now = epoch_ms();
    let pending = match query.session_id {
        Some(ref session_id) => {
            let known = state.manager.get(session_id).await.is_some()
                || state.storage.load_session(session_id).is_some();
            if !known {
                return not_found("unknown session");
            }
            state.gate.pending_for_session(session_id, now)
        }
        None => state.gate.pending_for_user(now),
    };
    Json(json!({ "serverTime": now, "pending": pending })).into_response()
}

/// `GET /policy/rules`
pub async fn policy_rules(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({ "rules": state.engine.rules() }))
}

/// `GET /policy/audit?limit=`
pub async fn policy_audit(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LimitQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(100).min(1000);
    Json(json!({ "entries": state.audit.query(limit) }))
}

/// `GET /policy/profile`
pub async fn policy_profile(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({ "profile": state.engine.profile().as_str() }))
}

/// `PUT /security/profile`
pub async fn put_security_profile(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ProfileRequest>,
) -> Response {
    let Some(profile) = SecurityProfile::parse(&req.profile) else {
        return error_json(ErrorCode::BadRequest, format!("invalid profile: {}", req.profile));
    };
    state.engine.set_profile(profile);
    state.storage.update_settings(|settings| {
        settings.security.profile = profile.as_str().to_owned();
    });
    Json(json!({ "profile": profile.as_str() })).into_response()
}

// -- Themes -------------------------------------------------------------------

/// `GET /themes`
pub async fn list_themes(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({ "themes": state.storage.list_themes() }))
}

/// `GET /themes/{name}`
pub async fn get_theme(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Response {
    match state.storage.load_theme(&name) {
        Some(theme) => Json(theme).into_response(),
        None => not_found("unknown theme"),
    }
}

/// `PUT /themes/{name}`
pub async fn put_theme(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(theme): Json<Value>,
) -> Response {
    if state.storage.save_theme(&name, &theme) {
        Json(json!({ "name": name })).into_response()
    } else {
        error_json(ErrorCode::BadRequest, "invalid theme name")
    }
}

/// `DELETE /themes/{name}`
pub async fn delete_theme(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Response {
    if state.storage.delete_theme(&name) {
        no_content()
    } else {
        not_found("unknown theme")
    }
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
