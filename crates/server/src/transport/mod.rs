// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! REST and WebSocket surface.

pub mod auth;
pub mod http;
pub mod pairing;
pub mod ws;
pub mod ws_msg;

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::permission::{AuditLog, PermissionGate};
use crate::policy::PolicyEngine;
use crate::session::SessionManager;
use crate::storage::Storage;
use crate::workspace::WorkspaceRuntime;

/// Shared application state passed to all handlers via axum `State`.
pub struct AppState {
    pub config: Config,
    pub manager: Arc<SessionManager>,
    pub gate: Arc<PermissionGate>,
    pub engine: Arc<PolicyEngine>,
    pub audit: Arc<AuditLog>,
    pub storage: Arc<Storage>,
    pub runtime: Arc<WorkspaceRuntime>,
    pub proxy: Arc<reinsproxy::AuthProxy>,
    pub pairing: pairing::PairingState,
    pub started_at: Instant,
}

impl AppState {
    /// The owner's display name (empty until pairing sets one).
    pub fn user_name(&self) -> String {
        let name = self.storage.settings().identity.user_name;
        if name.is_empty() {
            "owner".to_owned()
        } else {
            name
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").field("port", &self.config.port).finish()
    }
}

/// Bearer middleware. Exempt: `/health` (liveness) and `/pair`
/// (pre-auth by definition).
pub async fn auth_layer(
    State(state): State<Arc<AppState>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let path = req.uri().path();
    if path == "/health" || path == "/pair" {
        return next.run(req).await;
    }

    let valid = auth::valid_tokens(&state.storage);
    if let Err(code) = auth::validate_bearer(req.headers(), &valid) {
        let (status, body) = code.to_http_response("unauthorized");
        return (status, body).into_response();
    }
    next.run(req).await
}

/// Build the axum router with the full REST + `/stream` surface.
///
/// Note what is deliberately absent: no top-level `/sessions`, and no
/// per-session stream endpoint (`/workspaces/:w/sessions/:s/stream`
/// answers 404 at the socket level).
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(http::health))
        .route("/pair", post(http::pair))
        .route("/me", get(http::me))
        .route(
            "/me/device-token",
            post(http::register_device_token).delete(http::remove_device_token),
        )
        .route("/server/info", get(http::server_info))
        .route("/workspaces", get(http::list_workspaces).post(http::create_workspace))
        .route(
            "/workspaces/{id}",
            get(http::get_workspace).put(http::update_workspace).delete(http::delete_workspace),
        )
        .route(
            "/workspaces/{id}/sessions",
            get(http::list_workspace_sessions).post(http::spawn_session),
        )
        .route(
            "/workspaces/{w}/sessions/{s}",
            get(http::get_session).delete(http::delete_session),
        )
        .route("/workspaces/{w}/sessions/{s}/events", get(http::session_events))
        .route("/workspaces/{w}/sessions/{s}/files", get(http::session_files))
        .route("/workspaces/{w}/sessions/{s}/tool-output/{tid}", get(http::session_tool_output))
        .route("/workspaces/{w}/sessions/{s}/overall-diff", get(http::session_overall_diff))
        .route("/workspaces/{w}/sessions/{s}/stop", get(http::session_stop))
        .route("/workspaces/{w}/sessions/{s}/resume", get(http::session_resume))
        .route("/workspaces/{w}/sessions/{s}/fork", get(http::session_fork))
        .route("/permissions/pending", get(http::pending_permissions))
        .route("/policy/rules", get(http::policy_rules))
        .route("/policy/audit", get(http::policy_audit))
        .route("/policy/profile", get(http::policy_profile))
        .route("/security/profile", put(http::put_security_profile))
        .route("/themes", get(http::list_themes))
        .route(
            "/themes/{name}",
            get(http::get_theme).put(http::put_theme).delete(http::delete_theme),
        )
        .route("/stream", get(ws::stream_handler))
        .layer(middleware::from_fn_with_state(Arc::clone(&state), auth_layer))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// JSON 404 used by handlers for unknown ids.
pub fn not_found(message: &str) -> Response {
    let (status, body) = crate::error::ErrorCode::NotFound.to_http_response(message);
    (status, body).into_response()
}

/// Map an internal error code + message to a JSON response.
pub fn error_json(code: crate::error::ErrorCode, message: impl Into<String>) -> Response {
    let (status, body) = code.to_http_response(message);
    (status, body).into_response()
}

/// Shorthand for a `StatusCode` with empty body (used by DELETEs).
pub fn no_content() -> Response {
    StatusCode::NO_CONTENT.into_response()
}
