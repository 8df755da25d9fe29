// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `/stream` multiplexer: one bidirectional socket per client,
//! subscribe/resume/turn_ack protocol, per-session command routing.
//!
//! Session events are serialized with their ring `seq` injected at the
//! top level, so clients can resume with `sinceSeq` after a reconnect.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::ErrorCode;
use crate::session::active::OutFrame;
use crate::session::dedupe::TurnCommand;
use crate::session::TurnOptions;
use crate::transport::ws_msg::{
    command_result, ClientMessage, ImageBlock, ServerMessage, SubscriptionLevel,
};
use crate::transport::AppState;
use crate::workspace::WorkspaceKind;

/// `GET /stream` — WebSocket upgrade. Bearer auth already ran in the
/// middleware; a bad token never reaches this handler.
pub async fn stream_handler(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_stream(state, socket))
}

/// Per-connection subscription bookkeeping.
#[derive(Default)]
struct ConnState {
    /// session id → (subscriber id, level).
    subs: HashMap<String, (u64, SubscriptionLevel)>,
}

impl ConnState {
    fn subscribed_full(&self, session_id: &str) -> bool {
        matches!(self.subs.get(session_id), Some((_, SubscriptionLevel::Full)))
    }
}

async fn handle_stream(state: Arc<AppState>, socket: WebSocket) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<OutFrame>();
    let mut conn = ConnState::default();

    // First frame on every connection, before anything else can queue.
    let _ = out_tx.send(OutFrame::control(ServerMessage::StreamConnected {
        user_name: state.user_name(),
    }));

    loop {
        tokio::select! {
            frame = out_rx.recv() => {
                let Some(frame) = frame else { break };
                let Some(text) = frame_to_text(&frame) else { continue };
                if ws_tx.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let client_msg: ClientMessage = match serde_json::from_str(&text) {
                            Ok(m) => m,
                            Err(_) => {
                                let _ = out_tx.send(OutFrame::control(
                                    crate::transport::ws_msg::ws_error(
                                        ErrorCode::BadRequest,
                                        "malformed frame",
                                    ),
                                ));
                                continue;
                            }
                        };
                        handle_client_message(&state, &mut conn, client_msg, &out_tx).await;
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
        }
    }

    // Disconnect unsubscribes this client but never stops sessions.
    for (session_id, (sub_id, _)) in conn.subs {
        if let Some(active) = state.manager.get(&session_id).await {
            active.unsubscribe(sub_id);
        }
    }
}

/// Serialize a frame, injecting the ring seq for session events.
fn frame_to_text(frame: &OutFrame) -> Option<String> {
    let mut value = serde_json::to_value(&frame.msg).ok()?;
    if let (Some(seq), Some(obj)) = (frame.seq, value.as_object_mut()) {
        obj.insert("seq".to_owned(), seq.into());
    }
    serde_json::to_string(&value).ok()
}

async fn handle_client_message(
    state: &Arc<AppState>,
    conn: &mut ConnState,
    msg: ClientMessage,
    out_tx: &mpsc::UnboundedSender<OutFrame>,
) {
    let reply = |msg: ServerMessage| {
        let _ = out_tx.send(OutFrame::control(msg));
    };

    match msg {
        ClientMessage::Subscribe { session_id, level, since_seq, request_id } => {
            if let Some(since) = since_seq {
                if since < 0 {
                    reply(command_result(
                        "subscribe",
                        &request_id,
                        false,
                        None,
                        Some("sinceSeq must be non-negative".to_owned()),
                    ));
                    return;
                }
            }
            let Some(active) = state.manager.get(&session_id).await else {
                reply(command_result(
                    "subscribe",
                    &request_id,
                    false,
                    None,
                    Some("unknown session".to_owned()),
                ));
                return;
            };

            // Re-subscribing replaces the previous subscription.
            if let Some((old_id, _)) = conn.subs.remove(&session_id) {
                active.unsubscribe(old_id);
            }

            let since = since_seq.map(|s| s as u64);
            match active.subscribe(level, since, &request_id, out_tx.clone()) {
                Some(outcome) => {
                    conn.subs.insert(session_id.clone(), (outcome.subscriber_id, level));
                    spawn_git_status(Arc::clone(state), session_id);
                }
                None => {
                    reply(command_result(
                        "subscribe",
                        &request_id,
                        false,
                        None,
                        Some("subscribe failed".to_owned()),
                    ));
                }
            }
        }

        ClientMessage::Unsubscribe { session_id, request_id } => {
            if let Some((sub_id, _)) = conn.subs.remove(&session_id) {
                if let Some(active) = state.manager.get(&session_id).await {
                    active.unsubscribe(sub_id);
                }
            }
            // Idempotent: always success.
            reply(command_result("unsubscribe", &request_id, true, None, None));
        }

        ClientMessage::GetState { session_id, request_id } => {
            if !require_full(conn, &session_id, "get_state", &request_id, &reply) {
                return;
            }
            match state.manager.get(&session_id).await {
                Some(active) => {
                    let data = serde_json::to_value(active.record()).ok();
                    reply(command_result("get_state", &request_id, true, data, None));
                }
                None => reply(command_result(
                    "get_state",
                    &request_id,
                    false,
                    None,
                    Some("unknown session".to_owned()),
                )),
            }
        }

        ClientMessage::Prompt {
            session_id,
            message,
            images,
            client_turn_id,
            request_id,
            streaming_behavior,
            timestamp,
        } => {
            dispatch_turn(
                state,
                conn,
                &reply,
                TurnCommand::Prompt,
                session_id,
                message,
                images,
                client_turn_id,
                request_id,
                streaming_behavior,
                timestamp,
            )
            .await;
        }
        ClientMessage::Steer {
            session_id,
            message,
            images,
            client_turn_id,
            request_id,
            streaming_behavior,
            timestamp,
        } => {
            dispatch_turn(
                state,
                conn,
                &reply,
                TurnCommand::Steer,
                session_id,
                message,
                images,
                client_turn_id,
                request_id,
                streaming_behavior,
                timestamp,
            )
            .await;
        }
        ClientMessage::FollowUp {
            session_id,
            message,
            images,
            client_turn_id,
            request_id,
            streaming_behavior,
            timestamp,
        } => {
            dispatch_turn(
                state,
                conn,
                &reply,
                TurnCommand::FollowUp,
                session_id,
                message,
                images,
                client_turn_id,
                request_id,
                streaming_behavior,
                timestamp,
            )
            .await;
        }

        ClientMessage::Stop { session_id, request_id } => {
            if !require_full(conn, &session_id, "stop", &request_id, &reply) {
                return;
            }
            match state.manager.send_abort(&session_id).await {
                Ok(()) => reply(command_result("stop", &request_id, true, None, None)),
                Err(e) => {
                    reply(command_result("stop", &request_id, false, None, Some(e.message)))
                }
            }
        }

        ClientMessage::StopSession { session_id, request_id } => {
            if !require_full(conn, &session_id, "stop_session", &request_id, &reply) {
                return;
            }
            match state.manager.stop_session(&session_id, "stopped by user").await {
                Ok(()) => reply(command_result("stop_session", &request_id, true, None, None)),
                Err(e) => reply(command_result(
                    "stop_session",
                    &request_id,
                    false,
                    None,
                    Some(e.message),
                )),
            }
        }

        ClientMessage::PermissionResponse { id, action, scope, pattern, request_id } => {
            let found = state.gate.resolve_decision(&id, action, scope, pattern);
            if found {
                reply(command_result("permission_response", &request_id, true, None, None));
            } else {
                reply(command_result(
                    "permission_response",
                    &request_id,
                    false,
                    None,
                    Some("permission not found".to_owned()),
                ));
            }
        }

        ClientMessage::ExtensionUiResponse { session_id, id, payload, request_id } => {
            if !require_full(conn, &session_id, "extension_ui_response", &request_id, &reply) {
                return;
            }
            match state.manager.forward_extension_ui(&session_id, &id, payload).await {
                Ok(()) => {
                    reply(command_result("extension_ui_response", &request_id, true, None, None))
                }
                Err(e) => reply(command_result(
                    "extension_ui_response",
                    &request_id,
                    false,
                    None,
                    Some(e.message),
                )),
            }
        }

        ClientMessage::SetModel { session_id, model, request_id } => {
            forward_rpc(
                state,
                conn,
                &reply,
                session_id,
                "set_model",
                serde_json::json!({ "model": model }),
                request_id,
            )
            .await;
        }
        ClientMessage::SetThinkingLevel { session_id, level, request_id } => {
            forward_rpc(
                state,
                conn,
                &reply,
                session_id,
                "set_thinking_level",
                serde_json::json!({ "level": level }),
                request_id,
            )
            .await;
        }
        ClientMessage::Fork { session_id, request_id } => {
            forward_rpc(
                state,
                conn,
                &reply,
                session_id,
                "fork",
                serde_json::Value::Null,
                request_id,
            )
            .await;
        }
        ClientMessage::Command { session_id, command, params, request_id } => {
            forward_rpc(state, conn, &reply, session_id, &command, params, request_id).await;
        }
    }
}

/// Enforce the full-subscription rule for session-scoped commands.
///
/// Refusal emits both an `error` frame (with the contractual phrase) and
/// the 1:1 `command_result` for the request id.
fn require_full(
    conn: &ConnState,
    session_id: &str,
    command: &str,
    request_id: &str,
    reply: &impl Fn(ServerMessage),
) -> bool {
    if conn.subscribed_full(session_id) {
        return true;
    }
    let message = format!("session {session_id} not subscribed at level=full");
    reply(ServerMessage::Error {
        code: ErrorCode::NotSubscribed.as_str().to_owned(),
        message: message.clone(),
        session_id: Some(session_id.to_owned()),
        fatal: false,
    });
    reply(command_result(command, request_id, false, None, Some(message)));
    false
}

#[allow(clippy::too_many_arguments)]
async fn dispatch_turn(
    state: &Arc<AppState>,
    conn: &ConnState,
    reply: &impl Fn(ServerMessage),
    command: TurnCommand,
    session_id: String,
    message: String,
    images: Vec<ImageBlock>,
    client_turn_id: String,
    request_id: String,
    streaming_behavior: Option<String>,
    timestamp: Option<u64>,
) {
    if !require_full(conn, &session_id, command.as_str(), &request_id, reply) {
        return;
    }
    let opts = TurnOptions {
        client_turn_id,
        request_id: request_id.clone(),
        streaming_behavior,
        timestamp,
    };
    match state.manager.send_turn(&session_id, command, message, images, opts).await {
        Ok(()) => reply(command_result(command.as_str(), &request_id, true, None, None)),
        Err(e) => {
            reply(command_result(command.as_str(), &request_id, false, None, Some(e.message)))
        }
    }
}

async fn forward_rpc(
    state: &Arc<AppState>,
    conn: &ConnState,
    reply: &impl Fn(ServerMessage),
    session_id: String,
    command: &str,
    params: serde_json::Value,
    request_id: String,
) {
    if !require_full(conn, &session_id, command, &request_id, reply) {
        return;
    }
    match state.manager.forward_command(&session_id, command, params, &request_id).await {
        Ok(response) => reply(command_result(
            command,
            &request_id,
            response.success,
            response.data,
            response.error,
        )),
        Err(e) => reply(command_result(command, &request_id, false, None, Some(e.message))),
    }
}

/// Best-effort `git_status` snapshot for host workspaces, broadcast after
/// a subscribe bootstrap.
fn spawn_git_status(state: Arc<AppState>, session_id: String) {
    tokio::spawn(async move {
        let Some(active) = state.manager.get(&session_id).await else {
            return;
        };
        let Some(workspace) = state.storage.load_workspace(&active.workspace_id) else {
            return;
        };
        let WorkspaceKind::Host { path } = workspace.kind else {
            return;
        };

        let output = tokio::process::Command::new("git")
            .args(["status", "--porcelain=v1", "-b"])
            .current_dir(&path)
            .output()
            .await;
        let Ok(output) = output else {
            return;
        };
        if !output.status.success() {
            debug!(session_id, "git status unavailable");
            return;
        }

        let text = String::from_utf8_lossy(&output.stdout);
        let mut branch = None;
        let mut modified = Vec::new();
        for line in text.lines() {
            if let Some(rest) = line.strip_prefix("## ") {
                branch = Some(
                    rest.split_once("...").map(|(b, _)| b).unwrap_or(rest).to_owned(),
                );
            } else if let Some(name) = line.get(3..) {
                modified.push(name.to_owned());
            }
        }
        let clean = modified.is_empty();
        active.broadcast(ServerMessage::GitStatus { session_id, branch, clean, modified });
    });
}

#[cfg(test)]
#[path = "ws_tests.rs"]
mod tests;
