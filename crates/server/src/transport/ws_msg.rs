// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire message types for the `/stream` protocol.
//!
//! Both directions are closed internally-tagged enums (`{"type": ...}`)
//! with camelCase field names. Every variant the server can emit has a
//! canonical snapshot test in `ws_msg_tests.rs`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ErrorCode;
use crate::session::record::SessionRecord;

/// Turn-ack stage. Ordered: `Accepted < Dispatched < Started`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStage {
    Accepted,
    Dispatched,
    Started,
}

impl TurnStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Dispatched => "dispatched",
            Self::Started => "started",
        }
    }
}

/// Who initiated a stop escalation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopSource {
    User,
    Server,
}

/// Subscription depth for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionLevel {
    /// Every event the session emits.
    Full,
    /// Only the summary subset (state, lifecycle, permissions).
    Notifications,
}

/// A styled segment produced by an optional mobile-renderer hook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderSegment {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
}

fn is_false(v: &bool) -> bool {
    !*v
}

/// Server → client frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// First frame on every `/stream` connection.
    StreamConnected {
        user_name: String,
    },
    /// Subscribe bootstrap: the session exists and `current_seq` is its
    /// latest assigned sequence number.
    Connected {
        session: SessionRecord,
        current_seq: u64,
    },
    /// Full session snapshot. Re-broadcast on every status change.
    State {
        session: SessionRecord,
    },
    SessionEnded {
        session_id: String,
        reason: String,
    },
    StopRequested {
        session_id: String,
        source: StopSource,
    },
    StopConfirmed {
        session_id: String,
    },
    StopFailed {
        session_id: String,
        reason: String,
    },
    Error {
        code: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(default, skip_serializing_if = "is_false")]
        fatal: bool,
    },
    AgentStart {
        session_id: String,
    },
    AgentEnd {
        session_id: String,
    },
    TurnStart {
        session_id: String,
    },
    TurnEnd {
        session_id: String,
    },
    MessageEnd {
        session_id: String,
    },
    TextDelta {
        session_id: String,
        text: String,
    },
    ThinkingDelta {
        session_id: String,
        text: String,
    },
    ToolStart {
        session_id: String,
        tool_call_id: String,
        tool: String,
        input: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        segments: Option<Vec<RenderSegment>>,
    },
    /// Incremental tool output. `output` is the delta since the previous
    /// `tool_output` for the same call, never the accumulated text.
    ToolOutput {
        session_id: String,
        tool_call_id: String,
        output: String,
    },
    ToolEnd {
        session_id: String,
        tool_call_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<Value>,
        #[serde(default, skip_serializing_if = "is_false")]
        is_error: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        segments: Option<Vec<RenderSegment>>,
    },
    TurnAck {
        session_id: String,
        client_turn_id: String,
        request_id: String,
        stage: TurnStage,
        duplicate: bool,
    },
    CommandResult {
        command: String,
        request_id: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    CompactionStart {
        session_id: String,
    },
    CompactionEnd {
        session_id: String,
    },
    RetryStart {
        session_id: String,
        attempt: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    RetryEnd {
        session_id: String,
    },
    PermissionRequest {
        id: String,
        session_id: String,
        workspace_id: String,
        tool: String,
        input: Value,
        display_summary: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        timeout_at: Option<u64>,
        expires: bool,
        risk: String,
    },
    PermissionExpired {
        id: String,
        reason: String,
    },
    PermissionCancelled {
        id: String,
        reason: String,
    },
    ExtensionUiRequest {
        session_id: String,
        id: String,
        payload: Value,
    },
    ExtensionUiNotification {
        session_id: String,
        payload: Value,
    },
    GitStatus {
        session_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        branch: Option<String>,
        clean: bool,
        modified: Vec<String>,
    },
}

impl ServerMessage {
    /// The session this message belongs to, if it is session-scoped.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::StreamConnected { .. }
            | Self::CommandResult { .. }
            | Self::PermissionExpired { .. }
            | Self::PermissionCancelled { .. } => None,
            Self::Connected { session, .. } | Self::State { session } => Some(&session.id),
            Self::Error { session_id, .. } => session_id.as_deref(),
            Self::SessionEnded { session_id, .. }
            | Self::StopRequested { session_id, .. }
            | Self::StopConfirmed { session_id }
            | Self::StopFailed { session_id, .. }
            | Self::AgentStart { session_id }
            | Self::AgentEnd { session_id }
            | Self::TurnStart { session_id }
            | Self::TurnEnd { session_id }
            | Self::MessageEnd { session_id }
            | Self::TextDelta { session_id, .. }
            | Self::ThinkingDelta { session_id, .. }
            | Self::ToolStart { session_id, .. }
            | Self::ToolOutput { session_id, .. }
            | Self::ToolEnd { session_id, .. }
            | Self::TurnAck { session_id, .. }
            | Self::CompactionStart { session_id }
            | Self::CompactionEnd { session_id }
            | Self::RetryStart { session_id, .. }
            | Self::RetryEnd { session_id }
            | Self::PermissionRequest { session_id, .. }
            | Self::ExtensionUiRequest { session_id, .. }
            | Self::ExtensionUiNotification { session_id, .. }
            | Self::GitStatus { session_id, .. } => Some(session_id),
        }
    }

    /// Whether a `notifications`-level subscriber receives this message.
    ///
    /// The summary subset covers lifecycle, stop flow, permissions, and
    /// errors; streaming deltas and tool traffic are `full`-only.
    pub fn notification_worthy(&self) -> bool {
        matches!(
            self,
            Self::State { .. }
                | Self::SessionEnded { .. }
                | Self::StopRequested { .. }
                | Self::StopConfirmed { .. }
                | Self::StopFailed { .. }
                | Self::Error { .. }
                | Self::TurnEnd { .. }
                | Self::PermissionRequest { .. }
                | Self::PermissionExpired { .. }
                | Self::PermissionCancelled { .. }
        )
    }
}

/// Client → server frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    Subscribe {
        session_id: String,
        level: SubscriptionLevel,
        /// Signed so that negative values can be rejected explicitly
        /// instead of failing JSON deserialization.
        #[serde(skip_serializing_if = "Option::is_none")]
        since_seq: Option<i64>,
        request_id: String,
    },
    Unsubscribe {
        session_id: String,
        request_id: String,
    },
    GetState {
        session_id: String,
        request_id: String,
    },
    Prompt {
        session_id: String,
        message: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        images: Vec<ImageBlock>,
        client_turn_id: String,
        request_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        streaming_behavior: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
    Steer {
        session_id: String,
        message: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        images: Vec<ImageBlock>,
        client_turn_id: String,
        request_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        streaming_behavior: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
    FollowUp {
        session_id: String,
        message: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        images: Vec<ImageBlock>,
        client_turn_id: String,
        request_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        streaming_behavior: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
    /// Graceful abort of the in-flight turn.
    Stop {
        session_id: String,
        request_id: String,
    },
    /// Forceful session teardown.
    StopSession {
        session_id: String,
        request_id: String,
    },
    PermissionResponse {
        id: String,
        action: PermissionAction,
        #[serde(default)]
        scope: PermissionScope,
        #[serde(skip_serializing_if = "Option::is_none")]
        pattern: Option<String>,
        request_id: String,
    },
    ExtensionUiResponse {
        session_id: String,
        id: String,
        payload: Value,
        request_id: String,
    },
    SetModel {
        session_id: String,
        model: String,
        request_id: String,
    },
    SetThinkingLevel {
        session_id: String,
        level: String,
        request_id: String,
    },
    Fork {
        session_id: String,
        request_id: String,
    },
    /// Escape hatch for RPC commands without a dedicated variant.
    Command {
        session_id: String,
        command: String,
        #[serde(default)]
        params: Value,
        request_id: String,
    },
}

/// A user-attached image, carried inline on turn commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageBlock {
    pub media_type: String,
    pub data: String,
}

/// What the user decided about a pending permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionAction {
    Allow,
    Deny,
}

/// How far a permission response reaches beyond the single call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionScope {
    #[default]
    Once,
    Session,
    Workspace,
    Global,
}

/// Build a WebSocket error frame.
pub fn ws_error(code: ErrorCode, message: &str) -> ServerMessage {
    ServerMessage::Error {
        code: code.as_str().to_owned(),
        message: message.to_owned(),
        session_id: None,
        fatal: false,
    }
}

/// Build a `command_result` frame.
pub fn command_result(
    command: &str,
    request_id: &str,
    success: bool,
    data: Option<Value>,
    error: Option<String>,
) -> ServerMessage {
    ServerMessage::CommandResult {
        command: command.to_owned(),
        request_id: request_id.to_owned(),
        success,
        data,
        error,
    }
}

#[cfg(test)]
#[path = "ws_msg_tests.rs"]
mod tests;
