// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Folds raw agent events into outbound [`ServerMessage`]s.
//!
//! The translator is per-session and nearly stateless: it tracks only the
//! accumulated tool output per call (to turn cumulative updates into
//! deltas) and what it already streamed for the current assistant message.

use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine;

use crate::session::agent::{AgentContentBlock, AgentEvent};
use crate::transport::ws_msg::{RenderSegment, ServerMessage};

/// Optional mobile-renderer hooks. When absent, no segments are attached.
pub trait ToolRenderer: Send + Sync {
    fn render_tool_call(&self, tool: &str, input: &serde_json::Value) -> Option<Vec<RenderSegment>>;
    fn render_tool_result(
        &self,
        tool: &str,
        details: Option<&serde_json::Value>,
        is_error: bool,
    ) -> Option<Vec<RenderSegment>>;
}

/// Per-session event translator.
pub struct Translator {
    session_id: String,
    /// tool-call id → accumulated rendered output.
    partial_results: HashMap<String, String>,
    /// tool-call id → tool name (needed again at tool_end).
    call_tools: HashMap<String, String>,
    streamed_assistant_text: String,
    has_streamed_thinking: bool,
    renderer: Option<Arc<dyn ToolRenderer>>,
}

impl Translator {
    pub fn new(session_id: impl Into<String>, renderer: Option<Arc<dyn ToolRenderer>>) -> Self {
        Self {
            session_id: session_id.into(),
            partial_results: HashMap::new(),
            call_tools: HashMap::new(),
            streamed_assistant_text: String::new(),
            has_streamed_thinking: false,
            renderer,
        }
    }

    /// Translate one agent event into zero or more outbound messages.
    ///
    /// Control events (permission requests, command responses, token
    /// usage) are the manager's business and translate to nothing here.
    pub fn translate(&mut self, event: &AgentEvent) -> Vec<ServerMessage> {
        let sid = self.session_id.clone();
        match event {
            AgentEvent::AgentReady {} => vec![],
            AgentEvent::AgentStart { .. } => vec![ServerMessage::AgentStart { session_id: sid }],
            AgentEvent::AgentEnd {} => vec![ServerMessage::AgentEnd { session_id: sid }],
            AgentEvent::TurnStart {} => {
                self.streamed_assistant_text.clear();
                self.has_streamed_thinking = false;
                vec![ServerMessage::TurnStart { session_id: sid }]
            }
            AgentEvent::TurnEnd {} => vec![ServerMessage::TurnEnd { session_id: sid }],
            AgentEvent::MessageEnd {} => {
                self.streamed_assistant_text.clear();
                self.has_streamed_thinking = false;
                vec![ServerMessage::MessageEnd { session_id: sid }]
            }
            AgentEvent::TextDelta { text } => {
                self.streamed_assistant_text.push_str(text);
                vec![ServerMessage::TextDelta { session_id: sid, text: text.clone() }]
            }
            AgentEvent::ThinkingDelta { text } => {
                self.has_streamed_thinking = true;
                vec![ServerMessage::ThinkingDelta { session_id: sid, text: text.clone() }]
            }
            AgentEvent::ToolExecutionStart { tool_call_id, tool, input } => {
                self.partial_results.insert(tool_call_id.clone(), String::new());
                self.call_tools.insert(tool_call_id.clone(), tool.clone());
                let segments =
                    self.renderer.as_ref().and_then(|r| r.render_tool_call(tool, input));
                vec![ServerMessage::ToolStart {
                    session_id: sid,
                    tool_call_id: tool_call_id.clone(),
                    tool: tool.clone(),
                    input: input.clone(),
                    segments,
                }]
            }
            AgentEvent::ToolExecutionUpdate { tool_call_id, content } => {
                let full = render_content(content);
                let delta = self.output_delta(tool_call_id, full);
                if delta.is_empty() {
                    return vec![];
                }
                vec![ServerMessage::ToolOutput {
                    session_id: sid,
                    tool_call_id: tool_call_id.clone(),
                    output: delta,
                }]
            }
            AgentEvent::ToolExecutionEnd { tool_call_id, details, is_error } => {
                self.partial_results.remove(tool_call_id);
                let tool = self.call_tools.remove(tool_call_id).unwrap_or_default();
                let segments = self
                    .renderer
                    .as_ref()
                    .and_then(|r| r.render_tool_result(&tool, details.as_ref(), *is_error));
                vec![ServerMessage::ToolEnd {
                    session_id: sid,
                    tool_call_id: tool_call_id.clone(),
                    details: details.clone(),
                    is_error: *is_error,
                    segments,
                }]
            }
            AgentEvent::CompactionStart {} => {
                vec![ServerMessage::CompactionStart { session_id: sid }]
            }
            AgentEvent::CompactionEnd {} => vec![ServerMessage::CompactionEnd { session_id: sid }],
            AgentEvent::RetryStart { attempt, reason } => vec![ServerMessage::RetryStart {
                session_id: sid,
                attempt: *attempt,
                reason: reason.clone(),
            }],
            AgentEvent::RetryEnd {} => vec![ServerMessage::RetryEnd { session_id: sid }],
            AgentEvent::MessageUpdate { subtype, text } => {
                self.translate_message_update(subtype, text.as_deref())
            }
            // Control traffic handled upstream of the translator.
            AgentEvent::CommandResponse { .. }
            | AgentEvent::PermissionRequest { .. }
            | AgentEvent::TokenUsage { .. }
            | AgentEvent::ExtensionUiRequest { .. }
            | AgentEvent::ExtensionUiNotification { .. } => vec![],
        }
    }

    /// Most message_update subtypes fold to nothing; streaming deltas and
    /// errors surface.
    fn translate_message_update(&mut self, subtype: &str, text: Option<&str>) -> Vec<ServerMessage> {
        let sid = self.session_id.clone();
        match subtype {
            "text_delta" => {
                let text = text.unwrap_or_default().to_owned();
                self.streamed_assistant_text.push_str(&text);
                vec![ServerMessage::TextDelta { session_id: sid, text }]
            }
            "thinking_delta" => {
                self.has_streamed_thinking = true;
                vec![ServerMessage::ThinkingDelta {
                    session_id: sid,
                    text: text.unwrap_or_default().to_owned(),
                }]
            }
            "error" => vec![ServerMessage::Error {
                code: crate::error::ErrorCode::Upstream.as_str().to_owned(),
                message: text.unwrap_or("agent error").to_owned(),
                session_id: Some(sid),
                fatal: false,
            }],
            _ => vec![],
        }
    }

    /// Cumulative output → delta. An update that is not an extension of
    /// what we saw (the agent re-rendered) is emitted whole.
    fn output_delta(&mut self, tool_call_id: &str, full: String) -> String {
        let last = self.partial_results.get(tool_call_id).cloned().unwrap_or_default();
        let delta = match full.strip_prefix(&last) {
            Some(delta) => delta.to_owned(),
            None => full.clone(),
        };
        self.partial_results.insert(tool_call_id.to_owned(), full);
        delta
    }

    /// What the assistant has streamed in the current message.
    pub fn streamed_text(&self) -> &str {
        &self.streamed_assistant_text
    }

    pub fn has_streamed_thinking(&self) -> bool {
        self.has_streamed_thinking
    }
}

/// Render content blocks to the wire text form: text blocks verbatim,
/// binary blocks as `data:<mime>;base64,<payload>` strings.
fn render_content(blocks: &[AgentContentBlock]) -> String {
    let mut out = String::new();
    for block in blocks {
        match block {
            AgentContentBlock::Text { text } => out.push_str(text),
            AgentContentBlock::Image { media_type, data }
            | AgentContentBlock::Audio { media_type, data } => {
                // Already-encoded payloads pass through untouched.
                let payload = if is_base64(data) {
                    data.clone()
                } else {
                    base64::engine::general_purpose::STANDARD.encode(data.as_bytes())
                };
                out.push_str(&format!("data:{media_type};base64,{payload}"));
            }
        }
    }
    out
}

fn is_base64(data: &str) -> bool {
    !data.is_empty()
        && data.len() % 4 == 0
        && data.bytes().all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'='))
}

#[cfg(test)]
#[path = "translate_tests.rs"]
mod tests;
