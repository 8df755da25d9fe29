// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Layered policy engine for tool invocations.
//!
//! Evaluation order: hard-coded guardrails, `policy.*` meta-tools, user
//! rules (specificity-sorted), behavior heuristics, profile presets, then
//! the profile fallback. Deny beats ask beats allow.

pub mod bash;
pub mod engine;
pub mod guardrails;
pub mod heuristics;
pub mod pattern;

pub use engine::PolicyEngine;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Verdict for a tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyAction {
    Allow,
    Ask,
    Deny,
}

impl PolicyAction {
    /// Restriction ordering: `Deny > Ask > Allow`.
    pub fn restrictiveness(&self) -> u8 {
        match self {
            Self::Allow => 0,
            Self::Ask => 1,
            Self::Deny => 2,
        }
    }

    /// The more restrictive of two actions.
    pub fn most_restrictive(self, other: Self) -> Self {
        if other.restrictiveness() > self.restrictiveness() {
            other
        } else {
            self
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Ask => "ask",
            Self::Deny => "deny",
        }
    }
}

/// Which layer produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyLayer {
    Guardrail,
    Permission,
    Heuristic,
    Rule,
    Fallback,
}

impl PolicyLayer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Guardrail => "guardrail",
            Self::Permission => "permission",
            Self::Heuristic => "heuristic",
            Self::Rule => "rule",
            Self::Fallback => "fallback",
        }
    }
}

/// The evaluated outcome for one tool request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub action: PolicyAction,
    pub reason: String,
    pub layer: PolicyLayer,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
}

impl Decision {
    pub fn new(action: PolicyAction, layer: PolicyLayer, reason: impl Into<String>) -> Self {
        Self { action, layer, reason: reason.into(), rule_id: None }
    }

    pub fn with_rule(mut self, rule_id: impl Into<String>) -> Self {
        self.rule_id = Some(rule_id.into());
        self
    }
}

/// A tool invocation under evaluation.
#[derive(Debug, Clone)]
pub struct ToolRequest {
    pub tool: String,
    pub input: Value,
    pub tool_call_id: Option<String>,
}

impl ToolRequest {
    pub fn new(tool: impl Into<String>, input: Value) -> Self {
        Self { tool: tool.into(), input, tool_call_id: None }
    }

    /// The bash command string, when this is a shell invocation.
    pub fn bash_command(&self) -> Option<&str> {
        if self.tool != "bash" && self.tool != "shell" {
            return None;
        }
        self.input.get("command").and_then(Value::as_str)
    }

    /// The target path, when the tool is path-based.
    pub fn path(&self) -> Option<&str> {
        for key in ["path", "file_path", "filePath"] {
            if let Some(p) = self.input.get(key).and_then(Value::as_str) {
                return Some(p);
            }
        }
        None
    }
}

/// Where a stored rule applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleScope {
    Global,
    Workspace,
    Session,
}

impl RuleScope {
    /// Narrower scopes win ties: `Session > Workspace > Global`.
    pub fn narrowness(&self) -> u8 {
        match self {
            Self::Global => 0,
            Self::Workspace => 1,
            Self::Session => 2,
        }
    }
}

/// A stored user rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRule {
    pub id: String,
    /// Tool selector (glob, e.g. `bash` or `mcp.*`).
    pub tool: String,
    pub decision: PolicyAction,
    /// For bash rules: restricts the match to one executable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executable: Option<String>,
    /// Glob matched against the command string (bash) or target path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    pub scope: RuleScope,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Epoch millis after which the rule is ignored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    pub label: String,
}

/// Security profile preset. Selects the fallback action for unmatched
/// tools and which preset classifications are active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityProfile {
    Host,
    Container,
}

impl SecurityProfile {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "host" => Some(Self::Host),
            "container" => Some(Self::Container),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::Container => "container",
        }
    }

    /// Fallback action for tools nothing else classified.
    pub fn fallback_action(&self) -> PolicyAction {
        match self {
            Self::Host => PolicyAction::Allow,
            Self::Container => PolicyAction::Ask,
        }
    }
}

/// Single-line human summary of a tool request for permission UIs.
///
/// Never logged verbatim (log sites emit `summary_chars` instead).
pub fn format_display_summary(request: &ToolRequest) -> String {
    const MAX: usize = 120;
    let detail = if let Some(cmd) = request.bash_command() {
        cmd.to_owned()
    } else if let Some(path) = request.path() {
        path.to_owned()
    } else {
        serde_json::to_string(&request.input).unwrap_or_default()
    };
    let flat: String = detail
        .chars()
        .map(|c| if c == '\n' || c == '\r' || c == '\t' { ' ' } else { c })
        .collect();
    let mut summary = format!("{}: {}", request.tool, flat.trim());
    if summary.chars().count() > MAX {
        summary = summary.chars().take(MAX - 1).collect::<String>() + "\u{2026}";
    }
    summary
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
