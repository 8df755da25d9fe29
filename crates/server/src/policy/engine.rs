// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Rule store and layered evaluation.

use std::sync::RwLock;

use tracing::debug;

use super::bash::{parse_bash_command, split_clauses};
use super::pattern::{glob_match, literal_prefix_len};
use super::{
    guardrails, heuristics, Decision, PolicyAction, PolicyLayer, PolicyRule, RuleScope,
    SecurityProfile, ToolRequest,
};

/// Who the request is evaluated for. Rules scoped to another session or
/// workspace never apply.
#[derive(Debug, Clone)]
pub struct EvalContext {
    pub workspace_id: String,
    pub session_id: String,
}

/// Layered policy engine. The rule store is append-ordered; insertion
/// order is the final tie-break, so evaluation is deterministic.
pub struct PolicyEngine {
    rules: RwLock<Vec<PolicyRule>>,
    profile: RwLock<SecurityProfile>,
}

impl PolicyEngine {
    pub fn new(profile: SecurityProfile) -> Self {
        Self { rules: RwLock::new(Vec::new()), profile: RwLock::new(profile) }
    }

    pub fn profile(&self) -> SecurityProfile {
        self.profile.read().map(|p| *p).unwrap_or(SecurityProfile::Host)
    }

    pub fn set_profile(&self, profile: SecurityProfile) {
        if let Ok(mut current) = self.profile.write() {
            *current = profile;
        }
    }

    pub fn add_rule(&self, rule: PolicyRule) {
        if let Ok(mut rules) = self.rules.write() {
            rules.push(rule);
        }
    }

    /// Remove a rule by id. Returns whether anything was removed.
    pub fn remove_rule(&self, id: &str) -> bool {
        match self.rules.write() {
            Ok(mut rules) => {
                let before = rules.len();
                rules.retain(|r| r.id != id);
                rules.len() != before
            }
            Err(_) => false,
        }
    }

    pub fn rules(&self) -> Vec<PolicyRule> {
        self.rules.read().map(|r| r.clone()).unwrap_or_default()
    }

    /// Evaluate a tool request through every layer.
    pub fn evaluate(&self, request: &ToolRequest, ctx: &EvalContext, now_ms: u64) -> Decision {
        // Layer 1: guardrails. Always first, never overridable.
        if let Some(decision) = guardrails::check(request) {
            return decision;
        }

        // Layer 2: policy meta-tools always go to the human.
        if request.tool.starts_with("policy.") {
            return Decision::new(
                PolicyAction::Ask,
                PolicyLayer::Permission,
                "policy meta-tools require confirmation",
            );
        }

        let profile = self.profile();

        let decision = match request.bash_command() {
            Some(command) => self.evaluate_bash(request, command, ctx, profile, now_ms),
            None => self
                .rules_decision(request, None, ctx, now_ms)
                .unwrap_or_else(|| fallback(profile)),
        };

        debug!(
            tool = %request.tool,
            action = %decision.action.as_str(),
            layer = %decision.layer.as_str(),
            "policy evaluated"
        );
        decision
    }

    /// Chained commands are evaluated clause by clause; the most
    /// restrictive clause verdict wins.
    fn evaluate_bash(
        &self,
        request: &ToolRequest,
        command: &str,
        ctx: &EvalContext,
        profile: SecurityProfile,
        now_ms: u64,
    ) -> Decision {
        let mut verdict: Option<Decision> = None;

        for clause in split_clauses(command) {
            let clause_decision = self
                .rules_decision(request, Some(clause.as_str()), ctx, now_ms)
                .or_else(|| heuristics::check_clause(&clause, profile))
                .or_else(|| {
                    if profile == SecurityProfile::Host {
                        heuristics::preset_external_action(&clause)
                    } else {
                        None
                    }
                })
                .unwrap_or_else(|| fallback(profile));

            verdict = Some(match verdict {
                None => clause_decision,
                Some(current) => {
                    if clause_decision.action.restrictiveness()
                        > current.action.restrictiveness()
                    {
                        clause_decision
                    } else {
                        current
                    }
                }
            });
        }

        verdict.unwrap_or_else(|| fallback(profile))
    }

    /// Layer 3: user rules, most specific first.
    ///
    /// Any matching deny wins outright; otherwise ordering is specificity,
    /// then scope narrowness, then `deny > ask > allow`, then insertion.
    fn rules_decision(
        &self,
        request: &ToolRequest,
        clause: Option<&str>,
        ctx: &EvalContext,
        now_ms: u64,
    ) -> Option<Decision> {
        let rules = self.rules.read().ok()?;

        let mut matched: Vec<(usize, &PolicyRule)> = rules
            .iter()
            .enumerate()
            .filter(|(_, rule)| rule_applies(rule, request, clause, ctx, now_ms))
            .collect();
        if matched.is_empty() {
            return None;
        }

        matched.sort_by(|(ia, a), (ib, b)| {
            rule_specificity(b)
                .cmp(&rule_specificity(a))
                .then(b.scope.narrowness().cmp(&a.scope.narrowness()))
                .then(b.decision.restrictiveness().cmp(&a.decision.restrictiveness()))
                .then(ia.cmp(ib))
        });

        let chosen = matched
            .iter()
            .find(|(_, rule)| rule.decision == PolicyAction::Deny)
            .or_else(|| matched.first())?;

        let rule = chosen.1;
        Some(
            Decision::new(rule.decision, PolicyLayer::Rule, rule.label.clone())
                .with_rule(rule.id.clone()),
        )
    }
}

fn fallback(profile: SecurityProfile) -> Decision {
    Decision::new(
        profile.fallback_action(),
        PolicyLayer::Fallback,
        format!("{} profile fallback", profile.as_str()),
    )
}

fn rule_applies(
    rule: &PolicyRule,
    request: &ToolRequest,
    clause: Option<&str>,
    ctx: &EvalContext,
    now_ms: u64,
) -> bool {
    if rule.expires_at.is_some_and(|t| t <= now_ms) {
        return false;
    }
    match rule.scope {
        RuleScope::Global => {}
        RuleScope::Workspace => {
            if rule.workspace_id.as_deref() != Some(ctx.workspace_id.as_str()) {
                return false;
            }
        }
        RuleScope::Session => {
            if rule.session_id.as_deref() != Some(ctx.session_id.as_str()) {
                return false;
            }
        }
    }
    if !glob_match(&rule.tool, &request.tool) {
        return false;
    }

    match clause {
        Some(clause) => {
            if let Some(ref exec) = rule.executable {
                if parse_bash_command(clause).executable != *exec {
                    return false;
                }
            }
            match rule.pattern {
                Some(ref pattern) => glob_match(pattern, clause),
                None => true,
            }
        }
        None => match rule.pattern {
            Some(ref pattern) => match request.path() {
                Some(path) => glob_match(pattern, path),
                None => false,
            },
            None => true,
        },
    }
}

/// Specificity: bash rules score an executable selector above any pattern;
/// otherwise it is the literal prefix length of the pattern.
fn rule_specificity(rule: &PolicyRule) -> usize {
    let exec_bonus = if rule.executable.is_some() { 10_000 } else { 0 };
    let prefix = rule.pattern.as_deref().map(literal_prefix_len).unwrap_or(0);
    exec_bonus + prefix
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
