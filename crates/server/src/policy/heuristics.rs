// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Behavior-triggered ask rules. Only consulted when no user rule matched.

use super::bash::{parse_bash_command, pipeline_stages, ParsedCommand};
use super::{Decision, PolicyAction, PolicyLayer, SecurityProfile};

/// Shells that turn piped bytes into execution.
const SHELLS: &[&str] = &["sh", "bash", "zsh"];

/// Pipe sources that make pipe-to-shell a fetch-and-execute pattern.
const SUSPICIOUS_PIPE_SOURCES: &[&str] = &[
    "base64", "echo", "printf", "cat", "curl", "wget", "python", "python3", "perl", "ruby",
    "node", "openssl",
];

/// Raw-socket tools that matter on the host profile.
const RAW_SOCKET_TOOLS: &[&str] = &["nc", "ncat", "socat", "telnet"];

/// curl/wget flags that indicate an outbound data payload.
const POST_FLAGS: &[&str] = &["-d", "--data", "--data-binary", "--data-raw", "--post-data"];

/// Evaluate the heuristics layer against one bash clause.
/// `None` means no heuristic fired.
pub fn check_clause(clause: &str, profile: SecurityProfile) -> Option<Decision> {
    let stages = pipeline_stages(clause);

    if let Some(decision) = pipe_to_shell(&stages) {
        return Some(decision);
    }

    let parsed = parse_bash_command(clause);
    if let Some(decision) = data_egress(&parsed) {
        return Some(decision);
    }

    if profile == SecurityProfile::Host && RAW_SOCKET_TOOLS.contains(&parsed.executable.as_str()) {
        return Some(ask(format!("raw socket tool {}", parsed.executable)));
    }

    None
}

fn pipe_to_shell(stages: &[ParsedCommand]) -> Option<Decision> {
    if stages.len() < 2 {
        return None;
    }
    let last = stages.last()?;
    if !SHELLS.contains(&last.executable.as_str()) {
        return None;
    }
    let first = stages.first()?;
    if SUSPICIOUS_PIPE_SOURCES.contains(&first.executable.as_str()) {
        return Some(ask(format!("pipes {} output into {}", first.executable, last.executable)));
    }
    None
}

fn data_egress(parsed: &ParsedCommand) -> Option<Decision> {
    if parsed.executable != "curl" && parsed.executable != "wget" {
        return None;
    }
    let posts = parsed.args.iter().any(|arg| {
        if POST_FLAGS.contains(&arg.as_str()) {
            return true;
        }
        // -X POST (split) and -XPOST (joined)
        arg.eq_ignore_ascii_case("-xpost")
    }) || parsed
        .args
        .windows(2)
        .any(|w| w[0] == "-X" && w[1].eq_ignore_ascii_case("post"));
    if posts {
        Some(ask(format!("{} sends data to a remote host", parsed.executable)))
    } else {
        None
    }
}

fn ask(reason: String) -> Decision {
    Decision::new(PolicyAction::Ask, PolicyLayer::Heuristic, reason)
}

/// Host-preset external actions: risky even without a stored rule.
///
/// Classified `ask` on the host profile; the container profile leaves
/// these to its `ask` fallback.
pub fn preset_external_action(clause: &str) -> Option<Decision> {
    let parsed = parse_bash_command(clause);
    let exe = parsed.executable.as_str();

    let reason = match exe {
        "git" if parsed.args.first().is_some_and(|a| a == "push") => "pushes to a remote",
        "npm" if parsed.args.first().is_some_and(|a| a == "publish") => "publishes a package",
        "ssh" | "scp" => "reaches another host",
        "systemctl" | "shutdown" | "reboot" => "controls the host",
        _ => return None,
    };

    Some(Decision::new(
        PolicyAction::Ask,
        PolicyLayer::Heuristic,
        format!("{exe} {reason}"),
    ))
}

#[cfg(test)]
#[path = "heuristics_tests.rs"]
mod tests;
