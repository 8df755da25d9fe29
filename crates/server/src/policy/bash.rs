// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shell command parsing for policy evaluation.
//!
//! Single-pass tokenizer: quote-aware, escape-aware, linear in the input.
//! It never executes anything and never throws; on garbage it returns the
//! best-effort tokens it saw.

/// A parsed command line (one chain clause).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedCommand {
    /// The real executable after env-var prefixes and wrappers are stripped.
    pub executable: String,
    pub args: Vec<String>,
    pub has_pipe: bool,
    pub has_subshell: bool,
    pub has_redirect: bool,
}

/// Command wrappers that defer to the next word for the real executable.
/// `sudo` is deliberately not here: privilege escalation is the signal.
const WRAPPERS: &[&str] = &["env", "nice", "nohup", "time", "command"];

/// Parse one command line. For pipelines this describes the first stage;
/// use [`pipeline_stages`] when every stage matters.
pub fn parse_bash_command(input: &str) -> ParsedCommand {
    let tokens = tokenize(input);
    let mut parsed = ParsedCommand {
        has_pipe: tokens.iter().any(|t| matches!(t, Token::Pipe)),
        has_subshell: tokens.iter().any(|t| matches!(t, Token::Subshell)),
        has_redirect: tokens.iter().any(|t| matches!(t, Token::Redirect)),
        ..ParsedCommand::default()
    };

    let first_stage: Vec<&Token> =
        tokens.iter().take_while(|t| !matches!(t, Token::Pipe)).collect();
    let words: Vec<&str> = first_stage
        .iter()
        .filter_map(|t| match t {
            Token::Word(w) => Some(w.as_str()),
            _ => None,
        })
        .collect();

    let (executable, args) = resolve_executable(&words);
    parsed.executable = executable;
    parsed.args = args;
    parsed
}

/// Parse every stage of a pipeline.
pub fn pipeline_stages(input: &str) -> Vec<ParsedCommand> {
    let tokens = tokenize(input);
    let mut stages: Vec<Vec<String>> = vec![Vec::new()];
    let mut has_subshell = false;
    let mut has_redirect = false;

    for token in tokens {
        match token {
            Token::Word(w) => {
                if let Some(last) = stages.last_mut() {
                    last.push(w);
                }
            }
            Token::Pipe => stages.push(Vec::new()),
            Token::Subshell => has_subshell = true,
            Token::Redirect => has_redirect = true,
        }
    }

    let has_pipe = stages.len() > 1;
    stages
        .into_iter()
        .map(|words| {
            let refs: Vec<&str> = words.iter().map(String::as_str).collect();
            let (executable, args) = resolve_executable(&refs);
            ParsedCommand { executable, args, has_pipe, has_subshell, has_redirect }
        })
        .collect()
}

/// Split a command string into chain clauses on `&&`, `||`, `;`, and
/// newlines (outside quotes). The policy classifier evaluates each clause
/// and keeps the most restrictive verdict.
pub fn split_clauses(input: &str) -> Vec<String> {
    let mut clauses = Vec::new();
    let mut current = String::new();
    let mut chars = input.chars().peekable();
    let mut in_single = false;
    let mut in_double = false;

    while let Some(c) = chars.next() {
        match c {
            '\\' if !in_single => {
                current.push(c);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            '\'' if !in_double => {
                in_single = !in_single;
                current.push(c);
            }
            '"' if !in_single => {
                in_double = !in_double;
                current.push(c);
            }
            '&' if !in_single && !in_double && chars.peek() == Some(&'&') => {
                chars.next();
                clauses.push(std::mem::take(&mut current));
            }
            '|' if !in_single && !in_double && chars.peek() == Some(&'|') => {
                chars.next();
                clauses.push(std::mem::take(&mut current));
            }
            ';' | '\n' if !in_single && !in_double => {
                clauses.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    clauses.push(current);
    clauses.into_iter().map(|c| c.trim().to_owned()).filter(|c| !c.is_empty()).collect()
}

/// Strip `FOO=bar` env prefixes and wrapper commands to find the real
/// executable. Returns `(executable, args)`.
fn resolve_executable(words: &[&str]) -> (String, Vec<String>) {
    let mut idx = 0;

    loop {
        let Some(word) = words.get(idx) else {
            return (String::new(), Vec::new());
        };
        if is_env_assignment(word) {
            idx += 1;
            continue;
        }
        if WRAPPERS.contains(&word.to_lowercase().as_str()) {
            idx += 1;
            // `env -i` / `env -u NAME` style flags also belong to the wrapper.
            while let Some(next) = words.get(idx) {
                if next.starts_with('-') || is_env_assignment(next) {
                    idx += 1;
                } else {
                    break;
                }
            }
            continue;
        }
        break;
    }

    let executable = basename(words.get(idx).copied().unwrap_or_default());
    let args = words.iter().skip(idx + 1).map(|w| (*w).to_owned()).collect();
    (executable, args)
}

/// `FOO=bar` — a leading environment assignment, not a command word.
fn is_env_assignment(word: &str) -> bool {
    let Some(eq) = word.find('=') else {
        return false;
    };
    if eq == 0 {
        return false;
    }
    word[..eq].chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !word[..eq].chars().next().is_some_and(|c| c.is_ascii_digit())
}

/// `/usr/bin/sudo` → `sudo`. No normalization beyond the path split: a
/// zero-width-space-infested "s​udo" stays exactly as written and will not
/// compare equal to `sudo`.
fn basename(word: &str) -> String {
    word.rsplit('/').next().unwrap_or(word).to_owned()
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Pipe,
    Subshell,
    Redirect,
}

/// Quote- and escape-aware single-pass tokenizer.
fn tokenize(input: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut word = String::new();
    let mut chars = input.chars().peekable();
    let mut in_single = false;
    let mut in_double = false;

    macro_rules! flush_word {
        () => {
            if !word.is_empty() {
                tokens.push(Token::Word(std::mem::take(&mut word)));
            }
        };
    }

    while let Some(c) = chars.next() {
        if in_single {
            if c == '\'' {
                in_single = false;
            } else {
                word.push(c);
            }
            continue;
        }
        if in_double {
            match c {
                '"' => in_double = false,
                '\\' => {
                    if let Some(next) = chars.next() {
                        word.push(next);
                    }
                }
                '$' if chars.peek() == Some(&'(') => {
                    tokens.push(Token::Subshell);
                    word.push(c);
                }
                _ => word.push(c),
            }
            continue;
        }
        match c {
            '\'' => in_single = true,
            '"' => in_double = true,
            '\\' => {
                // An escaped pipe/redirect is literal text, not an operator.
                if let Some(next) = chars.next() {
                    word.push(next);
                }
            }
            ' ' | '\t' => flush_word!(),
            '|' => {
                flush_word!();
                // `||` belongs to clause splitting; a pipeline is a single `|`.
                if chars.peek() == Some(&'|') {
                    chars.next();
                } else {
                    tokens.push(Token::Pipe);
                }
            }
            '$' if chars.peek() == Some(&'(') => {
                tokens.push(Token::Subshell);
                word.push(c);
            }
            '`' => tokens.push(Token::Subshell),
            '(' => tokens.push(Token::Subshell),
            ')' => {}
            '<' | '>' => {
                flush_word!();
                tokens.push(Token::Redirect);
                if chars.peek() == Some(&'>') {
                    chars.next();
                }
            }
            '&' | ';' => flush_word!(),
            _ => word.push(c),
        }
    }
    if !word.is_empty() {
        tokens.push(Token::Word(word));
    }
    tokens
}

#[cfg(test)]
#[path = "bash_tests.rs"]
mod tests;
