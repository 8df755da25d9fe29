// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent subprocess handle: spawn, JSONL stdin/stdout plumbing, readiness
//! sentinel, and signal escalation.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

/// A content block inside a tool execution update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum AgentContentBlock {
    Text { text: String },
    Image { media_type: String, data: String },
    Audio { media_type: String, data: String },
}

/// Events the agent subprocess emits on stdout, one JSON object per line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum AgentEvent {
    /// Readiness sentinel: the first line a healthy agent prints.
    AgentReady {},
    AgentStart {
        #[serde(skip_serializing_if = "Option::is_none")]
        transcript_path: Option<String>,
    },
    AgentEnd {},
    TurnStart {},
    TurnEnd {},
    MessageEnd {},
    TextDelta {
        text: String,
    },
    ThinkingDelta {
        text: String,
    },
    ToolExecutionStart {
        tool_call_id: String,
        tool: String,
        input: Value,
    },
    /// Carries the cumulative content for the call so far; the translator
    /// turns it into a delta.
    ToolExecutionUpdate {
        tool_call_id: String,
        content: Vec<AgentContentBlock>,
    },
    ToolExecutionEnd {
        tool_call_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<Value>,
        #[serde(default)]
        is_error: bool,
    },
    CompactionStart {},
    CompactionEnd {},
    RetryStart {
        attempt: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    RetryEnd {},
    MessageUpdate {
        subtype: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    CommandResponse {
        id: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    PermissionRequest {
        tool_call_id: String,
        tool: String,
        input: Value,
    },
    TokenUsage {
        input: u64,
        output: u64,
        #[serde(default)]
        cost: f64,
    },
    ExtensionUiRequest {
        id: String,
        payload: Value,
    },
    ExtensionUiNotification {
        payload: Value,
    },
}

/// Commands written to the agent's stdin, one JSON object per line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum AgentCommand {
    Prompt {
        message: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        images: Vec<crate::transport::ws_msg::ImageBlock>,
    },
    Steer {
        message: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        images: Vec<crate::transport::ws_msg::ImageBlock>,
    },
    FollowUp {
        message: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        images: Vec<crate::transport::ws_msg::ImageBlock>,
    },
    Abort {},
    Command {
        id: String,
        command: String,
        #[serde(default)]
        params: Value,
    },
    PermissionDecision {
        tool_call_id: String,
        decision: String,
    },
    ExtensionUiResponse {
        id: String,
        payload: Value,
    },
}

/// What went wrong while bringing a subprocess up.
#[derive(Debug)]
pub enum AgentSpawnError {
    Io(std::io::Error),
    /// The process started but never printed the readiness sentinel.
    ReadyTimeout,
    /// The process exited before becoming ready.
    ExitedEarly,
}

impl std::fmt::Display for AgentSpawnError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "spawn failed: {e}"),
            Self::ReadyTimeout => f.write_str("agent never became ready"),
            Self::ExitedEarly => f.write_str("agent exited before becoming ready"),
        }
    }
}

impl std::error::Error for AgentSpawnError {}

/// Live handle to one agent subprocess.
pub struct AgentProcess {
    child: Mutex<Child>,
    stdin: Mutex<ChildStdin>,
    pid: Option<u32>,
}

impl AgentProcess {
    /// Spawn the agent, wait for its readiness sentinel, and return the
    /// handle plus the event stream.
    ///
    /// The sentinel wait is bounded by `ready_timeout`; anything the agent
    /// prints before `agent_ready` that parses as an event is preserved
    /// and delivered after readiness.
    pub async fn spawn(
        command: &[String],
        workdir: &Path,
        env: &[(String, String)],
        ready_timeout: Duration,
    ) -> Result<(Self, mpsc::Receiver<AgentEvent>), AgentSpawnError> {
        let (program, args) = command.split_first().ok_or_else(|| {
            AgentSpawnError::Io(std::io::Error::other("empty agent command"))
        })?;

        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args)
            .current_dir(workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(AgentSpawnError::Io)?;
        let pid = child.id();
        let stdin = child.stdin.take().ok_or_else(|| {
            AgentSpawnError::Io(std::io::Error::other("agent stdin unavailable"))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            AgentSpawnError::Io(std::io::Error::other("agent stdout unavailable"))
        })?;
        if let Some(stderr) = child.stderr.take() {
            spawn_stderr_logger(stderr, pid);
        }

        let mut reader = BufReader::new(stdout).lines();

        // Wait for the sentinel, buffering any earlier events.
        let mut buffered = Vec::new();
        let ready = tokio::time::timeout(ready_timeout, async {
            loop {
                match reader.next_line().await {
                    Ok(Some(line)) => match parse_event_line(&line) {
                        Some(AgentEvent::AgentReady {}) => return Ok(()),
                        Some(event) => buffered.push(event),
                        None => {}
                    },
                    Ok(None) => return Err(AgentSpawnError::ExitedEarly),
                    Err(e) => return Err(AgentSpawnError::Io(e)),
                }
            }
        })
        .await;
        match ready {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = child.start_kill();
                return Err(e);
            }
            Err(_) => {
                let _ = child.start_kill();
                return Err(AgentSpawnError::ReadyTimeout);
            }
        }

        let (event_tx, event_rx) = mpsc::channel(256);
        for event in buffered {
            let _ = event_tx.send(event).await;
        }
        spawn_stdout_reader(reader, event_tx, pid);

        debug!(pid, "agent subprocess ready");
        Ok((Self { child: Mutex::new(child), stdin: Mutex::new(stdin), pid }, event_rx))
    }

    /// Write one command line to the agent's stdin.
    pub async fn write(&self, command: &AgentCommand) -> std::io::Result<()> {
        let mut line = serde_json::to_string(command)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        line.push('\n');
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Deliver SIGINT (the second rung of the abort escalation).
    pub fn interrupt(&self) {
        if let Some(pid) = self.pid {
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGINT);
        }
    }

    /// Force-kill the subprocess.
    pub async fn kill(&self) {
        let mut child = self.child.lock().await;
        let _ = child.start_kill();
    }

    /// Reap the exit status if the process already terminated.
    pub async fn try_wait(&self) -> Option<std::process::ExitStatus> {
        self.child.lock().await.try_wait().ok().flatten()
    }
}

fn parse_event_line(line: &str) -> Option<AgentEvent> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str(trimmed) {
        Ok(event) => Some(event),
        Err(e) => {
            debug!(err = %e, line_chars = trimmed.chars().count(), "unparseable agent line");
            None
        }
    }
}

fn spawn_stdout_reader(
    mut reader: tokio::io::Lines<BufReader<ChildStdout>>,
    event_tx: mpsc::Sender<AgentEvent>,
    pid: Option<u32>,
) {
    tokio::spawn(async move {
        loop {
            match reader.next_line().await {
                Ok(Some(line)) => {
                    if let Some(event) = parse_event_line(&line) {
                        if event_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                }
                Ok(None) => {
                    debug!(pid, "agent stdout closed");
                    break;
                }
                Err(e) => {
                    warn!(pid, err = %e, "agent stdout read error");
                    break;
                }
            }
        }
    });
}

fn spawn_stderr_logger(stderr: tokio::process::ChildStderr, pid: Option<u32>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(pid, line = %line, "agent stderr");
        }
    });
}

#[cfg(test)]
#[path = "agent_tests.rs"]
mod tests;
