// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session manager: owns agent subprocess lifecycles, the turn pipeline
//! with idempotent acks, the graceful-stop escalation, RPC forwarding, and
//! event fan-out.

pub mod active;
pub mod agent;
pub mod dedupe;
pub mod record;
pub mod ring;
pub mod translate;

pub use active::{ActiveSession, FrameSink, OutFrame, RpcResponse};
pub use record::{SessionRecord, SessionStatus};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::ErrorCode;
use crate::permission::PermissionGate;
use crate::policy::ToolRequest;
use crate::session::active::{PendingTurnStart, StopFlow};
use crate::session::agent::{AgentCommand, AgentEvent, AgentProcess, AgentSpawnError};
use crate::session::dedupe::{TurnCommand, TurnDedupeRecord};
use crate::session::record::epoch_ms;
use crate::session::translate::Translator;
use crate::storage::Storage;
use crate::transport::ws_msg::{ImageBlock, ServerMessage, StopSource, TurnStage};
use crate::workspace::runtime::ReserveError;
use crate::workspace::{WorkspaceRecord, WorkspaceRuntime};

/// Why a spawn failed. The partially-built scaffold is rolled back before
/// this surfaces.
#[derive(Debug)]
pub enum SpawnError {
    Limits(ReserveError),
    MissingCredentials(String),
    WorkspacePath(String),
    Agent(AgentSpawnError),
}

impl SpawnError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Limits(e) => e.error_code(),
            Self::MissingCredentials(_) | Self::Agent(_) => ErrorCode::SpawnFailed,
            Self::WorkspacePath(_) => ErrorCode::BadRequest,
        }
    }
}

impl std::fmt::Display for SpawnError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Limits(e) => write!(f, "{e}"),
            Self::MissingCredentials(provider) => {
                write!(f, "no credentials for provider {provider}")
            }
            Self::WorkspacePath(path) => write!(f, "workspace path does not exist: {path}"),
            Self::Agent(e) => write!(f, "{e}"),
        }
    }
}

/// Client-facing failure of a turn or command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionError {
    pub code: ErrorCode,
    pub message: String,
}

impl SessionError {
    fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

/// Options carried by every client-initiated turn.
#[derive(Debug, Clone)]
pub struct TurnOptions {
    pub client_turn_id: String,
    pub request_id: String,
    pub streaming_behavior: Option<String>,
    pub timestamp: Option<u64>,
}

/// The session manager.
pub struct SessionManager {
    config: Config,
    sessions: RwLock<HashMap<String, Arc<ActiveSession>>>,
    runtime: Arc<WorkspaceRuntime>,
    gate: Arc<PermissionGate>,
    storage: Arc<Storage>,
    proxy: Arc<reinsproxy::AuthProxy>,
}

impl SessionManager {
    pub fn new(
        config: Config,
        runtime: Arc<WorkspaceRuntime>,
        gate: Arc<PermissionGate>,
        storage: Arc<Storage>,
        proxy: Arc<reinsproxy::AuthProxy>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            sessions: RwLock::new(HashMap::new()),
            runtime,
            gate,
            storage,
            proxy,
        })
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<ActiveSession>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn list(&self) -> Vec<Arc<ActiveSession>> {
        self.sessions.read().await.values().cloned().collect()
    }

    pub async fn list_for_workspace(&self, workspace_id: &str) -> Vec<Arc<ActiveSession>> {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| s.workspace_id == workspace_id)
            .cloned()
            .collect()
    }

    /// Spawn a new session in a workspace.
    ///
    /// The acquisitions (slot, proxy registration, subprocess) form one
    /// scaffold: any failure rolls back everything taken so far.
    pub async fn spawn(
        self: &Arc<Self>,
        workspace: &WorkspaceRecord,
        model: &str,
    ) -> Result<Arc<ActiveSession>, SpawnError> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let container = workspace.kind.is_container();

        self.runtime
            .reserve_session_start(&workspace.id, &session_id, container)
            .await
            .map_err(SpawnError::Limits)?;

        let scaffold = Scaffold {
            runtime: Arc::clone(&self.runtime),
            proxy: Arc::clone(&self.proxy),
            workspace_id: workspace.id.clone(),
            session_id: session_id.clone(),
            container,
            proxy_registered: false,
        };

        let provider = model.split('/').next().unwrap_or(model);
        if !self.proxy.has_provider(provider) {
            scaffold.rollback().await;
            return Err(SpawnError::MissingCredentials(provider.to_owned()));
        }
        self.proxy.register_session(&session_id);
        let scaffold = Scaffold { proxy_registered: true, ..scaffold };

        let workdir = match workspace.kind.host_path() {
            Some(path) => {
                let path = PathBuf::from(path);
                if !path.is_dir() {
                    scaffold.rollback().await;
                    return Err(SpawnError::WorkspacePath(path.display().to_string()));
                }
                path
            }
            None => {
                // Container runtimes get a scratch dir under the data dir;
                // actual container orchestration lives outside the core.
                let path = self.config.resolved_data_dir().join("containers").join(&workspace.id);
                if std::fs::create_dir_all(&path).is_err() {
                    scaffold.rollback().await;
                    return Err(SpawnError::WorkspacePath(path.display().to_string()));
                }
                path
            }
        };

        let stub_auth = self.proxy.build_stub_auth(&session_id);
        let env = vec![
            ("REINS_SESSION_ID".to_owned(), session_id.clone()),
            ("REINS_PROXY_URL".to_owned(), self.proxy.base_url()),
            (
                "REINS_STUB_AUTH".to_owned(),
                serde_json::to_string(&stub_auth).unwrap_or_default(),
            ),
        ];

        let (agent, events) = match AgentProcess::spawn(
            &self.config.agent_command,
            &workdir,
            &env,
            self.config.spawn_ready_timeout(),
        )
        .await
        {
            Ok(pair) => pair,
            Err(e) => {
                scaffold.rollback().await;
                return Err(SpawnError::Agent(e));
            }
        };

        let now = epoch_ms();
        let record = SessionRecord::new(
            session_id.clone(),
            workspace.id.clone(),
            model.to_owned(),
            now,
        );
        let active = ActiveSession::new(
            record,
            container,
            agent,
            self.config.ring_capacity,
            self.config.dedupe_capacity,
            self.config.dedupe_ttl_secs * 1000,
        );

        {
            let mut sessions = self.sessions.write().await;
            sessions.insert(session_id.clone(), Arc::clone(&active));
        }

        let broadcast_target = Arc::downgrade(&active);
        self.gate.register_session(
            &session_id,
            &workspace.id,
            workspace.policy.approval_timeout_ms,
            Arc::new(move |msg| {
                if let Some(session) = broadcast_target.upgrade() {
                    session.broadcast(msg);
                }
            }),
        );

        active.set_status(SessionStatus::Ready);
        self.storage.save_session(&active.record());

        Self::spawn_reader(Arc::clone(self), Arc::clone(&active), events);
        info!(session_id = %session_id, workspace_id = %workspace.id, "session spawned");
        Ok(active)
    }

    /// The client-initiated turn: prompt, steer, or follow_up.
    pub async fn send_turn(
        &self,
        session_id: &str,
        command: TurnCommand,
        message: String,
        images: Vec<ImageBlock>,
        opts: TurnOptions,
    ) -> Result<(), SessionError> {
        let active = self
            .get(session_id)
            .await
            .ok_or_else(|| SessionError::new(ErrorCode::NotFound, "unknown session"))?;

        self.runtime
            .with_session_lock(session_id, || async {
                self.send_turn_locked(&active, command, message, images, opts).await
            })
            .await
    }

    async fn send_turn_locked(
        &self,
        active: &Arc<ActiveSession>,
        command: TurnCommand,
        message: String,
        images: Vec<ImageBlock>,
        opts: TurnOptions,
    ) -> Result<(), SessionError> {
        let now = epoch_ms();
        let hash = payload_hash(command.as_str(), &message, &images);

        enum TurnAdmission {
            Duplicate(TurnStage),
            Conflict,
            Fresh,
        }

        let admission = active
            .with_turns(|dedupe, _| match dedupe.get(&opts.client_turn_id, now) {
                Some(existing) if existing.payload_hash == hash => {
                    TurnAdmission::Duplicate(existing.stage)
                }
                Some(_) => TurnAdmission::Conflict,
                None => {
                    dedupe.set(
                        &opts.client_turn_id,
                        TurnDedupeRecord {
                            command,
                            payload_hash: hash.clone(),
                            stage: TurnStage::Accepted,
                            accepted_at: now,
                            updated_at: now,
                        },
                    );
                    TurnAdmission::Fresh
                }
            })
            .ok_or_else(|| SessionError::new(ErrorCode::Internal, "session state poisoned"))?;

        match admission {
            TurnAdmission::Duplicate(stage) => {
                active.broadcast(turn_ack(&active.id, &opts, stage, true));
                return Ok(());
            }
            TurnAdmission::Conflict => {
                return Err(SessionError::new(ErrorCode::Conflict, "clientTurnId conflict"));
            }
            TurnAdmission::Fresh => {}
        }

        active.broadcast(turn_ack(&active.id, &opts, TurnStage::Accepted, false));

        let agent_command = match command {
            TurnCommand::Prompt => AgentCommand::Prompt { message, images },
            TurnCommand::Steer => AgentCommand::Steer { message, images },
            TurnCommand::FollowUp => AgentCommand::FollowUp { message, images },
        };
        if let Err(e) = active.agent.write(&agent_command).await {
            // Undo acceptance so a client retry is treated as new.
            active.with_turns(|dedupe, _| dedupe.remove(&opts.client_turn_id));
            return Err(SessionError::new(
                ErrorCode::Internal,
                format!("agent write failed: {e}"),
            ));
        }

        active.with_turns(|dedupe, pending| {
            dedupe.update_stage(&opts.client_turn_id, TurnStage::Dispatched, epoch_ms());
            pending.push_back(PendingTurnStart {
                client_turn_id: opts.client_turn_id.clone(),
                request_id: opts.request_id.clone(),
            });
        });
        active.broadcast(turn_ack(&active.id, &opts, TurnStage::Dispatched, false));
        active.set_status(SessionStatus::Busy);
        Ok(())
    }

    /// Graceful stop escalation: abort → (T1) second abort → (T2) give up.
    pub async fn send_abort(self: &Arc<Self>, session_id: &str) -> Result<(), SessionError> {
        let active = self
            .get(session_id)
            .await
            .ok_or_else(|| SessionError::new(ErrorCode::NotFound, "unknown session"))?;

        self.runtime
            .with_session_lock(session_id, || async {
                self.send_abort_locked(&active, session_id).await
            })
            .await
    }

    async fn send_abort_locked(
        self: &Arc<Self>,
        active: &Arc<ActiveSession>,
        session_id: &str,
    ) -> Result<(), SessionError> {
        match active.status() {
            SessionStatus::Busy | SessionStatus::Stopping => {}
            status => {
                return Err(SessionError::new(
                    ErrorCode::Conflict,
                    format!("nothing to abort in status {status}"),
                ));
            }
        }
        if active.stopping() {
            // Already escalating: no duplicate stop_requested, no second write.
            return Ok(());
        }

        let t1 = CancellationToken::new();
        let t2 = CancellationToken::new();
        if !active.begin_stop(StopFlow { t1: t1.clone(), t2: t2.clone() }) {
            return Ok(());
        }

        active.set_status(SessionStatus::Stopping);
        active.broadcast(ServerMessage::StopRequested {
            session_id: session_id.to_owned(),
            source: StopSource::User,
        });
        if let Err(e) = active.agent.write(&AgentCommand::Abort {}).await {
            warn!(session_id, err = %e, "abort write failed");
        }

        let abort_timeout = self.config.stop_abort_timeout();
        let retry_timeout = self.config.stop_abort_retry_timeout();

        // T1: second abort.
        {
            let active = Arc::clone(active);
            let sid = session_id.to_owned();
            tokio::spawn(async move {
                tokio::select! {
                    _ = t1.cancelled() => {}
                    _ = tokio::time::sleep(abort_timeout) => {
                        debug!(session_id = %sid, "stop escalation: second abort");
                        active.broadcast(ServerMessage::StopRequested {
                            session_id: sid.clone(),
                            source: StopSource::Server,
                        });
                        if active.agent.write(&AgentCommand::Abort {}).await.is_err() {
                            active.agent.interrupt();
                        }
                    }
                }
            });
        }

        // T2: declare failure and revert to busy. Never tears the session
        // down; that stays an explicit user action.
        {
            let active = Arc::clone(active);
            let sid = session_id.to_owned();
            tokio::spawn(async move {
                tokio::select! {
                    _ = t2.cancelled() => {}
                    _ = tokio::time::sleep(abort_timeout + retry_timeout) => {
                        if active.clear_stop() {
                            warn!(session_id = %sid, "stop escalation failed");
                            active.broadcast(ServerMessage::StopFailed {
                                session_id: sid.clone(),
                                reason: "agent did not stop".to_owned(),
                            });
                            active.set_status(SessionStatus::Busy);
                        }
                    }
                }
            });
        }

        Ok(())
    }

    /// Forceful teardown.
    pub async fn stop_session(&self, session_id: &str, reason: &str) -> Result<(), SessionError> {
        let active = {
            let mut sessions = self.sessions.write().await;
            sessions
                .remove(session_id)
                .ok_or_else(|| SessionError::new(ErrorCode::NotFound, "unknown session"))?
        };
        self.finish_session(&active, reason).await;
        Ok(())
    }

    /// Shared teardown path for explicit stops and subprocess exits.
    async fn finish_session(&self, active: &Arc<ActiveSession>, reason: &str) {
        active.clear_stop();
        active.set_status(SessionStatus::Ended);
        active.broadcast(ServerMessage::SessionEnded {
            session_id: active.id.clone(),
            reason: reason.to_owned(),
        });
        self.gate.destroy_session(&active.id);
        active.agent.kill().await;
        self.proxy.remove_session(&active.id);
        active.teardown();
        self.runtime.release_session(&active.workspace_id, &active.id, active.container).await;
        self.storage.save_session(&active.record());
        info!(session_id = %active.id, reason, "session ended");
    }

    /// RPC-style command forwarding with per-command timeouts and
    /// follow-up chaining.
    pub async fn forward_command(
        self: &Arc<Self>,
        session_id: &str,
        command: &str,
        params: serde_json::Value,
        request_id: &str,
    ) -> Result<RpcResponse, SessionError> {
        let active = self
            .get(session_id)
            .await
            .ok_or_else(|| SessionError::new(ErrorCode::NotFound, "unknown session"))?;

        self.runtime
            .with_session_lock(session_id, || async {
                let response = self
                    .rpc(&active, command, params.clone(), request_id, self.config.rpc_timeout())
                    .await?;
                if response.success {
                    self.apply_command_effects(&active, command, &params).await;
                }
                Ok(response)
            })
            .await
    }

    async fn rpc(
        &self,
        active: &Arc<ActiveSession>,
        command: &str,
        params: serde_json::Value,
        id: &str,
        timeout: Duration,
    ) -> Result<RpcResponse, SessionError> {
        let rx = active
            .register_rpc(id)
            .ok_or_else(|| SessionError::new(ErrorCode::Internal, "session state poisoned"))?;

        let agent_command = AgentCommand::Command {
            id: id.to_owned(),
            command: command.to_owned(),
            params,
        };
        if let Err(e) = active.agent.write(&agent_command).await {
            active.drop_rpc(id);
            return Err(SessionError::new(
                ErrorCode::Internal,
                format!("agent write failed: {e}"),
            ));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(SessionError::new(ErrorCode::Gone, "session ended during command")),
            Err(_) => {
                active.drop_rpc(id);
                Err(SessionError::new(
                    ErrorCode::Internal,
                    format!("command {command} timed out"),
                ))
            }
        }
    }

    /// Post-success follow-ups: model changes re-apply the remembered
    /// thinking level; forks refresh agent state.
    async fn apply_command_effects(
        &self,
        active: &Arc<ActiveSession>,
        command: &str,
        params: &serde_json::Value,
    ) {
        match command {
            "set_model" => {
                let model = params.get("model").and_then(|v| v.as_str()).unwrap_or_default();
                if !model.is_empty() {
                    active.update_record(|r| r.model = model.to_owned());
                    if let Some(level) = self.storage.remembered_thinking_level(model) {
                        let id = uuid::Uuid::new_v4().to_string();
                        let result = self
                            .rpc(
                                active,
                                "set_thinking_level",
                                serde_json::json!({ "level": level }),
                                &id,
                                self.config.rpc_refresh_timeout(),
                            )
                            .await;
                        match result {
                            Ok(r) if r.success => {
                                active.update_record(|rec| rec.thinking_level = Some(level))
                            }
                            _ => debug!(session_id = %active.id, "thinking level re-apply failed"),
                        }
                    }
                }
            }
            "set_thinking_level" => {
                let level = params.get("level").and_then(|v| v.as_str()).unwrap_or_default();
                if !level.is_empty() {
                    let model = active.record().model;
                    self.storage.remember_thinking_level(&model, level);
                    active.update_record(|r| r.thinking_level = Some(level.to_owned()));
                }
            }
            "fork" => {
                // Refresh agent-side state so the re-broadcast snapshot is
                // current; failure only costs freshness.
                let id = uuid::Uuid::new_v4().to_string();
                let _ = self
                    .rpc(
                        active,
                        "get_state",
                        serde_json::Value::Null,
                        &id,
                        self.config.rpc_refresh_timeout(),
                    )
                    .await;
                active.update_record(|_| {});
            }
            _ => {}
        }
    }

    /// Single logical reader of the session's subprocess stdout.
    fn spawn_reader(
        manager: Arc<Self>,
        active: Arc<ActiveSession>,
        mut events: mpsc::Receiver<AgentEvent>,
    ) {
        tokio::spawn(async move {
            let mut translator = Translator::new(active.id.clone(), None);

            while let Some(event) = events.recv().await {
                manager.handle_agent_event(&active, &mut translator, &event).await;
            }

            // stdout closed: the subprocess is gone. If the session is
            // still registered this is a fatal surprise.
            let still_registered =
                manager.sessions.write().await.remove(&active.id).is_some();
            if still_registered {
                active.broadcast(ServerMessage::Error {
                    code: ErrorCode::Internal.as_str().to_owned(),
                    message: "agent subprocess exited".to_owned(),
                    session_id: Some(active.id.clone()),
                    fatal: true,
                });
                manager.finish_session(&active, "agent exited").await;
            }
        });
    }

    async fn handle_agent_event(
        self: &Arc<Self>,
        active: &Arc<ActiveSession>,
        translator: &mut Translator,
        event: &AgentEvent,
    ) {
        match event {
            AgentEvent::PermissionRequest { tool_call_id, tool, input } => {
                let manager = Arc::clone(self);
                let active = Arc::clone(active);
                let request = ToolRequest {
                    tool: tool.clone(),
                    input: input.clone(),
                    tool_call_id: Some(tool_call_id.clone()),
                };
                let call_id = tool_call_id.clone();
                // Decided off the reader loop so streaming continues while
                // a human thinks.
                tokio::spawn(async move {
                    let decision = manager.gate.request(&active.id, request).await;
                    let reply = AgentCommand::PermissionDecision {
                        tool_call_id: call_id,
                        decision: if decision.allowed { "allow" } else { "deny" }.to_owned(),
                    };
                    if let Err(e) = active.agent.write(&reply).await {
                        debug!(session_id = %active.id, err = %e, "permission reply write failed");
                    }
                });
            }
            AgentEvent::CommandResponse { id, success, data, error } => {
                active.resolve_rpc(
                    id,
                    RpcResponse { success: *success, data: data.clone(), error: error.clone() },
                );
            }
            AgentEvent::TokenUsage { input, output, cost } => {
                active.note_token_usage(*input, *output, *cost);
            }
            AgentEvent::ExtensionUiRequest { id, payload } => {
                active.broadcast(ServerMessage::ExtensionUiRequest {
                    session_id: active.id.clone(),
                    id: id.clone(),
                    payload: payload.clone(),
                });
            }
            AgentEvent::ExtensionUiNotification { payload } => {
                active.broadcast(ServerMessage::ExtensionUiNotification {
                    session_id: active.id.clone(),
                    payload: payload.clone(),
                });
            }
            AgentEvent::AgentStart { transcript_path } => {
                if let Some(path) = transcript_path {
                    let path = path.clone();
                    active.update_record(|r| r.transcript_path = Some(path));
                }
                for msg in translator.translate(event) {
                    active.broadcast(msg);
                }
            }
            AgentEvent::TurnStart {} => {
                active.set_status(SessionStatus::Busy);
                for msg in translator.translate(event) {
                    active.broadcast(msg);
                }
                let started = active.with_turns(|dedupe, pending| {
                    pending.pop_front().map(|head| {
                        dedupe.update_stage(&head.client_turn_id, TurnStage::Started, epoch_ms());
                        head
                    })
                });
                if let Some(Some(head)) = started {
                    active.broadcast(ServerMessage::TurnAck {
                        session_id: active.id.clone(),
                        client_turn_id: head.client_turn_id,
                        request_id: head.request_id,
                        stage: TurnStage::Started,
                        duplicate: false,
                    });
                }
            }
            AgentEvent::AgentEnd {} => {
                for msg in translator.translate(event) {
                    active.broadcast(msg);
                }
                if active.clear_stop() {
                    active.broadcast(ServerMessage::StopConfirmed {
                        session_id: active.id.clone(),
                    });
                }
                active.set_status(SessionStatus::Ready);
                self.storage.save_session(&active.record());
            }
            AgentEvent::MessageEnd {} => {
                active.note_message();
                for msg in translator.translate(event) {
                    active.broadcast(msg);
                }
            }
            _ => {
                for msg in translator.translate(event) {
                    if let ServerMessage::ToolOutput { tool_call_id, output, .. } = &msg {
                        active.note_tool_output(tool_call_id, output);
                    }
                    active.broadcast(msg);
                }
            }
        }
    }

    /// Forward a client's extension-UI answer to the agent.
    pub async fn forward_extension_ui(
        &self,
        session_id: &str,
        id: &str,
        payload: serde_json::Value,
    ) -> Result<(), SessionError> {
        let active = self
            .get(session_id)
            .await
            .ok_or_else(|| SessionError::new(ErrorCode::NotFound, "unknown session"))?;
        active
            .agent
            .write(&AgentCommand::ExtensionUiResponse { id: id.to_owned(), payload })
            .await
            .map_err(|e| {
                SessionError::new(ErrorCode::Internal, format!("agent write failed: {e}"))
            })
    }
}

/// Scoped spawn scaffold: undoes partial acquisitions on failure.
struct Scaffold {
    runtime: Arc<WorkspaceRuntime>,
    proxy: Arc<reinsproxy::AuthProxy>,
    workspace_id: String,
    session_id: String,
    container: bool,
    proxy_registered: bool,
}

impl Scaffold {
    async fn rollback(&self) {
        if self.proxy_registered {
            self.proxy.remove_session(&self.session_id);
        }
        self.runtime.release_session(&self.workspace_id, &self.session_id, self.container).await;
    }
}

fn turn_ack(
    session_id: &str,
    opts: &TurnOptions,
    stage: TurnStage,
    duplicate: bool,
) -> ServerMessage {
    ServerMessage::TurnAck {
        session_id: session_id.to_owned(),
        client_turn_id: opts.client_turn_id.clone(),
        request_id: opts.request_id.clone(),
        stage,
        duplicate,
    }
}

/// Stable hash of a turn's identity-relevant payload: canonical JSON
/// (serde_json's default map ordering is sorted) of command + message +
/// images. Request ids, timestamps, and streaming options are excluded.
pub fn payload_hash(command: &str, message: &str, images: &[ImageBlock]) -> String {
    let value = serde_json::json!({
        "command": command,
        "images": images,
        "message": message,
    });
    let canonical = serde_json::to_string(&value).unwrap_or_default();
    let digest = Sha256::digest(canonical.as_bytes());
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
