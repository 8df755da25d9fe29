// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end binary smoke tests.
//!
//! Spawns the real `reins` binary with a scripted fake agent and drives
//! it over HTTP and the `/stream` WebSocket.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Once;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls.
/// Safe to call multiple times — only the first call has effect.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Resolve the path to the compiled `reins` binary.
pub fn reins_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("reins")
}

/// Find a free TCP port by binding to :0 then releasing.
pub fn free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// The scripted fake agent used by the smoke tests.
///
/// - any turn command answers with a short streamed reply;
/// - a turn whose message contains `permit` requests a `git push`
///   permission instead and waits for the decision;
/// - RPC commands echo success.
const FAKE_AGENT: &str = r#"#!/bin/sh
echo '{"type":"agent_ready"}'
while IFS= read -r line; do
  case "$line" in
    *'"type":"prompt"'*|*'"type":"steer"'*|*'"type":"follow_up"'*)
      echo '{"type":"turn_start"}'
      case "$line" in
        *permit*)
          echo '{"type":"permission_request","toolCallId":"call-1","tool":"bash","input":{"command":"git push origin main"}}'
          ;;
        *)
          echo '{"type":"text_delta","text":"hello from agent"}'
          echo '{"type":"message_end"}'
          echo '{"type":"turn_end"}'
          echo '{"type":"agent_end"}'
          ;;
      esac
      ;;
    *'"type":"permission_decision"'*)
      d=$(printf '%s' "$line" | sed -n 's/.*"decision":"\([^"]*\)".*/\1/p')
      printf '{"type":"text_delta","text":"decision:%s"}\n' "$d"
      echo '{"type":"turn_end"}'
      echo '{"type":"agent_end"}'
      ;;
    *'"type":"abort"'*)
      echo '{"type":"agent_end"}'
      ;;
    *'"type":"command"'*)
      id=$(printf '%s' "$line" | sed -n 's/.*"id":"\([^"]*\)".*/\1/p')
      printf '{"type":"command_response","id":"%s","success":true,"data":{"ok":true}}\n' "$id"
      ;;
  esac
done
"#;

/// A running `reins` process, killed on drop.
pub struct ReinsProcess {
    child: Child,
    port: u16,
    data_dir: PathBuf,
    workspace_dir: PathBuf,
    _dir: tempfile::TempDir,
}

impl ReinsProcess {
    /// Start the binary with a fresh data dir and the fake agent.
    pub fn start() -> anyhow::Result<Self> {
        ensure_crypto();
        let dir = tempfile::tempdir()?;
        let data_dir = dir.path().join("data");
        let workspace_dir = dir.path().join("workspace");
        std::fs::create_dir_all(&workspace_dir)?;

        let script = dir.path().join("agent.sh");
        std::fs::write(&script, FAKE_AGENT)?;

        let auth_file = dir.path().join("auth.json");
        std::fs::write(
            &auth_file,
            r#"{"anthropic":{"type":"oauth","access":"real-token","expires":0}}"#,
        )?;

        let port = free_port()?;
        let child = Command::new(reins_binary())
            .args([
                "--port",
                &port.to_string(),
                "--host",
                "127.0.0.1",
                "--data-dir",
                &data_dir.to_string_lossy(),
                "--auth-file",
                &auth_file.to_string_lossy(),
                "--log-format",
                "text",
                "--log-level",
                "debug",
                "--",
                "sh",
                &script.to_string_lossy(),
            ])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        Ok(Self { child, port, data_dir, workspace_dir, _dir: dir })
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn workspace_path(&self) -> &Path {
        &self.workspace_dir
    }

    /// Poll `/health` until the server responds.
    pub async fn wait_healthy(&self, timeout: Duration) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        let client = reqwest::Client::new();
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("server never became healthy");
            }
            if let Ok(resp) = client.get(format!("{}/health", self.base_url())).send().await {
                if resp.status().is_success() {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Read the identity token the server minted at first boot.
    pub fn token(&self) -> anyhow::Result<String> {
        let contents = std::fs::read_to_string(self.data_dir.join("config.json"))?;
        let config: serde_json::Value = serde_json::from_str(&contents)?;
        config["identity"]["tokens"][0]
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| anyhow::anyhow!("no identity token in config"))
    }

    /// An authenticated HTTP client helper.
    pub fn http(&self) -> anyhow::Result<HttpClient> {
        Ok(HttpClient {
            client: reqwest::Client::new(),
            base: self.base_url(),
            token: self.token()?,
        })
    }

    /// Open an authenticated `/stream` connection.
    pub async fn stream(&self) -> anyhow::Result<Stream> {
        let url = format!("ws://127.0.0.1:{}/stream", self.port);
        let mut request = url.into_client_request()?;
        request
            .headers_mut()
            .insert("authorization", format!("Bearer {}", self.token()?).parse()?);
        let (socket, _) = tokio_tungstenite::connect_async(request).await?;
        Ok(Stream { socket })
    }

    /// Create a host workspace and return its id.
    pub async fn create_workspace(&self) -> anyhow::Result<String> {
        let http = self.http()?;
        let (status, body) = http
            .post(
                "/workspaces",
                serde_json::json!({
                    "name": "smoke",
                    "kind": "host",
                    "path": self.workspace_path().to_string_lossy(),
                }),
            )
            .await?;
        anyhow::ensure!(status == 200, "workspace create failed: {status} {body}");
        body["id"]
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| anyhow::anyhow!("no workspace id in response"))
    }

    /// Spawn a session in a workspace and return its id.
    pub async fn spawn_session(&self, workspace_id: &str) -> anyhow::Result<String> {
        let http = self.http()?;
        let (status, body) = http
            .post(&format!("/workspaces/{workspace_id}/sessions"), serde_json::json!({}))
            .await?;
        anyhow::ensure!(status == 200, "session spawn failed: {status} {body}");
        body["id"]
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| anyhow::anyhow!("no session id in response"))
    }
}

impl Drop for ReinsProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Thin authenticated HTTP wrapper.
pub struct HttpClient {
    client: reqwest::Client,
    base: String,
    token: String,
}

impl HttpClient {
    pub async fn get(&self, path: &str) -> anyhow::Result<(u16, serde_json::Value)> {
        let resp = self
            .client
            .get(format!("{}{path}", self.base))
            .bearer_auth(&self.token)
            .send()
            .await?;
        let status = resp.status().as_u16();
        let body = resp.json().await.unwrap_or(serde_json::Value::Null);
        Ok((status, body))
    }

    pub async fn get_unauthenticated(&self, path: &str) -> anyhow::Result<u16> {
        let resp = self.client.get(format!("{}{path}", self.base)).send().await?;
        Ok(resp.status().as_u16())
    }

    pub async fn post(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> anyhow::Result<(u16, serde_json::Value)> {
        let resp = self
            .client
            .post(format!("{}{path}", self.base))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        let status = resp.status().as_u16();
        let body = resp.json().await.unwrap_or(serde_json::Value::Null);
        Ok((status, body))
    }
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// One `/stream` connection.
pub struct Stream {
    socket: WsStream,
}

impl Stream {
    /// Send one client frame.
    pub async fn send(&mut self, frame: serde_json::Value) -> anyhow::Result<()> {
        self.socket.send(Message::Text(frame.to_string().into())).await?;
        Ok(())
    }

    /// Receive the next JSON text frame, with a timeout.
    pub async fn recv(&mut self) -> anyhow::Result<serde_json::Value> {
        let deadline = Duration::from_secs(10);
        loop {
            let msg = tokio::time::timeout(deadline, self.socket.next())
                .await
                .map_err(|_| anyhow::anyhow!("timed out waiting for frame"))?
                .ok_or_else(|| anyhow::anyhow!("stream closed"))??;
            match msg {
                Message::Text(text) => return Ok(serde_json::from_str(&text)?),
                Message::Close(_) => anyhow::bail!("stream closed"),
                _ => {}
            }
        }
    }

    /// Receive frames until one of the given type arrives, returning it
    /// plus everything skipped along the way.
    pub async fn recv_until(
        &mut self,
        wanted: &str,
    ) -> anyhow::Result<(serde_json::Value, Vec<serde_json::Value>)> {
        let mut skipped = Vec::new();
        loop {
            let frame = self.recv().await?;
            if frame["type"] == wanted {
                return Ok((frame, skipped));
            }
            skipped.push(frame);
        }
    }

    /// Subscribe at level=full and drain the bootstrap through
    /// `command_result`. Returns the bootstrap frames in order.
    pub async fn subscribe_full(
        &mut self,
        session_id: &str,
        since_seq: Option<i64>,
        request_id: &str,
    ) -> anyhow::Result<Vec<serde_json::Value>> {
        let mut frame = serde_json::json!({
            "type": "subscribe",
            "sessionId": session_id,
            "level": "full",
            "requestId": request_id,
        });
        if let Some(since) = since_seq {
            frame["sinceSeq"] = since.into();
        }
        self.send(frame).await?;

        let mut frames = Vec::new();
        loop {
            let frame = self.recv().await?;
            let done = frame["type"] == "command_result" && frame["requestId"] == request_id;
            frames.push(frame);
            if done {
                return Ok(frames);
            }
        }
    }

    pub async fn close(mut self) {
        let _ = self.socket.close(None).await;
    }
}
