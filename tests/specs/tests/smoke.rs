// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end smoke tests that spawn the real `reins` binary with a
//! scripted fake agent and exercise the REST and `/stream` surfaces.

use std::time::Duration;

use serde_json::json;

use reins::transport::ws_msg::ServerMessage;
use reins_specs::ReinsProcess;

const TIMEOUT: Duration = Duration::from_secs(20);

async fn started() -> anyhow::Result<ReinsProcess> {
    let server = ReinsProcess::start()?;
    server.wait_healthy(TIMEOUT).await?;
    Ok(server)
}

// -- HTTP ---------------------------------------------------------------------

#[tokio::test]
async fn http_health_and_auth_boundary() -> anyhow::Result<()> {
    let server = started().await?;
    let http = server.http()?;

    // /health is open; everything else wants the bearer.
    assert_eq!(http.get_unauthenticated("/health").await?, 200);
    assert_eq!(http.get_unauthenticated("/me").await?, 401);

    let (status, body) = http.get("/me").await?;
    assert_eq!(status, 200);
    assert_eq!(body["userName"], "owner");

    let (status, body) = http.get("/server/info").await?;
    assert_eq!(status, 200);
    assert!(body["uptimeSecs"].is_number());

    // Top-level /sessions does not exist.
    let (status, _) = http.get("/sessions").await?;
    assert_eq!(status, 404);
    Ok(())
}

#[tokio::test]
async fn stream_rejects_bad_bearer() -> anyhow::Result<()> {
    let server = started().await?;

    use tokio_tungstenite::tungstenite::client::IntoClientRequest;
    let url = format!("{}/stream", server.base_url().replace("http", "ws"));
    let mut request = url.into_client_request()?;
    request.headers_mut().insert("authorization", "Bearer sk_wrong".parse()?);

    let result = tokio_tungstenite::connect_async(request).await;
    match result {
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
            assert_eq!(response.status().as_u16(), 401);
        }
        other => anyhow::bail!("expected 401 rejection, got {other:?}"),
    }
    Ok(())
}

// -- Stream protocol ----------------------------------------------------------

#[tokio::test]
async fn stream_connected_is_the_first_frame() -> anyhow::Result<()> {
    let server = started().await?;
    let mut stream = server.stream().await?;

    let frame = stream.recv().await?;
    assert_eq!(frame["type"], "stream_connected");
    assert_eq!(frame["userName"], "owner");

    // The frame parses as the typed wire message too.
    let parsed: ServerMessage = serde_json::from_value(frame)?;
    assert!(matches!(parsed, ServerMessage::StreamConnected { .. }));
    stream.close().await;
    Ok(())
}

#[tokio::test]
async fn subscribe_bootstrap_order_and_turn_acks() -> anyhow::Result<()> {
    let server = started().await?;
    let ws = server.create_workspace().await?;
    let sid = server.spawn_session(&ws).await?;

    let mut stream = server.stream().await?;
    let first = stream.recv().await?;
    assert_eq!(first["type"], "stream_connected");

    // Bootstrap: connected → state → command_result{success:true}.
    let frames = stream.subscribe_full(&sid, None, "R-sub").await?;
    assert_eq!(frames[0]["type"], "connected");
    assert_eq!(frames[0]["session"]["id"], sid.as_str());
    assert_eq!(frames[1]["type"], "state");
    let last = frames.last().unwrap();
    assert_eq!(last["type"], "command_result");
    assert_eq!(last["success"], true);

    // Scenario: duplicate prompt.
    stream
        .send(json!({
            "type": "prompt",
            "sessionId": sid,
            "message": "hello",
            "clientTurnId": "T1",
            "requestId": "R1",
        }))
        .await?;

    let (ack, _) = stream.recv_until("turn_ack").await?;
    assert_eq!(ack["stage"], "accepted");
    assert_eq!(ack["requestId"], "R1");
    assert_eq!(ack["duplicate"], false);

    let (ack, _) = stream.recv_until("turn_ack").await?;
    assert_eq!(ack["stage"], "dispatched");
    let (ack, _) = stream.recv_until("turn_ack").await?;
    assert_eq!(ack["stage"], "started");

    let (_, skipped) = stream.recv_until("turn_end").await?;
    assert!(skipped.iter().any(|f| f["type"] == "text_delta"));

    // Retry with the same clientTurnId: exactly one duplicate ack
    // echoing the latest stage, and no new turn.
    stream
        .send(json!({
            "type": "prompt",
            "sessionId": sid,
            "message": "hello",
            "clientTurnId": "T1",
            "requestId": "R2",
        }))
        .await?;
    let (ack, skipped) = stream.recv_until("turn_ack").await?;
    assert_eq!(ack["stage"], "started");
    assert_eq!(ack["requestId"], "R2");
    assert_eq!(ack["duplicate"], true);
    assert!(skipped.iter().all(|f| f["type"] != "turn_start"));

    // Exactly one command_result for the retry's request id.
    let (result, skipped) = stream.recv_until("command_result").await?;
    assert_eq!(result["requestId"], "R2");
    assert!(skipped.iter().all(|f| f["type"] != "turn_start"));

    stream.close().await;
    Ok(())
}

#[tokio::test]
async fn reconnect_catch_up_replays_only_new_events() -> anyhow::Result<()> {
    let server = started().await?;
    let ws = server.create_workspace().await?;
    let sid = server.spawn_session(&ws).await?;

    // First connection: run one turn and remember the last seq seen.
    let mut stream = server.stream().await?;
    stream.recv().await?; // stream_connected
    stream.subscribe_full(&sid, None, "R-sub").await?;
    stream
        .send(json!({
            "type": "prompt",
            "sessionId": sid,
            "message": "hello",
            "clientTurnId": "T1",
            "requestId": "R1",
        }))
        .await?;
    let (end_frame, mut frames) = stream.recv_until("agent_end").await?;
    frames.push(end_frame);
    let last_seq = frames
        .iter()
        .filter_map(|f| f["seq"].as_u64())
        .max()
        .ok_or_else(|| anyhow::anyhow!("no seqs observed"))?;
    stream.close().await;

    // Second connection resumes from last_seq: bootstrap carries only
    // events with seq > last_seq.
    let mut stream = server.stream().await?;
    stream.recv().await?;
    let bootstrap = stream.subscribe_full(&sid, Some(last_seq as i64), "R-resub").await?;
    assert_eq!(bootstrap[0]["type"], "connected");
    assert_eq!(bootstrap[1]["type"], "state");
    for frame in &bootstrap {
        if let Some(seq) = frame["seq"].as_u64() {
            assert!(seq > last_seq, "replayed old event seq={seq}");
        }
    }

    // New events still flow and stay past last_seq.
    stream
        .send(json!({
            "type": "prompt",
            "sessionId": sid,
            "message": "again",
            "clientTurnId": "T2",
            "requestId": "R3",
        }))
        .await?;
    let (frame, _) = stream.recv_until("turn_end").await?;
    assert!(frame["seq"].as_u64().unwrap() > last_seq);

    stream.close().await;
    Ok(())
}

#[tokio::test]
async fn subscribe_validation_errors() -> anyhow::Result<()> {
    let server = started().await?;
    let ws = server.create_workspace().await?;
    let sid = server.spawn_session(&ws).await?;

    let mut stream = server.stream().await?;
    stream.recv().await?;

    // Unknown session.
    stream
        .send(json!({
            "type": "subscribe", "sessionId": "ghost", "level": "full", "requestId": "R1",
        }))
        .await?;
    let (result, _) = stream.recv_until("command_result").await?;
    assert_eq!(result["success"], false);

    // Negative sinceSeq.
    stream
        .send(json!({
            "type": "subscribe", "sessionId": sid, "level": "full",
            "sinceSeq": -1, "requestId": "R2",
        }))
        .await?;
    let (result, _) = stream.recv_until("command_result").await?;
    assert_eq!(result["success"], false);
    assert!(result["error"].as_str().unwrap().contains("non-negative"));

    stream.close().await;
    Ok(())
}

#[tokio::test]
async fn commands_require_full_subscription() -> anyhow::Result<()> {
    let server = started().await?;
    let ws = server.create_workspace().await?;
    let sid = server.spawn_session(&ws).await?;

    let mut stream = server.stream().await?;
    stream.recv().await?;

    stream
        .send(json!({
            "type": "prompt",
            "sessionId": sid,
            "message": "hello",
            "clientTurnId": "T1",
            "requestId": "R1",
        }))
        .await?;

    let (error, _) = stream.recv_until("error").await?;
    assert!(error["message"].as_str().unwrap().contains("not subscribed at level=full"));
    let (result, _) = stream.recv_until("command_result").await?;
    assert_eq!(result["requestId"], "R1");
    assert_eq!(result["success"], false);

    stream.close().await;
    Ok(())
}

#[tokio::test]
async fn unsubscribe_is_idempotent_and_stops_delivery() -> anyhow::Result<()> {
    let server = started().await?;
    let ws = server.create_workspace().await?;
    let sid = server.spawn_session(&ws).await?;

    let mut stream = server.stream().await?;
    stream.recv().await?;
    stream.subscribe_full(&sid, None, "R-sub").await?;

    stream.send(json!({ "type": "unsubscribe", "sessionId": sid, "requestId": "R1" })).await?;
    let (result, _) = stream.recv_until("command_result").await?;
    assert_eq!(result["success"], true);

    // Unsubscribing again still succeeds.
    stream.send(json!({ "type": "unsubscribe", "sessionId": sid, "requestId": "R2" })).await?;
    let (result, _) = stream.recv_until("command_result").await?;
    assert_eq!(result["success"], true);

    stream.close().await;
    Ok(())
}

#[tokio::test]
async fn rpc_commands_roundtrip() -> anyhow::Result<()> {
    let server = started().await?;
    let ws = server.create_workspace().await?;
    let sid = server.spawn_session(&ws).await?;

    let mut stream = server.stream().await?;
    stream.recv().await?;
    stream.subscribe_full(&sid, None, "R-sub").await?;

    stream
        .send(json!({
            "type": "set_model",
            "sessionId": sid,
            "model": "anthropic/claude-opus-4-5",
            "requestId": "R1",
        }))
        .await?;
    let (result, skipped) = stream.recv_until("command_result").await?;
    assert_eq!(result["command"], "set_model");
    assert_eq!(result["success"], true);

    // The state re-broadcast (emitted before the result) carries the new
    // model.
    let state = skipped
        .iter()
        .find(|f| f["type"] == "state")
        .ok_or_else(|| anyhow::anyhow!("no state re-broadcast"))?;
    assert_eq!(state["session"]["model"], "anthropic/claude-opus-4-5");

    stream
        .send(json!({ "type": "get_state", "sessionId": sid, "requestId": "R2" }))
        .await?;
    let (result, _) = stream.recv_until("command_result").await?;
    assert_eq!(result["data"]["model"], "anthropic/claude-opus-4-5");

    stream.close().await;
    Ok(())
}

// -- Permission flow ----------------------------------------------------------

#[tokio::test]
async fn permission_request_roundtrip() -> anyhow::Result<()> {
    let server = started().await?;
    let ws = server.create_workspace().await?;
    let sid = server.spawn_session(&ws).await?;
    let http = server.http()?;

    let mut stream = server.stream().await?;
    stream.recv().await?;
    stream.subscribe_full(&sid, None, "R-sub").await?;

    // "permit" makes the fake agent request a `git push` permission,
    // which the host preset classifies ask.
    stream
        .send(json!({
            "type": "prompt",
            "sessionId": sid,
            "message": "please permit this",
            "clientTurnId": "T1",
            "requestId": "R1",
        }))
        .await?;

    let (request, _) = stream.recv_until("permission_request").await?;
    assert_eq!(request["sessionId"], sid.as_str());
    assert_eq!(request["tool"], "bash");
    assert!(request["displaySummary"].as_str().unwrap().contains("git push"));
    let pid = request["id"].as_str().unwrap().to_owned();

    // Visible over REST too.
    let (status, body) = http.get("/permissions/pending").await?;
    assert_eq!(status, 200);
    assert!(body["serverTime"].as_u64().unwrap() > 1_000_000_000_000);
    assert_eq!(body["pending"][0]["id"], pid.as_str());

    // Unknown session id filter → 404.
    let (status, _) = http.get("/permissions/pending?sessionId=ghost").await?;
    assert_eq!(status, 404);

    // Allow it; the agent sees the decision.
    stream
        .send(json!({
            "type": "permission_response",
            "id": pid,
            "action": "allow",
            "scope": "once",
            "requestId": "R2",
        }))
        .await?;
    let (result, _) = stream.recv_until("command_result").await?;
    assert_eq!(result["success"], true);

    let (delta, _) = stream.recv_until("text_delta").await?;
    assert_eq!(delta["text"], "decision:allow");

    // The decision is audited.
    let (status, body) = http.get("/policy/audit").await?;
    assert_eq!(status, 200);
    let entries = body["entries"].as_array().unwrap();
    assert!(entries.iter().any(|e| e["resolvedBy"] == "user" && e["decision"] == "allow"));

    stream.close().await;
    Ok(())
}

// -- Stop flow ----------------------------------------------------------------

#[tokio::test]
async fn stop_session_broadcasts_session_ended() -> anyhow::Result<()> {
    let server = started().await?;
    let ws = server.create_workspace().await?;
    let sid = server.spawn_session(&ws).await?;

    let mut stream = server.stream().await?;
    stream.recv().await?;
    stream.subscribe_full(&sid, None, "R-sub").await?;

    stream
        .send(json!({ "type": "stop_session", "sessionId": sid, "requestId": "R1" }))
        .await?;

    let (ended, _) = stream.recv_until("session_ended").await?;
    assert_eq!(ended["sessionId"], sid.as_str());

    // The session record survives with status ended.
    let http = server.http()?;
    let (status, body) = http.get(&format!("/workspaces/{ws}/sessions/{sid}")).await?;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ended");

    stream.close().await;
    Ok(())
}

// -- REST session accessors ---------------------------------------------------

#[tokio::test]
async fn events_endpoint_replays_ring() -> anyhow::Result<()> {
    let server = started().await?;
    let ws = server.create_workspace().await?;
    let sid = server.spawn_session(&ws).await?;

    let mut stream = server.stream().await?;
    stream.recv().await?;
    stream.subscribe_full(&sid, None, "R-sub").await?;
    stream
        .send(json!({
            "type": "prompt",
            "sessionId": sid,
            "message": "hello",
            "clientTurnId": "T1",
            "requestId": "R1",
        }))
        .await?;
    stream.recv_until("agent_end").await?;

    let http = server.http()?;
    let (status, body) = http.get(&format!("/workspaces/{ws}/sessions/{sid}/events")).await?;
    assert_eq!(status, 200);
    let events = body["events"].as_array().unwrap();
    assert!(!events.is_empty());
    // Seqs are strictly increasing.
    let seqs: Vec<u64> = events.iter().filter_map(|e| e["seq"].as_u64()).collect();
    assert!(seqs.windows(2).all(|w| w[0] < w[1]));
    assert!(events.iter().any(|e| e["type"] == "turn_start"));

    stream.close().await;
    Ok(())
}
