// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Unit tests for the frame plumbing. The subscribe/resume/command
//! protocol itself is covered end-to-end in `tests/specs`.

use super::*;
use crate::session::active::OutFrame;
use crate::transport::ws_msg::TurnStage;

#[test]
fn control_frames_have_no_seq() {
    let frame = OutFrame::control(ServerMessage::StreamConnected { user_name: "owner".to_owned() });
    let text = frame_to_text(&frame).unwrap();
    assert_eq!(text, r#"{"type":"stream_connected","userName":"owner"}"#);
}

#[test]
fn session_frames_carry_injected_seq() {
    let frame = OutFrame {
        seq: Some(42),
        msg: ServerMessage::TurnAck {
            session_id: "s1".to_owned(),
            client_turn_id: "T1".to_owned(),
            request_id: "R1".to_owned(),
            stage: TurnStage::Accepted,
            duplicate: false,
        },
    };
    let text = frame_to_text(&frame).unwrap();
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value["type"], "turn_ack");
    assert_eq!(value["seq"], 42);
    assert_eq!(value["clientTurnId"], "T1");
}

#[test]
fn conn_state_tracks_subscription_level() {
    let mut conn = ConnState::default();
    assert!(!conn.subscribed_full("s1"));

    conn.subs.insert("s1".to_owned(), (1, SubscriptionLevel::Full));
    conn.subs.insert("s2".to_owned(), (2, SubscriptionLevel::Notifications));
    assert!(conn.subscribed_full("s1"));
    assert!(!conn.subscribed_full("s2"));
    assert!(!conn.subscribed_full("s3"));
}

#[test]
fn refusal_includes_contract_phrase() {
    let conn = ConnState::default();
    let collected = std::sync::Mutex::new(Vec::new());
    let reply = |msg: ServerMessage| collected.lock().unwrap().push(msg);

    assert!(!require_full(&conn, "s1", "prompt", "R1", &reply));

    let frames = collected.into_inner().unwrap();
    assert_eq!(frames.len(), 2);
    match &frames[0] {
        ServerMessage::Error { message, .. } => {
            assert!(message.contains("not subscribed at level=full"));
        }
        other => panic!("expected error frame, got {other:?}"),
    }
    match &frames[1] {
        ServerMessage::CommandResult { request_id, success, error, .. } => {
            assert_eq!(request_id, "R1");
            assert!(!success);
            assert!(error.as_ref().unwrap().contains("not subscribed at level=full"));
        }
        other => panic!("expected command_result frame, got {other:?}"),
    }
}
