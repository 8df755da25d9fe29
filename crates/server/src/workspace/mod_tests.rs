// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn workspace_kind_serde() {
    let record = WorkspaceRecord::new(
        "w1".to_owned(),
        "api".to_owned(),
        WorkspaceKind::Host { path: "/home/me/api".to_owned() },
        1_700_000_000_000,
    );
    let json = serde_json::to_value(&record).unwrap();
    assert_eq!(json["kind"], "host");
    assert_eq!(json["path"], "/home/me/api");
    assert_eq!(json["createdAt"], 1_700_000_000_000u64);

    let parsed: WorkspaceRecord = serde_json::from_value(json).unwrap();
    assert_eq!(parsed.kind, record.kind);
    assert!(!parsed.kind.is_container());
    assert_eq!(parsed.kind.host_path(), Some("/home/me/api"));
}

#[test]
fn container_kind_roundtrip() {
    let record = WorkspaceRecord::new(
        "w2".to_owned(),
        "sandbox".to_owned(),
        WorkspaceKind::Container { image: "dev:latest".to_owned() },
        1_700_000_000_000,
    );
    let json = serde_json::to_string(&record).unwrap();
    let parsed: WorkspaceRecord = serde_json::from_str(&json).unwrap();
    assert!(parsed.kind.is_container());
    assert_eq!(parsed.kind.host_path(), None);
}

#[test]
fn overlay_distinguishes_zero_from_absent() {
    let overlay: PolicyOverlay = serde_json::from_str("{}").unwrap();
    assert_eq!(overlay.approval_timeout_ms, None);

    let overlay: PolicyOverlay = serde_json::from_str(r#"{"approvalTimeoutMs":0}"#).unwrap();
    assert_eq!(overlay.approval_timeout_ms, Some(0));

    let overlay: PolicyOverlay = serde_json::from_str(r#"{"approvalTimeoutMs":120000}"#).unwrap();
    assert_eq!(overlay.approval_timeout_ms, Some(120_000));
}
