// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn status_codes() {
    assert_eq!(ErrorCode::Unauthorized.http_status(), 401);
    assert_eq!(ErrorCode::Forbidden.http_status(), 403);
    assert_eq!(ErrorCode::SessionLimitWorkspace.http_status(), 429);
    assert_eq!(ErrorCode::SessionLimitGlobal.http_status(), 429);
    assert_eq!(ErrorCode::SpawnFailed.http_status(), 502);
    assert_eq!(ErrorCode::NotSubscribed.http_status(), 409);
}

#[test]
fn wire_strings_are_stable() {
    assert_eq!(ErrorCode::SessionLimitWorkspace.as_str(), "SESSION_LIMIT_WORKSPACE");
    assert_eq!(ErrorCode::SessionLimitGlobal.as_str(), "SESSION_LIMIT_GLOBAL");
    assert_eq!(ErrorCode::NotSubscribed.as_str(), "NOT_SUBSCRIBED");
    assert_eq!(ErrorCode::RateLimited.to_string(), "RATE_LIMITED");
}

#[test]
fn error_body_envelope() {
    let body = ErrorCode::BadRequest.to_error_body("sinceSeq must be non-negative");
    let json = serde_json::to_value(ErrorResponse { error: body }).unwrap();
    assert_eq!(json["error"]["code"], "BAD_REQUEST");
    assert_eq!(json["error"]["message"], "sinceSeq must be non-negative");
}
