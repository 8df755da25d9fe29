// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::HeaderMap;
use rand::RngCore;

use crate::error::ErrorCode;
use crate::storage::Storage;

/// Constant-time string comparison to prevent timing side-channel attacks.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

/// Generate an opaque token: `prefix` + 40 hex chars (160 bits).
pub fn generate_token(prefix: &str) -> String {
    let mut bytes = [0u8; 20];
    rand::rng().fill_bytes(&mut bytes);
    let mut out = String::with_capacity(prefix.len() + 40);
    out.push_str(prefix);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Every token the owner may present: identity (`sk_`) plus paired
/// devices (`dt_`). Single-owner model — any valid token is the owner.
pub fn valid_tokens(storage: &Storage) -> Vec<String> {
    let mut tokens = storage.settings().identity.tokens;
    tokens.extend(storage.device_tokens().into_iter().map(|d| d.token));
    tokens
}

/// Validate a Bearer token from HTTP headers.
pub fn validate_bearer(headers: &HeaderMap, valid: &[String]) -> Result<(), ErrorCode> {
    let header = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or(ErrorCode::Unauthorized)?;
    let token = header.strip_prefix("Bearer ").ok_or(ErrorCode::Unauthorized)?;
    if valid.iter().any(|candidate| constant_time_eq(token, candidate)) {
        Ok(())
    } else {
        Err(ErrorCode::Unauthorized)
    }
}

/// Mint a new identity token. Earlier tokens stay valid; rotation adds,
/// revocation is a separate explicit act.
pub fn rotate_token(storage: &Storage) -> String {
    let token = generate_token("sk_");
    let persisted = token.clone();
    storage.update_settings(move |settings| {
        settings.identity.tokens.push(persisted);
    });
    token
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
