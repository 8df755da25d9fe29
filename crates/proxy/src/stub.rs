// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Synthetic per-session credentials handed to agent subprocesses.
//!
//! The agent reads these as if they were real provider tokens; when they
//! come back through the proxy, each one resolves to the session that was
//! issued it. Real tokens never reach the subprocess.

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Bearer prefix for the Anthropic stub token.
pub const ANTHROPIC_STUB_PREFIX: &str = "sk-ant-oat01-proxy-";

/// JWT claim carrying the session id in the OpenAI-Codex stub token.
pub const CODEX_SESSION_CLAIM: &str = "oppi_session";

/// One provider's synthetic credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StubCredential {
    #[serde(rename = "type")]
    pub kind: String,
    pub access: String,
    /// Far-future expiry; the agent must never try to refresh.
    pub expires: u64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// The full synthetic credentials structure, keyed by provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StubAuth {
    #[serde(flatten)]
    pub providers: std::collections::BTreeMap<String, StubCredential>,
}

const STUB_EXPIRES: u64 = 4_102_444_800_000; // 2100-01-01, effectively never

/// Anthropic stub: an opaque bearer whose suffix is the session id.
pub fn anthropic_stub_token(session_id: &str) -> String {
    format!("{ANTHROPIC_STUB_PREFIX}{session_id}")
}

/// Parse the session id back out of an Anthropic stub bearer.
pub fn parse_anthropic_stub(token: &str) -> Option<String> {
    let session = token.strip_prefix(ANTHROPIC_STUB_PREFIX)?;
    if session.is_empty() {
        return None;
    }
    Some(session.to_owned())
}

/// OpenAI-Codex stub: a minimally-valid JWT whose payload carries the real
/// `chatgpt_account_id` plus the session id claim. Unsigned (`alg: none`);
/// the proxy is the only verifier and it only reads claims.
pub fn codex_stub_jwt(account_id: &str, session_id: &str) -> String {
    let engine = base64::engine::general_purpose::URL_SAFE_NO_PAD;
    let header = engine.encode(r#"{"alg":"none","typ":"JWT"}"#);
    let payload = engine.encode(
        json!({
            "chatgpt_account_id": account_id,
            CODEX_SESSION_CLAIM: session_id,
        })
        .to_string(),
    );
    format!("{header}.{payload}.")
}

/// Decode a string claim out of a JWT payload without verifying anything.
pub fn decode_jwt_claim(token: &str, claim: &str) -> Option<String> {
    let payload = token.split('.').nth(1)?;
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(payload).ok()?;
    let value: Value = serde_json::from_slice(&bytes).ok()?;
    value.get(claim).and_then(Value::as_str).map(str::to_owned)
}

/// Build the stub credentials for one session.
///
/// `codex_account_id` is the real `chatgpt_account_id` from the loaded
/// credential, when the provider is configured.
pub fn build_stub_auth(session_id: &str, codex_account_id: Option<&str>) -> StubAuth {
    let mut providers = std::collections::BTreeMap::new();

    providers.insert(
        "anthropic".to_owned(),
        StubCredential {
            kind: "oauth".to_owned(),
            access: anthropic_stub_token(session_id),
            expires: STUB_EXPIRES,
            extra: serde_json::Map::new(),
        },
    );

    if let Some(account_id) = codex_account_id {
        let mut extra = serde_json::Map::new();
        extra.insert("accountId".to_owned(), Value::String(account_id.to_owned()));
        providers.insert(
            "openai-codex".to_owned(),
            StubCredential {
                kind: "oauth".to_owned(),
                access: codex_stub_jwt(account_id, session_id),
                expires: STUB_EXPIRES,
                extra,
            },
        );
    }

    StubAuth { providers }
}

#[cfg(test)]
#[path = "stub_tests.rs"]
mod tests;
