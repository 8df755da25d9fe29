// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Provider route table: one prefix per provider, with the session-id
//! extraction and header-injection rules for each.

use axum::http::{HeaderMap, HeaderValue};

use crate::credentials::Credential;
use crate::stub;

/// One provider behind the proxy.
pub struct ProviderRoute {
    pub name: &'static str,
    /// Local route prefix, stripped before forwarding.
    pub prefix: &'static str,
    /// Default upstream base. Provider-specific path prefixes (e.g.
    /// `/backend-api`) belong here so they survive the rewrite.
    pub default_upstream: &'static str,
    /// Pull the session id out of the incoming request headers.
    pub extract_session: fn(&HeaderMap) -> Option<String>,
    /// Overwrite auth headers with the real credential.
    pub inject_auth: fn(&mut HeaderMap, &Credential),
}

/// The configured providers.
pub static ROUTES: &[ProviderRoute] = &[
    ProviderRoute {
        name: "anthropic",
        prefix: "/anthropic",
        default_upstream: "https://api.anthropic.com",
        extract_session: extract_anthropic_session,
        inject_auth: inject_anthropic_auth,
    },
    ProviderRoute {
        name: "openai-codex",
        prefix: "/openai-codex",
        default_upstream: "https://chatgpt.com/backend-api",
        extract_session: extract_codex_session,
        inject_auth: inject_codex_auth,
    },
];

/// Find the route owning a request path.
pub fn match_route(path: &str) -> Option<&'static ProviderRoute> {
    ROUTES
        .iter()
        .find(|r| path == r.prefix || path.starts_with(&format!("{}/", r.prefix)))
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers.get("authorization")?.to_str().ok()?.strip_prefix("Bearer ")
}

fn extract_anthropic_session(headers: &HeaderMap) -> Option<String> {
    stub::parse_anthropic_stub(bearer(headers)?)
}

fn extract_codex_session(headers: &HeaderMap) -> Option<String> {
    stub::decode_jwt_claim(bearer(headers)?, stub::CODEX_SESSION_CLAIM)
}

fn set_header(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(name, value);
    }
}

fn inject_anthropic_auth(headers: &mut HeaderMap, cred: &Credential) {
    set_header(headers, "authorization", &format!("Bearer {}", cred.access));
    set_header(headers, "anthropic-beta", "oauth-2025-04-20");
    set_header(headers, "user-agent", "reins-proxy/0.3");
    set_header(headers, "x-app", "cli");
}

fn inject_codex_auth(headers: &mut HeaderMap, cred: &Credential) {
    set_header(headers, "authorization", &format!("Bearer {}", cred.access));
    if let Some(account_id) = cred.extra_str("accountId") {
        set_header(headers, "chatgpt-account-id", account_id);
    }
    set_header(headers, "user-agent", "reins-proxy/0.3");
}

#[cfg(test)]
#[path = "routes_tests.rs"]
mod tests;
