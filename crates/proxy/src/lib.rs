// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential-substitution reverse proxy.
//!
//! Agent subprocesses are handed opaque per-session tokens instead of
//! real provider credentials. Requests presenting those tokens arrive
//! here, get their session resolved and checked against the registered
//! set, and are forwarded upstream with the real credential injected.

pub mod credentials;
pub mod routes;
pub mod stub;

pub use credentials::{Credential, CredentialStore};
pub use stub::StubAuth;

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, RwLock};

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tracing::{debug, warn};

fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// The proxy: credential store + registered-session gate + forwarder.
pub struct AuthProxy {
    store: CredentialStore,
    sessions: RwLock<HashSet<String>>,
    /// Provider → upstream base URL. Defaults from the route table;
    /// overridable for tests and self-hosted gateways.
    upstreams: RwLock<std::collections::HashMap<String, String>>,
    http: reqwest::Client,
    base_url: RwLock<String>,
}

impl AuthProxy {
    /// Build the proxy from a credentials file path. A missing file is an
    /// empty store.
    pub fn new(auth_file: &Path) -> Result<Arc<Self>, std::io::Error> {
        let store = CredentialStore::load(auth_file)?;
        let upstreams = routes::ROUTES
            .iter()
            .map(|r| (r.name.to_owned(), r.default_upstream.to_owned()))
            .collect();
        Ok(Arc::new(Self {
            store,
            sessions: RwLock::new(HashSet::new()),
            upstreams: RwLock::new(upstreams),
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(600))
                .build()
                .unwrap_or_default(),
            base_url: RwLock::new(String::new()),
        }))
    }

    /// Allow a session's stub tokens through the proxy.
    pub fn register_session(&self, session_id: &str) {
        if let Ok(mut sessions) = self.sessions.write() {
            sessions.insert(session_id.to_owned());
        }
    }

    /// Revoke a session's access.
    pub fn remove_session(&self, session_id: &str) {
        if let Ok(mut sessions) = self.sessions.write() {
            sessions.remove(session_id);
        }
    }

    pub fn session_registered(&self, session_id: &str) -> bool {
        self.sessions.read().map(|s| s.contains(session_id)).unwrap_or(false)
    }

    pub fn has_provider(&self, provider: &str) -> bool {
        self.store.has(provider)
    }

    /// Synthetic credentials for one session.
    pub fn build_stub_auth(&self, session_id: &str) -> StubAuth {
        let codex_account = self
            .store
            .get("openai-codex")
            .and_then(|c| c.extra_str("accountId").map(str::to_owned));
        stub::build_stub_auth(session_id, codex_account.as_deref())
    }

    /// Atomically re-read the credentials file.
    pub fn reload_auth(&self) -> Result<(), std::io::Error> {
        self.store.reload()
    }

    /// The local URL agents should send provider traffic to.
    pub fn base_url(&self) -> String {
        self.base_url.read().map(|u| u.clone()).unwrap_or_default()
    }

    pub fn set_base_url(&self, url: String) {
        if let Ok(mut base) = self.base_url.write() {
            *base = url;
        }
    }

    /// Point a provider at a different upstream (tests, gateways).
    pub fn set_upstream(&self, provider: &str, url: String) {
        if let Ok(mut upstreams) = self.upstreams.write() {
            upstreams.insert(provider.to_owned(), url);
        }
    }

    fn upstream_for(&self, provider: &str) -> Option<String> {
        self.upstreams.read().ok()?.get(provider).cloned()
    }

    /// Build the axum app: unauthenticated `/health` plus the provider
    /// catch-all.
    pub fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .route("/health", get(health))
            .fallback(proxy_handler)
            .with_state(Arc::clone(self))
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "ok": false, "error": message }))).into_response()
}

/// The forwarding path: match route, resolve session, gate, substitute,
/// stream.
async fn proxy_handler(State(proxy): State<Arc<AuthProxy>>, req: Request) -> Response {
    let path = req.uri().path().to_owned();
    let Some(route) = routes::match_route(&path) else {
        return error_response(StatusCode::NOT_FOUND, "unknown provider route");
    };

    let Some(session_id) = (route.extract_session)(req.headers()) else {
        // Presence only; the header value itself is never logged.
        debug!(provider = route.name, auth = %auth_presence(req.headers()), "session extraction failed");
        return error_response(StatusCode::UNAUTHORIZED, "missing or malformed proxy token");
    };
    if !proxy.session_registered(&session_id) {
        return error_response(StatusCode::FORBIDDEN, "session not registered");
    }

    let Some(cred) = proxy.store.get(route.name) else {
        return error_response(StatusCode::BAD_GATEWAY, "no credential for provider");
    };
    if cred.expired(epoch_ms()) {
        return error_response(StatusCode::BAD_GATEWAY, "provider credential expired");
    }

    let Some(upstream) = proxy.upstream_for(route.name) else {
        return error_response(StatusCode::BAD_GATEWAY, "no upstream configured");
    };
    let rest = &path[route.prefix.len()..];
    let query = req.uri().query().map(|q| format!("?{q}")).unwrap_or_default();
    let target = format!("{upstream}{rest}{query}");

    let method = req.method().clone();
    let mut headers = HeaderMap::new();
    for (name, value) in req.headers() {
        let skip = matches!(
            name.as_str(),
            "host" | "content-length" | "connection" | "transfer-encoding" | "authorization"
        );
        if !skip {
            headers.insert(name.clone(), value.clone());
        }
    }
    (route.inject_auth)(&mut headers, &cred);

    let body = reqwest::Body::wrap_stream(req.into_body().into_data_stream());
    let upstream_response = proxy
        .http
        .request(method, &target)
        .headers(headers)
        .body(body)
        .send()
        .await;

    let upstream_response = match upstream_response {
        Ok(r) => r,
        Err(e) => {
            warn!(provider = route.name, err = %e, "upstream request failed");
            return error_response(StatusCode::BAD_GATEWAY, "upstream unreachable");
        }
    };

    let status =
        StatusCode::from_u16(upstream_response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut builder = Response::builder().status(status);
    for (name, value) in upstream_response.headers() {
        let skip = matches!(name.as_str(), "connection" | "transfer-encoding");
        if !skip {
            builder = builder.header(name, value);
        }
    }
    builder
        .body(Body::from_stream(upstream_response.bytes_stream()))
        .unwrap_or_else(|_| error_response(StatusCode::BAD_GATEWAY, "response assembly failed"))
}

fn auth_presence(headers: &HeaderMap) -> &'static str {
    if headers.contains_key("authorization") {
        "present"
    } else {
        "absent"
    }
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
