// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Top-level server runner — the composition root wiring storage, policy,
//! gate, proxy, manager, and the HTTP/WS surface together.

use std::sync::Arc;
use std::time::Instant;

use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::permission::{AuditLog, PermissionGate};
use crate::policy::{PolicyEngine, SecurityProfile};
use crate::session::SessionManager;
use crate::storage::Storage;
use crate::transport::pairing::{load_or_create_keyring, PairingState};
use crate::transport::{auth, build_router, AppState};
use crate::workspace::WorkspaceRuntime;

/// Install the tracing subscriber per config.
pub fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    if config.log_format == "json" {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Run the server until shutdown. Fatal-to-process errors (unreadable
/// config, bind failure) surface as `Err` and the caller exits non-zero.
pub async fn run(config: Config) -> anyhow::Result<()> {
    // The ring crypto provider backs both rustls (reqwest) and invites.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let storage = Arc::new(Storage::open(&config.resolved_data_dir(), config.config_mode_enum()?)?);
    let settings = storage.settings();

    // First boot: mint the identity token. The value is written to
    // config.json only; it is never logged.
    if settings.identity.tokens.is_empty() {
        auth::rotate_token(&storage);
        info!("identity token generated");
    }
    if load_or_create_keyring(&storage).is_none() {
        anyhow::bail!("invite signing key unavailable");
    }

    let profile = SecurityProfile::parse(&settings.security.profile)
        .or_else(|| config.security_profile_enum().ok())
        .unwrap_or(SecurityProfile::Host);
    let engine = Arc::new(PolicyEngine::new(profile));
    let audit = Arc::new(AuditLog::new(2048));

    let approval_timeout =
        settings.security.approval_timeout_ms.unwrap_or(config.approval_timeout_ms);
    let gate = Arc::new(PermissionGate::new(
        Arc::clone(&engine),
        Arc::clone(&audit),
        approval_timeout,
    ));

    // Auth-substitution proxy, loopback only.
    let proxy = reinsproxy::AuthProxy::new(&config.resolved_auth_file())?;
    let proxy_listener =
        TcpListener::bind(("127.0.0.1", config.proxy_port)).await?;
    let proxy_addr = proxy_listener.local_addr()?;
    proxy.set_base_url(format!("http://{proxy_addr}"));
    info!(addr = %proxy_addr, "auth proxy listening");
    {
        let app = proxy.router();
        tokio::spawn(async move {
            if let Err(e) = axum::serve(proxy_listener, app).await {
                warn!(err = %e, "auth proxy exited");
            }
        });
    }

    let (runtime, mut idle_rx) = WorkspaceRuntime::new(
        config.max_sessions_per_workspace,
        config.max_sessions_global,
        config.idle_stop_timeout(),
    );
    // Idle teardown consumer. Container lifecycle itself lives outside
    // the core; the timer firing is the signal.
    tokio::spawn(async move {
        while let Some(workspace_id) = idle_rx.recv().await {
            info!(workspace_id, "workspace idle-stop fired");
        }
    });

    let manager = SessionManager::new(
        config.clone(),
        Arc::clone(&runtime),
        Arc::clone(&gate),
        Arc::clone(&storage),
        Arc::clone(&proxy),
    );

    let state = Arc::new(AppState {
        config: config.clone(),
        manager: Arc::clone(&manager),
        gate,
        engine,
        audit,
        storage,
        runtime,
        proxy,
        pairing: PairingState::new(),
        started_at: Instant::now(),
    });

    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    let addr = listener.local_addr()?;
    info!(addr = %addr, "reins listening");

    let app = build_router(Arc::clone(&state));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Tear down whatever is still running so agents don't outlive us.
    for active in manager.list().await {
        let _ = manager.stop_session(&active.id, "server shutdown").await;
    }
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
