//! Event server (axum).

use crate::channels::{InboundMessage, OnebotEnvelope};
use crate::config::ServerConfig;
use crate::relay::Relay;
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

/// Shared state for request handlers.
#[derive(Clone)]
pub struct ServerState {
    pub relay: Relay,
    /// Accepted group messages; the processor task runs one invocation per message.
    pub inbound_tx: mpsc::Sender<InboundMessage>,
}

/// True if the bind address is loopback (127.0.0.1, ::1, etc.).
fn is_loopback_bind(bind: &str) -> bool {
    let b = bind.trim();
    b == "127.0.0.1" || b == "::1" || b == "localhost"
}

/// Non-loopback binds require `server.allowRemote`.
fn check_bind(server: &ServerConfig) -> Result<()> {
    let bind = server.bind.trim();
    if is_loopback_bind(bind) {
        return Ok(());
    }
    if !server.allow_remote {
        anyhow::bail!(
            "refusing to bind event server to {} (events are unauthenticated; set server.allowRemote to true to allow it)",
            bind
        );
    }
    log::warn!(
        "event server bound to {}: anyone who can reach it can make the bot talk",
        bind
    );
    Ok(())
}

pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/", get(health_http).post(onebot_event))
        .route("/onebot/event", post(onebot_event))
        .with_state(state)
}

/// Run the event server on `settings.server.bind:port` until SIGINT/SIGTERM.
/// In-flight invocations are allowed to finish before this returns.
pub async fn run_server(relay: Relay) -> Result<()> {
    let server = relay.settings().server.clone();
    check_bind(&server)?;
    let bind = server.bind.trim().to_string();

    let (inbound_tx, mut inbound_rx) = mpsc::channel::<InboundMessage>(64);
    let processor = {
        let relay = relay.clone();
        tokio::spawn(async move {
            let mut tasks = JoinSet::new();
            loop {
                tokio::select! {
                    msg = inbound_rx.recv() => match msg {
                        Some(msg) => {
                            let relay = relay.clone();
                            tasks.spawn(async move { relay.process(msg).await });
                        }
                        None => break,
                    },
                    Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                        if let Err(e) = joined {
                            log::error!("invocation task failed: {}", e);
                        }
                    }
                }
            }
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    log::error!("invocation task failed: {}", e);
                }
            }
        })
    };

    let app = router(ServerState { relay, inbound_tx });

    let bind_addr = format!("{}:{}", bind, server.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("event server listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("event server exited")?;
    log::info!("event server stopped, waiting for in-flight replies");
    processor.await.context("joining processor task")?;
    log::info!("all replies finished");
    Ok(())
}

/// Completes on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, no longer accepting events");
}

/// POST / or /onebot/event: OneBot event report. Non-group events are acknowledged and ignored;
/// group messages are queued and answered asynchronously.
async fn onebot_event(
    State(state): State<ServerState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if state.relay.settings().verbose {
        for (k, v) in headers.iter() {
            log::info!("header {}: {}", k, v.to_str().unwrap_or("<binary>"));
        }
        log::info!("event body: {}", String::from_utf8_lossy(&body));
    }
    let envelope: OnebotEnvelope = match serde_json::from_slice(&body) {
        Ok(e) => e,
        Err(e) => {
            log::warn!("rejecting event: {}", e);
            return StatusCode::BAD_REQUEST;
        }
    };
    if !envelope.is_group_message() {
        log::debug!(
            "ignoring event post_type={:?} message_type={:?}",
            envelope.post_type,
            envelope.message_type
        );
        return StatusCode::NO_CONTENT;
    }
    let msg = match state.relay.parse_event(&body) {
        Ok(m) => m,
        Err(e) => {
            log::warn!("rejecting event: {}", e);
            return StatusCode::BAD_REQUEST;
        }
    };
    if state.inbound_tx.send(msg).await.is_err() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    StatusCode::NO_CONTENT
}

/// GET / returns a simple health JSON (for probes).
async fn health_http(State(state): State<ServerState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "port": state.relay.settings().server.port,
    }))
}
