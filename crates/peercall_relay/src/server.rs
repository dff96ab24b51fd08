/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, info_span, warn};

use crate::config::RelayConfig;
use crate::hub::Hub;

#[derive(Clone)]
pub struct AppState {
    pub cfg: RelayConfig,
    pub hub: Arc<Hub>,
}

impl AppState {
    pub fn new(cfg: RelayConfig) -> Self {
        let hub = Arc::new(Hub::new(&cfg));
        Self { cfg, hub }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(signal_ws))
        .route("/healthz", get(healthz))
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
                info_span!("http", method = %req.method(), uri = %req.uri())
            }),
        )
        .with_state(state)
}

/// Binds `cfg.bind` and serves until ctrl-c.
pub async fn serve(cfg: RelayConfig) -> Result<()> {
    let listener = TcpListener::bind(cfg.bind)
        .await
        .with_context(|| format!("bind {}", cfg.bind))?;
    serve_with_shutdown(listener, AppState::new(cfg), shutdown_signal()).await
}

pub async fn serve_with_shutdown<F>(listener: TcpListener, state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr().context("listener addr")?;
    info!("peercall_relay listening on ws://{addr}/ws");
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    .context("relay server")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("ctrl-c handler failed: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

#[derive(Serialize)]
struct Health {
    ok: bool,
    channels: usize,
}

async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    Json(Health {
        ok: true,
        channels: state.hub.len().await,
    })
}

const TRANSPORT_LIMIT_FACTOR: usize = 4;

async fn signal_ws(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    // Hub-level size checks drop oversized frames; the transport limit only
    // bounds memory, and exceeding it closes the channel.
    let max = state.cfg.max_message_bytes.saturating_mul(TRANSPORT_LIMIT_FACTOR);
    ws.max_message_size(max)
        .on_upgrade(move |socket| handle_channel(state, peer, socket))
}

async fn handle_channel(state: AppState, peer: SocketAddr, socket: WebSocket) {
    let (id, mut rx) = state.hub.connect().await;
    info!(channel = id, %peer, "channel connected");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let cancel = CancellationToken::new();
    let cancel_writer = cancel.clone();

    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel_writer.cancelled() => break,
                frame = rx.recv() => {
                    let Some(frame) = frame else { break };
                    if ws_tx.send(Message::Text(frame.to_string())).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = ws_tx.close().await;
    });

    while let Some(msg) = ws_rx.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(e) => {
                debug!(channel = id, "channel read failed: {e}");
                break;
            }
        };
        match msg {
            Message::Text(text) => {
                if let Err(e) = state.hub.dispatch(id, &text).await {
                    warn!(channel = id, "frame dropped: {e}");
                }
            }
            Message::Binary(b) => {
                warn!(channel = id, len = b.len(), "binary frame dropped");
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    state.hub.disconnect(id).await;
    cancel.cancel();
    let _ = writer.await;
    info!(channel = id, %peer, "channel disconnected");
}
