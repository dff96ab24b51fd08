/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Signaling channels between a participant and whoever relays its messages.
//!
//! A [`Transport`] is a send half ([`SignalSink`]) plus an ordered inbound
//! queue. The WebSocket flavour talks to the relay; the loopback flavour wires
//! two in-process sessions together for self-tests.

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use peercall_protocol::SignalingMessage;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tracing::{debug, info, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("signaling channel closed")]
    Closed,
    #[error("encode signaling message: {0}")]
    Encode(String),
}

/// Non-blocking send half of a signaling channel. Sends are queued in order.
pub trait SignalSink: Send + Sync {
    fn send(&self, msg: &SignalingMessage) -> std::result::Result<(), TransportError>;
}

pub struct Transport {
    pub sink: Arc<dyn SignalSink>,
    pub inbound: mpsc::UnboundedReceiver<SignalingMessage>,
}

impl Transport {
    pub fn new(sink: Arc<dyn SignalSink>, inbound: mpsc::UnboundedReceiver<SignalingMessage>) -> Self {
        Self { sink, inbound }
    }
}

struct LoopbackSink {
    peer: mpsc::UnboundedSender<SignalingMessage>,
}

impl SignalSink for LoopbackSink {
    fn send(&self, msg: &SignalingMessage) -> std::result::Result<(), TransportError> {
        self.peer.send(msg.clone()).map_err(|_| TransportError::Closed)
    }
}

/// In-process channel pair: whatever one side sends is queued on the other
/// side's inbound immediately.
pub struct LoopbackTransport;

impl LoopbackTransport {
    pub fn pair() -> (Transport, Transport) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        let a = Transport::new(Arc::new(LoopbackSink { peer: b_tx }), a_rx);
        let b = Transport::new(Arc::new(LoopbackSink { peer: a_tx }), b_rx);
        (a, b)
    }
}

struct WsSink {
    tx: mpsc::UnboundedSender<String>,
}

impl SignalSink for WsSink {
    fn send(&self, msg: &SignalingMessage) -> std::result::Result<(), TransportError> {
        let json = msg
            .to_json()
            .map_err(|e| TransportError::Encode(e.to_string()))?;
        self.tx.send(json).map_err(|_| TransportError::Closed)
    }
}

const PING_INTERVAL: Duration = Duration::from_secs(15);

/// Opens a WebSocket channel to the relay at `url` (e.g. `ws://host:3000/ws`).
pub async fn connect_ws(url: &str) -> Result<Transport> {
    info!(%url, "connecting to relay");
    let (ws, _) = tokio_tungstenite::connect_async(url)
        .await
        .with_context(|| format!("connect relay {url}"))?;
    let (mut ws_tx, mut ws_rx) = ws.split();

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let (in_tx, in_rx) = mpsc::unbounded_channel::<SignalingMessage>();

    tokio::spawn(async move {
        let mut ping = tokio::time::interval(PING_INTERVAL);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ping.tick().await;

        loop {
            tokio::select! {
                out = out_rx.recv() => {
                    let Some(text) = out else {
                        let _ = ws_tx.close().await;
                        break;
                    };
                    if let Err(e) = ws_tx.send(tungstenite::Message::Text(text)).await {
                        warn!("relay send failed: {e}");
                        break;
                    }
                }
                _ = ping.tick() => {
                    if let Err(e) = ws_tx.send(tungstenite::Message::Ping(Vec::new())).await {
                        warn!("relay ping failed: {e}");
                        break;
                    }
                }
                msg = ws_rx.next() => {
                    let Some(msg) = msg else { break };
                    let msg = match msg {
                        Ok(m) => m,
                        Err(e) => {
                            warn!("relay read failed: {e}");
                            break;
                        }
                    };
                    let text = match msg {
                        tungstenite::Message::Text(t) => t,
                        tungstenite::Message::Ping(p) => {
                            let _ = ws_tx.send(tungstenite::Message::Pong(p)).await;
                            continue;
                        }
                        tungstenite::Message::Close(_) => break,
                        _ => continue,
                    };
                    match SignalingMessage::from_json(&text) {
                        Ok(m) => {
                            if in_tx.send(m).is_err() {
                                break;
                            }
                        }
                        Err(e) => debug!("ignoring relay frame: {e}"),
                    }
                }
            }
        }
        info!("relay channel closed");
    });

    Ok(Transport::new(Arc::new(WsSink { tx: out_tx }), in_rx))
}
