/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Registry of connected signaling channels and the fan-out between them.
//!
//! The hub never looks past the envelope of a frame: it reads `type`, `from`
//! and `to`, then hands the original text to the recipients' queues.

use peercall_protocol::{Envelope, SignalKind, SignalingMessage};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::config::RelayConfig;

pub type ChannelId = u64;
pub type Frame = Arc<str>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RelayDeliveryError {
    #[error("channel {0}: outbound queue full")]
    QueueFull(ChannelId),
    #[error("channel {0}: closed")]
    Closed(ChannelId),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameRejected {
    #[error("frame too large ({0} bytes)")]
    TooLarge(usize),
    #[error("not a signaling frame")]
    Malformed,
    #[error("unsupported kind {0:?}")]
    UnsupportedKind(String),
    #[error("sender channel {0} is not registered")]
    UnknownSender(ChannelId),
}

#[derive(Debug, Default)]
pub struct DeliveryReport {
    pub kind: Option<SignalKind>,
    pub recipients: usize,
    pub delivered: usize,
    pub failures: Vec<RelayDeliveryError>,
}

struct Member {
    tx: mpsc::Sender<Frame>,
    participant: Option<String>,
}

pub struct Hub {
    next_id: AtomicU64,
    members: RwLock<HashMap<ChannelId, Member>>,
    queue: usize,
    max_message_bytes: usize,
    peer_disconnect_notify: bool,
}

impl Hub {
    pub fn new(cfg: &RelayConfig) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            members: RwLock::new(HashMap::new()),
            queue: cfg.channel_queue.max(1),
            max_message_bytes: cfg.max_message_bytes,
            peer_disconnect_notify: cfg.peer_disconnect_notify,
        }
    }

    /// Registers a new channel. Frames for it arrive on the returned receiver.
    pub async fn connect(&self) -> (ChannelId, mpsc::Receiver<Frame>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.queue);
        let mut members = self.members.write().await;
        members.insert(
            id,
            Member {
                tx,
                participant: None,
            },
        );
        info!(channel = id, active = members.len(), "channel registered");
        (id, rx)
    }

    /// Deregisters a channel. Returns false if it was already gone.
    pub async fn disconnect(&self, id: ChannelId) -> bool {
        let removed = {
            let mut members = self.members.write().await;
            let removed = members.remove(&id);
            if removed.is_some() {
                info!(channel = id, active = members.len(), "channel deregistered");
            }
            removed
        };
        let Some(member) = removed else {
            return false;
        };
        if self.peer_disconnect_notify {
            if let Some(participant) = member.participant {
                let bye = SignalingMessage::bye("", &participant, Some("disconnected"));
                match bye.to_json() {
                    Ok(text) => {
                        let frame: Frame = Arc::from(text);
                        let members = self.members.read().await;
                        let report = fan_out(&members, id, None, &frame);
                        log_failures(id, &report);
                    }
                    Err(e) => warn!(channel = id, "serialize bye failed: {e}"),
                }
            }
        }
        true
    }

    /// Forwards `text` from `from` to the other channels: only to the addressed
    /// participant when `to` names a registered one, to everyone else otherwise.
    pub async fn dispatch(&self, from: ChannelId, text: &str) -> Result<DeliveryReport, FrameRejected> {
        if text.len() > self.max_message_bytes {
            return Err(FrameRejected::TooLarge(text.len()));
        }
        let envelope = Envelope::parse(text).ok_or(FrameRejected::Malformed)?;
        let kind = envelope
            .signal_kind()
            .ok_or_else(|| FrameRejected::UnsupportedKind(envelope.kind.clone()))?;

        let sender_from = envelope
            .from
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        self.learn_participant(from, sender_from).await?;

        let frame: Frame = Arc::from(text);
        let members = self.members.read().await;
        if !members.contains_key(&from) {
            return Err(FrameRejected::UnknownSender(from));
        }
        let mut report = fan_out(&members, from, envelope.to.as_deref(), &frame);
        drop(members);
        report.kind = Some(kind);
        debug!(
            channel = from,
            kind = %kind,
            recipients = report.recipients,
            delivered = report.delivered,
            "frame forwarded"
        );
        log_failures(from, &report);
        Ok(report)
    }

    pub async fn len(&self) -> usize {
        self.members.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.members.read().await.is_empty()
    }

    pub async fn participant(&self, id: ChannelId) -> Option<String> {
        self.members
            .read()
            .await
            .get(&id)
            .and_then(|m| m.participant.clone())
    }

    async fn learn_participant(&self, id: ChannelId, from: Option<&str>) -> Result<(), FrameRejected> {
        let Some(from) = from else {
            return Ok(());
        };
        {
            let members = self.members.read().await;
            match members.get(&id) {
                None => return Err(FrameRejected::UnknownSender(id)),
                Some(m) if m.participant.is_some() => return Ok(()),
                Some(_) => {}
            }
        }
        let mut members = self.members.write().await;
        if let Some(m) = members.get_mut(&id) {
            if m.participant.is_none() {
                debug!(channel = id, participant = %from, "participant learned");
                m.participant = Some(from.to_string());
            }
        }
        Ok(())
    }
}

fn fan_out(
    members: &HashMap<ChannelId, Member>,
    sender: ChannelId,
    to: Option<&str>,
    frame: &Frame,
) -> DeliveryReport {
    let addressed = to.map(str::trim).filter(|s| !s.is_empty()).and_then(|to| {
        members
            .iter()
            .filter(|(id, m)| **id != sender && m.participant.as_deref() == Some(to))
            .map(|(id, _)| *id)
            .max()
    });

    let mut report = DeliveryReport::default();
    for (id, member) in members.iter() {
        if *id == sender {
            continue;
        }
        if let Some(target) = addressed {
            if *id != target {
                continue;
            }
        }
        report.recipients += 1;
        match member.tx.try_send(frame.clone()) {
            Ok(()) => report.delivered += 1,
            Err(mpsc::error::TrySendError::Full(_)) => {
                report.failures.push(RelayDeliveryError::QueueFull(*id))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                report.failures.push(RelayDeliveryError::Closed(*id))
            }
        }
    }
    report
}

fn log_failures(sender: ChannelId, report: &DeliveryReport) {
    for e in &report.failures {
        warn!(channel = sender, "relay delivery failed: {e}");
    }
}
