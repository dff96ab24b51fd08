/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::Result;
use async_trait::async_trait;
use peercall_protocol::{IceCandidate, SessionDescription};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::IceServer;
use crate::media::MediaTrack;
use crate::session::SessionEvent;

/// One side of a negotiated media path.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription>;
    async fn create_answer(&self) -> Result<SessionDescription>;
    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;
    async fn add_track(&self, track: &MediaTrack) -> Result<()>;
    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Builds a connection whose candidate and track callbacks report to `events`.
    async fn create(
        &self,
        ice_servers: &[IceServer],
        events: ConnectionEvents,
    ) -> Result<Arc<dyn PeerConnection>>;
}

/// Sink for connection callbacks. Everything lands on the owning session's
/// event queue, so callbacks never touch session state directly.
#[derive(Clone)]
pub struct ConnectionEvents {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl ConnectionEvents {
    pub(crate) fn new(tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { tx }
    }

    /// A locally discovered connectivity candidate.
    pub fn candidate(&self, candidate: IceCandidate) {
        let _ = self.tx.send(SessionEvent::LocalCandidate(candidate));
    }

    /// Remote media started flowing on `track`, part of stream `stream_id`.
    pub fn track(&self, stream_id: &str, track: MediaTrack) {
        let _ = self.tx.send(SessionEvent::RemoteTrack {
            stream_id: stream_id.to_string(),
            track,
        });
    }
}
