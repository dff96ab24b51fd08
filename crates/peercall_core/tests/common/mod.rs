/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use peercall_core::{
    CallConfig, ConnectionEvents, ConnectionFactory, IceServer, MediaConstraints, MediaDevices, MediaError,
    MediaKind, MediaStream, MediaTrack, PeerConnection, Transport,
};
use peercall_protocol::{IceCandidate, SessionDescription, SignalKind, SignalingMessage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default)]
pub struct FakeOptions {
    pub fail_offer: bool,
    pub reject_remote: bool,
    pub fail_answer: bool,
    pub fail_candidate: bool,
    /// Never report remote media, so the call stays negotiating.
    pub never_track: bool,
}

#[derive(Default)]
struct ConnState {
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    remote_sets: usize,
    applied: Vec<IceCandidate>,
    tracks: Vec<String>,
    track_fired: bool,
    closes: usize,
}

/// Scripted connection: emits two local candidates once a local description
/// is set and reports remote audio+video once both descriptions exist.
pub struct FakeConnection {
    id: usize,
    opts: FakeOptions,
    events: ConnectionEvents,
    state: Mutex<ConnState>,
}

impl FakeConnection {
    pub fn applied(&self) -> Vec<IceCandidate> {
        self.state.lock().unwrap().applied.clone()
    }

    pub fn closes(&self) -> usize {
        self.state.lock().unwrap().closes
    }

    pub fn remote_sets(&self) -> usize {
        self.state.lock().unwrap().remote_sets
    }

    pub fn tracks(&self) -> Vec<String> {
        self.state.lock().unwrap().tracks.clone()
    }

    fn maybe_fire_track(&self) {
        let fire = {
            let mut st = self.state.lock().unwrap();
            let ready = st.local.is_some() && st.remote.is_some();
            if ready && !st.track_fired && !self.opts.never_track {
                st.track_fired = true;
                true
            } else {
                false
            }
        };
        if fire {
            let stream = format!("remote-{}", self.id);
            self.events
                .track(&stream, MediaTrack::detached(&format!("{stream}-audio"), MediaKind::Audio));
            self.events
                .track(&stream, MediaTrack::detached(&format!("{stream}-video"), MediaKind::Video));
        }
    }
}

#[async_trait]
impl PeerConnection for FakeConnection {
    async fn create_offer(&self) -> Result<SessionDescription> {
        if self.opts.fail_offer {
            bail!("no codecs available");
        }
        Ok(SessionDescription::offer(format!("v=0 fake-offer {}", self.id)))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        if self.state.lock().unwrap().remote.is_none() {
            bail!("answer without a remote offer");
        }
        if self.opts.fail_answer {
            bail!("no common codecs");
        }
        Ok(SessionDescription::answer(format!("v=0 fake-answer {}", self.id)))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.state.lock().unwrap().local = Some(desc);
        for n in 0..2 {
            self.events.candidate(IceCandidate {
                candidate: format!("candidate:{} {n} udp 2122260223 10.0.0.{} 5000{n} typ host", self.id, self.id),
                sdp_mid: Some("0".to_string()),
                sdp_mline_index: Some(0),
                username_fragment: None,
            });
        }
        self.maybe_fire_track();
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        if self.opts.reject_remote {
            bail!("malformed sdp");
        }
        {
            let mut st = self.state.lock().unwrap();
            st.remote = Some(desc);
            st.remote_sets += 1;
        }
        self.maybe_fire_track();
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        if st.remote.is_none() {
            bail!("candidate before remote description");
        }
        if self.opts.fail_candidate {
            bail!("unparseable candidate");
        }
        st.applied.push(candidate);
        Ok(())
    }

    async fn add_track(&self, track: &MediaTrack) -> Result<()> {
        self.state.lock().unwrap().tracks.push(track.id().to_string());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.state.lock().unwrap().closes += 1;
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeFactory {
    pub opts: FakeOptions,
    conns: Mutex<Vec<Arc<FakeConnection>>>,
    created: AtomicUsize,
}

impl FakeFactory {
    pub fn with(opts: FakeOptions) -> Arc<Self> {
        Arc::new(Self {
            opts,
            ..Default::default()
        })
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn conn(&self, idx: usize) -> Arc<FakeConnection> {
        self.conns.lock().unwrap()[idx].clone()
    }
}

#[async_trait]
impl ConnectionFactory for FakeFactory {
    async fn create(
        &self,
        _ice_servers: &[IceServer],
        events: ConnectionEvents,
    ) -> Result<Arc<dyn PeerConnection>> {
        let id = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        let conn = Arc::new(FakeConnection {
            id,
            opts: self.opts.clone(),
            events,
            state: Mutex::new(ConnState::default()),
        });
        self.conns.lock().unwrap().push(conn.clone());
        Ok(conn)
    }
}

pub struct FakeMedia {
    pub allow: bool,
    pub delay: Option<Duration>,
    acquired: Mutex<Vec<MediaStream>>,
}

impl FakeMedia {
    pub fn allowing() -> Arc<Self> {
        Arc::new(Self {
            allow: true,
            delay: None,
            acquired: Mutex::new(Vec::new()),
        })
    }

    pub fn denying() -> Arc<Self> {
        Arc::new(Self {
            allow: false,
            delay: None,
            acquired: Mutex::new(Vec::new()),
        })
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            allow: true,
            delay: Some(delay),
            acquired: Mutex::new(Vec::new()),
        })
    }

    pub fn acquired(&self) -> Vec<MediaStream> {
        self.acquired.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaDevices for FakeMedia {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<MediaStream, MediaError> {
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        if !self.allow {
            return Err(MediaError::PermissionDenied);
        }
        let mut tracks = Vec::new();
        if constraints.audio {
            tracks.push(MediaTrack::detached("mic", MediaKind::Audio));
        }
        if constraints.video {
            tracks.push(MediaTrack::detached("camera", MediaKind::Video));
        }
        let stream = MediaStream::with_tracks("local", tracks);
        self.acquired.lock().unwrap().push(stream.clone());
        Ok(stream)
    }
}

pub fn config(participant: &str) -> CallConfig {
    CallConfig {
        participant_id: Some(participant.to_string()),
        ice_servers: Vec::new(),
        ..Default::default()
    }
}

/// Next message of `kind` the call sent to the scripted peer.
pub async fn next_of(peer: &mut Transport, kind: SignalKind) -> SignalingMessage {
    tokio::time::timeout(WAIT, async {
        loop {
            let msg = peer.inbound.recv().await.expect("call transport closed");
            if msg.kind() == kind {
                return msg;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no {kind} message within {WAIT:?}"))
}

pub fn peer_candidate(session_id: &str, from: &str, n: u8) -> SignalingMessage {
    SignalingMessage::candidate(
        session_id,
        from,
        IceCandidate {
            candidate: format!("candidate:peer {n} udp 2122260223 192.168.1.{n} 6000 typ host"),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        },
    )
}
