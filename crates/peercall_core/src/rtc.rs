/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! webrtc-rs backed collaborators: a real `RTCPeerConnection` factory and a
//! synthetic camera/microphone for headless runs.

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use peercall_protocol::{IceCandidate, SdpType, SessionDescription};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::config::IceServer;
use crate::connection::{ConnectionEvents, ConnectionFactory, PeerConnection};
use crate::media::{MediaConstraints, MediaDevices, MediaError, MediaKind, MediaStream, MediaTrack, TrackSource};

fn build_ice_servers(servers: &[IceServer]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .filter(|s| !s.urls.is_empty())
        .map(|s| RTCIceServer {
            urls: s.urls.clone(),
            username: s.username.clone().unwrap_or_default(),
            credential: s.credential.clone().unwrap_or_default(),
            ..Default::default()
        })
        .collect()
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription> {
    let out = match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
    };
    out.context("parse session description")
}

fn from_rtc(desc: RTCSessionDescription) -> Result<SessionDescription> {
    match desc.sdp_type {
        RTCSdpType::Offer => Ok(SessionDescription::offer(desc.sdp)),
        RTCSdpType::Answer => Ok(SessionDescription::answer(desc.sdp)),
        other => anyhow::bail!("unexpected description type {other:?}"),
    }
}

fn media_kind(kind: RTPCodecType) -> MediaKind {
    match kind {
        RTPCodecType::Audio => MediaKind::Audio,
        _ => MediaKind::Video,
    }
}

/// Creates one `RTCPeerConnection` per call with the default codecs and
/// interceptors registered.
#[derive(Debug, Default, Clone)]
pub struct RtcConnectionFactory;

#[async_trait]
impl ConnectionFactory for RtcConnectionFactory {
    async fn create(
        &self,
        ice_servers: &[IceServer],
        events: ConnectionEvents,
    ) -> Result<Arc<dyn PeerConnection>> {
        let mut m = MediaEngine::default();
        m.register_default_codecs().context("register codecs")?;
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut m).context("register interceptors")?;
        let api = APIBuilder::new()
            .with_media_engine(m)
            .with_interceptor_registry(registry)
            .build();

        let pc = api
            .new_peer_connection(RTCConfiguration {
                ice_servers: build_ice_servers(ice_servers),
                ..Default::default()
            })
            .await
            .context("new peer connection")?;
        let pc = Arc::new(pc);

        {
            let events = events.clone();
            pc.on_ice_candidate(Box::new(move |cand| {
                let events = events.clone();
                Box::pin(async move {
                    let Some(cand) = cand else { return };
                    if let Ok(init) = cand.to_json() {
                        events.candidate(IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                            username_fragment: init.username_fragment,
                        });
                    }
                })
            }));
        }

        {
            let events = events.clone();
            pc.on_track(Box::new(move |track, _receiver, _transceiver| {
                let events = events.clone();
                Box::pin(async move {
                    let kind = media_kind(track.kind());
                    let local = MediaTrack::new(&track.id(), kind, TrackSource::Remote(track.clone()));
                    info!(track = %track.id(), stream = %track.stream_id(), ?kind, "remote track");

                    // Keep reading so the receive buffers drain; stops with the track.
                    let stopped = local.stopped_token();
                    let reader = track.clone();
                    tokio::spawn(async move {
                        loop {
                            tokio::select! {
                                _ = stopped.cancelled() => break,
                                r = reader.read_rtp() => if r.is_err() { break },
                            }
                        }
                    });

                    events.track(&track.stream_id(), local);
                })
            }));
        }

        pc.on_peer_connection_state_change(Box::new(move |state| {
            debug!(?state, "peer connection state");
            Box::pin(async {})
        }));

        Ok(Arc::new(RtcConnection { pc }))
    }
}

pub struct RtcConnection {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl PeerConnection for RtcConnection {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self.pc.create_offer(None).await.context("create offer")?;
        from_rtc(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self.pc.create_answer(None).await.context("create answer")?;
        from_rtc(answer)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc
            .set_local_description(to_rtc(desc)?)
            .await
            .context("set local description")
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc
            .set_remote_description(to_rtc(desc)?)
            .await
            .context("set remote description")
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: candidate.username_fragment,
            })
            .await
            .context("add ice candidate")
    }

    async fn add_track(&self, track: &MediaTrack) -> Result<()> {
        match track.source() {
            TrackSource::Local(local) => {
                let local: Arc<dyn TrackLocal + Send + Sync> = local.clone();
                let sender = self.pc.add_track(local).await.context("add track")?;
                tokio::spawn(async move {
                    let mut rtcp_buf = vec![0u8; 1500];
                    while sender.read(&mut rtcp_buf).await.is_ok() {}
                });
            }
            TrackSource::Detached => {
                let kind = match track.kind() {
                    MediaKind::Audio => RTPCodecType::Audio,
                    MediaKind::Video => RTPCodecType::Video,
                };
                self.pc
                    .add_transceiver_from_kind(kind, None)
                    .await
                    .context("add transceiver")?;
            }
            TrackSource::Remote(_) => anyhow::bail!("cannot send a remote track ({})", track.id()),
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pc.close().await.context("close peer connection")
    }
}

const OPUS_FRAME: Duration = Duration::from_millis(20);
const VP8_FRAME: Duration = Duration::from_millis(33);

/// Headless media source: an Opus and a VP8 track fed with filler samples.
/// `allow: false` behaves like a user declining the permission prompt.
#[derive(Debug, Clone)]
pub struct SyntheticMedia {
    pub allow: bool,
}

impl Default for SyntheticMedia {
    fn default() -> Self {
        Self { allow: true }
    }
}

fn synthetic_track(kind: MediaKind, stream_id: &str) -> MediaTrack {
    let (mime, id, frame, payload): (&'static str, &'static str, Duration, &'static [u8]) = match kind {
        MediaKind::Audio => (MIME_TYPE_OPUS, "audio", OPUS_FRAME, &[0xf8, 0xff, 0xfe]),
        MediaKind::Video => (MIME_TYPE_VP8, "video", VP8_FRAME, &[0x10, 0x02, 0x00, 0x9d, 0x01, 0x2a]),
    };
    let local = Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: mime.to_owned(),
            ..Default::default()
        },
        id.to_owned(),
        stream_id.to_owned(),
    ));
    let track = MediaTrack::new(id, kind, TrackSource::Local(local.clone()));

    let stopped = track.stopped_token();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(frame);
        loop {
            tokio::select! {
                _ = stopped.cancelled() => break,
                _ = tick.tick() => {
                    let sample = Sample {
                        data: Bytes::from_static(payload),
                        duration: frame,
                        ..Default::default()
                    };
                    if let Err(e) = local.write_sample(&sample).await {
                        debug!("synthetic {id} sample dropped: {e}");
                    }
                }
            }
        }
    });
    track
}

#[async_trait]
impl MediaDevices for SyntheticMedia {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<MediaStream, MediaError> {
        if !self.allow {
            return Err(MediaError::PermissionDenied);
        }
        if !constraints.audio && !constraints.video {
            return Err(MediaError::Device("no audio or video requested".to_string()));
        }
        let stream = MediaStream::new("peercall-local");
        if constraints.audio {
            stream.add_track(synthetic_track(MediaKind::Audio, stream.id()));
        }
        if constraints.video {
            stream.add_track(synthetic_track(MediaKind::Video, stream.id()));
        }
        Ok(stream)
    }
}
