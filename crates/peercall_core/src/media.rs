/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

use crate::error::NegotiationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
    pub facing_mode: Option<String>,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
            facing_mode: Some("user".to_string()),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("permission denied")]
    PermissionDenied,
    #[error("device error: {0}")]
    Device(String),
}

impl From<MediaError> for NegotiationError {
    fn from(e: MediaError) -> Self {
        match e {
            MediaError::PermissionDenied => NegotiationError::PermissionDenied,
            MediaError::Device(msg) => NegotiationError::MediaAcquisition(msg),
        }
    }
}

/// Platform access to camera and microphone.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<MediaStream, MediaError>;
}

/// What actually backs a track.
#[derive(Clone)]
pub enum TrackSource {
    /// No media engine behind it (scripted connections, tests).
    Detached,
    Local(Arc<TrackLocalStaticSample>),
    Remote(Arc<TrackRemote>),
}

struct TrackInner {
    id: String,
    kind: MediaKind,
    source: TrackSource,
    stopped: AtomicBool,
    stop: CancellationToken,
}

/// Cheap handle to one live audio or video track. Clones share state.
#[derive(Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

impl MediaTrack {
    pub fn new(id: &str, kind: MediaKind, source: TrackSource) -> Self {
        Self {
            inner: Arc::new(TrackInner {
                id: id.to_string(),
                kind,
                source,
                stopped: AtomicBool::new(false),
                stop: CancellationToken::new(),
            }),
        }
    }

    pub fn detached(id: &str, kind: MediaKind) -> Self {
        Self::new(id, kind, TrackSource::Detached)
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> MediaKind {
        self.inner.kind
    }

    pub fn source(&self) -> &TrackSource {
        &self.inner.source
    }

    /// Stops the track. Returns true only for the call that actually stopped it.
    pub fn stop(&self) -> bool {
        let first = !self.inner.stopped.swap(true, Ordering::SeqCst);
        if first {
            self.inner.stop.cancel();
        }
        first
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Resolves once the track is stopped; producers pumping samples wait on it.
    pub fn stopped_token(&self) -> CancellationToken {
        self.inner.stop.clone()
    }
}

impl std::fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// A group of tracks. Remote streams grow as the connection reports tracks,
/// so clones handed to the presentation layer see later additions.
#[derive(Clone)]
pub struct MediaStream {
    id: Arc<str>,
    tracks: Arc<Mutex<Vec<MediaTrack>>>,
}

impl MediaStream {
    pub fn new(id: &str) -> Self {
        Self {
            id: Arc::from(id),
            tracks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_tracks(id: &str, tracks: Vec<MediaTrack>) -> Self {
        let s = Self::new(id);
        for t in tracks {
            s.add_track(t);
        }
        s
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn add_track(&self, track: MediaTrack) {
        let mut g = self.tracks.lock().unwrap_or_else(PoisonError::into_inner);
        if g.iter().any(|t| t.id() == track.id()) {
            return;
        }
        g.push(track);
    }

    pub fn tracks(&self) -> Vec<MediaTrack> {
        self.tracks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.tracks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops every track; returns how many were still running.
    pub fn stop_all(&self) -> usize {
        self.tracks().iter().filter(|t| t.stop()).count()
    }

    pub fn is_live(&self) -> bool {
        self.tracks().iter().any(|t| !t.is_stopped())
    }
}

impl std::fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaStream")
            .field("id", &self.id)
            .field("tracks", &self.tracks())
            .finish()
    }
}
