/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Wire types exchanged between call participants and the signaling relay.
//!
//! Every frame is a single JSON object: the envelope fields (`type`,
//! `session_id`, `from`, `to`) plus the kind-specific body.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Offer,
    Answer,
    Candidate,
    Bye,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
            SignalKind::Candidate => "candidate",
            SignalKind::Bye => "bye",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "offer" => Some(SignalKind::Offer),
            "answer" => Some(SignalKind::Answer),
            "candidate" => Some(SignalKind::Candidate),
            "bye" => Some(SignalKind::Bye),
            _ => None,
        }
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connectivity candidate in the browser `RTCIceCandidateInit` shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
    #[serde(rename = "usernameFragment", default)]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// An opaque session description. Neither the relay nor the negotiation
/// logic look inside `sdp`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalBody {
    Offer {
        sdp: String,
    },
    Answer {
        sdp: String,
    },
    Candidate {
        candidate: IceCandidate,
    },
    Bye {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl SignalBody {
    pub fn kind(&self) -> SignalKind {
        match self {
            SignalBody::Offer { .. } => SignalKind::Offer,
            SignalBody::Answer { .. } => SignalKind::Answer,
            SignalBody::Candidate { .. } => SignalKind::Candidate,
            SignalBody::Bye { .. } => SignalKind::Bye,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalingMessage {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(flatten)]
    pub body: SignalBody,
}

impl SignalingMessage {
    pub fn new(session_id: &str, from: &str, body: SignalBody) -> Self {
        Self {
            session_id: session_id.to_string(),
            from: from.to_string(),
            to: None,
            body,
        }
    }

    pub fn offer(session_id: &str, from: &str, desc: &SessionDescription) -> Self {
        Self::new(session_id, from, SignalBody::Offer { sdp: desc.sdp.clone() })
    }

    pub fn answer(session_id: &str, from: &str, desc: &SessionDescription) -> Self {
        Self::new(session_id, from, SignalBody::Answer { sdp: desc.sdp.clone() })
    }

    pub fn candidate(session_id: &str, from: &str, candidate: IceCandidate) -> Self {
        Self::new(session_id, from, SignalBody::Candidate { candidate })
    }

    pub fn bye(session_id: &str, from: &str, reason: Option<&str>) -> Self {
        Self::new(
            session_id,
            from,
            SignalBody::Bye {
                reason: reason.map(str::to_string),
            },
        )
    }

    pub fn to(mut self, participant: Option<&str>) -> Self {
        self.to = participant.map(str::to_string);
        self
    }

    pub fn kind(&self) -> SignalKind {
        self.body.kind()
    }

    /// The session description carried by an offer or answer.
    pub fn description(&self) -> Option<SessionDescription> {
        match &self.body {
            SignalBody::Offer { sdp } => Some(SessionDescription::offer(sdp.clone())),
            SignalBody::Answer { sdp } => Some(SessionDescription::answer(sdp.clone())),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

/// Only the routing fields of a frame. The relay parses this and forwards the
/// original text untouched, so unknown body fields survive the hop.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
}

impl Envelope {
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }

    pub fn signal_kind(&self) -> Option<SignalKind> {
        SignalKind::parse(&self.kind)
    }
}
