/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use thiserror::Error;

/// Why a call ended up in `Phase::Failed`. Local to the failing participant;
/// never sent to the peer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NegotiationError {
    #[error("camera/microphone permission denied")]
    PermissionDenied,

    #[error("media acquisition failed: {0}")]
    MediaAcquisition(String),

    #[error("offer creation failed: {0}")]
    OfferCreation(String),

    #[error("answer creation failed: {0}")]
    AnswerCreation(String),

    #[error("remote description rejected: {0}")]
    RemoteDescription(String),

    #[error("candidate application failed: {0}")]
    CandidateApplication(String),

    #[error("negotiation timed out after {0} ms")]
    NegotiationTimeout(u64),

    #[error("signaling transport failed: {0}")]
    Transport(String),
}

impl NegotiationError {
    /// Stable short name, handy for logs and UI lookups.
    pub fn code(&self) -> &'static str {
        match self {
            NegotiationError::PermissionDenied => "PermissionDenied",
            NegotiationError::MediaAcquisition(_) => "MediaAcquisitionError",
            NegotiationError::OfferCreation(_) => "OfferCreationError",
            NegotiationError::AnswerCreation(_) => "AnswerCreationError",
            NegotiationError::RemoteDescription(_) => "RemoteDescriptionError",
            NegotiationError::CandidateApplication(_) => "CandidateApplicationError",
            NegotiationError::NegotiationTimeout(_) => "NegotiationTimeout",
            NegotiationError::Transport(_) => "TransportError",
        }
    }
}
