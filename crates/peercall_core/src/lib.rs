/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

pub mod config;
pub mod connection;
pub mod error;
pub mod media;
pub mod rtc;
pub mod session;
pub mod transport;

pub use config::{CallConfig, IceServer};
pub use connection::{ConnectionEvents, ConnectionFactory, PeerConnection};
pub use error::NegotiationError;
pub use media::{MediaConstraints, MediaDevices, MediaError, MediaKind, MediaStream, MediaTrack, TrackSource};
pub use rtc::{RtcConnectionFactory, SyntheticMedia};
pub use session::{spawn, CallHandle, CallView, Phase, Role};
pub use transport::{connect_ws, LoopbackTransport, SignalSink, Transport, TransportError};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
