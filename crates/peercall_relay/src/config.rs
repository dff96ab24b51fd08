/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use std::net::SocketAddr;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bind: SocketAddr,
    /// Broadcast a relay-authored `bye` when a channel with a known
    /// participant id goes away.
    pub peer_disconnect_notify: bool,
    /// Per-channel outbound queue; a full queue drops frames for that
    /// recipient only.
    pub channel_queue: usize,
    pub max_message_bytes: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 3000)),
            peer_disconnect_notify: false,
            channel_queue: 256,
            max_message_bytes: 256 * 1024,
        }
    }
}

impl RelayConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let bind = match get("PEERCALL_RELAY_BIND") {
            Some(v) => v
                .trim()
                .parse::<SocketAddr>()
                .with_context(|| format!("PEERCALL_RELAY_BIND invalid: {v}"))?,
            None => defaults.bind,
        };
        let peer_disconnect_notify = get("PEERCALL_RELAY_PEER_DISCONNECT_NOTIFY")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(defaults.peer_disconnect_notify);
        let channel_queue = get("PEERCALL_RELAY_CHANNEL_QUEUE")
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(defaults.channel_queue)
            .clamp(8, 65_536);
        let max_message_bytes = get("PEERCALL_RELAY_MAX_MESSAGE_BYTES")
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(defaults.max_message_bytes)
            .clamp(1024, 4 * 1024 * 1024);
        Ok(Self {
            bind,
            peer_disconnect_notify,
            channel_queue,
            max_message_bytes,
        })
    }
}
