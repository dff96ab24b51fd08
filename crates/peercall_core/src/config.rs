/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::media::MediaConstraints;

pub const DEFAULT_STUN: &str = "stun:stun.l.google.com:19302";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: &str) -> Self {
        Self {
            urls: vec![url.to_string()],
            username: None,
            credential: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    /// WebSocket endpoint of the signaling relay.
    pub relay_url: String,
    pub ice_servers: Vec<IceServer>,
    /// Bound on reaching `Connected`. `0` waits forever.
    pub negotiation_timeout_ms: u64,
    /// Answer incoming offers while idle.
    pub auto_answer: bool,
    /// Stamped into `from` of every outgoing message; random when unset.
    pub participant_id: Option<String>,
    pub media: MediaConstraints,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            relay_url: "ws://127.0.0.1:3000/ws".to_string(),
            ice_servers: vec![IceServer::stun(DEFAULT_STUN)],
            negotiation_timeout_ms: 30_000,
            auto_answer: true,
            participant_id: None,
            media: MediaConstraints::default(),
        }
    }
}

impl CallConfig {
    /// Reads a JSON config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parse config {}", path.display()))
    }

    pub fn with_env(self) -> Self {
        self.with_overrides(|k| std::env::var(k).ok())
    }

    pub fn with_overrides(mut self, get: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = get("PEERCALL_RELAY_URL").map(|s| s.trim().to_string()).filter(|s| !s.is_empty()) {
            self.relay_url = url;
        }
        if let Some(urls) = get("PEERCALL_ICE_URLS") {
            let urls = urls
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>();
            self.ice_servers = if urls.is_empty() {
                Vec::new()
            } else {
                vec![IceServer {
                    urls,
                    username: None,
                    credential: None,
                }]
            };
        }
        let username = get("PEERCALL_ICE_USERNAME").map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        let credential = get("PEERCALL_ICE_CREDENTIAL").map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        if username.is_some() || credential.is_some() {
            for server in self.ice_servers.iter_mut() {
                if username.is_some() {
                    server.username = username.clone();
                }
                if credential.is_some() {
                    server.credential = credential.clone();
                }
            }
        }
        if let Some(ms) = get("PEERCALL_NEGOTIATION_TIMEOUT_MS").and_then(|v| v.trim().parse::<u64>().ok()) {
            self.negotiation_timeout_ms = ms;
        }
        if let Some(v) = get("PEERCALL_AUTO_ANSWER") {
            self.auto_answer = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Some(id) = get("PEERCALL_PARTICIPANT_ID").map(|s| s.trim().to_string()).filter(|s| !s.is_empty()) {
            self.participant_id = Some(id);
        }
        self
    }

    pub fn negotiation_timeout(&self) -> Option<Duration> {
        if self.negotiation_timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.negotiation_timeout_ms))
        }
    }
}
