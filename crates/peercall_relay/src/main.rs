/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::Result;
use peercall_relay::{serve, RelayConfig};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?),
        )
        .init();

    let cfg = RelayConfig::from_env()?;
    info!(
        bind = %cfg.bind,
        peer_disconnect_notify = cfg.peer_disconnect_notify,
        channel_queue = cfg.channel_queue,
        "starting relay"
    );
    serve(cfg).await
}
