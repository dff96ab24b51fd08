/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use peercall_core::{
    connect_ws, spawn, CallConfig, CallHandle, LoopbackTransport, RtcConnectionFactory, SyntheticMedia,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Call,
    Answer,
    Loopback,
}

fn parse_args() -> Result<(Option<PathBuf>, Mode)> {
    let mut path = None;
    let mut mode = Mode::Call;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let p = args.next().ok_or_else(|| anyhow::anyhow!("--config requires a path"))?;
                path = Some(PathBuf::from(p));
            }
            "call" => mode = Mode::Call,
            "answer" => mode = Mode::Answer,
            "loopback" => mode = Mode::Loopback,
            other => anyhow::bail!("unknown argument: {other} (usage: peercall_client [--config path] [call|answer|loopback])"),
        }
    }
    if path.is_none() {
        if let Ok(p) = std::env::var("PEERCALL_CONFIG") {
            if !p.trim().is_empty() {
                path = Some(PathBuf::from(p));
            }
        }
    }
    Ok((path, mode))
}

fn watch_phases(label: &'static str, call: &CallHandle) {
    let mut rx = call.subscribe();
    tokio::spawn(async move {
        loop {
            let view = rx.borrow_and_update().clone();
            let remote_tracks = view.remote.as_ref().map(|s| s.len()).unwrap_or(0);
            info!(
                call = label,
                phase = %view.phase,
                connecting = view.connecting,
                remote_tracks,
                peer = view.remote_participant.as_deref().unwrap_or("-"),
                "call state"
            );
            if view.phase.is_terminal() || rx.changed().await.is_err() {
                break;
            }
        }
    });
}

/// Runs until every call is terminal or ctrl-c hangs them up.
async fn run_until_done(calls: &[CallHandle]) {
    let all_done = async {
        for c in calls {
            let mut rx = c.subscribe();
            let _ = rx.wait_for(|v| v.phase.is_terminal()).await;
        }
    };
    tokio::select! {
        _ = all_done => {}
        _ = tokio::signal::ctrl_c() => {
            info!("hanging up");
            for c in calls {
                c.end();
            }
            for c in calls {
                if c.wait_terminal(std::time::Duration::from_secs(5)).await.is_none() {
                    warn!(participant = c.participant_id(), "call did not wind down in time");
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?),
        )
        .init();

    let (path, mode) = parse_args()?;
    let cfg = match &path {
        Some(p) => CallConfig::load(p)?,
        None => CallConfig::default(),
    }
    .with_env();
    info!(?mode, relay = %cfg.relay_url, "peercall client {}", peercall_core::version());

    let factory = Arc::new(RtcConnectionFactory);
    let media = Arc::new(SyntheticMedia::default());

    match mode {
        Mode::Call | Mode::Answer => {
            let transport = connect_ws(&cfg.relay_url)
                .await
                .with_context(|| format!("relay {}", cfg.relay_url))?;
            let call = spawn(cfg, transport, media, factory);
            info!(participant = call.participant_id(), "joined relay");
            watch_phases("local", &call);
            if mode == Mode::Call {
                call.start();
            }
            run_until_done(&[call]).await;
        }
        Mode::Loopback => {
            let (a, b) = LoopbackTransport::pair();
            let mut callee_cfg = cfg.clone();
            callee_cfg.participant_id = None;
            let caller = spawn(cfg, a, media.clone(), factory.clone());
            let callee = spawn(callee_cfg, b, media, factory);
            watch_phases("caller", &caller);
            watch_phases("callee", &callee);
            caller.start();
            run_until_done(&[caller, callee]).await;
        }
    }
    Ok(())
}
