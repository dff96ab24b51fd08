/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Per-participant call negotiation.
//!
//! Every input (user commands, inbound signaling, connection callbacks, the
//! negotiation timer) is a [`SessionEvent`] on one ordered queue, drained by a
//! single driver task that owns all session state. The presentation layer
//! talks to it through a cloneable [`CallHandle`] and observes a
//! [`CallView`] published on a `watch` channel.

use peercall_protocol::{IceCandidate, SessionDescription, SignalBody, SignalKind, SignalingMessage};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::CallConfig;
use crate::connection::{ConnectionEvents, ConnectionFactory, PeerConnection};
use crate::error::NegotiationError;
use crate::media::{MediaDevices, MediaStream, MediaTrack};
use crate::transport::{SignalSink, Transport};

/// Candidates kept while no session is bound yet.
const MAX_EARLY_CANDIDATES: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Idle,
    AcquiringMedia,
    Negotiating,
    Connected,
    Ended,
    Failed(NegotiationError),
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Ended | Phase::Failed(_))
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn allows(&self, next: &Phase) -> bool {
        use Phase::*;
        matches!(
            (self, next),
            (Idle, AcquiringMedia)
                | (Idle, Ended)
                | (AcquiringMedia, Negotiating)
                | (AcquiringMedia, Failed(_))
                | (AcquiringMedia, Ended)
                | (Negotiating, Connected)
                | (Negotiating, Failed(_))
                | (Negotiating, Ended)
                | (Connected, Ended)
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::AcquiringMedia => "acquiring_media",
            Phase::Negotiating => "negotiating",
            Phase::Connected => "connected",
            Phase::Ended => "ended",
            Phase::Failed(_) => "failed",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Failed(e) => write!(f, "failed ({}: {e})", e.code()),
            other => f.write_str(other.name()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

/// Snapshot handed to the presentation layer.
#[derive(Debug, Clone)]
pub struct CallView {
    pub phase: Phase,
    pub role: Option<Role>,
    pub session_id: Option<String>,
    pub remote_participant: Option<String>,
    /// True while media is being acquired or the call is negotiating.
    pub connecting: bool,
    pub local: Option<MediaStream>,
    pub remote: Option<MediaStream>,
}

impl Default for CallView {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            role: None,
            session_id: None,
            remote_participant: None,
            connecting: false,
            local: None,
            remote: None,
        }
    }
}

pub(crate) enum SessionEvent {
    Start,
    End,
    Signal(SignalingMessage),
    LocalCandidate(IceCandidate),
    RemoteTrack { stream_id: String, track: MediaTrack },
    Timeout,
    TransportClosed,
}

/// Presentation-side handle of one call. Clones control the same session.
#[derive(Clone)]
pub struct CallHandle {
    tx: mpsc::UnboundedSender<SessionEvent>,
    cancel: CancellationToken,
    view: watch::Receiver<CallView>,
    participant: Arc<str>,
}

impl CallHandle {
    /// Places the call: acquire media, then offer to whoever listens.
    pub fn start(&self) {
        let _ = self.tx.send(SessionEvent::Start);
    }

    /// Hangs up. Safe at any phase and idempotent; an in-flight step is abandoned.
    pub fn end(&self) {
        self.cancel.cancel();
        let _ = self.tx.send(SessionEvent::End);
    }

    pub fn phase(&self) -> Phase {
        self.view.borrow().phase.clone()
    }

    pub fn view(&self) -> CallView {
        self.view.borrow().clone()
    }

    pub fn local_stream(&self) -> Option<MediaStream> {
        self.view.borrow().local.clone()
    }

    pub fn remote_stream(&self) -> Option<MediaStream> {
        self.view.borrow().remote.clone()
    }

    pub fn connecting(&self) -> bool {
        self.view.borrow().connecting
    }

    pub fn participant_id(&self) -> &str {
        &self.participant
    }

    pub fn subscribe(&self) -> watch::Receiver<CallView> {
        self.view.clone()
    }

    /// Waits until `pred` holds for the published view, or `timeout` elapses.
    pub async fn wait_for(
        &self,
        pred: impl Fn(&CallView) -> bool,
        timeout: Duration,
    ) -> Option<CallView> {
        let mut rx = self.view.clone();
        let waited = tokio::time::timeout(timeout, async move {
            rx.wait_for(|v| pred(v)).await.map(|v| v.clone()).ok()
        })
        .await;
        waited.ok().flatten()
    }

    pub async fn wait_terminal(&self, timeout: Duration) -> Option<Phase> {
        self.wait_for(|v| v.phase.is_terminal(), timeout)
            .await
            .map(|v| v.phase)
    }
}

/// Spawns the driver for one single-use call session and returns its handle.
pub fn spawn(
    cfg: CallConfig,
    transport: Transport,
    devices: Arc<dyn MediaDevices>,
    factory: Arc<dyn ConnectionFactory>,
) -> CallHandle {
    let me = cfg.participant_id.clone().unwrap_or_else(random_id);
    let (tx, rx) = mpsc::unbounded_channel();
    let (view_tx, view_rx) = watch::channel(CallView::default());
    let cancel = CancellationToken::new();
    let done = CancellationToken::new();

    let Transport { sink, mut inbound } = transport;
    {
        let tx = tx.clone();
        let done = done.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = done.cancelled() => break,
                    msg = inbound.recv() => match msg {
                        Some(m) => {
                            if tx.send(SessionEvent::Signal(m)).is_err() {
                                break;
                            }
                        }
                        None => {
                            let _ = tx.send(SessionEvent::TransportClosed);
                            break;
                        }
                    },
                }
            }
        });
    }

    let session = Session {
        cfg,
        me: me.clone(),
        sink,
        devices,
        factory,
        events: tx.clone(),
        step: cancel.child_token(),
        cancel: cancel.clone(),
        view: view_tx,
        phase: Phase::Idle,
        role: None,
        session_id: None,
        remote: None,
        local: None,
        remote_stream: None,
        conn: None,
        remote_described: false,
        answered: false,
        pending: Vec::new(),
        early: Vec::new(),
        timer: None,
        torn_down: false,
    };
    tokio::spawn(async move {
        session.run(rx).await;
        done.cancel();
    });

    CallHandle {
        tx,
        cancel,
        view: view_rx,
        participant: Arc::from(me.as_str()),
    }
}

struct Session {
    cfg: CallConfig,
    me: String,
    sink: Arc<dyn SignalSink>,
    devices: Arc<dyn MediaDevices>,
    factory: Arc<dyn ConnectionFactory>,
    events: mpsc::UnboundedSender<SessionEvent>,
    cancel: CancellationToken,
    /// Child of `cancel`; also cancelled when the negotiation deadline passes.
    step: CancellationToken,
    view: watch::Sender<CallView>,

    phase: Phase,
    role: Option<Role>,
    session_id: Option<String>,
    remote: Option<String>,
    local: Option<MediaStream>,
    remote_stream: Option<MediaStream>,
    conn: Option<Arc<dyn PeerConnection>>,
    remote_described: bool,
    answered: bool,
    /// Remote candidates waiting for the remote description, with their sender.
    pending: Vec<(String, IceCandidate)>,
    /// Candidates seen while idle, before any offer bound a session.
    early: Vec<SignalingMessage>,
    timer: Option<JoinHandle<()>>,
    torn_down: bool,
}

/// Races `fut` against `step`; `None` means the call was ended or the
/// negotiation deadline passed meanwhile.
async fn guarded<T>(step: &CancellationToken, fut: impl Future<Output = T>) -> Option<T> {
    tokio::select! {
        biased;
        _ = step.cancelled() => None,
        out = fut => Some(out),
    }
}

impl Session {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SessionEvent>) {
        info!(participant = %self.me, "call session ready");
        loop {
            let ev = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => SessionEvent::End,
                _ = self.step.cancelled(), if self.timer.is_some() => SessionEvent::Timeout,
                ev = rx.recv() => match ev {
                    Some(ev) => ev,
                    None => break,
                },
            };
            self.handle(ev).await;
            if self.phase.is_terminal() {
                break;
            }
        }
        self.teardown().await;
        debug!(participant = %self.me, phase = %self.phase, "call session finished");
    }

    async fn handle(&mut self, ev: SessionEvent) {
        match ev {
            SessionEvent::Start => self.on_start().await,
            SessionEvent::End => self.end_session(true).await,
            SessionEvent::Signal(msg) => self.on_signal(msg).await,
            SessionEvent::LocalCandidate(c) => self.on_local_candidate(c),
            SessionEvent::RemoteTrack { stream_id, track } => self.on_remote_track(&stream_id, track),
            SessionEvent::Timeout => self.on_timeout().await,
            SessionEvent::TransportClosed => self.on_transport_closed().await,
        }
    }

    async fn on_start(&mut self) {
        if self.phase != Phase::Idle || self.role.is_some() {
            warn!(phase = %self.phase, "start ignored: call already in progress");
            return;
        }
        let sid = random_id();
        info!(session = %sid, "placing call");
        self.role = Some(Role::Initiator);
        self.session_id = Some(sid);
        self.early.clear();
        self.set_phase(Phase::AcquiringMedia);
        self.arm_timer();

        let Some(stream) = self.acquire_media().await else { return };
        let Some(conn) = self.open_connection().await else { return };
        if !self.attach_tracks(&conn, &stream).await {
            return;
        }

        let offer = match guarded(&self.step, conn.create_offer()).await {
            None => return,
            Some(Ok(o)) => o,
            Some(Err(e)) => {
                self.fail(NegotiationError::OfferCreation(format!("{e:#}"))).await;
                return;
            }
        };
        match guarded(&self.step, conn.set_local_description(offer.clone())).await {
            None => return,
            Some(Ok(())) => {}
            Some(Err(e)) => {
                self.fail(NegotiationError::OfferCreation(format!("{e:#}"))).await;
                return;
            }
        }
        let msg = SignalingMessage::offer(self.sid(), &self.me, &offer);
        self.send_description(msg).await;
    }

    async fn on_signal(&mut self, msg: SignalingMessage) {
        if msg.to.as_deref().is_some_and(|to| to != self.me) {
            debug!(kind = %msg.kind(), "dropping message addressed to someone else");
            return;
        }
        if !msg.from.is_empty() && msg.from == self.me {
            return;
        }
        match msg.kind() {
            SignalKind::Offer => self.on_offer(msg).await,
            SignalKind::Answer => self.on_answer(msg).await,
            SignalKind::Candidate => self.on_remote_candidate(msg).await,
            SignalKind::Bye => self.on_bye(msg).await,
        }
    }

    async fn on_offer(&mut self, msg: SignalingMessage) {
        if self.role.is_some() {
            warn!(from = %msg.from, session = %msg.session_id, "ignoring offer: call already has a role");
            return;
        }
        if !self.cfg.auto_answer {
            debug!(from = %msg.from, "ignoring offer: auto-answer disabled");
            return;
        }
        let Some(desc) = msg.description() else { return };

        info!(from = %msg.from, session = %msg.session_id, "answering incoming call");
        self.role = Some(Role::Responder);
        self.session_id = Some(msg.session_id.clone());
        if !msg.from.is_empty() {
            self.remote = Some(msg.from.clone());
        }
        for early in std::mem::take(&mut self.early) {
            if early.session_id == msg.session_id && early.from == msg.from {
                if let SignalBody::Candidate { candidate } = early.body {
                    self.pending.push((early.from, candidate));
                }
            }
        }
        self.set_phase(Phase::AcquiringMedia);
        self.arm_timer();

        let Some(stream) = self.acquire_media().await else { return };
        let Some(conn) = self.open_connection().await else { return };
        if !self.apply_remote_description(&conn, desc).await {
            return;
        }
        if !self.attach_tracks(&conn, &stream).await {
            return;
        }

        let answer = match guarded(&self.step, conn.create_answer()).await {
            None => return,
            Some(Ok(a)) => a,
            Some(Err(e)) => {
                self.fail(NegotiationError::AnswerCreation(format!("{e:#}"))).await;
                return;
            }
        };
        match guarded(&self.step, conn.set_local_description(answer.clone())).await {
            None => return,
            Some(Ok(())) => {}
            Some(Err(e)) => {
                self.fail(NegotiationError::AnswerCreation(format!("{e:#}"))).await;
                return;
            }
        }
        let msg = SignalingMessage::answer(self.sid(), &self.me, &answer).to(self.remote.as_deref());
        self.send_description(msg).await;
    }

    async fn on_answer(&mut self, msg: SignalingMessage) {
        if self.role != Some(Role::Initiator) || !self.same_session(&msg) {
            debug!(from = %msg.from, "ignoring answer for another session");
            return;
        }
        if self.remote.as_deref().is_some_and(|r| r != msg.from) {
            debug!(from = %msg.from, "ignoring answer from a third party");
            return;
        }
        if self.answered {
            warn!(from = %msg.from, "duplicate answer ignored");
            return;
        }
        let Some(conn) = self.conn.clone() else {
            debug!("answer before an offer went out; ignored");
            return;
        };
        let Some(desc) = msg.description() else { return };

        self.answered = true;
        if !msg.from.is_empty() {
            info!(peer = %msg.from, "call answered");
            self.remote = Some(msg.from.clone());
            let peer = msg.from.clone();
            self.pending.retain(|(from, _)| *from == peer);
        }
        self.apply_remote_description(&conn, desc).await;
    }

    async fn on_remote_candidate(&mut self, msg: SignalingMessage) {
        let candidate = match &msg.body {
            SignalBody::Candidate { candidate } => candidate.clone(),
            _ => return,
        };
        if self.role.is_none() {
            if self.early.len() < MAX_EARLY_CANDIDATES {
                self.early.push(msg);
            } else {
                debug!("early candidate buffer full; dropping candidate");
            }
            return;
        }
        if !self.same_session(&msg) || self.remote.as_deref().is_some_and(|r| r != msg.from) {
            debug!(from = %msg.from, "ignoring candidate for another session");
            return;
        }
        let conn = match &self.conn {
            Some(c) if self.remote_described => c.clone(),
            _ => {
                self.pending.push((msg.from, candidate));
                return;
            }
        };
        match guarded(&self.step, conn.add_ice_candidate(candidate)).await {
            None | Some(Ok(())) => {}
            Some(Err(e)) => {
                self.fail(NegotiationError::CandidateApplication(format!("{e:#}"))).await;
            }
        }
    }

    async fn on_bye(&mut self, msg: SignalingMessage) {
        let reason = match &msg.body {
            SignalBody::Bye { reason } => reason.clone(),
            _ => None,
        };
        let from_peer = self.remote.as_deref().is_some_and(|r| r == msg.from);
        let session_ok = msg.session_id.is_empty() || self.same_session(&msg);
        if !from_peer || !session_ok {
            debug!(from = %msg.from, "ignoring bye from outside the call");
            return;
        }
        info!(peer = %msg.from, reason = reason.as_deref().unwrap_or(""), "remote hung up");
        self.end_session(false).await;
    }

    fn on_local_candidate(&mut self, candidate: IceCandidate) {
        if self.phase.is_terminal() {
            return;
        }
        let Some(sid) = self.session_id.clone() else { return };
        let msg = SignalingMessage::candidate(&sid, &self.me, candidate).to(self.remote.as_deref());
        if let Err(e) = self.sink.send(&msg) {
            debug!("candidate not sent: {e}");
        }
    }

    fn on_remote_track(&mut self, stream_id: &str, track: MediaTrack) {
        if self.phase.is_terminal() {
            track.stop();
            return;
        }
        debug!(track = track.id(), stream = stream_id, "remote track");
        self.remote_stream
            .get_or_insert_with(|| MediaStream::new(stream_id))
            .add_track(track);
        // A passed deadline wins over media that arrives after it.
        if self.phase == Phase::Negotiating && !self.step.is_cancelled() {
            if let Some(t) = self.timer.take() {
                t.abort();
            }
            self.set_phase(Phase::Connected);
        } else {
            self.publish();
        }
    }

    async fn on_timeout(&mut self) {
        self.timer = None;
        if matches!(self.phase, Phase::AcquiringMedia | Phase::Negotiating) {
            self.fail(NegotiationError::NegotiationTimeout(self.cfg.negotiation_timeout_ms))
                .await;
        }
    }

    async fn on_transport_closed(&mut self) {
        if matches!(self.phase, Phase::AcquiringMedia | Phase::Negotiating) {
            self.fail(NegotiationError::Transport("signaling channel closed".to_string()))
                .await;
        } else {
            warn!(phase = %self.phase, "signaling channel closed");
        }
    }

    async fn acquire_media(&mut self) -> Option<MediaStream> {
        let devices = self.devices.clone();
        let constraints = self.cfg.media.clone();
        match guarded(&self.step, devices.acquire(&constraints)).await {
            None => None,
            Some(Err(e)) => {
                self.fail(e.into()).await;
                None
            }
            Some(Ok(stream)) => {
                info!(tracks = stream.len(), "local media acquired");
                self.local = Some(stream.clone());
                self.set_phase(Phase::Negotiating);
                Some(stream)
            }
        }
    }

    async fn open_connection(&mut self) -> Option<Arc<dyn PeerConnection>> {
        let factory = self.factory.clone();
        let servers = self.cfg.ice_servers.clone();
        let events = ConnectionEvents::new(self.events.clone());
        match guarded(&self.step, factory.create(&servers, events)).await {
            None => None,
            Some(Err(e)) => {
                let err = self.setup_error(format!("{e:#}"));
                self.fail(err).await;
                None
            }
            Some(Ok(conn)) => {
                self.conn = Some(conn.clone());
                Some(conn)
            }
        }
    }

    async fn attach_tracks(&mut self, conn: &Arc<dyn PeerConnection>, stream: &MediaStream) -> bool {
        for track in stream.tracks() {
            match guarded(&self.step, conn.add_track(&track)).await {
                None => return false,
                Some(Ok(())) => {}
                Some(Err(e)) => {
                    let err = self.setup_error(format!("{e:#}"));
                    self.fail(err).await;
                    return false;
                }
            }
        }
        true
    }

    /// Sets the remote description, then drains buffered candidates in order.
    async fn apply_remote_description(
        &mut self,
        conn: &Arc<dyn PeerConnection>,
        desc: SessionDescription,
    ) -> bool {
        match guarded(&self.step, conn.set_remote_description(desc)).await {
            None => return false,
            Some(Ok(())) => {}
            Some(Err(e)) => {
                self.fail(NegotiationError::RemoteDescription(format!("{e:#}"))).await;
                return false;
            }
        }
        self.remote_described = true;

        let buffered = std::mem::take(&mut self.pending);
        if !buffered.is_empty() {
            debug!(count = buffered.len(), "applying buffered candidates");
        }
        for (_, candidate) in buffered {
            match guarded(&self.step, conn.add_ice_candidate(candidate)).await {
                None => return false,
                Some(Ok(())) => {}
                Some(Err(e)) => {
                    self.fail(NegotiationError::CandidateApplication(format!("{e:#}"))).await;
                    return false;
                }
            }
        }
        true
    }

    async fn send_description(&mut self, msg: SignalingMessage) {
        if let Err(e) = self.sink.send(&msg) {
            self.fail(NegotiationError::Transport(e.to_string())).await;
        }
    }

    fn setup_error(&self, msg: String) -> NegotiationError {
        match self.role {
            Some(Role::Responder) => NegotiationError::AnswerCreation(msg),
            _ => NegotiationError::OfferCreation(msg),
        }
    }

    fn same_session(&self, msg: &SignalingMessage) -> bool {
        self.session_id.as_deref() == Some(msg.session_id.as_str())
    }

    fn sid(&self) -> &str {
        self.session_id.as_deref().unwrap_or_default()
    }

    fn arm_timer(&mut self) {
        let Some(after) = self.cfg.negotiation_timeout() else { return };
        let step = self.step.clone();
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            step.cancel();
        }));
    }

    async fn fail(&mut self, err: NegotiationError) {
        let next = Phase::Failed(err.clone());
        if !self.phase.allows(&next) {
            warn!(phase = %self.phase, "{}: {err}", err.code());
            return;
        }
        warn!(code = err.code(), "call failed: {err}");
        self.teardown().await;
        self.set_phase(next);
    }

    async fn end_session(&mut self, notify_peer: bool) {
        if self.phase.is_terminal() {
            return;
        }
        if notify_peer {
            if let (Some(_), Some(sid)) = (self.role, self.session_id.as_deref()) {
                let bye = SignalingMessage::bye(sid, &self.me, Some("hangup")).to(self.remote.as_deref());
                if let Err(e) = self.sink.send(&bye) {
                    debug!("bye not sent: {e}");
                }
            }
        }
        self.teardown().await;
        self.set_phase(Phase::Ended);
    }

    async fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        if let Some(t) = self.timer.take() {
            t.abort();
        }
        let stopped_local = self.local.as_ref().map(|s| s.stop_all()).unwrap_or(0);
        let stopped_remote = self.remote_stream.as_ref().map(|s| s.stop_all()).unwrap_or(0);
        if let Some(conn) = self.conn.take() {
            if let Err(e) = conn.close().await {
                warn!("closing connection failed: {e:#}");
            }
        }
        self.pending.clear();
        self.early.clear();
        debug!(stopped_local, stopped_remote, "call resources released");
    }

    fn set_phase(&mut self, next: Phase) {
        if !self.phase.allows(&next) {
            warn!(from = %self.phase, to = %next, "illegal phase change ignored");
            return;
        }
        info!(participant = %self.me, from = %self.phase, to = %next, "phase");
        self.phase = next;
        self.publish();
    }

    fn publish(&self) {
        self.view.send_replace(CallView {
            phase: self.phase.clone(),
            role: self.role,
            session_id: self.session_id.clone(),
            remote_participant: self.remote.clone(),
            connecting: matches!(self.phase, Phase::AcquiringMedia | Phase::Negotiating),
            local: self.local.clone(),
            remote: self.remote_stream.clone(),
        });
    }
}

pub(crate) fn random_id() -> String {
    let mut b = [0u8; 16];
    use rand::RngCore as _;
    rand::rngs::OsRng.fill_bytes(&mut b);
    b.iter().map(|v| format!("{v:02x}")).collect()
}
