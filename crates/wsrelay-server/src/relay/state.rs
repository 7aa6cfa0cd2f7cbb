//! Relay session state machine.
//!
//! The session is a pure transition function: every occurrence on either leg
//! becomes an [`Event`], and [`RelaySession::handle`] returns the [`Action`]s
//! the driver must perform, in order. No I/O happens here.
//!
//! ```text
//!  Init ──Start──▶ ConnectingUpstream ──UpstreamOpened──▶ Relaying
//!   │                     │                                   │
//!   │ Reject              └──────── close / error ────────────┤
//!   ▼                                                         ▼
//!  Rejected ───────────── both legs closed ──────────────▶ Closing ──▶ Closed
//! ```

use tracing::{debug, trace, warn};
use wsrelay_core::Payload;
use wsrelay_settings::OverflowPolicy;

use super::close::CloseInfo;
use super::queue::PendingQueue;

/// Session-level phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Created, nothing decided yet.
    Init,
    /// Upstream dial in flight; client payloads are queued.
    ConnectingUpstream,
    /// Both legs open; payloads flow straight through.
    Relaying,
    /// One leg ended; waiting for the other to finish closing.
    Closing,
    /// Both legs closed. Terminal.
    Closed,
    /// Precondition failed before any upstream attempt.
    Rejected,
}

/// State of one leg.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LegState {
    /// Handshake not finished (upstream only).
    Connecting,
    /// Usable in both directions.
    Open,
    /// We sent a close frame and are waiting for the echo.
    Closing,
    /// Gone.
    Closed,
}

/// Something that happened on one of the legs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// Request accepted; begin dialing upstream.
    Start,
    /// Request refused before dialing; close the client with this frame.
    Reject(CloseInfo),
    /// Payload received from the client.
    ClientMessage(Payload),
    /// Client sent a close frame (or its stream ended, `None`).
    ClientClosed(Option<CloseInfo>),
    /// Client transport failed.
    ClientError(String),
    /// Upstream handshake completed.
    UpstreamOpened,
    /// A cancelled dial was stopped before its handshake completed.
    DialAborted,
    /// Payload received from upstream.
    UpstreamMessage(Payload),
    /// Upstream sent a close frame (or its stream ended, `None`).
    UpstreamClosed(Option<CloseInfo>),
    /// Upstream dial or transport failed.
    UpstreamError(String),
    /// Closing took longer than allowed.
    CloseTimeout,
    /// The server is shutting down.
    Shutdown,
}

/// Work the driver must carry out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    /// Start the upstream dial.
    Dial,
    /// Abandon the upstream dial. The driver answers with
    /// [`Event::DialAborted`], or [`Event::UpstreamOpened`] when the dial
    /// had already finished.
    CancelDial,
    /// Forward to upstream.
    SendUpstream(Payload),
    /// Forward to the client.
    SendClient(Payload),
    /// Send a close frame to the client (`None` = no status).
    CloseClient(Option<CloseInfo>),
    /// Send a close frame to upstream (`None` = no status).
    CloseUpstream(Option<CloseInfo>),
}

/// Queue bound and overflow behavior.
#[derive(Clone, Copy, Debug)]
pub struct QueueLimits {
    /// Maximum queued payloads; `0` = unbounded.
    pub max_pending: usize,
    /// What to do when full.
    pub overflow: OverflowPolicy,
}

impl Default for QueueLimits {
    fn default() -> Self {
        Self {
            max_pending: 0,
            overflow: OverflowPolicy::CloseSession,
        }
    }
}

/// One client/upstream pairing.
#[derive(Debug)]
pub struct RelaySession {
    phase: Phase,
    client: LegState,
    upstream: LegState,
    pending: PendingQueue,
    overflow: OverflowPolicy,
    /// Close frame for an upstream whose dial finishes after cancellation.
    late_close: Option<CloseInfo>,
    dropped: u64,
    closed_on_overflow: bool,
}

impl RelaySession {
    /// New session in [`Phase::Init`] with the client leg open.
    pub fn new(limits: QueueLimits) -> Self {
        Self {
            phase: Phase::Init,
            client: LegState::Open,
            upstream: LegState::Connecting,
            pending: PendingQueue::new(limits.max_pending),
            overflow: limits.overflow,
            late_close: None,
            dropped: 0,
            closed_on_overflow: false,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Client leg state.
    pub fn client(&self) -> LegState {
        self.client
    }

    /// Upstream leg state.
    pub fn upstream(&self) -> LegState {
        self.upstream
    }

    /// Whether upstream has completed its handshake and the session relays.
    pub fn upstream_ready(&self) -> bool {
        self.phase == Phase::Relaying
    }

    /// Payloads waiting for upstream.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Client payloads discarded by the `dropNewest` policy.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Whether the `closeSession` policy ended this session.
    pub fn closed_on_overflow(&self) -> bool {
        self.closed_on_overflow
    }

    /// Whether the session reached its terminal phase.
    pub fn is_closed(&self) -> bool {
        self.phase == Phase::Closed
    }

    /// Whether the session is winding down (close timeout applies).
    pub fn is_closing(&self) -> bool {
        matches!(self.phase, Phase::Closing | Phase::Rejected)
    }

    /// Apply one event and return the resulting actions.
    pub fn handle(&mut self, event: Event) -> Vec<Action> {
        if self.phase == Phase::Closed {
            trace!(?event, "event after close ignored");
            return Vec::new();
        }

        match event {
            Event::Start => self.on_start(),
            Event::Reject(info) => self.on_reject(info),
            Event::ClientMessage(payload) => self.on_client_message(payload),
            Event::ClientClosed(info) => self.on_client_gone(info.clone(), info),
            Event::ClientError(err) => {
                debug!(error = %err, "client leg failed");
                self.on_client_gone(None, None)
            }
            Event::UpstreamOpened => self.on_upstream_opened(),
            Event::DialAborted => self.on_dial_aborted(),
            Event::UpstreamMessage(payload) => self.on_upstream_message(payload),
            Event::UpstreamClosed(info) => self.on_upstream_closed(info),
            Event::UpstreamError(err) => self.on_upstream_error(&err),
            Event::CloseTimeout => self.on_close_timeout(),
            Event::Shutdown => self.on_shutdown(),
        }
    }

    fn on_start(&mut self) -> Vec<Action> {
        if self.phase != Phase::Init {
            return Vec::new();
        }
        self.phase = Phase::ConnectingUpstream;
        vec![Action::Dial]
    }

    fn on_reject(&mut self, info: CloseInfo) -> Vec<Action> {
        if self.phase != Phase::Init {
            return Vec::new();
        }
        self.phase = Phase::Rejected;
        self.upstream = LegState::Closed;
        self.client = LegState::Closing;
        vec![Action::CloseClient(Some(info))]
    }

    fn on_client_message(&mut self, payload: Payload) -> Vec<Action> {
        match self.phase {
            Phase::Relaying if self.upstream == LegState::Open => {
                vec![Action::SendUpstream(payload)]
            }
            Phase::Init | Phase::ConnectingUpstream => match self.pending.push(payload) {
                Ok(()) => Vec::new(),
                Err(rejected) => self.on_overflow(&rejected),
            },
            _ => {
                trace!(len = payload.len(), "client message after close dropped");
                Vec::new()
            }
        }
    }

    fn on_overflow(&mut self, rejected: &Payload) -> Vec<Action> {
        match self.overflow {
            OverflowPolicy::DropNewest => {
                self.dropped += 1;
                warn!(
                    len = rejected.len(),
                    queued = self.pending.len(),
                    queued_bytes = self.pending.bytes(),
                    "pending queue full, dropping client message"
                );
                Vec::new()
            }
            OverflowPolicy::CloseSession => {
                warn!(
                    queued = self.pending.len(),
                    queued_bytes = self.pending.bytes(),
                    "pending queue full, closing session"
                );
                self.pending.clear();
                self.closed_on_overflow = true;
                let mut actions = Vec::new();
                if self.upstream == LegState::Connecting {
                    actions.push(Action::CancelDial);
                }
                self.client = LegState::Closing;
                actions.push(Action::CloseClient(Some(CloseInfo::queue_overflow())));
                self.enter_closing();
                actions
            }
        }
    }

    /// Client closed or failed. `forward` is what upstream gets.
    fn on_client_gone(
        &mut self,
        remembered: Option<CloseInfo>,
        forward: Option<CloseInfo>,
    ) -> Vec<Action> {
        let previous = self.client;
        self.client = LegState::Closed;

        let mut actions = Vec::new();
        if previous == LegState::Open {
            self.pending.clear();
            match self.upstream {
                LegState::Open => {
                    self.upstream = LegState::Closing;
                    actions.push(Action::CloseUpstream(forward));
                }
                LegState::Connecting => {
                    self.late_close = remembered;
                    actions.push(Action::CancelDial);
                }
                LegState::Closing | LegState::Closed => {}
            }
        }
        self.enter_closing();
        actions
    }

    fn on_upstream_opened(&mut self) -> Vec<Action> {
        match self.phase {
            Phase::ConnectingUpstream => {
                self.upstream = LegState::Open;
                self.phase = Phase::Relaying;
                let actions: Vec<Action> = self.pending.drain().map(Action::SendUpstream).collect();
                debug!(flushed = actions.len(), "upstream open, pending queue flushed");
                actions
            }
            Phase::Closing if self.upstream == LegState::Connecting => {
                // Dial finished after the session began closing.
                debug!(close = ?self.late_close, "closing late upstream");
                self.upstream = LegState::Closing;
                vec![Action::CloseUpstream(self.late_close.take())]
            }
            _ => Vec::new(),
        }
    }

    fn on_dial_aborted(&mut self) -> Vec<Action> {
        if self.upstream == LegState::Connecting {
            self.upstream = LegState::Closed;
            self.enter_closing();
        }
        Vec::new()
    }

    fn on_upstream_message(&mut self, payload: Payload) -> Vec<Action> {
        if self.client == LegState::Open && self.upstream == LegState::Open {
            vec![Action::SendClient(payload)]
        } else {
            trace!(len = payload.len(), "upstream message with client gone dropped");
            Vec::new()
        }
    }

    fn on_upstream_closed(&mut self, info: Option<CloseInfo>) -> Vec<Action> {
        match self.upstream {
            LegState::Open => {
                self.upstream = LegState::Closed;
                self.pending.clear();
                let actions = self.close_client_with(info);
                self.enter_closing();
                actions
            }
            // A dial cannot close before it opens; treat it as a failure.
            LegState::Connecting => self.on_upstream_error("closed during handshake"),
            LegState::Closing | LegState::Closed => {
                self.upstream = LegState::Closed;
                self.enter_closing();
                Vec::new()
            }
        }
    }

    fn on_upstream_error(&mut self, err: &str) -> Vec<Action> {
        let previous = self.upstream;
        self.upstream = LegState::Closed;
        let actions = if matches!(previous, LegState::Open | LegState::Connecting) {
            warn!(error = %err, "upstream leg failed");
            self.pending.clear();
            self.close_client_with(Some(CloseInfo::target_error()))
        } else {
            debug!(error = %err, "upstream error while closing");
            Vec::new()
        };
        self.enter_closing();
        actions
    }

    fn on_close_timeout(&mut self) -> Vec<Action> {
        warn!(client = ?self.client, upstream = ?self.upstream, "close handshake timed out");
        let actions = if self.upstream == LegState::Connecting {
            vec![Action::CancelDial]
        } else {
            Vec::new()
        };
        self.client = LegState::Closed;
        self.upstream = LegState::Closed;
        self.pending.clear();
        self.phase = Phase::Closed;
        actions
    }

    fn on_shutdown(&mut self) -> Vec<Action> {
        if !matches!(
            self.phase,
            Phase::Init | Phase::ConnectingUpstream | Phase::Relaying
        ) {
            return Vec::new();
        }
        let info = CloseInfo::shutting_down();
        self.pending.clear();
        let mut actions = Vec::new();
        match self.upstream {
            LegState::Open => {
                self.upstream = LegState::Closing;
                actions.push(Action::CloseUpstream(Some(info.clone())));
            }
            LegState::Connecting => {
                self.late_close = Some(info.clone());
                actions.push(Action::CancelDial);
            }
            LegState::Closing | LegState::Closed => {}
        }
        actions.extend(self.close_client_with(Some(info)));
        self.enter_closing();
        actions
    }

    /// Close the client if it is still open.
    fn close_client_with(&mut self, info: Option<CloseInfo>) -> Vec<Action> {
        if self.client == LegState::Open {
            self.client = LegState::Closing;
            vec![Action::CloseClient(info)]
        } else {
            Vec::new()
        }
    }

    fn enter_closing(&mut self) {
        if self.client == LegState::Closed && self.upstream == LegState::Closed {
            self.phase = Phase::Closed;
        } else if !matches!(self.phase, Phase::Rejected | Phase::Closed) {
            self.phase = Phase::Closing;
        }
    }
}
